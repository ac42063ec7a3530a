//! Builds and submits mode-specific job-creation requests.
//!
//! [`JobSubmitter::build_request`] checks every precondition and produces
//! the request without any I/O; [`JobSubmitter::submit`] adds exactly one
//! call to the job-creation endpoint. A request that fails a precondition
//! never reaches the backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use ocforge_backend::messages::{
    AvatarJobRequest, BackgroundJobRequest, CreateJobRequest, PortraitJobRequest, TaskJobRequest,
};
use ocforge_core::archive::Archive;
use ocforge_core::generation::{
    GenerationParams, JobId, JobMode, DEFAULT_DESIGN_SHEET_MODEL, DEFAULT_FULL_BODY_ASPECT,
    DEFAULT_WIDE_ASPECT, DESIGN_SHEET_ASPECT, DESIGN_SHEET_BATCH_SIZE,
};
use ocforge_core::prompt_template::{
    character_info, resolve_prompt_template, CHARACTER_INFO_KEY, DEFAULT_DESIGN_SHEET_TEMPLATE,
    DEFAULT_EVENT_TEMPLATE, DEFAULT_LOCALE, LOCALE_KEY,
};
use ocforge_core::types::CharacterId;

use crate::error::{GenerationError, PreconditionError};
use crate::ports::GenerationBackend;

/// `gen_type` values understood by the backend.
pub mod gen_type {
    pub const FULL_BODY: &str = "full_body";
    pub const DESIGN_SHEET: &str = "design_sheet";
    pub const EVENT: &str = "oc_events";
}

/// Visibility of create-task jobs unless configured otherwise.
pub const DEFAULT_VISIBILITY_LEVEL: &str = "public";

/// Deployment-level request settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionDefaults {
    /// Model for create-task jobs (design sheets and event illustrations).
    pub design_sheet_model: String,
    pub design_sheet_template: String,
    pub event_template: String,
    pub visibility_level: String,
}

impl Default for SubmissionDefaults {
    fn default() -> Self {
        Self {
            design_sheet_model: DEFAULT_DESIGN_SHEET_MODEL.to_string(),
            design_sheet_template: DEFAULT_DESIGN_SHEET_TEMPLATE.to_string(),
            event_template: DEFAULT_EVENT_TEMPLATE.to_string(),
            visibility_level: DEFAULT_VISIBILITY_LEVEL.to_string(),
        }
    }
}

/// Character state a request is built against.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionContext<'a> {
    pub character_id: CharacterId,
    pub archive: &'a Archive,
    /// Already-resolved conditioning image URL, if any.
    pub reference_url: Option<&'a str>,
}

pub struct JobSubmitter<B: GenerationBackend> {
    backend: Arc<B>,
    defaults: SubmissionDefaults,
}

impl<B: GenerationBackend> JobSubmitter<B> {
    pub fn new(backend: Arc<B>, defaults: SubmissionDefaults) -> Self {
        Self { backend, defaults }
    }

    pub fn defaults(&self) -> &SubmissionDefaults {
        &self.defaults
    }

    /// Validate and submit. On success the backend-issued job id is
    /// returned; nothing is sent when a precondition fails.
    pub async fn submit(
        &self,
        mode: JobMode,
        params: &GenerationParams,
        ctx: SubmissionContext<'_>,
    ) -> Result<JobId, GenerationError> {
        let request = self.build_request(mode, params, ctx)?;
        let job_id = self
            .backend
            .create_job(&request)
            .await
            .map_err(GenerationError::Submission)?;

        tracing::info!(
            job_id = %job_id,
            mode = %mode,
            character_id = %ctx.character_id,
            conditioned = !request.reference_urls().is_empty(),
            "Generation job submitted",
        );
        Ok(job_id)
    }

    /// Build the request for `mode` without contacting the backend.
    pub fn build_request(
        &self,
        mode: JobMode,
        params: &GenerationParams,
        ctx: SubmissionContext<'_>,
    ) -> Result<CreateJobRequest, GenerationError> {
        let character_uuid = ctx.character_id.to_string();
        let reference = ctx.reference_url.map(str::trim).filter(|r| !r.is_empty());

        let request = match mode {
            JobMode::Avatar => {
                let reference = reference.ok_or(PreconditionError::MissingPortrait { mode })?;
                CreateJobRequest::Avatar(AvatarJobRequest {
                    character_uuid,
                    reference_image_urls: vec![reference.to_string()],
                    character_data: character_data(params),
                })
            }
            JobMode::FullBody => {
                check_capacity(ctx.archive)?;
                CreateJobRequest::Portrait(PortraitJobRequest {
                    character_uuid,
                    gen_type: gen_type::FULL_BODY.to_string(),
                    character_data: character_data(params),
                    aspect_ratio: aspect_or(params, DEFAULT_FULL_BODY_ASPECT),
                    art_style: non_blank(params.art_style.as_deref()),
                    prompt: params.prompt_text().map(str::to_string),
                    reference_image_urls: reference.map(|r| vec![r.to_string()]),
                })
            }
            JobMode::DesignSheet => {
                check_capacity(ctx.archive)?;
                let reference = reference.ok_or(PreconditionError::MissingPortrait { mode })?;
                let prompt = self.render_template(mode, params, &self.defaults.design_sheet_template)?;
                CreateJobRequest::Task(TaskJobRequest {
                    gen_type: gen_type::DESIGN_SHEET.to_string(),
                    prompt,
                    model_uuid: self.defaults.design_sheet_model.clone(),
                    batch_size: DESIGN_SHEET_BATCH_SIZE,
                    aspect_ratio: DESIGN_SHEET_ASPECT.to_string(),
                    image_resolution: DESIGN_SHEET_ASPECT.to_string(),
                    character_uuids: vec![character_uuid],
                    reference_image_urls: Some(vec![reference.to_string()]),
                    visibility_level: self.defaults.visibility_level.clone(),
                })
            }
            JobMode::Background => {
                let scene = non_blank(params.scene_description.as_deref())
                    .or_else(|| params.prompt_text().map(str::to_string))
                    .ok_or(PreconditionError::MissingSceneDescription)?;
                CreateJobRequest::Background(BackgroundJobRequest {
                    character_uuid,
                    scene_description: scene,
                    aspect_ratio: aspect_or(params, DEFAULT_WIDE_ASPECT),
                    style: non_blank(params.art_style.as_deref()),
                    reference_image_urls: reference.map(|r| vec![r.to_string()]),
                })
            }
            JobMode::Event => {
                let prompt = self.render_template(mode, params, &self.defaults.event_template)?;
                let aspect = aspect_or(params, DEFAULT_WIDE_ASPECT);
                CreateJobRequest::Task(TaskJobRequest {
                    gen_type: gen_type::EVENT.to_string(),
                    prompt,
                    model_uuid: self.defaults.design_sheet_model.clone(),
                    batch_size: DESIGN_SHEET_BATCH_SIZE,
                    image_resolution: aspect.clone(),
                    aspect_ratio: aspect,
                    character_uuids: vec![character_uuid],
                    reference_image_urls: reference.map(|r| vec![r.to_string()]),
                    visibility_level: self.defaults.visibility_level.clone(),
                })
            }
        };
        Ok(request)
    }

    /// Fill the request's template, or the configured default for the
    /// mode, from the params' template values.
    fn render_template(
        &self,
        mode: JobMode,
        params: &GenerationParams,
        default_template: &str,
    ) -> Result<String, PreconditionError> {
        let template = params
            .template
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| Some(default_template.trim()).filter(|t| !t.is_empty()))
            .ok_or(PreconditionError::MissingTemplate { mode })?;

        let mut values = params.template_values();
        if let Some(info) = character_info(&params.profile) {
            values.entry(CHARACTER_INFO_KEY.to_string()).or_insert(info);
        }
        values
            .entry(LOCALE_KEY.to_string())
            .or_insert_with(|| DEFAULT_LOCALE.to_string());

        let resolved = resolve_prompt_template(template, &values);
        if !resolved.is_complete() {
            return Err(PreconditionError::UnresolvedPlaceholders {
                mode,
                keys: resolved.unresolved_placeholders,
            });
        }
        Ok(resolved.text)
    }
}

fn check_capacity(archive: &Archive) -> Result<(), GenerationError> {
    if archive.is_full() {
        return Err(GenerationError::Capacity {
            capacity: archive.capacity(),
        });
    }
    Ok(())
}

fn character_data(params: &GenerationParams) -> BTreeMap<String, String> {
    params
        .profile
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| (k.clone(), v.trim().to_string()))
        .collect()
}

fn aspect_or(params: &GenerationParams, default: &str) -> String {
    non_blank(params.aspect_ratio.as_deref()).unwrap_or_else(|| default.to_string())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use ocforge_backend::messages::{FailureReport, StatusReport};
    use ocforge_core::archive::DEFAULT_ARCHIVE_CAPACITY;
    use ocforge_core::media::{MediaEntry, MediaKind};

    use super::*;
    use crate::error::BackendError;

    const PORTRAIT_URL: &str = "https://cdn.example.com/portrait.png";

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GenerationBackend for CountingBackend {
        async fn create_job(&self, _request: &CreateJobRequest) -> Result<JobId, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(JobId::new("job-1").unwrap())
        }

        async fn job_status(&self, _job_id: &JobId) -> Result<StatusReport, BackendError> {
            Err(BackendError::Unavailable("unused".into()))
        }

        async fn report_failure(&self, _report: &FailureReport) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn submitter() -> (JobSubmitter<CountingBackend>, Arc<CountingBackend>) {
        let backend = Arc::new(CountingBackend::default());
        (
            JobSubmitter::new(Arc::clone(&backend), SubmissionDefaults::default()),
            backend,
        )
    }

    fn ctx<'a>(archive: &'a Archive, reference: Option<&'a str>) -> SubmissionContext<'a> {
        SubmissionContext {
            character_id: CharacterId::nil(),
            archive,
            reference_url: reference,
        }
    }

    fn full_archive() -> Archive {
        let mut archive = Archive::new(2);
        archive
            .add(MediaEntry::new("a", "https://cdn/a.png", MediaKind::Generated))
            .unwrap();
        archive
            .add(MediaEntry::new("b", "https://cdn/b.png", MediaKind::Generated))
            .unwrap();
        archive
    }

    #[tokio::test]
    async fn avatar_without_portrait_never_reaches_backend() {
        let (submitter, backend) = submitter();
        let archive = Archive::default();
        let err = submitter
            .submit(JobMode::Avatar, &GenerationParams::default(), ctx(&archive, None))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GenerationError::Precondition(PreconditionError::MissingPortrait { mode: JobMode::Avatar })
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_submit_calls_backend_once() {
        let (submitter, backend) = submitter();
        let archive = Archive::default();
        let job_id = submitter
            .submit(
                JobMode::Avatar,
                &GenerationParams::default(),
                ctx(&archive, Some(PORTRAIT_URL)),
            )
            .await
            .unwrap();
        assert_eq!(job_id.as_str(), "job-1");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_body_defaults_to_portrait_aspect() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let params = GenerationParams::default()
            .with_prompt("standing in the rain")
            .with_profile_value("hair", "silver");
        let request = submitter
            .build_request(JobMode::FullBody, &params, ctx(&archive, None))
            .unwrap();
        assert_matches!(request, CreateJobRequest::Portrait(r) => {
            assert_eq!(r.gen_type, "full_body");
            assert_eq!(r.aspect_ratio, "3:4");
            assert_eq!(r.prompt.as_deref(), Some("standing in the rain"));
            assert_eq!(r.character_data.get("hair").map(String::as_str), Some("silver"));
            assert!(r.reference_image_urls.is_none());
        });
    }

    #[test]
    fn full_archive_refuses_archive_bound_modes() {
        let (submitter, _) = submitter();
        let archive = full_archive();
        for mode in [JobMode::FullBody, JobMode::DesignSheet] {
            let err = submitter
                .build_request(mode, &GenerationParams::default(), ctx(&archive, Some(PORTRAIT_URL)))
                .unwrap_err();
            assert_matches!(err, GenerationError::Capacity { capacity: 2 });
        }
        // Non-archive modes are unaffected.
        assert!(submitter
            .build_request(JobMode::Avatar, &GenerationParams::default(), ctx(&archive, Some(PORTRAIT_URL)))
            .is_ok());
    }

    #[test]
    fn design_sheet_fills_template_from_profile() {
        let (submitter, _) = submitter();
        let archive = Archive::new(DEFAULT_ARCHIVE_CAPACITY);
        let params = GenerationParams::default().with_profile_value("eye_color", "green");
        let request = submitter
            .build_request(JobMode::DesignSheet, &params, ctx(&archive, Some(PORTRAIT_URL)))
            .unwrap();
        assert_matches!(request, CreateJobRequest::Task(r) => {
            assert_eq!(r.gen_type, "design_sheet");
            assert_eq!(r.model_uuid, "google/nano-banana");
            assert_eq!(r.batch_size, 1);
            assert_eq!(r.aspect_ratio, "16:9");
            assert_eq!(r.image_resolution, "16:9");
            assert_eq!(r.visibility_level, "public");
            assert_eq!(r.character_uuids, vec![CharacterId::nil().to_string()]);
            assert_eq!(r.reference_image_urls, Some(vec![PORTRAIT_URL.to_string()]));
            assert!(r.prompt.contains("eye color: green"));
            assert!(r.prompt.contains("written in en"));
        });
    }

    #[test]
    fn design_sheet_reports_missing_placeholders() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let params = GenerationParams::default().with_template("Sheet for {character_info} in {pose}");
        let err = submitter
            .build_request(JobMode::DesignSheet, &params, ctx(&archive, Some(PORTRAIT_URL)))
            .unwrap_err();
        assert_matches!(
            err,
            GenerationError::Precondition(PreconditionError::UnresolvedPlaceholders { keys, .. })
                if keys == vec!["character_info".to_string(), "pose".to_string()]
        );
    }

    #[test]
    fn design_sheet_needs_a_template() {
        let backend = Arc::new(CountingBackend::default());
        let submitter = JobSubmitter::new(
            backend,
            SubmissionDefaults {
                design_sheet_template: "   ".into(),
                ..Default::default()
            },
        );
        let archive = Archive::default();
        let err = submitter
            .build_request(
                JobMode::DesignSheet,
                &GenerationParams::default().with_profile_value("hair", "red"),
                ctx(&archive, Some(PORTRAIT_URL)),
            )
            .unwrap_err();
        assert_matches!(
            err,
            GenerationError::Precondition(PreconditionError::MissingTemplate { mode: JobMode::DesignSheet })
        );
    }

    #[test]
    fn design_sheet_needs_a_portrait() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let params = GenerationParams::default().with_profile_value("hair", "red");
        let err = submitter
            .build_request(JobMode::DesignSheet, &params, ctx(&archive, None))
            .unwrap_err();
        assert_matches!(
            err,
            GenerationError::Precondition(PreconditionError::MissingPortrait { .. })
        );
    }

    #[test]
    fn background_without_reference_is_unconditioned() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let params = GenerationParams::default().with_scene_description("neon alley at night");
        let request = submitter
            .build_request(JobMode::Background, &params, ctx(&archive, None))
            .unwrap();
        assert_eq!(request.path(), "/api/oc-maker/characters/generate-background");
        assert!(request.reference_urls().is_empty());
        assert_matches!(request, CreateJobRequest::Background(r) => {
            assert_eq!(r.scene_description, "neon alley at night");
            assert_eq!(r.aspect_ratio, "16:9");
        });
    }

    #[test]
    fn background_falls_back_to_prompt_then_fails() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let from_prompt = submitter
            .build_request(
                JobMode::Background,
                &GenerationParams::default().with_prompt("misty forest"),
                ctx(&archive, None),
            )
            .unwrap();
        assert_matches!(from_prompt, CreateJobRequest::Background(r) if r.scene_description == "misty forest");

        let err = submitter
            .build_request(
                JobMode::Background,
                &GenerationParams::default().with_scene_description("  "),
                ctx(&archive, None),
            )
            .unwrap_err();
        assert_matches!(
            err,
            GenerationError::Precondition(PreconditionError::MissingSceneDescription)
        );
    }

    #[test]
    fn event_uses_event_template_and_optional_reference() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let params = GenerationParams::default()
            .with_profile_value("name", "Mira")
            .with_context_value("event_title", "The Festival")
            .with_context_value("event_content", "Mira dances under lanterns")
            .with_context_value("locale", "ja");
        let request = submitter
            .build_request(JobMode::Event, &params, ctx(&archive, None))
            .unwrap();
        assert_matches!(request, CreateJobRequest::Task(r) => {
            assert_eq!(r.gen_type, "oc_events");
            assert!(r.reference_image_urls.is_none());
            assert!(r.prompt.contains("\"The Festival\""));
            assert!(r.prompt.contains("name: Mira"));
            assert!(r.prompt.contains("captions in ja"));
        });
    }

    #[test]
    fn event_missing_content_is_a_precondition_error() {
        let (submitter, _) = submitter();
        let archive = Archive::default();
        let params = GenerationParams::default()
            .with_profile_value("name", "Mira")
            .with_context_value("event_title", "The Festival");
        let err = submitter
            .build_request(JobMode::Event, &params, ctx(&archive, Some(PORTRAIT_URL)))
            .unwrap_err();
        assert_matches!(
            err,
            GenerationError::Precondition(PreconditionError::UnresolvedPlaceholders { mode: JobMode::Event, keys })
                if keys == vec!["event_content".to_string()]
        );
    }
}
