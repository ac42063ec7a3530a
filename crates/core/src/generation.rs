//! Generation job types, request parameters and job state transitions.
//!
//! A [`GenerationJob`] lives for a single request/response cycle:
//! `submitting -> polling -> completed | failed`, forward only.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Request defaults
// ---------------------------------------------------------------------------

/// Aspect ratio for full-body portraits unless the caller overrides it.
pub const DEFAULT_FULL_BODY_ASPECT: &str = "3:4";
/// Design sheets are wide multi-panel layouts.
pub const DESIGN_SHEET_ASPECT: &str = "16:9";
/// Default aspect ratio for event illustrations and backgrounds.
pub const DEFAULT_WIDE_ASPECT: &str = "16:9";
/// Model used for design sheet tasks unless configured otherwise.
pub const DEFAULT_DESIGN_SHEET_MODEL: &str = "google/nano-banana";
/// Design sheets are always generated one at a time.
pub const DESIGN_SHEET_BATCH_SIZE: u32 = 1;
/// Label given to design sheet entries in the archive.
pub const DEFAULT_DESIGN_SHEET_LABEL: &str = "Design Sheet";

// ---------------------------------------------------------------------------
// JobMode
// ---------------------------------------------------------------------------

/// What a generation job produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Avatar,
    FullBody,
    DesignSheet,
    Background,
    Event,
}

impl JobMode {
    pub const ALL: [JobMode; 5] = [
        Self::Avatar,
        Self::FullBody,
        Self::DesignSheet,
        Self::Background,
        Self::Event,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avatar => "avatar",
            Self::FullBody => "full_body",
            Self::DesignSheet => "design_sheet",
            Self::Background => "background",
            Self::Event => "event",
        }
    }

    /// Modes whose result lands in the visual archive.
    pub fn targets_archive(self) -> bool {
        matches!(self, Self::FullBody | Self::DesignSheet)
    }

    /// Modes conditioned on the character's portrait.
    pub fn requires_portrait(self) -> bool {
        matches!(self, Self::Avatar | Self::DesignSheet)
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown generation mode '{s}' (expected one of avatar, full_body, design_sheet, background, event)"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Opaque, backend-issued job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation(
                "Job identifier must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitting,
    Polling,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only transitions. A submission can fail before polling starts.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Submitting, Self::Polling)
                | (Self::Submitting, Self::Failed)
                | (Self::Polling, Self::Completed)
                | (Self::Polling, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One image produced by a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Managed-image identifier or absolute URL.
    pub reference: String,
    /// Position within the batch.
    pub rank: u32,
}

impl GenerationResult {
    pub fn new(reference: impl Into<String>, rank: u32) -> Self {
        Self {
            reference: reference.into(),
            rank,
        }
    }
}

/// The result that gets applied: the lowest rank in the batch.
pub fn best_result(results: &[GenerationResult]) -> Option<&GenerationResult> {
    results.iter().min_by_key(|r| r.rank)
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// A single generation request tracked from submission to outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationJob {
    id: Option<JobId>,
    mode: JobMode,
    status: JobStatus,
    results: Vec<GenerationResult>,
    error_message: Option<String>,
    created_at: Timestamp,
}

impl GenerationJob {
    /// A job whose creation request is in flight.
    pub fn submitting(mode: JobMode) -> Self {
        Self {
            id: None,
            mode,
            status: JobStatus::Submitting,
            results: Vec::new(),
            error_message: None,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn id(&self) -> Option<&JobId> {
        self.id.as_ref()
    }

    pub fn mode(&self) -> JobMode {
        self.mode
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn results(&self) -> &[GenerationResult] {
        &self.results
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// The backend accepted the job and issued `id`.
    pub fn mark_polling(&mut self, id: JobId) -> Result<(), CoreError> {
        self.transition(JobStatus::Polling)?;
        self.id = Some(id);
        Ok(())
    }

    pub fn mark_completed(&mut self, results: Vec<GenerationResult>) -> Result<(), CoreError> {
        self.transition(JobStatus::Completed)?;
        self.results = results;
        Ok(())
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Conflict(format!(
                "Generation job cannot move from {} to {next}",
                self.status
            )));
        }
        self.status = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GenerationParams
// ---------------------------------------------------------------------------

/// Caller-supplied inputs for a generation request. Which fields matter
/// depends on the mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Free-form prompt for full-body portraits; also stands in for a
    /// missing background scene description.
    pub prompt: Option<String>,
    /// Explicit conditioning image, used before any archive portrait.
    pub reference_url: Option<String>,
    pub art_style: Option<String>,
    pub aspect_ratio: Option<String>,
    /// Scene text for backgrounds.
    pub scene_description: Option<String>,
    /// Prompt template overriding the configured default for the mode.
    pub template: Option<String>,
    /// Character visual profile (name, hair, outfit, ...).
    #[serde(default)]
    pub profile: HashMap<String, String>,
    /// Extra template values such as `event_title` or `locale`.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl GenerationParams {
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_reference_url(mut self, url: impl Into<String>) -> Self {
        self.reference_url = Some(url.into());
        self
    }

    pub fn with_scene_description(mut self, scene: impl Into<String>) -> Self {
        self.scene_description = Some(scene.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_profile_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.profile.insert(key.into(), value.into());
        self
    }

    pub fn with_context_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Values available to prompt templates. Context entries shadow
    /// profile entries with the same key.
    pub fn template_values(&self) -> HashMap<String, String> {
        let mut values = self.profile.clone();
        values.extend(self.context.iter().map(|(k, v)| (k.clone(), v.clone())));
        values
    }

    /// Trimmed, non-empty prompt if one was given.
    pub fn prompt_text(&self) -> Option<&str> {
        non_blank(self.prompt.as_deref())
    }

    /// Trimmed, non-empty explicit reference if one was given.
    pub fn reference(&self) -> Option<&str> {
        non_blank(self.reference_url.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
