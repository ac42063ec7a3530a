#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ocforge_backend::messages::{
    CharacterPatch, CharacterVisuals, CreateJobRequest, FailureReport, ImageResolution,
    RemoteStatus, ResolveSize, ResultItem, StatusReport,
};
use ocforge_core::generation::JobId;
use ocforge_core::media::ManagedImageId;
use ocforge_core::types::CharacterId;
use ocforge_pipeline::error::{BackendError, StoreError};
use ocforge_pipeline::ports::{CharacterStore, GenerationBackend, ImageLookup};

pub const U1: &str = "11111111-1111-4111-8111-111111111111";
pub const U2: &str = "22222222-2222-4222-8222-222222222222";
pub const U3: &str = "33333333-3333-4333-8333-333333333333";

pub fn job(raw: &str) -> JobId {
    JobId::new(raw).unwrap()
}

pub fn character() -> CharacterId {
    CharacterId::nil()
}

pub fn cdn_url(id: &str) -> String {
    format!("https://cdn.example.com/{id}.webp")
}

// ---------------------------------------------------------------------------
// Status reports
// ---------------------------------------------------------------------------

pub fn pending() -> StatusReport {
    StatusReport {
        status: RemoteStatus::Pending,
        message: None,
        error_message: None,
        results: Vec::new(),
    }
}

pub fn processing() -> StatusReport {
    StatusReport {
        status: RemoteStatus::Processing,
        message: None,
        error_message: None,
        results: Vec::new(),
    }
}

pub fn completed_with(references: &[&str]) -> StatusReport {
    StatusReport {
        status: RemoteStatus::Completed,
        message: None,
        error_message: None,
        results: references
            .iter()
            .enumerate()
            .map(|(i, r)| ResultItem {
                reference: Some(r.to_string()),
                image_uuid: None,
                image_url: None,
                rank: Some(i as u32),
            })
            .collect(),
    }
}

pub fn failed(message: &str) -> StatusReport {
    StatusReport {
        status: RemoteStatus::Failed,
        message: Some(message.to_string()),
        error_message: None,
        results: Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// FakeBackend
// ---------------------------------------------------------------------------

/// Scripted generation backend.
///
/// Issues `job-1`, `job-2`, ... and answers status checks from a per-job
/// queue; an exhausted queue answers `pending`. Managed images resolve to
/// [`cdn_url`] unless marked unresolvable.
#[derive(Default)]
pub struct FakeBackend {
    next_job: AtomicUsize,
    pub requests: Mutex<Vec<CreateJobRequest>>,
    create_error: Mutex<Option<BackendError>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<StatusReport, BackendError>>>>,
    status_calls: Mutex<HashMap<String, usize>>,
    pub failure_reports: Mutex<Vec<FailureReport>>,
    unresolvable: Mutex<Vec<String>>,
    pub resolve_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, job_id: &str, answers: Vec<Result<StatusReport, BackendError>>) {
        self.statuses
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .extend(answers);
    }

    pub fn fail_creation(&self, err: BackendError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    pub fn mark_unresolvable(&self, id: &str) {
        self.unresolvable.lock().unwrap().push(id.to_lowercase());
    }

    pub fn create_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn status_calls(&self, job_id: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_request(&self) -> Option<CreateJobRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, BackendError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(job(&format!("job-{n}")))
    }

    async fn job_status(&self, job_id: &JobId) -> Result<StatusReport, BackendError> {
        *self
            .status_calls
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default() += 1;
        self.statuses
            .lock()
            .unwrap()
            .get_mut(job_id.as_str())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(pending()))
    }

    async fn report_failure(&self, report: &FailureReport) -> Result<(), BackendError> {
        self.failure_reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[async_trait]
impl ImageLookup for FakeBackend {
    async fn resolve_image(
        &self,
        image: &ManagedImageId,
        _size: ResolveSize,
    ) -> Result<ImageResolution, BackendError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if self.unresolvable.lock().unwrap().iter().any(|u| u == image.as_str()) {
            return Err(BackendError::Rejected("image not found".into()));
        }
        Ok(ImageResolution {
            resolved_url: Some(cdn_url(image.as_str())),
            original_url: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory character record that applies patches like the real endpoint.
#[derive(Default)]
pub struct MemoryStore {
    visuals: Mutex<CharacterVisuals>,
    pub patches: Mutex<Vec<CharacterPatch>>,
    fail_updates: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_visuals(visuals: CharacterVisuals) -> Arc<Self> {
        Arc::new(Self {
            visuals: Mutex::new(visuals),
            ..Default::default()
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_updates.store(failing, Ordering::SeqCst);
    }

    pub fn visuals(&self) -> CharacterVisuals {
        self.visuals.lock().unwrap().clone()
    }

    pub fn update_calls(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    pub fn last_patch(&self) -> Option<CharacterPatch> {
        self.patches.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CharacterStore for MemoryStore {
    async fn load(&self, _character_id: CharacterId) -> Result<CharacterVisuals, StoreError> {
        Ok(self.visuals())
    }

    async fn update(&self, _character_id: CharacterId, patch: &CharacterPatch) -> Result<(), StoreError> {
        self.patches.lock().unwrap().push(patch.clone());
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        let mut visuals = self.visuals.lock().unwrap();
        if let Some(primary) = &patch.primary_portrait_ref {
            visuals.primary_portrait_ref = primary.clone();
        }
        if let Some(avatar) = &patch.avatar_ref {
            visuals.avatar_ref = Some(avatar.clone());
        }
        if let Some(background) = &patch.background_ref {
            visuals.background_ref = Some(background.clone());
        }
        if let Some(payload) = &patch.archive_payload {
            visuals.archive_payload = Some(payload.clone());
        }
        Ok(())
    }
}
