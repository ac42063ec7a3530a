//! Traits for the external collaborators of the pipeline.
//!
//! The HTTP clients from `ocforge-backend` implement these; tests use
//! in-memory doubles.

use async_trait::async_trait;
use ocforge_backend::api::GenerationApi;
use ocforge_backend::messages::{
    CharacterPatch, CharacterVisuals, CreateJobRequest, FailureReport, ImageResolution,
    ResolveSize, StatusReport,
};
use ocforge_backend::store::CharacterApi;
use ocforge_core::generation::JobId;
use ocforge_core::media::ManagedImageId;
use ocforge_core::types::CharacterId;

use crate::error::{BackendError, StoreError};

/// Job creation and status checks.
#[async_trait]
pub trait GenerationBackend: Send + Sync + 'static {
    /// Submit a job and return the backend-issued id.
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, BackendError>;

    async fn job_status(&self, job_id: &JobId) -> Result<StatusReport, BackendError>;

    /// Best-effort notice that a job was abandoned.
    async fn report_failure(&self, report: &FailureReport) -> Result<(), BackendError>;
}

/// Managed-image lookup.
#[async_trait]
pub trait ImageLookup: Send + Sync + 'static {
    async fn resolve_image(
        &self,
        image: &ManagedImageId,
        size: ResolveSize,
    ) -> Result<ImageResolution, BackendError>;
}

/// Persistence of the character's visual fields.
#[async_trait]
pub trait CharacterStore: Send + Sync + 'static {
    async fn load(&self, character_id: CharacterId) -> Result<CharacterVisuals, StoreError>;

    async fn update(&self, character_id: CharacterId, patch: &CharacterPatch) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// HTTP implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl GenerationBackend for GenerationApi {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<JobId, BackendError> {
        let raw = GenerationApi::create_job(self, request).await?;
        JobId::new(raw).map_err(|e| BackendError::Protocol(e.to_string()))
    }

    async fn job_status(&self, job_id: &JobId) -> Result<StatusReport, BackendError> {
        Ok(GenerationApi::job_status(self, job_id.as_str()).await?)
    }

    async fn report_failure(&self, report: &FailureReport) -> Result<(), BackendError> {
        Ok(GenerationApi::report_failure(self, report).await?)
    }
}

#[async_trait]
impl ImageLookup for GenerationApi {
    async fn resolve_image(
        &self,
        image: &ManagedImageId,
        size: ResolveSize,
    ) -> Result<ImageResolution, BackendError> {
        Ok(GenerationApi::resolve_image(self, image.as_str(), size).await?)
    }
}

#[async_trait]
impl CharacterStore for CharacterApi {
    async fn load(&self, character_id: CharacterId) -> Result<CharacterVisuals, StoreError> {
        Ok(self.fetch(character_id).await?)
    }

    async fn update(&self, character_id: CharacterId, patch: &CharacterPatch) -> Result<(), StoreError> {
        Ok(CharacterApi::update(self, character_id, patch).await?)
    }
}
