//! Drives a character's generation jobs from submission to application.
//!
//! [`GenerationCoordinator`] owns the session bookkeeping, the submitter,
//! the poller, the result resolver and the archive reconciler for one
//! character. One job is active at a time: submitting a new job supersedes
//! the previous one, whose later status reports are ignored.
//!
//! Each job's result is applied at most once. Where it lands depends on
//! the mode:
//!
//! | Mode           | Application                                             |
//! |----------------|---------------------------------------------------------|
//! | `avatar`       | character avatar reference                              |
//! | `background`   | character background reference                          |
//! | `full_body`    | archive entry; may become the primary portrait          |
//! | `design_sheet` | labelled archive entry; never primary                   |
//! | `event`        | resolved to a URL and reported, not stored              |
//!
//! Every step is published on the [`UpdateBus`].

use std::collections::HashMap;
use std::sync::Arc;

use ocforge_backend::messages::{CharacterPatch, ResolveSize};
use ocforge_core::archive::{Archive, ArchiveError, PrimaryChange};
use ocforge_core::generation::{
    best_result, GenerationParams, GenerationResult, JobId, JobMode, DEFAULT_DESIGN_SHEET_LABEL,
};
use ocforge_core::job_session::{JobSession, PendingApplication, SessionFlow};
use ocforge_core::media::{is_http_url, ManagedImageId, MediaEntry, MediaKind};
use ocforge_core::polling::PollingPolicy;
use ocforge_core::types::CharacterId;

use crate::error::{GenerationError, ReconcileError};
use crate::events::{ApplyOutcome, Completion, JobSubscription, JobUpdate, JobUpdateKind, UpdateBus};
use crate::poller::{describe_limit, PollEvent, PollSubscription, Poller, PollerState};
use crate::ports::{CharacterStore, GenerationBackend, ImageLookup};
use crate::reconciler::ArchiveReconciler;
use crate::resolver::ResultResolver;
use crate::submitter::{JobSubmitter, SubmissionContext, SubmissionDefaults};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub polling: PollingPolicy,
    pub defaults: SubmissionDefaults,
    pub resolve_size: ResolveSize,
    /// Label given to design sheet entries.
    pub design_sheet_label: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            polling: PollingPolicy::default(),
            defaults: SubmissionDefaults::default(),
            resolve_size: ResolveSize::default(),
            design_sheet_label: DEFAULT_DESIGN_SHEET_LABEL.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct GenerationCoordinator<B, S>
where
    B: GenerationBackend + ImageLookup,
    S: CharacterStore,
{
    character_id: CharacterId,
    session: JobSession,
    submitter: JobSubmitter<B>,
    poller: Poller<B>,
    resolver: ResultResolver<B>,
    reconciler: ArchiveReconciler<S>,
    /// Events of the job currently being polled.
    subscription: Option<PollSubscription>,
    bus: UpdateBus,
    design_sheet_label: String,
    /// Profile of the latest submission, reused by the auto-chained avatar.
    chain_profile: HashMap<String, String>,
}

impl<B, S> GenerationCoordinator<B, S>
where
    B: GenerationBackend + ImageLookup,
    S: CharacterStore,
{
    pub fn new(
        backend: Arc<B>,
        reconciler: ArchiveReconciler<S>,
        flow: SessionFlow,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            character_id: reconciler.character_id(),
            session: JobSession::new(flow),
            submitter: JobSubmitter::new(Arc::clone(&backend), config.defaults),
            poller: Poller::new(Arc::clone(&backend), config.polling),
            resolver: ResultResolver::with_size(backend, config.resolve_size),
            reconciler,
            subscription: None,
            bus: UpdateBus::default(),
            design_sheet_label: config.design_sheet_label,
            chain_profile: HashMap::new(),
        }
    }

    pub fn character_id(&self) -> CharacterId {
        self.character_id
    }

    pub fn session(&self) -> &JobSession {
        &self.session
    }

    pub fn archive(&self) -> &Archive {
        self.reconciler.archive()
    }

    pub fn reconciler(&self) -> &ArchiveReconciler<S> {
        &self.reconciler
    }

    /// Direct archive edits (remove, reorder, set primary).
    pub fn reconciler_mut(&mut self) -> &mut ArchiveReconciler<S> {
        &mut self.reconciler
    }

    pub fn poller_state(&self) -> PollerState {
        self.poller.state()
    }

    pub fn bus(&self) -> &UpdateBus {
        &self.bus
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<JobUpdate> {
        self.bus.subscribe()
    }

    pub fn subscribe_job(&self, job_id: JobId) -> JobSubscription {
        self.bus.subscribe_job(job_id)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Submit a job, superseding any active one, and start polling it.
    ///
    /// Precondition and submission failures are returned immediately and
    /// leave no active job behind.
    pub async fn submit(
        &mut self,
        mode: JobMode,
        params: GenerationParams,
    ) -> Result<JobId, GenerationError> {
        self.supersede_active();
        self.session.begin(mode);

        let reference = self.conditioning_reference(mode, &params).await;
        let ctx = SubmissionContext {
            character_id: self.character_id,
            archive: self.reconciler.archive(),
            reference_url: reference.as_deref(),
        };

        let job_id = match self.submitter.submit(mode, &params, ctx).await {
            Ok(job_id) => job_id,
            Err(e) => {
                if let Err(state) = self.session.fail(None, e.to_string()) {
                    tracing::debug!(error = %state, "No submitting job to fail");
                }
                tracing::warn!(mode = %mode, error = %e, "Generation job not submitted");
                return Err(e);
            }
        };

        self.session.record_submitted(job_id.clone())?;
        self.chain_profile = params.profile;
        self.subscription = Some(self.poller.start(job_id.clone()));
        self.publish(job_id.clone(), mode, JobUpdateKind::Submitted);
        Ok(job_id)
    }

    /// Stop polling the active job and discard it.
    pub fn cancel(&mut self) -> Option<JobId> {
        self.poller.cancel();
        self.subscription = None;
        let job = self.session.discard_active()?;
        let job_id = job.id().cloned()?;
        tracing::info!(job_id = %job_id, mode = %job.mode(), "Generation job cancelled");
        self.publish(job_id.clone(), job.mode(), JobUpdateKind::Cancelled);
        Some(job_id)
    }

    fn supersede_active(&mut self) {
        self.poller.cancel();
        self.subscription = None;
        if let Some(job) = self.session.discard_active() {
            if let Some(job_id) = job.id() {
                tracing::info!(job_id = %job_id, mode = %job.mode(), "Superseding active generation job");
                self.publish(job_id.clone(), job.mode(), JobUpdateKind::Superseded);
            }
        }
    }

    /// URL of the image that conditions a `mode` job.
    ///
    /// A supplied reference wins. Avatar, design sheet and event jobs fall
    /// back to the archive's portrait.
    async fn conditioning_reference(
        &mut self,
        mode: JobMode,
        params: &GenerationParams,
    ) -> Option<String> {
        if let Some(supplied) = params.reference() {
            return self.displayable(supplied).await;
        }
        if !(mode.requires_portrait() || mode == JobMode::Event) {
            return None;
        }
        let portrait = self.reconciler.archive().portrait_reference()?;
        self.displayable(&portrait).await
    }

    /// `http(s)` URLs are used as-is; anything carrying a managed id is
    /// resolved.
    async fn displayable(&mut self, raw: &str) -> Option<String> {
        if is_http_url(raw) {
            return Some(raw.trim().to_string());
        }
        match ManagedImageId::extract(raw) {
            Some(id) => self.resolver.resolve_managed(&id).await,
            None => self.resolver.resolve(raw).await,
        }
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    /// Wait for the next update of the polled job. Returns `None` once no
    /// job is being polled.
    pub async fn next_update(&mut self) -> Option<JobUpdate> {
        loop {
            let subscription = self.subscription.as_mut()?;
            let job_id = subscription.job_id().clone();
            let Some(event) = subscription.recv().await else {
                self.subscription = None;
                return None;
            };
            if let Some(update) = self.on_poll_event(job_id, event).await {
                return Some(update);
            }
        }
    }

    /// Drive polling (including any auto-chained job) until nothing is
    /// left to poll. Returns the terminal updates in order.
    pub async fn run_until_idle(&mut self) -> Vec<JobUpdate> {
        let mut terminal = Vec::new();
        while let Some(update) = self.next_update().await {
            if update.is_terminal() {
                terminal.push(update);
            }
        }
        terminal
    }

    async fn on_poll_event(&mut self, job_id: JobId, event: PollEvent) -> Option<JobUpdate> {
        let mode = self.session.mode_of(&job_id)?;
        if !self.session.is_active(&job_id) {
            tracing::debug!(job_id = %job_id, "Ignoring poll event for inactive job");
            return None;
        }

        match event {
            PollEvent::Progress {
                status,
                message,
                attempt,
            } => {
                tracing::debug!(job_id = %job_id, status = %status, attempt, "Generation in progress");
                Some(self.publish(job_id, mode, JobUpdateKind::Status { status, message }))
            }
            PollEvent::TransportError { message, attempt } => {
                tracing::warn!(job_id = %job_id, attempt, error = %message, "Status check failed, still polling");
                Some(self.publish(job_id, mode, JobUpdateKind::PollingError { message }))
            }
            PollEvent::Failed { message } => Some(self.fail_polled(job_id, mode, message)),
            PollEvent::TimedOut { limit } => {
                Some(self.fail_polled(job_id, mode, describe_limit(&limit)))
            }
            PollEvent::Completed { results } => {
                let outcome = self.complete_job(&job_id, results).await;
                self.publish_completion(&job_id, mode, outcome.as_ref().map(Option::as_ref))
            }
        }
    }

    fn fail_polled(&mut self, job_id: JobId, mode: JobMode, message: String) -> JobUpdate {
        self.poller.cancel();
        self.subscription = None;
        if let Err(e) = self.session.fail(Some(&job_id), message.clone()) {
            tracing::debug!(job_id = %job_id, error = %e, "Failed job was no longer active");
        }
        tracing::warn!(job_id = %job_id, mode = %mode, error = %message, "Generation job failed");
        self.publish(job_id, mode, JobUpdateKind::Failed { message })
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    /// Apply a completed job's results.
    ///
    /// Returns `Ok(None)` for jobs that are no longer active or whose
    /// result was already applied.
    pub async fn handle_completion(
        &mut self,
        job_id: &JobId,
        results: Vec<GenerationResult>,
    ) -> Result<Option<Completion>, GenerationError> {
        let mode = self.session.mode_of(job_id);
        let outcome = self.complete_job(job_id, results).await;
        if let Some(mode) = mode {
            self.publish_completion(job_id, mode, outcome.as_ref().map(Option::as_ref));
        }
        outcome
    }

    async fn complete_job(
        &mut self,
        job_id: &JobId,
        results: Vec<GenerationResult>,
    ) -> Result<Option<Completion>, GenerationError> {
        let Some(mode) = self.session.mode_of(job_id) else {
            tracing::debug!(job_id = %job_id, "Ignoring completion for unknown job");
            return Ok(None);
        };
        if !self.session.is_active(job_id) || self.session.is_claimed(job_id) {
            tracing::debug!(job_id = %job_id, "Ignoring completion for inactive or applied job");
            return Ok(None);
        }

        self.poller.cancel();
        self.subscription = None;

        let Some(best) = best_result(&results).cloned() else {
            let err = GenerationError::EmptyResult(job_id.clone());
            self.session.fail(Some(job_id), err.to_string())?;
            return Err(err);
        };

        self.session.complete(job_id, results.clone())?;
        self.session.claim_application(job_id);
        self.session.discard_active();

        match self.apply(job_id, mode, &best).await {
            Ok(outcome) => {
                let chained_avatar = self.maybe_auto_chain(job_id, mode, &outcome).await;
                tracing::info!(
                    job_id = %job_id,
                    mode = %mode,
                    reference = %outcome.reference(),
                    "Generation result applied",
                );
                Ok(Some(Completion {
                    outcome,
                    chained_avatar,
                }))
            }
            Err(source) => {
                tracing::error!(job_id = %job_id, mode = %mode, error = %source, "Applying generation result failed");
                self.session.park_unapplied(PendingApplication {
                    job_id: job_id.clone(),
                    mode,
                    results,
                });
                Err(GenerationError::Apply {
                    job_id: job_id.clone(),
                    source,
                })
            }
        }
    }

    /// Re-run application for a job whose result could not be persisted.
    pub async fn retry_apply(&mut self, job_id: &JobId) -> Result<Completion, GenerationError> {
        let pending = self
            .session
            .take_unapplied(job_id)
            .ok_or_else(|| GenerationError::NothingToApply(job_id.clone()))?;
        let best = best_result(&pending.results)
            .cloned()
            .ok_or_else(|| GenerationError::EmptyResult(job_id.clone()))?;
        let mode = pending.mode;

        let outcome = match self.apply(job_id, mode, &best).await {
            Ok(outcome) => {
                let chained_avatar = self.maybe_auto_chain(job_id, mode, &outcome).await;
                Ok(Completion {
                    outcome,
                    chained_avatar,
                })
            }
            Err(source) => {
                self.session.park_unapplied(pending);
                Err(GenerationError::Apply {
                    job_id: job_id.clone(),
                    source,
                })
            }
        };

        self.publish_completion(job_id, mode, outcome.as_ref().map(Some));
        outcome
    }

    fn publish_completion(
        &self,
        job_id: &JobId,
        mode: JobMode,
        outcome: Result<Option<&Completion>, &GenerationError>,
    ) -> Option<JobUpdate> {
        let kind = match outcome {
            Ok(Some(completion)) => JobUpdateKind::Completed(completion.clone()),
            Ok(None) => return None,
            Err(e) if matches!(e, GenerationError::Apply { .. }) => JobUpdateKind::ApplyFailed {
                message: e.to_string(),
            },
            Err(e) => JobUpdateKind::Failed {
                message: e.to_string(),
            },
        };
        Some(self.publish(job_id.clone(), mode, kind))
    }

    async fn apply(
        &mut self,
        job_id: &JobId,
        mode: JobMode,
        best: &GenerationResult,
    ) -> Result<ApplyOutcome, ReconcileError> {
        let reference = best.reference.clone();
        match mode {
            JobMode::Avatar => {
                self.update_character(CharacterPatch::default().with_avatar(reference.clone()))
                    .await?;
                Ok(ApplyOutcome::AvatarUpdated { reference })
            }
            JobMode::Background => {
                self.update_character(CharacterPatch::default().with_background(reference.clone()))
                    .await?;
                Ok(ApplyOutcome::BackgroundUpdated { reference })
            }
            JobMode::Event => {
                let url = self.resolver.resolve(&reference).await;
                Ok(ApplyOutcome::EventIllustrated { reference, url })
            }
            JobMode::FullBody | JobMode::DesignSheet => {
                self.apply_to_archive(job_id, mode, reference).await
            }
        }
    }

    async fn update_character(&self, patch: CharacterPatch) -> Result<(), ReconcileError> {
        self.reconciler
            .store()
            .update(self.character_id, &patch)
            .await?;
        Ok(())
    }

    async fn apply_to_archive(
        &mut self,
        job_id: &JobId,
        mode: JobMode,
        reference: String,
    ) -> Result<ApplyOutcome, ReconcileError> {
        let managed = ManagedImageId::parse(&reference);
        let entry_id = match &managed {
            Some(id) => id.as_str().to_string(),
            None => format!("gen-{job_id}"),
        };

        let mut entry = if mode == JobMode::DesignSheet {
            MediaEntry::new(entry_id.clone(), reference.clone(), MediaKind::DesignSheet)
                .with_label(self.design_sheet_label.clone())
        } else {
            MediaEntry::new(entry_id.clone(), reference.clone(), MediaKind::Generated)
        };
        if let Some(id) = &managed {
            entry = entry.with_pinned_id(id);
        }

        let primary_was_unset = self.reconciler.archive().primary().is_none();
        if self.reconciler.archive().contains(&entry_id) {
            tracing::debug!(job_id = %job_id, entry_id = %entry_id, "Archive entry already present");
        } else {
            match self.reconciler.add(entry).await {
                Ok(()) => {}
                Err(ReconcileError::Archive(ArchiveError::CapacityReached { capacity })) => {
                    tracing::warn!(job_id = %job_id, capacity, "Visual archive full, result not stored");
                    return Ok(ApplyOutcome::ArchiveLimitReached {
                        reference,
                        capacity,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if mode == JobMode::FullBody {
            if let Some(id) = &managed {
                if primary_was_unset || self.session.flow() == SessionFlow::Creation {
                    if let PrimaryChange::Changed { previous } = self.reconciler.set_primary(id).await? {
                        tracing::info!(
                            job_id = %job_id,
                            primary = %id,
                            previous = ?previous.as_ref().map(ManagedImageId::as_str),
                            "Primary portrait updated",
                        );
                    }
                }
            }
        }

        let became_primary = managed
            .as_ref()
            .is_some_and(|id| self.reconciler.archive().primary() == Some(id));
        Ok(ApplyOutcome::ArchiveEntryAdded {
            entry_id,
            reference,
            became_primary,
        })
    }

    // -----------------------------------------------------------------------
    // Auto-chaining
    // -----------------------------------------------------------------------

    async fn maybe_auto_chain(
        &mut self,
        source: &JobId,
        mode: JobMode,
        outcome: &ApplyOutcome,
    ) -> Option<JobId> {
        if !matches!(outcome, ApplyOutcome::ArchiveEntryAdded { .. })
            || !self.session.should_auto_chain(mode)
            || !self.session.mark_auto_chained(source)
        {
            return None;
        }

        let Some(url) = self.displayable(outcome.reference()).await else {
            tracing::warn!(source_job_id = %source, "New portrait has no URL; avatar not chained");
            return None;
        };
        let params = GenerationParams {
            reference_url: Some(url),
            profile: self.chain_profile.clone(),
            ..Default::default()
        };

        match self.submit(JobMode::Avatar, params).await {
            Ok(job_id) => {
                tracing::info!(source_job_id = %source, job_id = %job_id, "Avatar generation chained");
                Some(job_id)
            }
            Err(e) => {
                tracing::warn!(source_job_id = %source, error = %e, "Chained avatar generation failed");
                None
            }
        }
    }

    fn publish(&self, job_id: JobId, mode: JobMode, kind: JobUpdateKind) -> JobUpdate {
        let update = JobUpdate::new(job_id, mode, kind);
        self.bus.publish(update.clone());
        update
    }
}
