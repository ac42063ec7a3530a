//! Per-session generation bookkeeping.
//!
//! [`JobSession`] holds everything the coordinator needs to remember
//! between status updates: the session flow, the single active job, which
//! job results have already been claimed for application, results that
//! completed but could not be applied yet, and whether the session has
//! already auto-chained an avatar job.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::generation::{GenerationJob, GenerationResult, JobId, JobMode};

/// Whether the character is being created or edited.
///
/// A creation flow always promotes a fresh full-body portrait to primary
/// and auto-chains an avatar after the first one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionFlow {
    Creation,
    Editing,
}

/// Results of a completed job that still need to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApplication {
    pub job_id: JobId,
    pub mode: JobMode,
    pub results: Vec<GenerationResult>,
}

#[derive(Debug, Clone)]
pub struct JobSession {
    flow: SessionFlow,
    active: Option<GenerationJob>,
    submitted: HashMap<JobId, JobMode>,
    /// Monotonic: ids are never removed.
    claimed: HashSet<JobId>,
    unapplied: HashMap<JobId, PendingApplication>,
    auto_chain_source: Option<JobId>,
}

impl JobSession {
    pub fn new(flow: SessionFlow) -> Self {
        Self {
            flow,
            active: None,
            submitted: HashMap::new(),
            claimed: HashSet::new(),
            unapplied: HashMap::new(),
            auto_chain_source: None,
        }
    }

    pub fn flow(&self) -> SessionFlow {
        self.flow
    }

    pub fn active(&self) -> Option<&GenerationJob> {
        self.active.as_ref()
    }

    /// Id of the active job once the backend has issued one.
    pub fn active_id(&self) -> Option<&JobId> {
        self.active.as_ref().and_then(GenerationJob::id)
    }

    pub fn is_active(&self, job_id: &JobId) -> bool {
        self.active_id() == Some(job_id)
    }

    /// Start a new job in `submitting` state, returning whatever job it
    /// supersedes.
    pub fn begin(&mut self, mode: JobMode) -> Option<GenerationJob> {
        self.active.replace(GenerationJob::submitting(mode))
    }

    /// The backend accepted the active job.
    pub fn record_submitted(&mut self, job_id: JobId) -> Result<(), CoreError> {
        let job = self.active.as_mut().ok_or_else(|| {
            CoreError::Conflict("No generation job is being submitted".to_string())
        })?;
        let mode = job.mode();
        job.mark_polling(job_id.clone())?;
        self.submitted.insert(job_id, mode);
        Ok(())
    }

    /// Mark the active job `job_id` completed with `results`.
    pub fn complete(&mut self, job_id: &JobId, results: Vec<GenerationResult>) -> Result<(), CoreError> {
        let job = self.active_matching(job_id)?;
        job.mark_completed(results)
    }

    /// Fail the active job and discard it. `job_id` is `None` while the
    /// job is still being submitted.
    pub fn fail(&mut self, job_id: Option<&JobId>, message: impl Into<String>) -> Result<GenerationJob, CoreError> {
        let matches = match (job_id, self.active.as_ref()) {
            (Some(id), Some(job)) => job.id() == Some(id),
            (None, Some(job)) => job.id().is_none(),
            (_, None) => false,
        };
        if !matches {
            return Err(CoreError::NotFound {
                entity: "generation job",
                id: job_id.map_or_else(|| "<submitting>".to_string(), JobId::to_string),
            });
        }
        let mut job = self
            .active
            .take()
            .ok_or_else(|| CoreError::Internal("active job vanished".to_string()))?;
        job.mark_failed(message)?;
        Ok(job)
    }

    /// Drop the active job without recording an outcome.
    pub fn discard_active(&mut self) -> Option<GenerationJob> {
        self.active.take()
    }

    /// Mode of any job submitted during this session.
    pub fn mode_of(&self, job_id: &JobId) -> Option<JobMode> {
        self.submitted.get(job_id).copied()
    }

    /// Claim the right to apply `job_id`'s result. Returns `false` if it
    /// was already claimed; a claim is never released.
    pub fn claim_application(&mut self, job_id: &JobId) -> bool {
        self.claimed.insert(job_id.clone())
    }

    pub fn is_claimed(&self, job_id: &JobId) -> bool {
        self.claimed.contains(job_id)
    }

    /// Keep a completed job's results for an explicit retry.
    pub fn park_unapplied(&mut self, pending: PendingApplication) {
        self.unapplied.insert(pending.job_id.clone(), pending);
    }

    pub fn take_unapplied(&mut self, job_id: &JobId) -> Option<PendingApplication> {
        self.unapplied.remove(job_id)
    }

    pub fn unapplied(&self) -> impl Iterator<Item = &PendingApplication> {
        self.unapplied.values()
    }

    /// Whether applying a `mode` result should auto-submit an avatar.
    pub fn should_auto_chain(&self, mode: JobMode) -> bool {
        self.flow == SessionFlow::Creation
            && mode == JobMode::FullBody
            && self.auto_chain_source.is_none()
    }

    /// Record that `job_id` triggered the session's auto-chain. Returns
    /// `false` if the session already chained.
    pub fn mark_auto_chained(&mut self, job_id: &JobId) -> bool {
        if self.auto_chain_source.is_some() {
            return false;
        }
        self.auto_chain_source = Some(job_id.clone());
        true
    }

    pub fn auto_chain_source(&self) -> Option<&JobId> {
        self.auto_chain_source.as_ref()
    }

    fn active_matching(&mut self, job_id: &JobId) -> Result<&mut GenerationJob, CoreError> {
        match self.active.as_mut() {
            Some(job) if job.id() == Some(job_id) => Ok(job),
            _ => Err(CoreError::NotFound {
                entity: "generation job",
                id: job_id.to_string(),
            }),
        }
    }
}
