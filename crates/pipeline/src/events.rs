//! Job updates published by the coordinator.
//!
//! [`UpdateBus`] fans every [`JobUpdate`] out over a
//! `tokio::sync::broadcast` channel. [`JobSubscription`] narrows a receiver
//! to a single job and ends after that job's final update, so a caller
//! that subscribes per job never sees another job's results. A failed
//! application is not final: the subscription stays open for the
//! completion published by a retry.

use chrono::{DateTime, Utc};
use ocforge_backend::messages::RemoteStatus;
use ocforge_core::generation::{JobId, JobMode};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// JobUpdate
// ---------------------------------------------------------------------------

/// Something that happened to a generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub mode: JobMode,
    pub kind: JobUpdateKind,
    pub timestamp: DateTime<Utc>,
}

impl JobUpdate {
    pub fn new(job_id: JobId, mode: JobMode, kind: JobUpdateKind) -> Self {
        Self {
            job_id,
            mode,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn is_final(&self) -> bool {
        self.kind.is_final()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdateKind {
    /// The backend accepted the job.
    Submitted,
    /// A non-terminal status report.
    Status {
        status: RemoteStatus,
        message: Option<String>,
    },
    /// A status check failed; polling continues.
    PollingError { message: String },
    /// The result was applied.
    Completed(Completion),
    /// The job completed but its result could not be applied. The result
    /// is held for a retry.
    ApplyFailed { message: String },
    Failed { message: String },
    /// A newer submission replaced this job.
    Superseded,
    Cancelled,
}

impl JobUpdateKind {
    /// Whether polling of the job is over.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Submitted | Self::Status { .. } | Self::PollingError { .. }
        )
    }

    /// Whether no further updates follow for the job. `ApplyFailed` is
    /// terminal but not final; a retry may still publish `Completed`.
    pub fn is_final(&self) -> bool {
        self.is_terminal() && !matches!(self, Self::ApplyFailed { .. })
    }
}

/// How a completed job's result was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub outcome: ApplyOutcome,
    /// Avatar job submitted automatically after this one, if any.
    pub chained_avatar: Option<JobId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    AvatarUpdated { reference: String },
    BackgroundUpdated { reference: String },
    ArchiveEntryAdded {
        entry_id: String,
        reference: String,
        became_primary: bool,
    },
    /// The archive filled up while the job ran; nothing was stored.
    ArchiveLimitReached { reference: String, capacity: usize },
    /// Event illustrations are shown, not stored.
    EventIllustrated {
        reference: String,
        url: Option<String>,
    },
}

impl ApplyOutcome {
    pub fn reference(&self) -> &str {
        match self {
            Self::AvatarUpdated { reference }
            | Self::BackgroundUpdated { reference }
            | Self::ArchiveEntryAdded { reference, .. }
            | Self::ArchiveLimitReached { reference, .. }
            | Self::EventIllustrated { reference, .. } => reference,
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of job updates to any number of subscribers.
#[derive(Debug, Clone)]
pub struct UpdateBus {
    sender: broadcast::Sender<JobUpdate>,
}

impl UpdateBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, update: JobUpdate) {
        let _ = self.sender.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.sender.subscribe()
    }

    /// Subscribe to the updates of one job.
    pub fn subscribe_job(&self, job_id: JobId) -> JobSubscription {
        JobSubscription {
            job_id,
            rx: self.sender.subscribe(),
            finished: false,
        }
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Per-job subscription
// ---------------------------------------------------------------------------

/// Receives the updates of a single job, ending after its final update.
pub struct JobSubscription {
    job_id: JobId,
    rx: broadcast::Receiver<JobUpdate>,
    finished: bool,
}

impl JobSubscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next update for this job, or `None` once it is finished or the bus
    /// is gone.
    pub async fn recv(&mut self) -> Option<JobUpdate> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(update) if update.job_id == self.job_id => {
                    self.finished = update.is_final();
                    return Some(update);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(job_id = %self.job_id, skipped, "Job subscription lagged");
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Drive `observer` until the job finishes.
    pub async fn forward<O: JobObserver + ?Sized>(mut self, observer: &mut O) {
        while let Some(update) = self.recv().await {
            match &update.kind {
                JobUpdateKind::Completed(completion) => observer.on_completed(&update, completion),
                JobUpdateKind::Failed { message } | JobUpdateKind::ApplyFailed { message } => {
                    observer.on_failed(&update, message)
                }
                _ => observer.on_status(&update),
            }
        }
    }
}

/// Callback-style consumer of a job's updates.
pub trait JobObserver: Send {
    fn on_status(&mut self, _update: &JobUpdate) {}

    fn on_completed(&mut self, _update: &JobUpdate, _completion: &Completion) {}

    fn on_failed(&mut self, _update: &JobUpdate, _message: &str) {}
}
