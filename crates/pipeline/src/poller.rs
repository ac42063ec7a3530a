//! Status polling for submitted jobs.
//!
//! [`Poller`] runs at most one polling task at a time. Starting a new poll
//! cancels the previous one; its [`PollSubscription`] yields nothing after
//! cancellation, even if the task had already queued an event.
//!
//! The first status check runs immediately. Later checks follow the
//! [`PollingPolicy`] interval until a terminal status arrives or the
//! attempt/time bound is hit.

use std::sync::Arc;

use ocforge_backend::messages::{FailureReport, RemoteStatus, StatusReport};
use ocforge_core::generation::{GenerationResult, JobId};
use ocforge_core::polling::{PollLimit, PollingPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ports::GenerationBackend;

/// Error type sent to the failure-report endpoint when polling gives up.
pub const POLLING_TIMEOUT_ERROR_TYPE: &str = "polling_timeout";

const EVENT_CHANNEL_CAPACITY: usize = 16;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// A non-terminal status report.
    Progress {
        status: RemoteStatus,
        message: Option<String>,
        attempt: u32,
    },
    Completed { results: Vec<GenerationResult> },
    Failed { message: String },
    /// The status check itself failed. Polling continues.
    TransportError { message: String, attempt: u32 },
    TimedOut { limit: PollLimit },
}

impl PollEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::TimedOut { .. }
        )
    }
}

/// Human-readable description of the bound that stopped polling.
pub fn describe_limit(limit: &PollLimit) -> String {
    match limit {
        PollLimit::Attempts(n) => format!("Generation timed out after {n} status checks"),
        PollLimit::Timeout(elapsed) => {
            format!("Generation timed out after {}s", elapsed.as_secs())
        }
    }
}

/// Map one status report to a poll event.
///
/// Results win over the reported status: a report carrying results is a
/// completion even if the status string lags behind.
pub fn classify_report(report: &StatusReport, attempt: u32) -> PollEvent {
    let results = report.generation_results();
    if !results.is_empty() {
        return PollEvent::Completed { results };
    }
    match report.status {
        RemoteStatus::Completed => PollEvent::Completed { results },
        RemoteStatus::Failed => PollEvent::Failed {
            message: report
                .failure_reason()
                .unwrap_or("Generation failed")
                .to_string(),
        },
        status => PollEvent::Progress {
            status,
            message: report.message.clone(),
            attempt,
        },
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling(JobId),
}

struct ActivePoll {
    job_id: JobId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Poller<B: GenerationBackend> {
    backend: Arc<B>,
    policy: PollingPolicy,
    active: Option<ActivePoll>,
    /// Parent of every per-job token; cancelled on drop.
    root: CancellationToken,
}

impl<B: GenerationBackend> Poller<B> {
    pub fn new(backend: Arc<B>, policy: PollingPolicy) -> Self {
        Self {
            backend,
            policy,
            active: None,
            root: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> &PollingPolicy {
        &self.policy
    }

    /// Start polling `job_id`, cancelling any poll in progress.
    pub fn start(&mut self, job_id: JobId) -> PollSubscription {
        if let Some(previous) = self.cancel() {
            tracing::debug!(previous = %previous, next = %job_id, "Replacing active poll");
        }

        let cancel = self.root.child_token();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.backend),
            self.policy.clone(),
            job_id.clone(),
            tx,
            cancel.clone(),
        ));

        self.active = Some(ActivePoll {
            job_id: job_id.clone(),
            cancel: cancel.clone(),
            handle,
        });

        PollSubscription { job_id, rx, cancel }
    }

    /// Stop the active poll. Returns the job that was being polled.
    pub fn cancel(&mut self) -> Option<JobId> {
        let active = self.active.take()?;
        active.cancel.cancel();
        if active.handle.is_finished() {
            tracing::trace!(job_id = %active.job_id, "Poll task had already finished");
        }
        Some(active.job_id)
    }

    pub fn active_job(&self) -> Option<&JobId> {
        self.active
            .as_ref()
            .filter(|a| !a.handle.is_finished())
            .map(|a| &a.job_id)
    }

    pub fn state(&self) -> PollerState {
        match self.active_job() {
            Some(job_id) => PollerState::Polling(job_id.clone()),
            None => PollerState::Idle,
        }
    }
}

impl<B: GenerationBackend> Drop for Poller<B> {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving end of one poll.
pub struct PollSubscription {
    job_id: JobId,
    rx: mpsc::Receiver<PollEvent>,
    cancel: CancellationToken,
}

impl PollSubscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Next event, or `None` once the poll is over or cancelled.
    pub async fn recv(&mut self) -> Option<PollEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event.filter(|_| !self.cancel.is_cancelled()),
        }
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

async fn poll_loop<B: GenerationBackend>(
    backend: Arc<B>,
    policy: PollingPolicy,
    job_id: JobId,
    tx: mpsc::Sender<PollEvent>,
    cancel: CancellationToken,
) {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if let Some(limit) = policy.exhausted(attempts, started.elapsed()) {
            let reason = describe_limit(&limit);
            tracing::warn!(job_id = %job_id, attempts, "{reason}");
            report_timeout(backend.as_ref(), &job_id, &reason, &cancel).await;
            if !cancel.is_cancelled() {
                let _ = tx.send(PollEvent::TimedOut { limit }).await;
            }
            return;
        }

        attempts += 1;
        let report = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            report = backend.job_status(&job_id) => report,
        };

        let event = match report {
            Ok(report) => classify_report(&report, attempts),
            Err(e) => {
                tracing::warn!(job_id = %job_id, attempt = attempts, error = %e, "Status check failed");
                PollEvent::TransportError {
                    message: e.to_string(),
                    attempt: attempts,
                }
            }
        };
        let terminal = event.is_terminal();

        if cancel.is_cancelled() || tx.send(event).await.is_err() {
            return;
        }
        if terminal {
            tracing::debug!(job_id = %job_id, attempts, "Polling finished");
            return;
        }

        let delay = policy.interval_at(started.elapsed());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Tell the backend the job was abandoned. Failures are only logged.
async fn report_timeout<B: GenerationBackend>(
    backend: &B,
    job_id: &JobId,
    reason: &str,
    cancel: &CancellationToken,
) {
    let report = FailureReport {
        generation_uuid: job_id.to_string(),
        reason: reason.to_string(),
        error_type: POLLING_TIMEOUT_ERROR_TYPE.to_string(),
    };
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = backend.report_failure(&report) => result,
    };
    if let Err(e) = result {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to report polling timeout");
    }
}
