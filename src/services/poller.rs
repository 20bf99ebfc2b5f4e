//! Status polling for remote jobs.
//!
//! One status query per iteration; terminal states end the loop. Between
//! queries the poller sleeps with capped exponential backoff, and gives up
//! with `JobError::Timeout` once the optional deadline has passed.
//! Cancellation is cooperative and only stops local polling: the remote job
//! keeps running.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::JobError;
use crate::models::{
    resource_name, DetectionJobHandle, DetectionJobStatus, DetectionStatusReport,
    EndpointHandle, EndpointStatus, EndpointStatusReport, JobStatus, TrainingJobHandle,
    TrainingStatusReport,
};
use crate::recognition::{RecognitionError, RecognitionService};

/// A status snapshot the poller can decide on.
pub trait JobSnapshot {
    fn is_terminal(&self) -> bool;

    /// Whether a terminal snapshot is the success state.
    fn is_success(&self) -> bool;

    /// Status string as the service reported it.
    fn remote_state(&self) -> &str;
}

impl JobSnapshot for TrainingStatusReport {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn is_success(&self) -> bool {
        self.status == JobStatus::Trained
    }

    fn remote_state(&self) -> &str {
        &self.remote_status
    }
}

impl JobSnapshot for DetectionStatusReport {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn is_success(&self) -> bool {
        self.status == DetectionJobStatus::Completed
    }

    fn remote_state(&self) -> &str {
        &self.remote_status
    }
}

impl JobSnapshot for EndpointStatusReport {
    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn is_success(&self) -> bool {
        self.status == EndpointStatus::InService
    }

    fn remote_state(&self) -> &str {
        &self.remote_status
    }
}

/// How a poll ended. A failed remote job is an outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<S> {
    Succeeded(S),
    RemoteJobFailed(S),
}

impl<S> PollOutcome<S> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// The terminal report, whichever way the job ended.
    pub fn report(&self) -> &S {
        match self {
            Self::Succeeded(report) | Self::RemoteJobFailed(report) => report,
        }
    }

    pub fn into_report(self) -> S {
        match self {
            Self::Succeeded(report) | Self::RemoteJobFailed(report) => report,
        }
    }
}

/// Progress events emitted while polling.
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    /// A status query returned
    Queried {
        job: String,
        attempt: u32,
        status: String,
    },
    /// Waiting before the next query
    Sleeping { job: String, delay: Duration },
    /// A terminal state was reached
    Finished {
        job: String,
        status: String,
        succeeded: bool,
    },
}

/// Poll timing.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    /// Delay growth per query; 1.0 keeps the interval fixed.
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Give up after this long. `None` polls until a terminal state.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(10),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            deadline: Some(Duration::from_secs(6 * 60 * 60)),
        }
    }
}

impl PollPolicy {
    /// Fixed delay between queries and no deadline.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            multiplier: 1.0,
            max_interval: interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay after query number `attempt` (0-based), capped at `max_interval`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(1024) as i32);
        let secs = self.initial_interval.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_interval.as_secs_f64() {
            return self.max_interval;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Repeatedly queries job status until the job reaches a terminal state.
pub struct StatusPoller {
    service: Arc<dyn RecognitionService>,
    policy: PollPolicy,
    events: Option<mpsc::Sender<PollEvent>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl StatusPoller {
    pub fn new(service: Arc<dyn RecognitionService>, policy: PollPolicy) -> Self {
        Self {
            service,
            policy,
            events: None,
            cancel: None,
        }
    }

    /// Report progress on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<PollEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Stop polling once `true` is sent on the paired sender, or once that
    /// sender is dropped.
    pub fn with_cancellation(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub async fn poll_training(
        &self,
        handle: &TrainingJobHandle,
    ) -> Result<PollOutcome<TrainingStatusReport>, JobError> {
        self.run(&handle.job_identifier, || {
            self.service.describe_training_job(handle)
        })
        .await
    }

    pub async fn poll_detection(
        &self,
        handle: &DetectionJobHandle,
    ) -> Result<PollOutcome<DetectionStatusReport>, JobError> {
        self.run(&handle.job_identifier, || {
            self.service.describe_detection_job(handle)
        })
        .await
    }

    pub async fn poll_endpoint(
        &self,
        handle: &EndpointHandle,
    ) -> Result<PollOutcome<EndpointStatusReport>, JobError> {
        self.run(resource_name(&handle.endpoint_arn), || {
            self.service.describe_endpoint(handle)
        })
        .await
    }

    /// Poll a training job on a background task.
    ///
    /// Any receiver set with `with_cancellation` is replaced by the
    /// returned task's own cancel signal.
    pub fn spawn_training(mut self, handle: TrainingJobHandle) -> PollTask<TrainingStatusReport> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancel = Some(cancel_rx);
        let join = tokio::spawn(async move { self.poll_training(&handle).await });
        PollTask {
            join,
            cancel: cancel_tx,
        }
    }

    async fn emit(&self, event: PollEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Cancelled explicitly, or the paired sender was dropped.
    fn is_cancelled(&self) -> bool {
        match self.cancel {
            Some(ref rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    async fn run<S, F, Fut>(&self, job: &str, mut check: F) -> Result<PollOutcome<S>, JobError>
    where
        S: JobSnapshot,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<S, RecognitionError>>,
    {
        let started = Instant::now();
        let mut cancel = self.cancel.clone();
        let mut attempt = 0u32;

        loop {
            let report = check().await?;
            attempt += 1;
            debug!("{}: query {} -> {}", job, attempt, report.remote_state());
            self.emit(PollEvent::Queried {
                job: job.to_string(),
                attempt,
                status: report.remote_state().to_string(),
            })
            .await;

            if report.is_terminal() {
                let succeeded = report.is_success();
                info!(
                    "{} finished as {} after {} queries",
                    job,
                    report.remote_state(),
                    attempt
                );
                self.emit(PollEvent::Finished {
                    job: job.to_string(),
                    status: report.remote_state().to_string(),
                    succeeded,
                })
                .await;
                return Ok(if succeeded {
                    PollOutcome::Succeeded(report)
                } else {
                    PollOutcome::RemoteJobFailed(report)
                });
            }

            let mut delay = self.policy.delay_for(attempt - 1);
            if let Some(deadline) = self.policy.deadline {
                let elapsed = started.elapsed();
                if elapsed >= deadline {
                    return Err(JobError::Timeout {
                        job: job.to_string(),
                        elapsed,
                    });
                }
                // Last query lands on the deadline
                delay = delay.min(deadline - elapsed);
            }

            if self.is_cancelled() {
                return Err(JobError::Cancelled(job.to_string()));
            }

            self.emit(PollEvent::Sleeping {
                job: job.to_string(),
                delay,
            })
            .await;
            if sleep_or_cancel(delay, &mut cancel).await {
                return Err(JobError::Cancelled(job.to_string()));
            }
        }
    }
}

/// Sleep for `delay`. Returns true if cancellation was signalled meanwhile
/// or the sender was dropped.
async fn sleep_or_cancel(delay: Duration, cancel: &mut Option<watch::Receiver<bool>>) -> bool {
    let rx = match cancel.as_mut() {
        Some(rx) => rx,
        None => {
            tokio::time::sleep(delay).await;
            return false;
        }
    };

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = rx.changed() => {
                if changed.is_err() || *rx.borrow() {
                    return true;
                }
            }
        }
    }
}

/// A poll running on a background task.
///
/// Dropping the task without waiting on it stops the polling.
pub struct PollTask<S> {
    join: JoinHandle<Result<PollOutcome<S>, JobError>>,
    cancel: watch::Sender<bool>,
}

impl<S> PollTask<S> {
    /// Ask the task to stop polling. The remote job is not touched.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the poll to end.
    pub async fn wait(self) -> Result<PollOutcome<S>, JobError> {
        let PollTask { join, cancel } = self;
        let result = join
            .await
            .map_err(|e| JobError::Cancelled(format!("poll task aborted: {}", e)));
        drop(cancel);
        result?
    }
}
