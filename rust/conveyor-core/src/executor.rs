use crate::{
    ConveyorConfig, Downstream, Failure, FailureKind, JobId, JobOutcome, JobRecord, JobStore,
    NotificationTransport, Notifier,
};
use serde_json::Value;
use std::time::Duration;

/// Attempt bound, backoff and wall-clock budget applied to every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delay inserted after the failed attempt at `attempt_index` (0-based):
    /// `backoff_base * 2^attempt_index`.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt_index))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&ConveyorConfig::default())
    }
}

impl From<&ConveyorConfig> for RetryPolicy {
    fn from(config: &ConveyorConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
            timeout: config.job_timeout,
        }
    }
}

/// How the race between the attempt sequence and the wall-clock budget
/// was settled.
enum Settled {
    Finished(JobOutcome),
    Panicked(String),
    TimedOut,
    Abandoned,
}

/// Drives a single job through the [Downstream] call until it is terminal,
/// then hands the terminal event to the [Notifier].
#[derive(Debug, Clone)]
pub struct JobExecutor<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    store: JobStore,
    downstream: D,
    notifier: Notifier<T>,
    policy: RetryPolicy,
}

impl<D, T> JobExecutor<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    pub fn new(store: JobStore, downstream: D, notifier: Notifier<T>, policy: RetryPolicy) -> Self {
        JobExecutor {
            store,
            downstream,
            notifier,
            policy,
        }
    }

    /// Runs job `id` to a terminal state. Returns the terminal record if this
    /// call performed the terminal transition.
    ///
    /// The attempt sequence runs on its own task and races the job's
    /// wall-clock budget. If the budget wins, the attempt task is aborted
    /// and the job is finalized as a timeout.
    #[instrument(level = "debug", skip(self, payload))]
    pub async fn run(&self, id: JobId, payload: Value) -> Option<JobRecord> {
        if !self.store.mark_processing(&id).await {
            warn!("Job {} is not pending; refusing to process it", id);
            return None;
        }
        debug!("Processing job {}", id);

        let mut attempts = {
            let executor = self.clone();
            tokio::spawn(async move { executor.attempt(id, payload).await })
        };

        let settled = tokio::select! {
            joined = &mut attempts => match joined {
                Ok(Some(outcome)) => Settled::Finished(outcome),
                Ok(None) => Settled::Abandoned,
                Err(error) => Settled::Panicked(error.to_string()),
            },
            _ = tokio::time::sleep(self.policy.timeout) => {
                attempts.abort();
                Settled::TimedOut
            }
        };

        let timeout = self.policy.timeout;
        let finalized = match settled {
            Settled::Abandoned => {
                debug!("Job {} was finalized elsewhere", id);
                None
            }
            Settled::Finished(outcome) => self.store.finalize(&id, |_| outcome).await,
            Settled::Panicked(message) => {
                self.store
                    .finalize(&id, |record| {
                        JobOutcome::Failed(Failure::new(
                            FailureKind::Internal,
                            message,
                            record.attempts,
                        ))
                    })
                    .await
            }
            Settled::TimedOut => {
                self.store
                    .finalize(&id, |record| {
                        JobOutcome::Failed(Failure::new(
                            FailureKind::Timeout,
                            format!("Job did not finish within {:?}", timeout),
                            record.attempts,
                        ))
                    })
                    .await
            }
        };

        if let Some(record) = &finalized {
            match &record.failure {
                None => info!("Job {} completed after {} attempt(s)", id, record.attempts),
                Some(failure) => error!(
                    "Job {} failed ({}) after {} attempt(s): {}",
                    id, failure.kind, failure.attempts, failure.message
                ),
            }

            if let (Some(target), Some(event)) = (record.callback.clone(), record.event()) {
                self.notifier.notify(target, event);
            }
        }

        finalized
    }

    /// The bounded retry loop. Returns [None] if the job became terminal
    /// underneath it, in which case any result it obtained is dropped.
    async fn attempt(&self, id: JobId, payload: Value) -> Option<JobOutcome> {
        loop {
            let attempt = self.store.begin_attempt(&id).await?;

            match self.downstream.complete(payload.clone()).await {
                Ok(result) => {
                    if self.store.is_terminal(&id).await {
                        debug!("Discarding late result of job {} (attempt {})", id, attempt);
                        return None;
                    }
                    return Some(JobOutcome::Completed(result));
                }
                Err(error) if attempt >= self.policy.max_attempts => {
                    return Some(JobOutcome::Failed(Failure::new(
                        error.kind(),
                        error.to_string(),
                        attempt,
                    )));
                }
                Err(error) => {
                    let delay = self.policy.backoff(attempt - 1);
                    warn!(
                        "Attempt {}/{} of job {} failed: {}; retrying in {:?}",
                        attempt, self.policy.max_attempts, id, error, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
