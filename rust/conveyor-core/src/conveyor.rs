use crate::{
    Admission, AdmissionQueue, ConveyorConfig, ConveyorError, Downstream, JobExecutor, JobId,
    JobRecord, JobStore, NotificationTransport, Notifier, QueueStats, Reaper, RetryPolicy,
};
use anyhow::Result;
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use url::Url;

/// Background tasks owned by a [Conveyor]; aborted once the last handle is
/// dropped.
#[derive(Debug)]
struct BackgroundTasks {
    queue: JoinHandle<Result<()>>,
    reaper: JoinHandle<Result<()>>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.queue.abort();
        self.reaper.abort();
    }
}

/// Accepts completion jobs, runs them under a concurrency limit with
/// retries, and answers status queries.
///
/// To stop all processing, drop every clone of the [Conveyor]. Work that is
/// in flight at that point is dropped.
#[derive(Debug, Clone)]
pub struct Conveyor {
    store: JobStore,
    queue: AdmissionQueue,
    reaper: Reaper,
    config: ConveyorConfig,
    _tasks: Arc<BackgroundTasks>,
}

impl Conveyor {
    /// Records a new job and hands it to the admission queue. Returns once
    /// the job has been started or queued, never waiting for it to finish.
    pub async fn submit(
        &self,
        id: JobId,
        payload: Value,
        callback: Option<Url>,
    ) -> Result<Admission, ConveyorError> {
        self.store
            .insert(JobRecord::new(id, payload.clone(), callback))
            .await?;

        match self.queue.submit(id, payload).await {
            Ok(admission) => {
                debug!(
                    "Admitted job {} (position {}, {} active)",
                    id, admission.queue_position, admission.active_requests
                );
                Ok(admission)
            }
            Err(error) => {
                self.store.remove(&id).await;
                Err(error)
            }
        }
    }

    /// Like [Conveyor::submit], with a freshly generated [JobId].
    pub async fn enqueue(
        &self,
        payload: Value,
        callback: Option<Url>,
    ) -> Result<Admission, ConveyorError> {
        self.submit(JobId::new(), payload, callback).await
    }

    /// The current record of job `id`; [None] if it is unknown or older than
    /// the retention window, whether or not the reaper has swept it yet.
    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.store
            .get(id)
            .await
            .filter(|record| record.age() <= self.config.retention)
    }

    pub async fn stats(&self) -> Result<QueueStats, ConveyorError> {
        self.queue.stats().await
    }

    /// Runs a reaper sweep right away, returning the number of evicted
    /// records.
    pub async fn reap_now(&self) -> usize {
        self.reaper.sweep().await
    }

    pub fn config(&self) -> &ConveyorConfig {
        &self.config
    }
}

/// Builder helper for [Conveyor].
pub struct ConveyorBuilder<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    config: ConveyorConfig,
    downstream: Option<D>,
    transport: Option<T>,
}

impl<D, T> ConveyorBuilder<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    /// Creates a new [ConveyorBuilder] with the default configuration.
    pub fn new() -> Self {
        Self {
            config: ConveyorConfig::default(),
            downstream: None,
            transport: None,
        }
    }

    /// Replaces every setting with those of `config`.
    pub fn with_config(mut self, config: ConveyorConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum number of jobs in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Downstream attempts per job, including the first.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Delay before the first retry; doubled for each subsequent retry.
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.config.backoff_base = backoff_base;
        self
    }

    /// How long a job may spend processing before it is failed as timed
    /// out.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.config.job_timeout = job_timeout;
        self
    }

    /// How long records are kept after submission.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.config.reap_interval = reap_interval;
        self
    }

    /// The completion call each job is made of.
    pub fn with_downstream(mut self, downstream: D) -> Self {
        self.downstream = Some(downstream);
        self
    }

    /// How terminal events reach callback endpoints.
    pub fn with_transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build a [Conveyor] from collected parameters, spawning its admission
    /// queue and reaper on the current runtime.
    pub fn build(self) -> Result<Conveyor, ConveyorError> {
        self.config.validate()?;

        let downstream = self.downstream.ok_or_else(|| {
            ConveyorError::InvalidConfiguration("a downstream must be provided".into())
        })?;
        let transport = self.transport.ok_or_else(|| {
            ConveyorError::InvalidConfiguration("a notification transport must be provided".into())
        })?;

        let store = JobStore::new();
        let executor = JobExecutor::new(
            store.clone(),
            downstream,
            Notifier::new(transport),
            RetryPolicy::from(&self.config),
        );
        let (queue, queue_handle) = AdmissionQueue::spawn(self.config.concurrency, executor);

        let reaper = Reaper::new(
            store.clone(),
            self.config.retention,
            self.config.reap_interval,
        );
        let reaper_handle = reaper.clone().spawn();

        Ok(Conveyor {
            store,
            queue,
            reaper,
            config: self.config,
            _tasks: Arc::new(BackgroundTasks {
                queue: queue_handle,
                reaper: reaper_handle,
            }),
        })
    }
}

impl<D, T> Default for ConveyorBuilder<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::{RecordingTransport, ScriptedDownstream, Step};
    use serde_json::json;

    fn builder() -> ConveyorBuilder<ScriptedDownstream, RecordingTransport> {
        ConveyorBuilder::new()
            .with_downstream(ScriptedDownstream::new(vec![Step::Echo]))
            .with_transport(RecordingTransport::default())
    }

    #[tokio::test]
    async fn it_requires_a_downstream_and_a_transport() {
        let missing_downstream = ConveyorBuilder::<ScriptedDownstream, RecordingTransport>::new()
            .with_transport(RecordingTransport::default())
            .build();
        assert!(matches!(
            missing_downstream,
            Err(ConveyorError::InvalidConfiguration(_))
        ));

        let missing_transport = ConveyorBuilder::<ScriptedDownstream, RecordingTransport>::new()
            .with_downstream(ScriptedDownstream::new(vec![]))
            .build();
        assert!(matches!(
            missing_transport,
            Err(ConveyorError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn it_validates_configuration_before_spawning() {
        let result = builder().with_concurrency(0).build();
        assert!(matches!(result, Err(ConveyorError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn it_carries_builder_settings_into_its_config() -> anyhow::Result<()> {
        let conveyor = builder()
            .with_concurrency(5)
            .with_max_attempts(4)
            .with_backoff_base(Duration::from_millis(10))
            .with_job_timeout(Duration::from_secs(30))
            .with_retention(Duration::from_secs(90))
            .with_reap_interval(Duration::from_secs(15))
            .build()?;

        assert_eq!(
            conveyor.config(),
            &ConveyorConfig {
                concurrency: 5,
                max_attempts: 4,
                backoff_base: Duration::from_millis(10),
                job_timeout: Duration::from_secs(30),
                retention: Duration::from_secs(90),
                reap_interval: Duration::from_secs(15),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_resubmission_of_a_known_id() -> anyhow::Result<()> {
        let conveyor = builder().build()?;
        let admission = conveyor.enqueue(json!("once"), None).await?;

        let again = conveyor.submit(admission.id, json!("twice"), None).await;
        assert!(matches!(again, Err(ConveyorError::DuplicateJob(id)) if id == admission.id));

        let record = conveyor.get(&admission.id).await.expect("record is present");
        assert_eq!(record.payload, json!("once"));
        Ok(())
    }
}
