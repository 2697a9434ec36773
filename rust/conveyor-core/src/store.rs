use crate::{ConveyorError, JobId, JobOutcome, JobRecord, JobStatus};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::RwLock, time::Instant};

/// In-memory mapping of [JobId] to [JobRecord]; the single source of truth
/// for status queries.
///
/// Cloning a [JobStore] yields another handle to the same records. Every
/// operation takes the store-wide lock for its whole duration, so each
/// transition below is atomic with respect to every other.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    records: Arc<RwLock<Records>>,
}

#[derive(Debug, Default)]
struct Records {
    live: HashMap<JobId, JobRecord>,
    /// Every id ever inserted. Eviction leaves this untouched.
    issued: HashSet<JobId>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a freshly submitted record. Ids are unique for the lifetime of
    /// the store: an id stays taken after its record has been evicted.
    pub async fn insert(&self, record: JobRecord) -> Result<(), ConveyorError> {
        let mut records = self.records.write().await;
        if !records.issued.insert(record.id) {
            return Err(ConveyorError::DuplicateJob(record.id));
        }
        records.live.insert(record.id, record);
        Ok(())
    }

    /// A snapshot of the record for `id`, or [None] if it is unknown or was
    /// evicted.
    pub async fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.records.read().await.live.get(id).cloned()
    }

    pub async fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.records.read().await.live.get(id).map(|record| record.status)
    }

    pub async fn is_terminal(&self, id: &JobId) -> bool {
        self.status(id)
            .await
            .map(|status| status.is_terminal())
            .unwrap_or(false)
    }

    /// Moves a [JobStatus::Pending] record to [JobStatus::Processing].
    /// Returns `false` if the record is missing or not pending.
    pub async fn mark_processing(&self, id: &JobId) -> bool {
        let mut records = self.records.write().await;
        match records.live.get_mut(id) {
            Some(record) if record.status == JobStatus::Pending => {
                record.status = JobStatus::Processing;
                record.started_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Counts a new attempt against a processing record and returns the
    /// attempt number. Returns [None] once the record is terminal (or
    /// gone), in which case no further attempt should be made.
    pub async fn begin_attempt(&self, id: &JobId) -> Option<u32> {
        let mut records = self.records.write().await;
        match records.live.get_mut(id) {
            Some(record) if record.status == JobStatus::Processing => {
                record.attempts += 1;
                Some(record.attempts)
            }
            _ => None,
        }
    }

    /// Performs the terminal transition for `id` only if the record is
    /// [JobStatus::Processing]. `outcome` is computed from the record while
    /// the lock is held. Returns the updated record to the caller that won
    /// the transition, and [None] to anyone else.
    pub async fn finalize<F>(&self, id: &JobId, outcome: F) -> Option<JobRecord>
    where
        F: FnOnce(&JobRecord) -> JobOutcome,
    {
        let mut records = self.records.write().await;
        let record = records.live.get_mut(id)?;

        if record.status != JobStatus::Processing {
            return None;
        }

        match outcome(record) {
            JobOutcome::Completed(result) => {
                record.status = JobStatus::Completed;
                record.result = Some(result);
            }
            JobOutcome::Failed(failure) => {
                record.status = JobStatus::Error;
                record.failure = Some(failure);
            }
        }
        record.finished_at = Some(Instant::now());

        Some(record.clone())
    }

    /// Undoes [JobStore::insert] for a record that never started: drops it
    /// and frees its id again.
    pub async fn remove(&self, id: &JobId) -> Option<JobRecord> {
        let mut records = self.records.write().await;
        let record = records.live.remove(id)?;
        records.issued.remove(id);
        Some(record)
    }

    /// Removes every record whose age exceeds `retention`, regardless of
    /// status. Returns the number of evicted records.
    pub async fn evict_older_than(&self, retention: Duration) -> usize {
        let mut records = self.records.write().await;
        let before = records.live.len();
        records
            .live
            .retain(|_, record| record.age() <= retention);
        before - records.live.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.live.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Failure, FailureKind};
    use anyhow::Result;
    use serde_json::json;

    async fn store_with_job() -> Result<(JobStore, JobId)> {
        let store = JobStore::new();
        let id = JobId::new();
        store.insert(JobRecord::new(id, json!({ "prompt": "hi" }), None)).await?;
        Ok((store, id))
    }

    #[tokio::test]
    async fn it_rejects_duplicate_ids() -> Result<()> {
        let (store, id) = store_with_job().await?;
        let duplicate = store.insert(JobRecord::new(id, json!({}), None)).await;

        assert!(matches!(duplicate, Err(ConveyorError::DuplicateJob(dup)) if dup == id));
        assert_eq!(store.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_only_starts_pending_jobs_once() -> Result<()> {
        let (store, id) = store_with_job().await?;

        assert!(store.mark_processing(&id).await);
        assert!(!store.mark_processing(&id).await);
        assert_eq!(store.status(&id).await, Some(JobStatus::Processing));
        assert!(!store.mark_processing(&JobId::new()).await);
        Ok(())
    }

    #[tokio::test]
    async fn it_counts_attempts_only_while_processing() -> Result<()> {
        let (store, id) = store_with_job().await?;
        assert_eq!(store.begin_attempt(&id).await, None);

        store.mark_processing(&id).await;
        assert_eq!(store.begin_attempt(&id).await, Some(1));
        assert_eq!(store.begin_attempt(&id).await, Some(2));

        store
            .finalize(&id, |_| JobOutcome::Completed(json!("done")))
            .await;
        assert_eq!(store.begin_attempt(&id).await, None);
        assert_eq!(store.get(&id).await.map(|record| record.attempts), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn it_finalizes_exactly_once() -> Result<()> {
        let (store, id) = store_with_job().await?;
        store.mark_processing(&id).await;

        let first = store
            .finalize(&id, |record| {
                JobOutcome::Failed(Failure::new(
                    FailureKind::Timeout,
                    "timed out",
                    record.attempts,
                ))
            })
            .await;
        let second = store
            .finalize(&id, |_| JobOutcome::Completed(json!("late")))
            .await;

        assert!(first.is_some());
        assert!(second.is_none());

        let record = store.get(&id).await.expect("record is present");
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.result, None);
        assert_eq!(
            record.failure.map(|failure| failure.kind),
            Some(FailureKind::Timeout)
        );
        assert!(record.finished_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn it_does_not_finalize_jobs_that_never_started() -> Result<()> {
        let (store, id) = store_with_job().await?;

        let finalized = store
            .finalize(&id, |_| JobOutcome::Completed(json!("skipped ahead")))
            .await;

        assert!(finalized.is_none());
        let record = store.get(&id).await.expect("record is present");
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.result, None);
        assert!(store.mark_processing(&id).await);
        Ok(())
    }

    #[tokio::test]
    async fn it_does_not_finalize_unknown_jobs() {
        let store = JobStore::new();
        let finalized = store
            .finalize(&JobId::new(), |_| JobOutcome::Completed(json!(null)))
            .await;
        assert!(finalized.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn it_evicts_by_age_regardless_of_status() -> Result<()> {
        let retention = Duration::from_secs(60 * 60);
        let store = JobStore::new();

        let old_pending = JobId::new();
        store.insert(JobRecord::new(old_pending, json!({}), None)).await?;

        let old_completed = JobId::new();
        store.insert(JobRecord::new(old_completed, json!({}), None)).await?;
        store.mark_processing(&old_completed).await;
        store
            .finalize(&old_completed, |_| JobOutcome::Completed(json!(1)))
            .await;

        tokio::time::advance(Duration::from_secs(30 * 60)).await;

        let young = JobId::new();
        store.insert(JobRecord::new(young, json!({}), None)).await?;

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert_eq!(store.evict_older_than(retention).await, 0);

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert_eq!(store.evict_older_than(retention).await, 2);

        assert!(store.get(&old_pending).await.is_none());
        assert!(store.get(&old_completed).await.is_none());
        assert!(store.get(&young).await.is_some());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn it_keeps_evicted_ids_taken() -> Result<()> {
        let retention = Duration::from_secs(10);
        let (store, id) = store_with_job().await?;
        store.mark_processing(&id).await;

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.evict_older_than(retention).await, 1);

        let reused = store.insert(JobRecord::new(id, json!(2), None)).await;
        assert!(matches!(reused, Err(ConveyorError::DuplicateJob(dup)) if dup == id));
        assert!(store.get(&id).await.is_none());

        let late = store
            .finalize(&id, |_| JobOutcome::Completed(json!(1)))
            .await;
        assert!(late.is_none());
        assert!(store.is_empty().await);
        Ok(())
    }

    #[tokio::test]
    async fn it_frees_the_id_of_a_removed_record() -> Result<()> {
        let (store, id) = store_with_job().await?;

        assert!(store.remove(&id).await.is_some());
        store.insert(JobRecord::new(id, json!("again"), None)).await?;
        assert_eq!(
            store.get(&id).await.map(|record| record.payload),
            Some(json!("again"))
        );
        Ok(())
    }
}
