use crate::JobStore;
use anyhow::Result;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically evicts job records older than the retention window,
/// whatever their status.
#[derive(Debug, Clone)]
pub struct Reaper {
    store: JobStore,
    retention: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: JobStore, retention: Duration, interval: Duration) -> Self {
        Reaper {
            store,
            retention,
            interval,
        }
    }

    /// Runs one sweep and returns the number of evicted records.
    #[instrument(level = "debug", skip(self))]
    pub async fn sweep(&self) -> usize {
        let evicted = self.store.evict_older_than(self.retention).await;
        if evicted > 0 {
            debug!("Evicted {} job record(s) older than {:?}", evicted, self.retention);
        }
        evicted
    }

    /// Sweeps every `interval` on a background task until aborted.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) -> Result<()> {
        debug!("Reaper started (every {:?})", self.interval);
        loop {
            tokio::time::sleep(self.interval).await;
            self.sweep().await;
        }
    }
}
