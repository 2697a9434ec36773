use anyhow::Result;
use std::future::Future;
use tokio::task::JoinSet;

/// Spawns a future without awaiting it; it immediately starts processing.
pub fn spawn_no_wait<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::task::spawn(future);
}

/// An aggregator of fallible async work that can be joined once all of it
/// is finished. Unlike a bare [JoinSet], results are not observed
/// individually; the first failure is reported by [TaskQueue::join].
///
/// ```rust
/// # use anyhow::Result;
/// # use conveyor_common::TaskQueue;
/// #
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> Result<()> {
/// let mut task_queue = TaskQueue::default();
/// for i in 0..10 {
///     task_queue.spawn(async move {
///         println!("{}", i);
///         Ok(())
///     });
/// }
/// task_queue.join().await?;
/// #   Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TaskQueue {
    tasks: JoinSet<Result<()>>,
}

impl TaskQueue {
    /// Queue a future to be spawned. All queued futures are polled to
    /// completion before the [TaskQueue] can be joined.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    /// Number of tasks that have not yet been joined.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every queued task has been joined.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns a future that finishes when all queued futures have
    /// finished.
    pub async fn join(&mut self) -> Result<()> {
        while let Some(result) = self.tasks.join_next().await {
            trace!("Task completed, {} remaining in queue...", self.tasks.len());
            result??;
        }
        Ok(())
    }
}
