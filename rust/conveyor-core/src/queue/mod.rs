//! The admission queue: a FIFO waiting sequence in front of a bounded set of
//! in-flight jobs.

mod orchestrator;

pub use orchestrator::*;

use crate::{ConveyorError, Downstream, JobExecutor, JobId, NotificationTransport};
use anyhow::{anyhow, Result};
use conveyor_common::channel::{request_channel, ChannelError, RequestClient, RequestProcessor};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

/// Requests handled by a [QueueOrchestrator].
#[derive(Debug)]
pub enum QueueRequest {
    Submit { id: JobId, payload: Value },
    /// Sent once a job is terminal, to free its slot.
    Release(JobId),
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueResponse {
    Admitted(Admission),
    Stats(QueueStats),
}

pub type QueueClient = RequestClient<QueueRequest, QueueResponse, ConveyorError>;
pub type QueueProcessor = RequestProcessor<QueueRequest, QueueResponse, ConveyorError>;

/// What a submitter learns at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub id: JobId,
    /// 0 if the job started immediately, otherwise its 1-based position
    /// in the waiting sequence.
    pub queue_position: usize,
    /// In-flight jobs right after this admission.
    pub active_requests: usize,
}

impl Admission {
    pub fn started(&self) -> bool {
        self.queue_position == 0
    }
}

/// An advisory snapshot of the queue; it may be stale by the time it is
/// read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub in_flight: usize,
}

/// Handle to a running [QueueOrchestrator].
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    client: QueueClient,
}

impl AdmissionQueue {
    /// Spawns a [QueueOrchestrator] admitting at most `concurrency` jobs at
    /// once through `executor`.
    pub fn spawn<D, T>(
        concurrency: usize,
        executor: JobExecutor<D, T>,
    ) -> (Self, JoinHandle<Result<()>>)
    where
        D: Downstream,
        T: NotificationTransport,
    {
        let (client, requests) = request_channel();
        let orchestrator = QueueOrchestrator::new(concurrency, executor, client.clone(), requests);

        let handle = tokio::spawn(async move {
            orchestrator.start().await.map_err(|error| {
                error!("Unrecoverable admission queue error: {}", error);
                error
            })
        });

        (AdmissionQueue { client }, handle)
    }

    /// Hands job `id` to the queue. Returns as soon as the job has been
    /// started or placed in the waiting sequence.
    pub async fn submit(&self, id: JobId, payload: Value) -> Result<Admission, ConveyorError> {
        match self.request(QueueRequest::Submit { id, payload }).await? {
            QueueResponse::Admitted(admission) => Ok(admission),
            other => Err(unexpected(other)),
        }
    }

    /// Reports job `id` as terminal, freeing its slot for the next waiting
    /// job.
    pub fn release(&self, id: JobId) -> Result<(), ConveyorError> {
        self.client
            .send_oneshot(QueueRequest::Release(id))
            .map_err(closed)
    }

    pub async fn stats(&self) -> Result<QueueStats, ConveyorError> {
        match self.request(QueueRequest::Stats).await? {
            QueueResponse::Stats(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    async fn request(&self, request: QueueRequest) -> Result<QueueResponse, ConveyorError> {
        self.client.send(request).await.map_err(closed)?
    }
}

fn closed(error: ChannelError) -> ConveyorError {
    match error {
        ChannelError::Send => ConveyorError::QueueClosed,
        other => ConveyorError::Channel(other),
    }
}

fn unexpected(response: QueueResponse) -> ConveyorError {
    ConveyorError::Other(anyhow!("Unexpected admission queue response: {:?}", response))
}
