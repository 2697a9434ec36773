use super::{Admission, QueueClient, QueueProcessor, QueueRequest, QueueResponse, QueueStats};
use crate::{Downstream, JobExecutor, JobId, NotificationTransport};
use anyhow::Result;
use conveyor_common::spawn_no_wait;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

#[cfg(doc)]
use super::AdmissionQueue;

/// [QueueOrchestrator] owns the waiting sequence and the in-flight set of an
/// [AdmissionQueue].
///
/// Every admission and release is handled as a message on a single task,
/// so "is there a free slot?" and "take the waiting head" are never decided
/// concurrently. Admitted jobs run on their own tasks through the
/// [JobExecutor], and report back with a release message once terminal.
pub struct QueueOrchestrator<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    concurrency: usize,
    waiting: VecDeque<(JobId, Value)>,
    in_flight: HashSet<JobId>,
    executor: JobExecutor<D, T>,
    client: QueueClient,
    requests: Option<QueueProcessor>,
}

impl<D, T> QueueOrchestrator<D, T>
where
    D: Downstream,
    T: NotificationTransport,
{
    pub fn new(
        concurrency: usize,
        executor: JobExecutor<D, T>,
        client: QueueClient,
        requests: QueueProcessor,
    ) -> Self {
        QueueOrchestrator {
            concurrency,
            waiting: VecDeque::new(),
            in_flight: HashSet::new(),
            executor,
            client,
            requests: Some(requests),
        }
    }

    /// Starts a job right away if a slot is free and nobody is waiting,
    /// otherwise appends it to the waiting sequence.
    fn admit(&mut self, id: JobId, payload: Value) -> Admission {
        let queue_position = if self.waiting.is_empty() && self.in_flight.len() < self.concurrency
        {
            self.start_job(id, payload);
            0
        } else {
            self.waiting.push_back((id, payload));
            debug!("Job {} is waiting at position {}", id, self.waiting.len());
            self.waiting.len()
        };

        Admission {
            id,
            queue_position,
            active_requests: self.in_flight.len(),
        }
    }

    /// Frees the slot held by `id` and promotes waiting jobs, in arrival
    /// order, until the waiting sequence is empty or every slot is taken.
    fn release(&mut self, id: JobId) {
        if !self.in_flight.remove(&id) {
            warn!("Release requested for job {} which holds no slot", id);
        }

        while self.in_flight.len() < self.concurrency {
            match self.waiting.pop_front() {
                Some((next, payload)) => {
                    debug!("Promoting job {}", next);
                    self.start_job(next, payload);
                }
                None => break,
            }
        }
    }

    fn start_job(&mut self, id: JobId, payload: Value) {
        self.in_flight.insert(id);

        let executor = self.executor.clone();
        let client = self.client.clone();
        spawn_no_wait(async move {
            executor.run(id, payload).await;
            if let Err(error) = client.send_oneshot(QueueRequest::Release(id)) {
                error!("Could not release the slot held by job {}: {}", id, error);
            }
        });
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            waiting: self.waiting.len(),
            in_flight: self.in_flight.len(),
        }
    }

    /// Process requests on the current task. Because in-flight jobs hold a
    /// client to report back with, this only returns if the request stream
    /// breaks; the owning [AdmissionQueue] aborts it instead.
    pub async fn start(mut self) -> Result<()> {
        let mut requests = self
            .requests
            .take()
            .ok_or_else(|| anyhow::anyhow!("Queue orchestrator was already started"))?;

        debug!("Admission queue started (concurrency {})", self.concurrency);

        while let Some(envelope) = requests.pull().await {
            let (request, responder) = envelope.into_parts();
            match request {
                QueueRequest::Submit { id, payload } => {
                    let admission = self.admit(id, payload);
                    responder.respond(Ok(QueueResponse::Admitted(admission)));
                }
                QueueRequest::Release(id) => self.release(id),
                QueueRequest::Stats => {
                    responder.respond(Ok(QueueResponse::Stats(self.stats())));
                }
            }
        }

        Ok(())
    }
}
