use crate::{Downstream, DownstreamError};
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{Mutex, Semaphore};

/// One scripted reaction of a [ScriptedDownstream].
#[derive(Debug, Clone)]
pub enum Step {
    /// Respond with the payload that was sent.
    Echo,
    Succeed(Value),
    Transport(String),
    Reject(String),
    Internal(String),
    /// Never respond.
    Hang,
    Panic,
    /// Wait, then perform the inner step.
    After(Duration, Box<Step>),
}

/// A [Downstream] that walks through a fixed script, one [Step] per call.
/// The final step repeats once the script is exhausted.
#[derive(Debug, Clone)]
pub struct ScriptedDownstream {
    script: Arc<Mutex<VecDeque<Step>>>,
    calls: Arc<AtomicUsize>,
    outstanding: Arc<AtomicUsize>,
}

/// Counts a call as outstanding until it returns or is dropped mid-flight.
struct OutstandingCall(Arc<AtomicUsize>);

impl OutstandingCall {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        OutstandingCall(counter.clone())
    }
}

impl Drop for OutstandingCall {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedDownstream {
    pub fn new(steps: Vec<Step>) -> Self {
        ScriptedDownstream {
            script: Arc::new(Mutex::new(steps.into())),
            calls: Default::default(),
            outstanding: Default::default(),
        }
    }

    /// Number of calls made so far.
    pub async fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls that have started but neither returned nor been
    /// cancelled.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    async fn next_step(&self) -> Step {
        let mut script = self.script.lock().await;
        match script.len() {
            0 => Step::Echo,
            1 => script[0].clone(),
            _ => script.pop_front().unwrap_or(Step::Echo),
        }
    }
}

#[async_trait]
impl Downstream for ScriptedDownstream {
    async fn complete(&self, payload: Value) -> Result<Value, DownstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _outstanding = OutstandingCall::enter(&self.outstanding);
        let mut step = self.next_step().await;

        loop {
            return match step {
                Step::Echo => Ok(payload),
                Step::Succeed(value) => Ok(value),
                Step::Transport(message) => Err(DownstreamError::Transport(message)),
                Step::Reject(message) => Err(DownstreamError::Rejected(message)),
                Step::Internal(message) => Err(DownstreamError::Other(anyhow!(message))),
                Step::Hang => std::future::pending().await,
                Step::Panic => panic!("Scripted downstream panic"),
                Step::After(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                    continue;
                }
            };
        }
    }
}

/// A [Downstream] that echoes payloads, but only once a permit has been
/// released for the call with [GatedDownstream::open].
#[derive(Debug, Clone)]
pub struct GatedDownstream {
    gate: Arc<Semaphore>,
    started: Arc<Mutex<Vec<Value>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for GatedDownstream {
    fn default() -> Self {
        GatedDownstream {
            gate: Arc::new(Semaphore::new(0)),
            started: Default::default(),
            active: Default::default(),
            peak: Default::default(),
        }
    }
}

impl GatedDownstream {
    /// Lets `count` waiting (or future) calls finish.
    pub fn open(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Payloads of every call started so far, in order.
    pub async fn started(&self) -> Vec<Value> {
        self.started.lock().await.clone()
    }

    /// Highest number of simultaneously outstanding calls observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downstream for GatedDownstream {
    async fn complete(&self, payload: Value) -> Result<Value, DownstreamError> {
        self.started.lock().await.push(payload.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        let permit = self.gate.acquire().await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match permit {
            Ok(permit) => {
                permit.forget();
                Ok(payload)
            }
            Err(error) => Err(DownstreamError::Transport(error.to_string())),
        }
    }
}
