use crate::FailureKind;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Ways in which a single downstream completion attempt can fail.
#[derive(Error, Debug)]
pub enum DownstreamError {
    /// The call could not be delivered or its response never arrived.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The downstream service answered, but rejected the request.
    #[error("Downstream rejected the request: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(anyhow::Error),
}

impl DownstreamError {
    /// The [FailureKind] recorded when this is the last error a job sees.
    pub fn kind(&self) -> FailureKind {
        match self {
            DownstreamError::Transport(_) => FailureKind::Transport,
            DownstreamError::Rejected(_) => FailureKind::DownstreamRejected,
            DownstreamError::Other(_) => FailureKind::Internal,
        }
    }
}

impl From<anyhow::Error> for DownstreamError {
    fn from(error: anyhow::Error) -> Self {
        DownstreamError::Other(error)
    }
}

/// The asynchronous completion call that each job is made of. The payload
/// and result are opaque to the engine.
#[async_trait]
pub trait Downstream: Clone + Send + Sync + 'static {
    async fn complete(&self, payload: Value) -> Result<Value, DownstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn it_maps_errors_to_failure_kinds() {
        assert_eq!(
            DownstreamError::Transport("reset".into()).kind(),
            FailureKind::Transport
        );
        assert_eq!(
            DownstreamError::Rejected("rate limited".into()).kind(),
            FailureKind::DownstreamRejected
        );
        assert_eq!(
            DownstreamError::from(anyhow!("bug")).kind(),
            FailureKind::Internal
        );
    }
}
