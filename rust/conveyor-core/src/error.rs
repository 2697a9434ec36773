use crate::JobId;
use conveyor_common::channel::ChannelError;
use thiserror::Error;

/// Failures surfaced to callers of a [crate::Conveyor]. Job failures are
/// never reported this way; they are recorded on the job itself.
#[derive(Error, Debug)]
pub enum ConveyorError {
    #[error("{0}")]
    Other(anyhow::Error),

    #[error("The admission queue is no longer running")]
    QueueClosed,

    #[error("A job with id {0} has already been submitted")]
    DuplicateJob(JobId),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Admission queue channel failure: {0}")]
    Channel(#[from] ChannelError),
}

impl From<anyhow::Error> for ConveyorError {
    fn from(error: anyhow::Error) -> Self {
        ConveyorError::Other(error)
    }
}
