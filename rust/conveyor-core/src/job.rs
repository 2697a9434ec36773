use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt::Display, str::FromStr, time::Duration};
use strum_macros::{Display as EnumDisplay, EnumString};
use tokio::time::Instant;
use url::Url;
use uuid::Uuid;

/// Opaque, process-unique identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a new random [JobId].
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(JobId(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        JobId(value)
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──► Processing ──┬──► Completed
///                          └──► Error
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl JobStatus {
    /// Whether no further transitions may leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }
}

/// The category of a terminal job failure.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumDisplay, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// The downstream call could not be carried out (network, connection).
    Transport,
    /// The downstream call completed but reported an error.
    DownstreamRejected,
    /// The hard wall-clock budget elapsed before a terminal state.
    Timeout,
    /// An unexpected failure inside the executor.
    Internal,
}

/// Detail recorded on a job that ended in [JobStatus::Error].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub kind: FailureKind,
    pub attempts: u32,
}

impl Failure {
    pub fn new<M: Into<String>>(kind: FailureKind, message: M, attempts: u32) -> Self {
        Failure {
            message: message.into(),
            kind,
            attempts,
        }
    }
}

/// How a job's attempt sequence ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    Failed(Failure),
}

/// The state of a single submitted job, as held by [crate::JobStore].
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub payload: Value,
    pub callback: Option<Url>,
    pub result: Option<Value>,
    pub failure: Option<Failure>,
    /// Attempts started so far.
    pub attempts: u32,
    pub created_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl JobRecord {
    /// Creates a [JobStatus::Pending] record stamped with the current time.
    pub fn new(id: JobId, payload: Value, callback: Option<Url>) -> Self {
        JobRecord {
            id,
            status: JobStatus::Pending,
            payload,
            callback,
            result: None,
            failure: None,
            attempts: 0,
            created_at: Instant::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time elapsed since submission.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// The event describing this record's terminal state, if it has one.
    pub fn event(&self) -> Option<JobEvent> {
        match (self.status, &self.result, &self.failure) {
            (JobStatus::Completed, Some(result), _) => Some(JobEvent::Completed {
                id: self.id,
                result: result.clone(),
            }),
            (JobStatus::Error, _, Some(failure)) => Some(JobEvent::Error {
                id: self.id,
                error: failure.clone(),
            }),
            _ => None,
        }
    }
}

/// The body delivered to a job's callback endpoint once it is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobEvent {
    Completed { id: JobId, result: Value },
    Error { id: JobId, error: Failure },
}

impl JobEvent {
    pub fn id(&self) -> JobId {
        match self {
            JobEvent::Completed { id, .. } | JobEvent::Error { id, .. } => *id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobEvent::Completed { .. } => JobStatus::Completed,
            JobEvent::Error { .. } => JobStatus::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn it_renders_statuses_and_kinds_in_snake_case() -> Result<()> {
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(
            FailureKind::DownstreamRejected.to_string(),
            "downstream_rejected"
        );
        assert_eq!("timeout".parse::<FailureKind>()?, FailureKind::Timeout);
        assert_eq!(serde_json::to_value(JobStatus::Error)?, json!("error"));
        Ok(())
    }

    #[test]
    fn it_only_treats_completed_and_error_as_terminal() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
    }

    #[test]
    fn it_round_trips_job_ids_through_strings() -> Result<()> {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>()?, id);
        assert!("not-a-job".parse::<JobId>().is_err());
        Ok(())
    }

    #[test]
    fn it_serializes_events_with_a_status_tag() -> Result<()> {
        let id = JobId::new();

        let completed = JobEvent::Completed {
            id,
            result: json!({ "text": "hi" }),
        };
        assert_eq!(
            serde_json::to_value(&completed)?,
            json!({ "status": "completed", "id": id.to_string(), "result": { "text": "hi" } })
        );

        let failed = JobEvent::Error {
            id,
            error: Failure::new(FailureKind::Timeout, "too slow", 2),
        };
        assert_eq!(
            serde_json::to_value(&failed)?,
            json!({
                "status": "error",
                "id": id.to_string(),
                "error": { "message": "too slow", "kind": "timeout", "attempts": 2 }
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_has_no_event_until_terminal() {
        let mut record = JobRecord::new(JobId::new(), json!({}), None);
        assert!(record.event().is_none());

        record.status = JobStatus::Completed;
        record.result = Some(json!(1));
        assert_eq!(record.event().map(|event| event.status()), Some(JobStatus::Completed));
    }
}
