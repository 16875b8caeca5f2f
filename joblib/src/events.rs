use crate::types::OutputLine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Lifecycle of a job. A job is `Running` from the moment its process is spawned until it exits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed { code: i32 },
    Killed { signal: i32 },
    Failed,
}

impl From<ExitStatus> for JobStatus {
    fn from(exit_status: ExitStatus) -> Self {
        if let Some(code) = exit_status.code() {
            JobStatus::Completed { code }
        } else if let Some(signal) = exit_status.signal() {
            JobStatus::Killed { signal }
        } else {
            JobStatus::Failed
        }
    }
}

/// Which of the child's two output pipes a line came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

impl OutputKind {
    pub fn event_name(self) -> EventName {
        match self {
            OutputKind::Stdout => EventName::Stdout,
            OutputKind::Stderr => EventName::Stderr,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    /// Sent once when a session is registered, carries the session id.
    Session,
    Stdout,
    Stderr,
    GpuStats,
    /// Dedicated channel for job-start failures.
    Error,
    ProcessExit,
    UploadsList,
}

/// A single message on a session's event channel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub event: EventName,
    pub payload: Value,
}

impl Event {
    pub fn new(event: EventName, payload: Value) -> Self {
        Self { event, payload }
    }

    pub fn line(kind: OutputKind, line: OutputLine) -> Self {
        Self::new(kind.event_name(), json!({ "data": line }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventName::Error, json!({ "data": message.into() }))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_events_use_stream_names() {
        let event = Event::line(OutputKind::Stderr, "boom".into());
        assert_eq!(
            event.to_json(),
            r#"{"event":"stderr","payload":{"data":"boom"}}"#
        );
    }

    #[test]
    fn job_status_serializes_with_state_tag() {
        let status = serde_json::to_value(JobStatus::Completed { code: 3 }).unwrap();
        assert_eq!(status, json!({ "state": "completed", "code": 3 }));
        assert_eq!(
            serde_json::to_value(JobStatus::Failed).unwrap(),
            json!({ "state": "failed" })
        );
    }
}
