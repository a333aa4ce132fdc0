//! Wire types shared by the executor, the catalog and the orchestrator.
//!
//! The backend speaks JSON. Every process response carries a `status` field and,
//! for start responses, the `processId` assigned to the new process.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RequestError;

/// HTTP verbs used by the operation catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Verb> for reqwest::Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A single call handed to a [`RequestExecutor`](super::RequestExecutor).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub verb: Verb,
    /// Path relative to the backend base URL, always starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Bearer credential, if the call is authenticated.
    pub credential: Option<String>,
    pub timeout: Duration,
}

impl ApiRequest {
    /// Looks up a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Status reported by the backend for a process.
///
/// `error`, `partial`, `stopped` and `done` are terminal; `challenge` means the
/// backend is waiting for caller input. Anything else keeps the job running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessStatus {
    Pending,
    Challenge,
    Done,
    Error,
    Partial,
    Stopped,
    /// The response carried no status field.
    Unreported,
    Other(String),
}

impl ProcessStatus {
    /// Status names after which polling never continues.
    pub const TERMINAL: [&'static str; 4] = ["error", "partial", "stopped", "done"];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Error
                | ProcessStatus::Partial
                | ProcessStatus::Stopped
                | ProcessStatus::Done
        )
    }

    pub fn needs_input(&self) -> bool {
        matches!(self, ProcessStatus::Challenge)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProcessStatus::Pending => "pending",
            ProcessStatus::Challenge => "challenge",
            ProcessStatus::Done => "done",
            ProcessStatus::Error => "error",
            ProcessStatus::Partial => "partial",
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Unreported => "",
            ProcessStatus::Other(s) => s,
        }
    }
}

impl From<String> for ProcessStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => ProcessStatus::Pending,
            "challenge" => ProcessStatus::Challenge,
            "done" => ProcessStatus::Done,
            "error" => ProcessStatus::Error,
            "partial" => ProcessStatus::Partial,
            "stopped" => ProcessStatus::Stopped,
            "" => ProcessStatus::Unreported,
            _ => ProcessStatus::Other(s),
        }
    }
}

impl From<&str> for ProcessStatus {
    fn from(s: &str) -> Self {
        ProcessStatus::from(s.to_string())
    }
}

impl From<ProcessStatus> for String {
    fn from(status: ProcessStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Unreported => f.write_str("unreported"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// A decoded start or check response.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSnapshot {
    pub process_id: Option<String>,
    pub status: ProcessStatus,
    /// The full response body as received.
    pub body: Value,
}

impl ProcessSnapshot {
    pub fn from_value(body: Value) -> Result<Self, RequestError> {
        let Value::Object(map) = &body else {
            return Err(RequestError::Malformed(format!(
                "expected a JSON object, got {body}"
            )));
        };

        let process_id = match map.get("processId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(other) => {
                return Err(RequestError::Malformed(format!(
                    "processId must be a string, got {other}"
                )));
            }
        };

        let status = match map.get("status") {
            None | Some(Value::Null) => ProcessStatus::Unreported,
            Some(Value::String(s)) => ProcessStatus::from(s.as_str()),
            Some(other) => {
                return Err(RequestError::Malformed(format!(
                    "status must be a string, got {other}"
                )));
            }
        };

        Ok(Self {
            process_id,
            status,
            body,
        })
    }
}
