//! Job and result records exchanged with the execution backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status written on accepted jobs.
pub const STATUS_SAFE: &str = "safe";

/// Status written on rejected jobs.
pub const STATUS_UNSAFE: &str = "unsafe";

/// Language assumed when a job does not name one.
pub const DEFAULT_LANGUAGE: &str = "python";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// An incoming code-execution request.
///
/// Ids and socket ids are passed through untouched, whatever their JSON type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default, alias = "jobId", skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<Value>,
}

impl Job {
    pub fn new(id: impl Into<Value>, code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            code: Some(code.into()),
            language: language.into(),
            socket_id: None,
        }
    }

    pub fn with_socket(mut self, socket_id: impl Into<Value>) -> Self {
        self.socket_id = Some(socket_id.into());
        self
    }

    /// Decode a JSON payload.
    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// The job id, or `"unknown"` when the job has none.
    pub fn job_id(&self) -> Value {
        self.id
            .clone()
            .unwrap_or_else(|| Value::String("unknown".to_string()))
    }
}

/// An accepted job, forwarded for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub job_id: Value,
    pub status: String,
    pub reason: String,
    pub output: Option<Value>,
    pub language: String,
    pub code: String,
    pub socket_id: Option<Value>,
}

/// A rejected job, published with the reason it was blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord {
    pub id: Value,
    pub job_id: Value,
    pub status: String,
    pub reason: String,
    pub output: Option<Value>,
    pub language: String,
    pub code: Option<String>,
    pub socket_id: Option<Value>,
}

/// The record produced for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Execution(ExecutionRecord),
    Rejection(RejectionRecord),
}

/// A screened job and the topic it is routed to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dispatch {
    pub topic: String,
    pub payload: Record,
}

impl Dispatch {
    pub fn is_safe(&self) -> bool {
        matches!(self.payload, Record::Execution(_))
    }

    pub fn reason(&self) -> &str {
        match &self.payload {
            Record::Execution(r) => &r.reason,
            Record::Rejection(r) => &r.reason,
        }
    }
}
