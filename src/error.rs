use serde_json::Value;
use thiserror::Error;

use crate::fields::FieldKind;
use crate::queue::JobStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// 工作流错误分类
#[derive(Debug, Error)]
pub enum Error {
    /// The document lacks an anchor the indexer needs to walk it.
    #[error("Malformed workflow document: {0}")]
    Structural(String),

    #[error("Cannot resolve input '{field_name}' on node '{node_id}': {detail} (shape: {shape})")]
    Resolution {
        node_id: String,
        field_name: String,
        shape: String,
        detail: String,
    },

    #[error("Input {input_index} is locked to {locked:?}, cannot accept {attempted}")]
    TypeLock {
        input_index: usize,
        locked: FieldKind,
        attempted: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Remote endpoint rejected the submission (HTTP {status}): {diagnostic}")]
    SubmissionRejected {
        status: u16,
        diagnostic: Value,
        payload: Box<Value>,
    },

    #[error("Reference '{reference}' matches inputs {candidates:?}")]
    AmbiguousReference {
        reference: String,
        candidates: Vec<usize>,
    },

    #[error("Job {item_id} has not finished (status: {status})")]
    NotCompleted { item_id: i64, status: JobStatus },

    #[error("No input matches '{0}'")]
    UnknownInput(String),

    /// An artifact name that would land outside the download directory.
    #[error("Refusing to write artifact '{0}': not a plain file name")]
    UnsafeArtifactName(String),

    #[error("Timed out after {0:?} waiting for the job to finish")]
    Timeout(std::time::Duration),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Event channel error: {0}")]
    Events(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Events(err.to_string())
    }
}

/// A single per-field or whole-workflow constraint failure.
///
/// These are collected by `InputStore::validate_all` and handed back as data so
/// callers can report every problem in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// `None` for failures of a rule spanning several inputs.
    pub input_index: Option<usize>,
    pub rule: Option<String>,
    pub message: String,
}

impl ValidationError {
    pub fn field(input_index: usize, message: impl Into<String>) -> Self {
        Self {
            input_index: Some(input_index),
            rule: None,
            message: message.into(),
        }
    }

    pub fn rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            input_index: None,
            rule: Some(rule.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.input_index, &self.rule) {
            (Some(index), _) => write!(f, "input {}: {}", index, self.message),
            (None, Some(rule)) => write!(f, "rule '{}': {}", rule, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ValidationError {}
