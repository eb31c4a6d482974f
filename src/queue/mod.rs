pub mod http;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use crate::error::Result;
use crate::graph::GraphDocument;

pub use http::HttpQueueClient;

/// Remote execution status. `Completed`, `Failed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }

    /// pending -> in_progress -> {completed | failed | canceled}. Skipping
    /// `in_progress` is allowed since a fast job may never be observed there.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (current, next) if *current == next => true,
            (current, _) if current.is_terminal() => false,
            (JobStatus::InProgress, JobStatus::Pending) => false,
            _ => true,
        }
    }

    /// Collapse per-item statuses into one job status.
    pub fn aggregate(statuses: impl IntoIterator<Item = JobStatus>) -> JobStatus {
        let statuses: Vec<JobStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return JobStatus::Pending;
        }
        if statuses.iter().all(JobStatus::is_terminal) {
            if statuses.contains(&JobStatus::Failed) {
                return JobStatus::Failed;
            }
            if statuses.contains(&JobStatus::Canceled) {
                return JobStatus::Canceled;
            }
            return JobStatus::Completed;
        }
        if statuses.iter().all(|s| *s == JobStatus::Pending) {
            JobStatus::Pending
        } else {
            JobStatus::InProgress
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Wire types ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueBatchRequest {
    #[serde(default)]
    pub prepend: bool,
    pub batch: Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: String,
    pub runs: u32,
    pub graph: ExecutionGraph,
    /// The mutated working copy, attached so the remote side can show it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<Value>,
}

/// Graph in the shape the enqueue endpoint executes: nodes keyed by id,
/// each carrying its inline input values as top-level keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionGraph {
    pub id: String,
    pub nodes: Map<String, Value>,
    pub edges: Vec<ExecutionEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionEdge {
    pub source: crate::graph::EdgeEndpoint,
    pub destination: crate::graph::EdgeEndpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueBatchResponse {
    pub batch: BatchInfo,
    #[serde(default)]
    pub item_ids: Vec<i64>,
    #[serde(default)]
    pub enqueued: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchInfo {
    pub batch_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One queue item as reported by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub item_id: i64,
    #[serde(default)]
    pub batch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_traceback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionState>,
    /// Flat (node id, artifact) list reported by older servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<LegacyOutput>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    #[serde(default)]
    pub id: String,
    /// Prepared node id -> invocation output.
    #[serde(default)]
    pub results: Map<String, Value>,
    /// Prepared node id -> id of the node in the submitted graph.
    #[serde(default)]
    pub prepared_source_mapping: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyOutput {
    pub node_id: String,
    pub image_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// --- Job handle ---

/// Handle on one submitted batch.
///
/// Clones share the per-item status table, so a watcher task and the caller
/// see the same transitions.
#[derive(Debug, Clone)]
pub struct Job {
    pub batch_id: String,
    pub queue_id: String,
    pub item_ids: Vec<i64>,
    statuses: Arc<DashMap<i64, JobStatus>>,
    submitted: Arc<GraphDocument>,
    submitted_at: Instant,
}

impl Job {
    pub fn new(batch_id: impl Into<String>, queue_id: impl Into<String>, item_ids: Vec<i64>, submitted: GraphDocument) -> Self {
        let statuses = DashMap::new();
        for id in &item_ids {
            statuses.insert(*id, JobStatus::Pending);
        }
        Self {
            batch_id: batch_id.into(),
            queue_id: queue_id.into(),
            item_ids,
            statuses: Arc::new(statuses),
            submitted: Arc::new(submitted),
            submitted_at: Instant::now(),
        }
    }

    /// The working copy that was actually submitted.
    pub fn submitted(&self) -> &GraphDocument {
        &self.submitted
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn owns_item(&self, item_id: i64) -> bool {
        self.statuses.contains_key(&item_id)
    }

    pub fn item_status(&self, item_id: i64) -> Option<JobStatus> {
        self.statuses.get(&item_id).map(|s| *s)
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::aggregate(self.item_ids.iter().filter_map(|id| self.item_status(*id)))
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Record an observed status for one item. Regressions and moves out of a
    /// terminal state are ignored; returns whether the status changed.
    pub fn record(&self, item_id: i64, next: JobStatus) -> bool {
        let Some(mut current) = self.statuses.get_mut(&item_id) else {
            debug!(item_id, batch_id = %self.batch_id, "Status for an item outside this job");
            return false;
        };
        let from = *current;
        if from == next {
            return false;
        }
        if !from.can_transition_to(next) {
            warn!(item_id, %from, to = %next, "Ignoring invalid job status transition");
            return false;
        }
        debug!(item_id, %from, to = %next, "Job status changed");
        *current = next;
        true
    }
}

// --- Interfaces ---

/// The remote queue endpoints this crate drives.
#[async_trait]
pub trait QueueApi: Send + Sync {
    fn queue_id(&self) -> &str;

    async fn enqueue_batch(&self, request: &EnqueueBatchRequest) -> Result<EnqueueBatchResponse>;

    async fn get_queue_item(&self, item_id: i64) -> Result<QueueItem>;

    async fn cancel_queue_item(&self, item_id: i64) -> Result<QueueItem>;
}
