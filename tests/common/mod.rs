#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use flowgate::graph::builder::DocumentBuilder;
use flowgate::queue::{BatchInfo, EnqueueBatchRequest, EnqueueBatchResponse, QueueApi, QueueItem};
use flowgate::{Error, Result};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Mutex;

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn fixture(name: &str) -> Value {
    let raw = std::fs::read_to_string(fixture_path(name)).expect("Failed to read fixture");
    serde_json::from_str(&raw).expect("Fixture is not valid JSON")
}

/// One container holding two integer fields.
pub fn two_field_document() -> Value {
    DocumentBuilder::new("two-fields")
        .node("width", "integer").label("Width").input("value", 512).done()
        .node("height", "integer").label("Height").input("value", 768).done()
        .container("root", &["group"])
        .container("group", &["f_width", "f_height"])
        .field("f_width", "width", "value")
        .field("f_height", "height", "value")
        .build()
}

pub fn queue_item(item_id: i64, status: &str) -> QueueItem {
    serde_json::from_value(json!({
        "item_id": item_id,
        "batch_id": "batch-1",
        "queue_id": "default",
        "status": status,
    }))
    .expect("Invalid queue item")
}

/// `QueueApi` double: records enqueued batches and replays scripted item
/// statuses, one per poll, repeating the last.
pub struct FakeQueue {
    pub enqueued: Mutex<Vec<EnqueueBatchRequest>>,
    pub item_ids: Vec<i64>,
    script: DashMap<i64, Vec<QueueItem>>,
    pub canceled: Mutex<Vec<i64>>,
}

impl FakeQueue {
    pub fn new(item_ids: Vec<i64>) -> Self {
        Self {
            enqueued: Mutex::new(Vec::new()),
            item_ids,
            script: DashMap::new(),
            canceled: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, item_id: i64, items: Vec<QueueItem>) -> Self {
        self.script.insert(item_id, items);
        self
    }

    pub fn last_request(&self) -> EnqueueBatchRequest {
        self.enqueued.lock().unwrap().last().cloned().expect("Nothing was enqueued")
    }
}

#[async_trait]
impl QueueApi for FakeQueue {
    fn queue_id(&self) -> &str {
        "default"
    }

    async fn enqueue_batch(&self, request: &EnqueueBatchRequest) -> Result<EnqueueBatchResponse> {
        self.enqueued.lock().unwrap().push(request.clone());
        Ok(EnqueueBatchResponse {
            batch: BatchInfo {
                batch_id: request.batch.batch_id.clone(),
                extra: Map::new(),
            },
            item_ids: self.item_ids.clone(),
            enqueued: self.item_ids.len(),
            extra: Map::new(),
        })
    }

    async fn get_queue_item(&self, item_id: i64) -> Result<QueueItem> {
        let mut entry = self
            .script
            .get_mut(&item_id)
            .ok_or_else(|| Error::UnknownInput(format!("queue item {}", item_id)))?;
        if entry.len() > 1 {
            Ok(entry.remove(0))
        } else {
            entry.first().cloned().ok_or_else(|| Error::UnknownInput(format!("queue item {}", item_id)))
        }
    }

    async fn cancel_queue_item(&self, item_id: i64) -> Result<QueueItem> {
        self.canceled.lock().unwrap().push(item_id);
        let item = queue_item(item_id, "canceled");
        if let Some(mut entry) = self.script.get_mut(&item_id) {
            *entry = vec![item.clone()];
        }
        Ok(item)
    }
}
