pub mod memory;
pub mod redis_source;

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};
use crate::error::{Error, Result};
use crate::queue::{Job, JobStatus};

pub use memory::InMemoryEventSource;
pub use redis_source::RedisEventSource;

/// Notification kinds delivered per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Started,
    Progress,
    Complete,
    Error,
    StatusChanged,
}

impl EventKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "invocation_started" => Some(EventKind::Started),
            "invocation_progress" | "invocation_denoise_progress" => Some(EventKind::Progress),
            "invocation_complete" => Some(EventKind::Complete),
            "invocation_error" => Some(EventKind::Error),
            "queue_item_status_changed" => Some(EventKind::StatusChanged),
            _ => None,
        }
    }
}

/// One parsed event message.
#[derive(Debug, Clone, PartialEq)]
pub struct JobEvent {
    pub kind: EventKind,
    /// Wire event name, e.g. `invocation_denoise_progress`.
    pub name: String,
    pub queue_id: Option<String>,
    pub batch_id: Option<String>,
    pub item_id: Option<i64>,
    /// Originating node in the submitted graph.
    pub node_id: Option<String>,
    /// New status for `StatusChanged`.
    pub status: Option<JobStatus>,
    pub data: Value,
}

impl JobEvent {
    /// Parse a `{"event": .., "data": {..}}` message. Unknown event names
    /// give `None`.
    pub fn parse(message: &Value) -> Option<Self> {
        let name = message.get("event")?.as_str()?;
        let kind = EventKind::from_name(name)?;
        let data = message.get("data").cloned().unwrap_or(Value::Null);

        let text = |key: &str| data.get(key).and_then(|v| v.as_str()).map(str::to_string);
        let node_id = text("invocation_source_id").or_else(|| {
            data.pointer("/invocation/id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });
        let status = match kind {
            EventKind::StatusChanged => data
                .get("status")
                .and_then(|v| serde_json::from_value::<JobStatus>(v.clone()).ok()),
            _ => None,
        };

        Some(Self {
            kind,
            name: name.to_string(),
            queue_id: text("queue_id"),
            batch_id: text("batch_id"),
            item_id: data.get("item_id").and_then(|v| v.as_i64()),
            node_id,
            status,
            data,
        })
    }

    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str::<Value>(raw).ok().as_ref().and_then(Self::parse)
    }

    /// A status-changed event for `item_id`, used when the job is already
    /// finished before any event arrives.
    pub fn status_changed(queue_id: &str, batch_id: &str, item_id: i64, status: JobStatus) -> Self {
        Self {
            kind: EventKind::StatusChanged,
            name: "queue_item_status_changed".to_string(),
            queue_id: Some(queue_id.to_string()),
            batch_id: Some(batch_id.to_string()),
            item_id: Some(item_id),
            node_id: None,
            status: Some(status),
            data: json!({
                "queue_id": queue_id,
                "batch_id": batch_id,
                "item_id": item_id,
                "status": status,
            }),
        }
    }

    pub fn terminal_status(&self) -> Option<JobStatus> {
        self.status.filter(JobStatus::is_terminal)
    }
}

// --- Interfaces ---

/// Where queue events come from. Joining a queue starts delivery of its
/// events; `next_event` returns `None` once the source is closed.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn join(&self, queue_id: &str) -> Result<()>;
    async fn leave(&self, queue_id: &str) -> Result<()>;
    async fn next_event(&self) -> Result<Option<JobEvent>>;
}

// --- Hub ---

#[derive(Debug, Clone)]
struct JobFilter {
    queue_id: String,
    batch_id: String,
    item_ids: HashSet<i64>,
}

impl JobFilter {
    fn matches(&self, event: &JobEvent) -> bool {
        if event.queue_id.as_deref().is_some_and(|q| q != self.queue_id) {
            return false;
        }
        match (event.item_id, event.batch_id.as_deref()) {
            (Some(item), _) => self.item_ids.contains(&item),
            (None, Some(batch)) => batch == self.batch_id,
            (None, None) => false,
        }
    }
}

struct Subscriber {
    filter: JobFilter,
    sender: mpsc::UnboundedSender<JobEvent>,
}

/// Queue membership requests, applied one at a time by `membership_loop`.
enum Membership {
    Acquire {
        queue_id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Release {
        queue_id: String,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
}

struct HubInner {
    subscribers: Arc<DashMap<u64, Subscriber>>,
    membership: mpsc::UnboundedSender<Membership>,
    next_token: AtomicU64,
    dispatcher: JoinHandle<()>,
    membership_task: JoinHandle<()>,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.membership_task.abort();
    }
}

/// 事件中心：每个进程一个，按作业分发事件
///
/// Owns the event source, one dispatch task and one membership task. Each
/// job subscription gets its own token and queue; queues are joined on the
/// source while at least one subscription needs them. Joins and leaves go
/// through the membership task in request order.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.inner.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl EventHub {
    /// Start the background tasks. Must be called inside a tokio runtime.
    pub fn start(source: Arc<dyn EventSource>) -> Self {
        let subscribers: Arc<DashMap<u64, Subscriber>> = Arc::new(DashMap::new());
        let (membership, commands) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_loop(source.clone(), subscribers.clone()));
        let membership_task = tokio::spawn(membership_loop(source, commands));
        Self {
            inner: Arc::new(HubInner {
                subscribers,
                membership,
                next_token: AtomicU64::new(1),
                dispatcher,
                membership_task,
            }),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Subscribe to the events of `job`.
    pub async fn subscribe(&self, job: &Job) -> Result<Subscription> {
        let (reply, joined) = oneshot::channel();
        self.inner
            .membership
            .send(Membership::Acquire {
                queue_id: job.queue_id.clone(),
                reply,
            })
            .map_err(|_| Error::Events("Event hub stopped".to_string()))?;
        joined
            .await
            .map_err(|_| Error::Events("Event hub stopped before joining".to_string()))??;

        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.subscribers.insert(
            token,
            Subscriber {
                filter: JobFilter {
                    queue_id: job.queue_id.clone(),
                    batch_id: job.batch_id.clone(),
                    item_ids: job.item_ids.iter().copied().collect(),
                },
                sender,
            },
        );
        debug!(token, batch_id = %job.batch_id, "Subscribed to job events");

        Ok(Subscription {
            token,
            queue_id: job.queue_id.clone(),
            receiver,
            hub: Some(self.inner.clone()),
        })
    }
}

async fn dispatch_loop(source: Arc<dyn EventSource>, subscribers: Arc<DashMap<u64, Subscriber>>) {
    loop {
        match source.next_event().await {
            Ok(Some(event)) => dispatch(&subscribers, event),
            Ok(None) => {
                debug!("Event source closed, stopping dispatch");
                break;
            }
            Err(e) => {
                error!("Event source failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

fn dispatch(subscribers: &DashMap<u64, Subscriber>, event: JobEvent) {
    let mut delivered = 0usize;
    let mut closed = Vec::new();
    for entry in subscribers.iter() {
        if !entry.filter.matches(&event) {
            continue;
        }
        if entry.sender.send(event.clone()).is_err() {
            closed.push(*entry.key());
        } else {
            delivered += 1;
        }
    }
    for token in closed {
        debug!(token, "Pruning closed subscriber");
        subscribers.remove(&token);
    }
    if delivered == 0 {
        trace!(event = %event.name, item_id = ?event.item_id, "Event matched no subscriber");
    }
}

async fn membership_loop(source: Arc<dyn EventSource>, mut commands: mpsc::UnboundedReceiver<Membership>) {
    let mut refs: HashMap<String, usize> = HashMap::new();
    while let Some(command) = commands.recv().await {
        match command {
            Membership::Acquire { queue_id, reply } => {
                let count = refs.get(&queue_id).copied().unwrap_or(0);
                if count == 0 {
                    if let Err(e) = source.join(&queue_id).await {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    debug!(%queue_id, "Joined event queue");
                }
                refs.insert(queue_id.clone(), count + 1);
                if reply.send(Ok(())).is_err() {
                    // Subscriber went away while waiting.
                    if let Err(e) = release_queue(&*source, &mut refs, &queue_id).await {
                        warn!(%queue_id, "Failed to leave event queue: {}", e);
                    }
                }
            }
            Membership::Release { queue_id, reply } => {
                let result = release_queue(&*source, &mut refs, &queue_id).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(%queue_id, "Failed to leave event queue: {}", e);
                        }
                    }
                }
            }
        }
    }
    trace!("Membership channel closed");
}

/// Drop one reference on `queue_id` and leave it once nothing needs it.
async fn release_queue(source: &dyn EventSource, refs: &mut HashMap<String, usize>, queue_id: &str) -> Result<()> {
    let Some(count) = refs.get_mut(queue_id) else {
        return Ok(());
    };
    *count = count.saturating_sub(1);
    if *count > 0 {
        return Ok(());
    }
    refs.remove(queue_id);
    source.leave(queue_id).await?;
    debug!(%queue_id, "Left event queue");
    Ok(())
}

/// Per-job event subscription. Dropping it unsubscribes.
pub struct Subscription {
    token: u64,
    queue_id: String,
    receiver: mpsc::UnboundedReceiver<JobEvent>,
    hub: Option<Arc<HubInner>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("queue_id", &self.queue_id)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Next event for this job; `None` once the hub has stopped.
    pub async fn next(&mut self) -> Option<JobEvent> {
        self.receiver.recv().await
    }

    pub fn poll_next_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<JobEvent>> {
        self.receiver.poll_recv(cx)
    }

    /// Unsubscribe and leave the queue if nothing else needs it.
    pub async fn cancel(mut self) -> Result<()> {
        let Some(hub) = self.hub.take() else {
            return Ok(());
        };
        detach(&hub, self.token);
        let (reply, left) = oneshot::channel();
        let queue_id = std::mem::take(&mut self.queue_id);
        hub.membership
            .send(Membership::Release { queue_id, reply: Some(reply) })
            .map_err(|_| Error::Events("Event hub stopped".to_string()))?;
        left.await
            .map_err(|_| Error::Events("Event hub stopped before leaving".to_string()))?
    }
}

fn detach(hub: &HubInner, token: u64) {
    hub.subscribers.remove(&token);
    debug!(token, "Unsubscribed from job events");
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(hub) = self.hub.take() else {
            return;
        };
        detach(&hub, self.token);
        let queue_id = std::mem::take(&mut self.queue_id);
        // Queued behind any earlier acquire, so a later join is never undone.
        if hub.membership.send(Membership::Release { queue_id, reply: None }).is_err() {
            trace!("Event hub already stopped");
        }
    }
}

// --- Hybrid stream ---

/// Events of one job as a `Stream` that ends by itself once every item of
/// the job reached a terminal status.
#[derive(Debug)]
pub struct JobEventStream {
    job: Job,
    subscription: Subscription,
    backlog: VecDeque<JobEvent>,
    finished: bool,
}

impl JobEventStream {
    pub fn new(job: Job, subscription: Subscription) -> Self {
        Self {
            job,
            subscription,
            backlog: VecDeque::new(),
            finished: false,
        }
    }

    /// Queue an event ahead of live delivery.
    pub fn queue_event(&mut self, event: JobEvent) {
        self.backlog.push_back(event);
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    fn observe(&mut self, event: &JobEvent) {
        if let (Some(item_id), Some(status)) = (event.item_id, event.status) {
            self.job.record(item_id, status);
        }
        if self.job.is_finished() {
            self.finished = true;
        }
    }
}

impl Stream for JobEventStream {
    type Item = JobEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<JobEvent>> {
        let this = self.get_mut();
        if let Some(event) = this.backlog.pop_front() {
            this.observe(&event);
            return Poll::Ready(Some(event));
        }
        if this.finished {
            return Poll::Ready(None);
        }
        match this.subscription.poll_next_event(cx) {
            Poll::Ready(Some(event)) => {
                this.observe(&event);
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
