use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::events::{EventHub, JobEvent, JobEventStream};
use crate::graph::GraphDocument;
use crate::inputs::InputStore;
use crate::outputs::{OutputCorrelator, OutputRecord};
use crate::queue::{Job, JobStatus, QueueApi, QueueItem};
use crate::submit::{self, SubmitOptions};

/// Result of a blocking wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitOutcome {
    pub status: JobStatus,
    pub elapsed: Duration,
}

/// Outputs of one queue item of a job.
#[derive(Debug, Clone)]
pub struct ItemOutputs {
    pub item: QueueItem,
    pub outputs: BTreeMap<String, OutputRecord>,
}

/// Background delivery started by `Coordinator::watch`.
#[derive(Debug)]
pub struct Watch {
    pub job: Job,
    task: JoinHandle<()>,
}

impl Watch {
    /// Stop delivery. The remote job keeps running.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Wait until delivery ends on its own (terminal status or hub stopped).
    pub async fn finished(self) -> Job {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(batch_id = %self.job.batch_id, "Watch task failed: {}", e);
            }
        }
        self.job
    }
}

/// 提交协调器：提交工作流并跟踪作业
pub struct Coordinator {
    queue: Arc<dyn QueueApi>,
    hub: Option<EventHub>,
    correlator: OutputCorrelator,
    poll_interval: Duration,
    wait_timeout: Option<Duration>,
    non_executable_types: Vec<String>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("queue_id", &self.queue.queue_id())
            .field("events", &self.hub.is_some())
            .field("poll_interval", &self.poll_interval)
            .field("wait_timeout", &self.wait_timeout)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(queue: Arc<dyn QueueApi>, config: &ClientConfig) -> Self {
        Self {
            queue,
            hub: None,
            correlator: OutputCorrelator::new(),
            poll_interval: config.poll_interval(),
            wait_timeout: config.wait_timeout(),
            non_executable_types: config.non_executable_types.clone(),
        }
    }

    pub fn with_events(mut self, hub: EventHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_correlator(mut self, correlator: OutputCorrelator) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn queue(&self) -> &Arc<dyn QueueApi> {
        &self.queue
    }

    fn hub(&self) -> Result<&EventHub> {
        self.hub
            .as_ref()
            .ok_or_else(|| Error::Events("no event source configured".to_string()))
    }

    /// Build the working copy from the modified inputs and enqueue it.
    pub async fn submit(&self, document: &GraphDocument, inputs: &InputStore, runs: u32) -> Result<Job> {
        let options = SubmitOptions {
            runs,
            non_executable_types: self.non_executable_types.clone(),
            ..SubmitOptions::default()
        };
        let prepared = submit::prepare(document, inputs, &options)?;
        let response = self.queue.enqueue_batch(&prepared.request).await?;

        let job = Job::new(
            response.batch.batch_id,
            self.queue.queue_id(),
            response.item_ids,
            prepared.working_copy,
        );
        info!(batch_id = %job.batch_id, items = ?job.item_ids, "Submitted workflow");
        Ok(job)
    }

    /// Fetch every item of the job and record their statuses.
    pub async fn refresh(&self, job: &Job) -> Result<Vec<QueueItem>> {
        let mut items = Vec::with_capacity(job.item_ids.len());
        for item_id in &job.item_ids {
            let item = self.queue.get_queue_item(*item_id).await?;
            job.record(item.item_id, item.status);
            items.push(item);
        }
        Ok(items)
    }

    /// Blocking mode: poll until every item is terminal, bounded by the
    /// configured wait timeout.
    pub async fn wait(&self, job: &Job) -> Result<WaitOutcome> {
        self.wait_with_timeout(job, self.wait_timeout).await
    }

    pub async fn wait_with_timeout(&self, job: &Job, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let started = Instant::now();
        let polling = async {
            loop {
                self.refresh(job).await?;
                let status = job.status();
                if status.is_terminal() {
                    return Ok::<JobStatus, Error>(status);
                }
                debug!(batch_id = %job.batch_id, %status, "Job still running");
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let status = match timeout {
            Some(limit) => tokio::time::timeout(limit, polling)
                .await
                .map_err(|_| Error::Timeout(limit))??,
            None => polling.await?,
        };
        let elapsed = started.elapsed();
        info!(batch_id = %job.batch_id, %status, elapsed_ms = elapsed.as_millis() as u64, "Job finished");
        Ok(WaitOutcome { status, elapsed })
    }

    /// Event-subscribed mode: `on_event` runs on a background task for every
    /// event of the job. Returns at once; there is no timeout.
    pub async fn watch<F>(&self, job: &Job, on_event: F) -> Result<Watch>
    where
        F: Fn(&JobEvent) + Send + 'static,
    {
        let mut stream = self.events(job).await?;
        let task = tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = stream.next().await {
                on_event(&event);
            }
        });
        Ok(Watch { job: job.clone(), task })
    }

    /// Hybrid mode: a stream that yields the job's events and ends once the
    /// job is terminal.
    pub async fn events(&self, job: &Job) -> Result<JobEventStream> {
        let subscription = self.hub()?.subscribe(job).await?;
        let mut stream = JobEventStream::new(job.clone(), subscription);

        // Subscribed first, so a job finishing now is seen either way.
        for item in self.refresh(job).await? {
            if item.status.is_terminal() {
                debug!(item_id = item.item_id, status = %item.status, "Item already finished");
                stream.queue_event(JobEvent::status_changed(
                    &job.queue_id,
                    &job.batch_id,
                    item.item_id,
                    item.status,
                ));
            }
        }
        Ok(stream)
    }

    /// Ask the remote side to cancel every unfinished item.
    pub async fn cancel(&self, job: &Job) -> Result<()> {
        for item_id in &job.item_ids {
            if job.item_status(*item_id).is_some_and(|s| s.is_terminal()) {
                continue;
            }
            let item = self.queue.cancel_queue_item(*item_id).await?;
            job.record(item.item_id, item.status);
            info!(item_id, status = %item.status, "Canceled queue item");
        }
        Ok(())
    }

    /// Correlate the outputs of every item. Fails with `NotCompleted` while
    /// any item is still running.
    pub async fn correlate(&self, job: &Job) -> Result<Vec<ItemOutputs>> {
        let items = self.refresh(job).await?;
        items
            .into_iter()
            .map(|item| {
                let outputs = self.correlator.correlate(job.submitted(), &item)?;
                Ok::<_, Error>(ItemOutputs { item, outputs })
            })
            .collect()
    }
}
