//! Worker pools
//!
//! Bounded-concurrency consumers over the job queues. Each worker loops:
//! dequeue with a short timeout, process, write exactly one terminal result
//! slot, repeat. Shutdown flips a running flag; workers finish their current
//! job and exit on the next dequeue timeout.

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::jobs::{CaptionJob, EmbeddingJob, IngestionJob, JobQueue, JobResultSlot};
use crate::model::{ModelError, ModelHost};
use crate::routing::{image_fingerprint, CaptionExecutor, ExecutorError, Router};
use crate::storage::{
    blob::StorageError, embed::StoreError, BlobStore, EmbedIndex, UpsertImage,
};
use crate::telemetry::MetricsRegistry;

/// How long a dequeue blocks before the loop re-checks the running flag
const DEQUEUE_WAIT: Duration = Duration::from_secs(2);

/// Everything that can fail inside a job; rendered into the failed slot
#[derive(Error, Debug)]
enum JobError {
    #[error("invalid image payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("blob storage: {0}")]
    Blob(#[from] StorageError),

    #[error("embed store: {0}")]
    Store(#[from] StoreError),

    #[error("model: {0}")]
    Model(#[from] ModelError),

    #[error("{0}")]
    Executor(#[from] ExecutorError),
}

/// A queue consumer. Implementations parse their own payload and write their
/// own terminal result slot; the pool only drives the dequeue loop.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The queue this handler drains
    fn queue(&self) -> &JobQueue;

    /// Process one dequeued payload. Must write a terminal result slot
    /// before returning, success or failure.
    async fn process(&self, payload: String);
}

/// Spawns and supervises worker tasks across handlers
pub struct WorkerPool {
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `concurrency` independent workers draining the handler's queue
    pub fn spawn(&self, handler: Arc<dyn JobHandler>, concurrency: usize) {
        let mut handles = self.handles.lock();
        for worker_id in 0..concurrency {
            let handler = Arc::clone(&handler);
            let running = Arc::clone(&self.running);
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, handler, running).await;
            }));
        }
    }

    /// Flip the running flag and wait for every worker to finish its current
    /// job. A job in flight completes or records `failed` before its worker
    /// exits.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        futures::future::join_all(handles).await;
        tracing::info!(target: "prism::worker", "worker pool stopped");
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

async fn worker_loop(worker_id: usize, handler: Arc<dyn JobHandler>, running: Arc<AtomicBool>) {
    let queue_key = handler.queue().queue_key().to_string();
    tracing::info!(target: "prism::worker", worker_id, queue = %queue_key, "worker started");

    while running.load(Ordering::SeqCst) {
        match handler.queue().dequeue(DEQUEUE_WAIT).await {
            Ok(Some(payload)) => {
                handler.process(payload).await;
            }
            Ok(None) => {
                // Timeout; loop back to observe shutdown
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::error!(
                        target: "prism::worker",
                        worker_id,
                        queue = %queue_key,
                        error = %e,
                        "dequeue failed"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    tracing::info!(target: "prism::worker", worker_id, queue = %queue_key, "worker exiting");
}

fn decode_image(image_b64: &str) -> Result<Vec<u8>, JobError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(image_b64)?)
}

// ============================================================================
// Ingestion
// ============================================================================

/// Full pipeline consumer: blob, route, caption, embed, upsert, result slot
pub struct IngestionHandler {
    queue: Arc<JobQueue>,
    router: Arc<Router>,
    executor: Arc<CaptionExecutor>,
    models: Arc<dyn ModelHost>,
    blobs: Arc<dyn BlobStore>,
    embed: Arc<dyn EmbedIndex>,
    metrics: Arc<MetricsRegistry>,
}

impl IngestionHandler {
    pub fn new(
        queue: Arc<JobQueue>,
        router: Arc<Router>,
        executor: Arc<CaptionExecutor>,
        models: Arc<dyn ModelHost>,
        blobs: Arc<dyn BlobStore>,
        embed: Arc<dyn EmbedIndex>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            queue,
            router,
            executor,
            models,
            blobs,
            embed,
            metrics,
        }
    }

    async fn run(&self, job: &IngestionJob) -> Result<JobResultSlot, JobError> {
        let image_bytes = decode_image(&job.image_b64)?;
        let image_id = image_fingerprint(&image_bytes);

        // Blob write is idempotent on the fingerprint and yields the
        // metadata the row needs
        let blob = self.blobs.save(&image_id, &image_bytes).await?;

        let decision = self
            .router
            .route(
                &image_bytes,
                job.latency_budget_ms,
                job.text_hint.as_deref(),
                job.client_confidence,
            )
            .await;
        let record = self
            .executor
            .execute(
                &decision,
                &image_bytes,
                job.text_hint.as_deref(),
                job.client_confidence,
            )
            .await?;

        let vector = self.models.embed_image(&image_bytes).await?;

        self.embed
            .upsert_image(UpsertImage {
                image_id: &image_id,
                caption: &record.caption,
                confidence: record.confidence,
                origin: record.origin,
                vector: &vector,
                format: &blob.format,
                size_bytes: blob.size_bytes as i64,
                width: blob.width as i32,
                height: blob.height as i32,
                owner_user_id: Some(job.owner_id),
                visibility: job.visibility,
            })
            .await?;

        Ok(JobResultSlot::completed_ingestion(image_id, record.caption))
    }
}

#[async_trait]
impl JobHandler for IngestionHandler {
    fn queue(&self) -> &JobQueue {
        &self.queue
    }

    async fn process(&self, payload: String) {
        let job: IngestionJob = match JobQueue::decode(&payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(target: "prism::worker", error = %e, "undecodable ingestion job");
                self.metrics.jobs_failed_total.inc(&["ingestion"]);
                return;
            }
        };

        let job_id = job.job_id;
        tracing::info!(target: "prism::worker", %job_id, "ingestion started");

        let slot = match self.run(&job).await {
            Ok(slot) => {
                self.metrics.jobs_completed_total.inc(&["ingestion"]);
                tracing::info!(
                    target: "prism::worker",
                    %job_id,
                    image_id = slot.image_id.as_deref().unwrap_or(""),
                    "ingestion complete"
                );
                slot
            }
            Err(e) => {
                self.metrics.jobs_failed_total.inc(&["ingestion"]);
                tracing::error!(target: "prism::worker", %job_id, error = %e, "ingestion failed");
                JobResultSlot::failed(e.to_string())
            }
        };

        if let Err(e) = self.queue.write_result(&job_id, &slot).await {
            tracing::error!(target: "prism::worker", %job_id, error = %e, "could not write result slot");
        }
    }
}

// ============================================================================
// Standalone caption
// ============================================================================

/// Routes and captions without persisting anything
pub struct CaptionHandler {
    queue: Arc<JobQueue>,
    router: Arc<Router>,
    executor: Arc<CaptionExecutor>,
    metrics: Arc<MetricsRegistry>,
}

impl CaptionHandler {
    pub fn new(
        queue: Arc<JobQueue>,
        router: Arc<Router>,
        executor: Arc<CaptionExecutor>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            queue,
            router,
            executor,
            metrics,
        }
    }

    async fn run(&self, job: &CaptionJob) -> Result<JobResultSlot, JobError> {
        let image_bytes = decode_image(&job.image_b64)?;
        let decision = self
            .router
            .route(
                &image_bytes,
                job.latency_budget_ms,
                job.text_hint.as_deref(),
                job.client_confidence,
            )
            .await;
        let record = self
            .executor
            .execute(
                &decision,
                &image_bytes,
                job.text_hint.as_deref(),
                job.client_confidence,
            )
            .await?;
        Ok(JobResultSlot::completed_caption(&record))
    }
}

#[async_trait]
impl JobHandler for CaptionHandler {
    fn queue(&self) -> &JobQueue {
        &self.queue
    }

    async fn process(&self, payload: String) {
        let job: CaptionJob = match JobQueue::decode(&payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(target: "prism::worker", error = %e, "undecodable caption job");
                self.metrics.jobs_failed_total.inc(&["caption"]);
                return;
            }
        };

        let slot = match self.run(&job).await {
            Ok(slot) => {
                self.metrics.jobs_completed_total.inc(&["caption"]);
                slot
            }
            Err(e) => {
                self.metrics.jobs_failed_total.inc(&["caption"]);
                tracing::error!(target: "prism::worker", job_id = %job.job_id, error = %e, "caption job failed");
                JobResultSlot::failed(e.to_string())
            }
        };

        if let Err(e) = self.queue.write_result(&job.job_id, &slot).await {
            tracing::error!(target: "prism::worker", job_id = %job.job_id, error = %e, "could not write result slot");
        }
    }
}

// ============================================================================
// Standalone embedding
// ============================================================================

/// Embeds image bytes and returns the vector in the result slot
pub struct EmbeddingHandler {
    queue: Arc<JobQueue>,
    models: Arc<dyn ModelHost>,
    metrics: Arc<MetricsRegistry>,
}

impl EmbeddingHandler {
    pub fn new(queue: Arc<JobQueue>, models: Arc<dyn ModelHost>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            queue,
            models,
            metrics,
        }
    }

    async fn run(&self, job: &EmbeddingJob) -> Result<JobResultSlot, JobError> {
        let image_bytes = decode_image(&job.image_b64)?;
        let vector = self.models.embed_image(&image_bytes).await?;
        Ok(JobResultSlot::completed_embedding(vector))
    }
}

#[async_trait]
impl JobHandler for EmbeddingHandler {
    fn queue(&self) -> &JobQueue {
        &self.queue
    }

    async fn process(&self, payload: String) {
        let job: EmbeddingJob = match JobQueue::decode(&payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(target: "prism::worker", error = %e, "undecodable embedding job");
                self.metrics.jobs_failed_total.inc(&["embedding"]);
                return;
            }
        };

        let slot = match self.run(&job).await {
            Ok(slot) => {
                self.metrics.jobs_completed_total.inc(&["embedding"]);
                slot
            }
            Err(e) => {
                self.metrics.jobs_failed_total.inc(&["embedding"]);
                tracing::error!(target: "prism::worker", job_id = %job.job_id, error = %e, "embedding job failed");
                JobResultSlot::failed(e.to_string())
            }
        };

        if let Err(e) = self.queue.write_result(&job.job_id, &slot).await {
            tracing::error!(target: "prism::worker", job_id = %job.job_id, error = %e, "could not write result slot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image() {
        assert_eq!(decode_image("aGVsbG8=").unwrap(), b"hello");
        assert!(decode_image("!!!").is_err());
    }

    #[tokio::test]
    async fn test_pool_shutdown_with_no_workers() {
        let pool = WorkerPool::new();
        // Shutdown with nothing spawned returns immediately
        pool.shutdown().await;
    }
}
