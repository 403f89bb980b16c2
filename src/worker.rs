//! The extraction worker: claims jobs, drives the orchestrator, persists
//! outcomes.
//!
//! One worker owns one job at a time; throughput scales by running more
//! workers over the same shared [`JobQueue`], not by parallelising inside a
//! job. Each claimed job walks the same ladder:
//!
//! ```text
//! claim ─▶ mark processing ─▶ fetch image ─▶ extract ─▶
//!          success: save result, mark completed
//!          failure: mark failed with the captured cause
//! ```
//!
//! Persistence is the only step allowed to leave a job `failed` after a
//! successful extraction; item replacement inside `save_result` is
//! all-or-nothing, so a storage failure cannot leave half a receipt
//! written.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::extract::Extractor;
use crate::fetch::ImageSource;
use crate::model::{ExtractionRequest, ExtractionResult, Job, JobState};
use crate::queue::JobQueue;
use crate::store::ReceiptStore;

/// A single worker process-equivalent.
pub struct Worker {
    name: String,
    queue: Arc<JobQueue>,
    extractor: Arc<Extractor>,
    images: Arc<dyn ImageSource>,
    store: Arc<dyn ReceiptStore>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<JobQueue>,
        extractor: Arc<Extractor>,
        images: Arc<dyn ImageSource>,
        store: Arc<dyn ReceiptStore>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            extractor,
            images,
            store,
        }
    }

    /// Claim and process jobs until the queue is closed and drained.
    pub async fn run(&self) {
        info!(worker = %self.name, "worker started");
        while let Some(job) = self.queue.claim().await {
            self.process(job).await;
        }
        info!(worker = %self.name, "worker stopped");
    }

    /// Process one claimed job end to end. Never panics; every failure path
    /// lands the job in `failed` with a readable cause.
    async fn process(&self, job: Job) {
        let receipt_id = job.request.receipt_id;
        info!(worker = %self.name, key = %job.key, receipt_id, "processing job");

        if let Err(e) = self
            .store
            .mark_status(receipt_id, JobState::Processing, None)
            .await
        {
            self.fail_job(&job, &format!("status update failed: {e}")).await;
            return;
        }

        let image = match self.images.fetch(&job.request.image_location).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail_job(&job, &e.to_string()).await;
                return;
            }
        };

        let result = self.extractor.extract(&job.request, &image).await;

        if result.success {
            if let Err(e) = self.store.save_result(job.request.user_id, &result).await {
                // Storage rejected the write; the job carries the cause and
                // stays retryable. save_result is atomic, so nothing
                // partial was persisted.
                self.fail_job(&job, &format!("persistence failed: {e}")).await;
                return;
            }
            if let Err(e) = self
                .store
                .mark_status(receipt_id, JobState::Completed, None)
                .await
            {
                self.fail_job(&job, &format!("status update failed: {e}")).await;
                return;
            }
            if let Err(e) = self.queue.complete(&job.key, result) {
                error!(worker = %self.name, key = %job.key, error = %e, "complete lost its job");
            }
            info!(worker = %self.name, key = %job.key, "job completed");
        } else {
            let cause = result
                .error_message
                .clone()
                .unwrap_or_else(|| "extraction failed".to_string());
            self.fail_job(&job, &cause).await;
        }
    }

    async fn fail_job(&self, job: &Job, cause: &str) {
        warn!(worker = %self.name, key = %job.key, cause, "job failed");
        if let Err(e) = self
            .store
            .mark_status(job.request.receipt_id, JobState::Failed, Some(cause))
            .await
        {
            error!(worker = %self.name, key = %job.key, error = %e, "could not record failure");
        }
        if let Err(e) = self.queue.fail(&job.key, cause) {
            error!(worker = %self.name, key = %job.key, error = %e, "fail lost its job");
        }
    }

    /// The synchronous "trigger now" path: bypasses the queue entirely but
    /// keeps the same orchestrator/reconciliation contract and the same
    /// persistence behaviour as a queued job.
    pub async fn trigger_now(&self, request: &ExtractionRequest) -> ExtractionResult {
        let receipt_id = request.receipt_id;

        let image = match self.images.fetch(&request.image_location).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = self
                    .store
                    .mark_status(receipt_id, JobState::Failed, Some(&e.to_string()))
                    .await;
                return crate::extract::failure_result(receipt_id, e, 0);
            }
        };

        let _ = self
            .store
            .mark_status(receipt_id, JobState::Processing, None)
            .await;
        let result = self.extractor.extract(request, &image).await;

        if result.success {
            let saved = self.store.save_result(request.user_id, &result).await;
            let status = match saved {
                Ok(()) => (JobState::Completed, None),
                Err(ref e) => (JobState::Failed, Some(e.to_string())),
            };
            let _ = self
                .store
                .mark_status(receipt_id, status.0, status.1.as_deref())
                .await;
        } else {
            let _ = self
                .store
                .mark_status(
                    receipt_id,
                    JobState::Failed,
                    result.error_message.as_deref(),
                )
                .await;
        }

        result
    }
}
