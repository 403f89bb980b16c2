//! In-process job broker with deterministic-key deduplication.
//!
//! ## Why a deterministic key?
//!
//! Callers re-submit receipts freely — a refreshed upload page, an
//! impatient double-click, a batch overlapping a single enqueue. Deriving
//! the job key from the receipt identity (`ocr-{receipt_id}`) turns all of
//! those into the *same* job: a second enqueue while one attempt is
//! outstanding returns the existing handle instead of racing a duplicate.
//!
//! ## Claim semantics
//!
//! All broker state lives behind one mutex; `claim` pops the oldest pending
//! key and flips it to `processing` in the same critical section, so two
//! workers can never own the same job. Workers park on a
//! [`tokio::sync::Notify`] while the queue is empty — no polling loop.
//!
//! ## State machine
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!                       └──▶ failed ──(retry)──▶ pending
//! ```
//!
//! `failed → pending` happens exactly through [`JobQueue::retry`], which
//! also clears the stored error detail. A plain enqueue against a failed
//! job is rejected with [`QueueError::RetryRequired`] so the failure is
//! acknowledged, not silently papered over. A completed job may be
//! re-enqueued: re-extraction supersedes the previous result wholesale.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::QueueError;
use crate::model::{ExtractionRequest, ExtractionResult, Job, JobState, QueueStats};

/// Derive the deterministic job key for a receipt.
pub fn job_key(receipt_id: i64) -> String {
    format!("ocr-{receipt_id}")
}

/// Handle returned by an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub key: String,
    /// True when the enqueue matched an already-outstanding job and no new
    /// attempt was created.
    pub deduplicated: bool,
}

#[derive(Default)]
struct QueueInner {
    jobs: HashMap<String, Job>,
    /// Claim order for pending keys.
    ready: VecDeque<String>,
    closed: bool,
}

/// The shared job broker. Clone the surrounding `Arc` per worker.
#[derive(Default)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an extraction job for a receipt.
    ///
    /// Deduplicates by job key: while a job for the same receipt is pending
    /// or processing, the existing handle is returned. Completed jobs are
    /// reset for a fresh attempt; failed jobs require [`Self::retry`].
    pub fn enqueue(&self, request: ExtractionRequest) -> Result<JobHandle, QueueError> {
        let key = job_key(request.receipt_id);
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }

        if let Some(job) = inner.jobs.get(&key) {
            match job.state {
                JobState::Pending | JobState::Processing => {
                    debug!(%key, state = %job.state, "enqueue deduplicated");
                    return Ok(JobHandle {
                        key,
                        deduplicated: true,
                    });
                }
                JobState::Failed => {
                    return Err(QueueError::RetryRequired { key });
                }
                JobState::Completed => {
                    debug!(%key, "re-enqueue supersedes completed job");
                }
            }
        }

        inner.jobs.insert(
            key.clone(),
            Job {
                key: key.clone(),
                request,
                state: JobState::Pending,
                result: None,
                error: None,
                created_at: Utc::now(),
                started_at: None,
                ended_at: None,
            },
        );
        inner.ready.push_back(key.clone());
        drop(inner);

        self.notify.notify_one();
        info!(%key, "job enqueued");
        Ok(JobHandle {
            key,
            deduplicated: false,
        })
    }

    /// Enqueue many receipts independently; one rejected enqueue does not
    /// block the others.
    pub fn enqueue_batch(
        &self,
        requests: Vec<ExtractionRequest>,
    ) -> Vec<Result<JobHandle, QueueError>> {
        requests.into_iter().map(|r| self.enqueue(r)).collect()
    }

    /// Claim the oldest pending job, waiting until one is available.
    ///
    /// Atomic: the claimed job is `processing` (with `started_at` stamped)
    /// before the mutex is released, so no other worker can see it pending.
    /// Returns `None` once the queue is closed and drained.
    pub async fn claim(&self) -> Option<Job> {
        loop {
            // Register interest before checking, so a notify between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                while let Some(key) = inner.ready.pop_front() {
                    // A cancelled job's key may linger in the ready list.
                    let Some(job) = inner.jobs.get_mut(&key) else {
                        continue;
                    };
                    if job.state != JobState::Pending {
                        continue;
                    }
                    job.state = JobState::Processing;
                    job.started_at = Some(Utc::now());
                    debug!(%key, "job claimed");
                    return Some(job.clone());
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a claimed job completed, storing its result.
    pub fn complete(&self, key: &str, result: ExtractionResult) -> Result<(), QueueError> {
        self.finish(key, JobState::Completed, Some(result), None)
    }

    /// Mark a claimed job failed, storing the captured error text.
    pub fn fail(&self, key: &str, error: impl Into<String>) -> Result<(), QueueError> {
        self.finish(key, JobState::Failed, None, Some(error.into()))
    }

    fn finish(
        &self,
        key: &str,
        state: JobState,
        result: Option<ExtractionResult>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        let job = inner.jobs.get_mut(key).ok_or_else(|| QueueError::NotFound {
            key: key.to_string(),
        })?;
        job.state = state;
        job.result = result;
        job.error = error;
        job.ended_at = Some(Utc::now());
        info!(key, state = %state, "job finished");
        Ok(())
    }

    /// Current snapshot of a job: lifecycle state plus result or error if
    /// the job reached a terminal state.
    pub fn status(&self, key: &str) -> Result<Job, QueueError> {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        inner
            .jobs
            .get(key)
            .cloned()
            .ok_or_else(|| QueueError::NotFound {
                key: key.to_string(),
            })
    }

    /// Cancel a job that has not been claimed yet. Returns `true` if the
    /// job was pending and is now gone; once claimed, a job runs to
    /// completion or failure.
    pub fn cancel(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        match inner.jobs.get(key) {
            Some(job) if job.state == JobState::Pending => {
                inner.jobs.remove(key);
                // The stale key in `ready` is skipped at claim time.
                info!(key, "job cancelled");
                true
            }
            _ => false,
        }
    }

    /// Clear a failed job's error and re-enqueue it for a fresh attempt.
    ///
    /// Equivalent to clearing failure state and enqueueing again. Retrying
    /// a job that is still pending or processing deduplicates exactly like
    /// [`Self::enqueue`]; retrying an unknown key is `NotFound`.
    pub fn retry(&self, receipt_id: i64) -> Result<JobHandle, QueueError> {
        let key = job_key(receipt_id);
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        if inner.closed {
            return Err(QueueError::Closed);
        }
        let job = inner
            .jobs
            .get_mut(&key)
            .ok_or_else(|| QueueError::NotFound { key: key.clone() })?;

        match job.state {
            JobState::Pending | JobState::Processing => Ok(JobHandle {
                key,
                deduplicated: true,
            }),
            JobState::Failed | JobState::Completed => {
                job.state = JobState::Pending;
                job.error = None;
                job.result = None;
                job.started_at = None;
                job.ended_at = None;
                job.created_at = Utc::now();
                inner.ready.push_back(key.clone());
                drop(inner);
                self.notify.notify_one();
                info!(%key, "job retried");
                Ok(JobHandle {
                    key,
                    deduplicated: false,
                })
            }
        }
    }

    /// Aggregate counters, one per lifecycle state.
    pub fn queue_stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue mutex poisoned");
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Pending => stats.pending += 1,
                JobState::Processing => stats.processing += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Stop accepting work and wake every parked worker so their `claim`
    /// calls can drain the backlog and return `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
        info!("queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(receipt_id: i64) -> ExtractionRequest {
        ExtractionRequest {
            receipt_id,
            image_location: format!("minio://receipts/{receipt_id}.jpg"),
            user_id: 1,
        }
    }

    #[test]
    fn job_key_is_deterministic() {
        assert_eq!(job_key(17), "ocr-17");
        assert_eq!(job_key(17), job_key(17));
    }

    #[tokio::test]
    async fn enqueue_then_claim() {
        let q = JobQueue::new();
        let handle = q.enqueue(request(1)).unwrap();
        assert!(!handle.deduplicated);

        let job = q.claim().await.unwrap();
        assert_eq!(job.key, "ocr-1");
        assert_eq!(job.state, JobState::Processing);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_enqueue_is_deduplicated_while_outstanding() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        let second = q.enqueue(request(1)).unwrap();
        assert!(second.deduplicated);
        assert_eq!(q.queue_stats().pending, 1);

        // Still deduplicated once a worker owns it.
        let _job = q.claim().await.unwrap();
        let third = q.enqueue(request(1)).unwrap();
        assert!(third.deduplicated);
        assert_eq!(q.queue_stats().processing, 1);
        assert_eq!(q.queue_stats().pending, 0);
    }

    #[tokio::test]
    async fn enqueue_after_failure_requires_retry() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        let job = q.claim().await.unwrap();
        q.fail(&job.key, "boom").unwrap();

        let err = q.enqueue(request(1)).unwrap_err();
        assert_eq!(
            err,
            QueueError::RetryRequired {
                key: "ocr-1".into()
            }
        );
    }

    #[tokio::test]
    async fn retry_clears_error_and_repends() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        let job = q.claim().await.unwrap();
        q.fail(&job.key, "vision down").unwrap();
        assert_eq!(q.status("ocr-1").unwrap().error.as_deref(), Some("vision down"));

        let handle = q.retry(1).unwrap();
        assert!(!handle.deduplicated);
        let job = q.status("ocr-1").unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert!(job.error.is_none());
        assert!(job.ended_at.is_none());
    }

    #[tokio::test]
    async fn retry_of_outstanding_job_deduplicates() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        let handle = q.retry(1).unwrap();
        assert!(handle.deduplicated);
        assert_eq!(q.queue_stats().pending, 1);
    }

    #[test]
    fn retry_unknown_key_is_not_found() {
        let q = JobQueue::new();
        assert!(matches!(q.retry(99), Err(QueueError::NotFound { .. })));
    }

    #[tokio::test]
    async fn cancel_only_while_pending() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        assert!(q.cancel("ocr-1"));
        assert!(matches!(
            q.status("ocr-1"),
            Err(QueueError::NotFound { .. })
        ));

        q.enqueue(request(2)).unwrap();
        let job = q.claim().await.unwrap();
        assert!(!q.cancel(&job.key), "claimed job must not be cancellable");
    }

    #[tokio::test]
    async fn cancelled_key_is_skipped_at_claim() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        q.enqueue(request(2)).unwrap();
        q.cancel("ocr-1");

        let job = q.claim().await.unwrap();
        assert_eq!(job.key, "ocr-2");
    }

    #[tokio::test]
    async fn batch_enqueue_is_independent_per_receipt() {
        let q = JobQueue::new();
        q.enqueue(request(2)).unwrap();
        let job = q.claim().await.unwrap();
        q.fail(&job.key, "boom").unwrap();

        let results = q.enqueue_batch(vec![request(1), request(2), request(3)]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(QueueError::RetryRequired { .. })));
        assert!(results[2].is_ok(), "one failed enqueue must not block the rest");
        assert_eq!(q.queue_stats().pending, 2);
    }

    #[tokio::test]
    async fn stats_track_lifecycle() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        q.enqueue(request(2)).unwrap();
        q.enqueue(request(3)).unwrap();

        let a = q.claim().await.unwrap();
        let b = q.claim().await.unwrap();
        q.fail(&a.key, "x").unwrap();
        q.complete(
            &b.key,
            crate::model::ExtractionResult {
                receipt_id: b.request.receipt_id,
                metadata: Default::default(),
                items: vec![],
                raw_text: None,
                validation: crate::model::ValidationResult::failure("n/a"),
                processing_time_ms: 1,
                success: false,
                error_message: None,
            },
        )
        .unwrap();

        let stats = q.queue_stats();
        assert_eq!(
            (stats.pending, stats.processing, stats.completed, stats.failed),
            (1, 0, 1, 1)
        );
    }

    #[tokio::test]
    async fn close_drains_then_returns_none() {
        let q = JobQueue::new();
        q.enqueue(request(1)).unwrap();
        q.close();

        // Backlog still drains after close…
        assert!(q.claim().await.is_some());
        // …then claim reports shutdown.
        assert!(q.claim().await.is_none());
        // And new work is refused.
        assert_eq!(q.enqueue(request(2)).unwrap_err(), QueueError::Closed);
    }

    #[tokio::test]
    async fn claim_wakes_on_late_enqueue() {
        use std::sync::Arc;
        let q = Arc::new(JobQueue::new());
        let q2 = Arc::clone(&q);

        let waiter = tokio::spawn(async move { q2.claim().await });
        tokio::task::yield_now().await;
        q.enqueue(request(7)).unwrap();

        let job = waiter.await.unwrap().unwrap();
        assert_eq!(job.key, "ocr-7");
    }
}
