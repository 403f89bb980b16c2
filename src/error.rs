//! Error types for the receipt-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — a pipeline stage failed (recognizer unreachable,
//!   undecodable image, vision API error, unparseable model output). These
//!   never escape [`crate::extract::Extractor::extract`]: the orchestrator
//!   catches every one of them and degrades to a typed failure result, so
//!   downstream consumers always receive a well-formed
//!   [`crate::model::ExtractionResult`].
//!
//! * [`QueueError`] — an enqueue/retry contract violation (retrying a job
//!   that is not failed, querying a key that was never enqueued). Returned
//!   as `Err(QueueError)` from [`crate::queue::JobQueue`] operations so
//!   callers can distinguish "rejected by the broker" from "accepted and
//!   deduplicated".
//!
//! The separation lets the worker treat any `ExtractError` surfacing through
//! a failure result as job-level state (`Failed` + stored cause) while queue
//! misuse stays a caller-visible `Result`.

use thiserror::Error;

/// All internal pipeline errors.
///
/// Every variant is caught at the orchestrator boundary and converted into
/// an [`crate::model::ExtractionResult`] with `success = false`; none of
/// them propagate to library users as `Err`.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Recognizer errors ─────────────────────────────────────────────────
    /// The OCR service is unreachable or reported failure. Terminal for the
    /// current attempt; retry is an explicit caller action.
    #[error("OCR unavailable: {detail}")]
    OcrUnavailable { detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The image bytes could not be decoded (corrupt upload, unsupported format).
    #[error("Failed to decode receipt image: {detail}")]
    ImageDecode { detail: String },

    /// The image decoded but could not be re-encoded for the model.
    #[error("Failed to re-encode receipt image: {detail}")]
    ImageEncode { detail: String },

    // ── Vision model errors ───────────────────────────────────────────────
    /// The vision API returned an error after all retries.
    #[error("Vision model call failed after {retries} retries: {detail}")]
    VisionApi { retries: u32, detail: String },

    /// The end-to-end extraction exceeded the configured timeout.
    #[error("Extraction timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The model's output could not be parsed even after repair.
    ///
    /// The orchestrator maps this to the fixed stub result rather than a
    /// failure result — see [`crate::extract`].
    #[error("Model output is not valid JSON after repair: {detail}")]
    MalformedOutput { detail: String },

    // ── Persistence errors ────────────────────────────────────────────────
    /// The receipt store rejected a write. Surfaces through the worker,
    /// which marks the job failed with this message.
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by [`crate::queue::JobQueue`] operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// No job exists for the given key.
    #[error("No job found for key '{key}'")]
    NotFound { key: String },

    /// The job for this receipt previously failed. `failed → pending` is
    /// only permitted through an explicit retry, which clears the stored
    /// error detail.
    #[error("Job '{key}' is in the failed state; use retry to re-enqueue it")]
    RetryRequired { key: String },

    /// The broker is shutting down and no longer accepts work.
    #[error("Queue is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ocr_unavailable_display() {
        let e = ExtractError::OcrUnavailable {
            detail: "connection refused".into(),
        };
        let msg = e.to_string();
        assert!(msg.starts_with("OCR unavailable"), "got: {msg}");
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn vision_api_display_includes_retries() {
        let e = ExtractError::VisionApi {
            retries: 3,
            detail: "HTTP 503".into(),
        };
        assert!(e.to_string().contains("3 retries"));
        assert!(e.to_string().contains("HTTP 503"));
    }

    #[test]
    fn timeout_display() {
        let e = ExtractError::Timeout { secs: 300 };
        assert!(e.to_string().contains("300s"));
    }

    #[test]
    fn retry_required_names_key() {
        let e = QueueError::RetryRequired {
            key: "ocr-17".into(),
        };
        assert!(e.to_string().contains("ocr-17"));
        assert!(e.to_string().contains("retry"));
    }
}
