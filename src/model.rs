//! Domain types shared across the pipeline, the reconciliation engine and
//! the queue.
//!
//! All money fields are [`Decimal`] — receipts mix currencies with very
//! different magnitudes (a VND total has seven digits where a USD total has
//! three) and float rounding would leak into the arithmetic cross-checks.
//! Quantities stay `f64` because weighed goods legitimately have fractional
//! units (0.246 kg of cucumbers).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted length for merchant and item names.
pub const MAX_NAME_LEN: usize = 200;

/// Receipt-level fields produced by one extraction attempt.
///
/// Immutable once returned; a re-extraction supersedes the previous
/// metadata wholesale rather than merging into it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReceiptMetadata {
    pub merchant_name: Option<String>,
    pub purchase_date: Option<NaiveDate>,
    /// Non-negative, two fractional digits.
    pub total_amount: Option<Decimal>,
    pub currency: String,
    /// Model self-reported confidence, 0.0–1.0.
    pub confidence: f32,
}

impl Default for ReceiptMetadata {
    fn default() -> Self {
        Self {
            merchant_name: None,
            purchase_date: None,
            total_amount: None,
            currency: default_currency(),
            confidence: 0.0,
        }
    }
}

/// A single receipt line.
///
/// `total_price` may be negative: discount and refund lines are real line
/// items and must participate in the grand-total reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    pub item_name: String,
    /// Positive; fractional for goods sold by weight.
    pub quantity: f64,
    pub unit_price: Option<Decimal>,
    pub total_price: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub confidence: f32,
}

pub(crate) fn default_currency() -> String {
    "VND".to_string()
}

/// Outcome of the arithmetic/business-rule cross-check.
///
/// `errors` block acceptance; `warnings` are informational and never affect
/// `valid`. The reconciliation engine is the sole producer of this type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub confidence: f32,
}

impl ValidationResult {
    /// A fabricated result for attempts that failed before reconciliation
    /// could run (recognizer down, timeout). Carries the cause as the single
    /// blocking error.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            errors: vec![message.into()],
            warnings: Vec::new(),
            confidence: 0.0,
        }
    }
}

/// The unit of work product passed between orchestrator, reconciliation
/// engine and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub receipt_id: i64,
    pub metadata: ReceiptMetadata,
    pub items: Vec<LineItem>,
    pub raw_text: Option<String>,
    pub validation: ValidationResult,
    pub processing_time_ms: u64,
    /// Mirrors `validation.valid` for successful pipeline runs; `false`
    /// whenever the pipeline itself failed.
    pub success: bool,
    pub error_message: Option<String>,
}

/// Request for one extraction attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub receipt_id: i64,
    /// Object-storage location of the receipt photo, e.g. `minio://bucket/key`.
    pub image_location: String,
    pub user_id: i64,
}

/// Historical purchase context for the owning user.
///
/// Advisory input to the vision prompt only — never a hard constraint on
/// what the model may extract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchaseHistory {
    pub previous_receipt_count: usize,
    /// Most recent distinct merchants, capped at five.
    pub recent_merchants: Vec<String>,
    pub average_total: Option<Decimal>,
}

/// Lifecycle state of a queued extraction job.
///
/// `Pending → Processing → {Completed, Failed}`; `Failed → Pending` happens
/// exactly through [`crate::queue::JobQueue::retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobState {
    /// A terminal state accepts no further worker transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A snapshot of one job as stored by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Deterministic key derived from the receipt identity; the broker
    /// deduplicates in-flight work on it.
    pub key: String,
    pub request: ExtractionRequest,
    pub state: JobState,
    pub result: Option<ExtractionResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Aggregate queue counters, one per lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn metadata_default_is_vnd_zero_confidence() {
        let m = ReceiptMetadata::default();
        assert_eq!(m.currency, "VND");
        assert_eq!(m.confidence, 0.0);
        assert!(m.total_amount.is_none());
    }

    #[test]
    fn validation_failure_carries_cause() {
        let v = ValidationResult::failure("OCR unavailable: boom");
        assert!(!v.valid);
        assert_eq!(v.errors.len(), 1);
        assert!(v.errors[0].contains("boom"));
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn job_state_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn line_item_serde_round_trip() {
        let item = LineItem {
            item_name: "Dưa leo".into(),
            quantity: 0.4,
            unit_price: Some(dec!(25000)),
            total_price: dec!(10000),
            currency: "VND".into(),
            confidence: 0.9,
        };
        let json = serde_json::to_string(&item).unwrap();
        let back: LineItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn line_item_defaults_currency_when_absent() {
        let json = r#"{"item_name":"Milk","quantity":1.0,"total_price":"18000"}"#;
        let item: LineItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.currency, "VND");
        assert_eq!(item.confidence, 0.0);
        assert!(item.unit_price.is_none());
    }
}
