//! Persistence seam: status transitions and result storage.
//!
//! The relational schema lives outside this crate; the worker only needs
//! two operations, so the trait stays that narrow. `save_result` must be
//! all-or-nothing: items are replaced wholesale (delete-then-insert, never
//! merged), and a failed write leaves the previously stored items intact.
//!
//! [`MemoryStore`] backs the tests and the CLI. It also implements
//! [`HistoryProvider`] by aggregating over its own records, which mirrors
//! how the production history query reads the same receipts table the
//! worker writes.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::ExtractError;
use crate::history::HistoryProvider;
use crate::model::{ExtractionResult, JobState, LineItem, PurchaseHistory, ReceiptMetadata};

/// One stored receipt row, as the worker maintains it.
#[derive(Debug, Clone, Default)]
pub struct StoredReceipt {
    pub user_id: i64,
    pub status: Option<JobState>,
    pub metadata: Option<ReceiptMetadata>,
    pub items: Vec<LineItem>,
    pub raw_text: Option<String>,
    pub extraction_errors: Option<String>,
}

/// Worker-facing persistence operations.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Record a lifecycle transition for the receipt; `error` accompanies
    /// the failed state and is cleared on any other transition.
    async fn mark_status(
        &self,
        receipt_id: i64,
        status: JobState,
        error: Option<&str>,
    ) -> Result<(), ExtractError>;

    /// Upsert the extracted metadata and replace the full item set for the
    /// receipt. All-or-nothing per job.
    async fn save_result(
        &self,
        user_id: i64,
        result: &ExtractionResult,
    ) -> Result<(), ExtractError>;
}

/// In-memory store used by tests and the CLI.
#[derive(Default)]
pub struct MemoryStore {
    receipts: Mutex<HashMap<i64, StoredReceipt>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one receipt, if the worker has touched it.
    pub fn receipt(&self, receipt_id: i64) -> Option<StoredReceipt> {
        self.receipts
            .lock()
            .expect("store mutex poisoned")
            .get(&receipt_id)
            .cloned()
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn mark_status(
        &self,
        receipt_id: i64,
        status: JobState,
        error: Option<&str>,
    ) -> Result<(), ExtractError> {
        let mut receipts = self.receipts.lock().expect("store mutex poisoned");
        let row = receipts.entry(receipt_id).or_default();
        row.status = Some(status);
        // A completed transition keeps the advisories save_result stored;
        // pending/processing clear stale failure detail (the retry path).
        if let Some(e) = error {
            row.extraction_errors = Some(e.to_string());
        } else if status != JobState::Completed {
            row.extraction_errors = None;
        }
        debug!(receipt_id, status = %status, "receipt status updated");
        Ok(())
    }

    async fn save_result(
        &self,
        user_id: i64,
        result: &ExtractionResult,
    ) -> Result<(), ExtractError> {
        let mut receipts = self.receipts.lock().expect("store mutex poisoned");
        let row = receipts.entry(result.receipt_id).or_default();
        row.user_id = user_id;
        row.metadata = Some(result.metadata.clone());
        // Replace, never merge: the previous extraction's items are gone.
        row.items = result.items.clone();
        row.raw_text = result.raw_text.clone();
        let advisories: Vec<String> = result
            .validation
            .errors
            .iter()
            .chain(result.validation.warnings.iter())
            .cloned()
            .collect();
        row.extraction_errors = if advisories.is_empty() {
            None
        } else {
            Some(advisories.join(", "))
        };
        debug!(
            receipt_id = result.receipt_id,
            items = result.items.len(),
            "extraction result saved"
        );
        Ok(())
    }
}

#[async_trait]
impl HistoryProvider for MemoryStore {
    async fn history(
        &self,
        receipt_id: i64,
        user_id: i64,
    ) -> Result<PurchaseHistory, ExtractError> {
        let receipts = self.receipts.lock().expect("store mutex poisoned");

        let mut merchants: Vec<String> = Vec::new();
        let mut totals: Vec<Decimal> = Vec::new();
        let mut count = 0usize;

        for (id, row) in receipts.iter() {
            if *id == receipt_id || row.user_id != user_id {
                continue;
            }
            let Some(ref metadata) = row.metadata else {
                continue;
            };
            count += 1;
            if let Some(ref name) = metadata.merchant_name {
                if !merchants.contains(name) {
                    merchants.push(name.clone());
                }
            }
            if let Some(total) = metadata.total_amount {
                totals.push(total);
            }
        }

        merchants.truncate(5);
        let average_total = if totals.is_empty() {
            None
        } else {
            let len = Decimal::from(totals.len() as i64);
            Some((totals.iter().copied().sum::<Decimal>() / len).round_dp(2))
        };

        Ok(PurchaseHistory {
            previous_receipt_count: count,
            recent_merchants: merchants,
            average_total,
        })
    }
}
