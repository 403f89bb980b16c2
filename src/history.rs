//! Purchase-history seam.
//!
//! History is advisory context for the vision prompt — a user who shops at
//! the same three supermarkets gives the model a prior for ambiguous
//! merchant lines. It is never a hard constraint, and a provider failure is
//! non-fatal: the orchestrator falls back to the fixed no-history sentence.

use async_trait::async_trait;

use crate::error::ExtractError;
use crate::model::PurchaseHistory;

/// Supplies historical purchase context for the owning user.
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Look up history for the user owning `receipt_id`.
    ///
    /// Errors are swallowed by the orchestrator and treated as "no history".
    async fn history(
        &self,
        receipt_id: i64,
        user_id: i64,
    ) -> Result<PurchaseHistory, ExtractError>;
}

/// Null provider: always reports an empty history.
pub struct NoHistory;

#[async_trait]
impl HistoryProvider for NoHistory {
    async fn history(
        &self,
        _receipt_id: i64,
        _user_id: i64,
    ) -> Result<PurchaseHistory, ExtractError> {
        Ok(PurchaseHistory::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_history_is_empty() {
        let h = NoHistory.history(1, 1).await.unwrap();
        assert_eq!(h.previous_receipt_count, 0);
        assert!(h.recent_merchants.is_empty());
        assert!(h.average_total.is_none());
    }
}
