//! Prompts for the vision-model extraction call.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the JSON shape the model is asked for is
//!    the same shape the repairer and the DTO parse; changing a field name
//!    means editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect the assembled user prompt
//!    (OCR text present, history summary present) without a live model.
//!
//! Callers can override the default via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constant here is
//! used only when no override is provided.

use crate::model::PurchaseHistory;

/// Default system prompt for extracting structured receipt data.
///
/// Used when `ExtractionConfig::system_prompt` is `None`.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"Extract receipt data from the image and OCR text into JSON format.

Use the OCR text for accurate names and numbers. Use the image to understand layout.

Output ONLY valid JSON with this structure (no markdown, no explanations):

{
  "metadata": {
    "merchant_name": "store name from receipt",
    "purchase_date": "YYYY-MM-DD",
    "total_amount": "number only",
    "currency": "VND",
    "confidence": 0.9
  },
  "items": [
    {
      "item_name": "product name",
      "quantity": 1.0,
      "unit_price": "price",
      "total_price": "price",
      "currency": "VND",
      "confidence": 0.9
    }
  ],
  "raw_text": "ocr text here"
}

Rules:
- quantity: number (like 0.246 for kg items)
- prices: strings with numbers only (remove thousands separators)
- Vietnamese receipts: "37.340" means remove the dot, giving "37340"
- Discount lines get a negative total_price
- Find the total from the "Tổng tiền" or "Tổng cộng" line"#;

/// Fixed sentence used when no purchase history is available.
pub const NO_HISTORY_SENTENCE: &str = "No previous purchase history available.";

/// Build the user prompt from the recognized text and history summary.
pub fn user_prompt(raw_ocr_text: &str, history: &str) -> String {
    format!(
        r#"Extract this receipt into JSON.

OCR Text:
{raw_ocr_text}

Context: {history}

Find:
1. Merchant name (like "BÁCH HÓA XANH")
2. Date (DD/MM/YYYY, convert to YYYY-MM-DD)
3. Items with quantity and price
4. Total amount from the "Tổng tiền" line

Return JSON only."#
    )
}

/// Format purchase history into the short advisory summary embedded in the
/// user prompt. Returns the fixed no-history sentence for `None`.
pub fn format_history(history: Option<&PurchaseHistory>) -> String {
    let Some(h) = history else {
        return NO_HISTORY_SENTENCE.to_string();
    };

    let merchants = if h.recent_merchants.is_empty() {
        "None".to_string()
    } else {
        h.recent_merchants
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };
    let avg = h
        .average_total
        .map(|a| a.round_dp(2).to_string())
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "User has {} previous receipts.\nRecent merchants: {}\nAverage spending: {}",
        h.previous_receipt_count, merchants, avg
    )
}
