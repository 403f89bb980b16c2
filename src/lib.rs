//! # receipt-extract
//!
//! Extract structured data (merchant, date, total, line items) from
//! photographs of receipts using a two-stage pipeline: optical text
//! recognition followed by a vision-capable language model, cross-checked
//! by an arithmetic/business-rule reconciliation engine.
//!
//! ## Why two stages?
//!
//! OCR alone reads numbers accurately but loses table structure — which
//! column was the quantity, which the amount. A vision model alone
//! understands layout but misreads digits. Feeding the model both the
//! image *and* the recognized text lets it act as an editor: the text
//! supplies the numbers, the image supplies the structure.
//!
//! ## Pipeline Overview
//!
//! ```text
//! receipt image
//!  │
//!  ├─ 1. Recognize  line-level OCR text (sidecar service)
//!  ├─ 2. Normalize  cap longest edge, RGB8, JPEG, base64
//!  ├─ 3. Vision     image + OCR text + history context → JSON-ish reply
//!  ├─ 4. Repair     fences, typo table, truncation closing → typed data
//!  ├─ 5. Dates      regional date forms → YYYY-MM-DD
//!  └─ 6. Reconcile  quantity×price and grand-total cross-checks → verdict
//! ```
//!
//! Extraction is **infallible by contract**: every failure path degrades to
//! a well-formed [`ExtractionResult`] (`success = false`, or the
//! conspicuous "Mock Store" stub when the model's output is beyond repair),
//! so callers and storage never see an exception mid-pipeline.
//!
//! ## Asynchronous processing
//!
//! [`JobQueue`] + [`Worker`] make extraction queue-backed, idempotent and
//! retryable: enqueues are deduplicated on a deterministic per-receipt key,
//! a failed job is re-run only through an explicit retry, and workers scale
//! horizontally over the shared queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use receipt_extract::{
//!     ExtractionConfig, ExtractionRequest, Extractor, HttpRecognizer, NoHistory, OpenAiVision,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let recognizer = Arc::new(HttpRecognizer::new("http://localhost:8001", 120)?);
//!     let vision = Arc::new(OpenAiVision::new(
//!         "https://api.openai.com/v1",
//!         std::env::var("OPENAI_API_KEY").ok(),
//!         &config.model,
//!         config.temperature,
//!         config.max_tokens,
//!         config.api_timeout_secs,
//!     )?);
//!     let extractor = Extractor::new(recognizer, vision, Arc::new(NoHistory), config);
//!
//!     let request = ExtractionRequest {
//!         receipt_id: 1,
//!         image_location: "receipt.jpg".into(),
//!         user_id: 1,
//!     };
//!     let image = std::fs::read("receipt.jpg")?;
//!     let result = extractor.extract(&request, &image).await;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt-extract` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! receipt-extract = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod history;
pub mod model;
pub mod ocr;
pub mod pipeline;
pub mod prompts;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod vision;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CurrencyLimits, ExtractionConfig, ExtractionConfigBuilder, ReconcilePolicy};
pub use error::{ExtractError, QueueError};
pub use extract::Extractor;
pub use fetch::{ImageSource, LocalOrHttpSource};
pub use history::{HistoryProvider, NoHistory};
pub use model::{
    ExtractionRequest, ExtractionResult, Job, JobState, LineItem, PurchaseHistory, QueueStats,
    ReceiptMetadata, ValidationResult,
};
pub use ocr::{BoundingBox, HttpRecognizer, OcrLine, OcrOutput, TextRecognizer};
pub use queue::{job_key, JobHandle, JobQueue};
pub use reconcile::reconcile;
pub use store::{MemoryStore, ReceiptStore, StoredReceipt};
pub use vision::{OpenAiVision, VisionModel};
pub use worker::Worker;
