//! Pipeline stages for receipt extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch the OCR sidecar) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! image ──▶ recognize ──▶ normalize ──▶ vision ──▶ repair ──▶ dates
//! (bytes)    (OCR text)    (resize,      (model     (fix JSON)  (canonical
//!                           base64)       reply)                 YYYY-MM-DD)
//! ```
//!
//! 1. [`crate::ocr`]      — line-level text recognition; the only stage that
//!    can abort the whole attempt (no text ⇒ nothing to cross-check)
//! 2. [`normalize`]       — cap the longest edge, convert to RGB, JPEG-encode
//!    and base64-wrap for the multimodal request body
//! 3. [`crate::vision`]   — drive the model call; retry/backoff lives in the
//!    orchestrator
//! 4. [`repair`]          — deterministic cleanup of the model's JSON (fences,
//!    typos, truncation) and the lenient typed parse
//! 5. [`dates`]           — purchase-date normalization to `NaiveDate`

pub mod dates;
pub mod normalize;
pub mod repair;
