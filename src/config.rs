//! Configuration types for receipt extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Keeping every knob in one struct
//! makes it trivial to share configs across workers, serialise them for
//! logging, and diff two runs to understand why their outputs differ.
//!
//! The business-rule thresholds live in their own [`ReconcilePolicy`]
//! structure rather than as constants inside the reconciliation engine, so
//! tests can exercise boundary values directly and operators can tune the
//! tolerance without a recompile of intent: the "correct" tolerance is a
//! product decision, not an engineering one.

use crate::error::ExtractError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for the extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use receipt_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_image_edge(1600)
///     .model("gpt-4o")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Vision model identifier, e.g. "gpt-4o", "gemma3:27b". Default: "gpt-4o".
    pub model: String,

    /// Sampling temperature for the vision completion. Default: 0.0.
    ///
    /// Zero keeps the model deterministic and faithful to what is printed on
    /// the receipt — transcription, not creativity.
    pub temperature: f32,

    /// Maximum tokens the model may generate per receipt. Default: 4096.
    ///
    /// Long supermarket receipts produce large item arrays. Setting this too
    /// low truncates the JSON mid-object; the output repairer can close a
    /// truncated object but cannot recover lost items.
    pub max_tokens: usize,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2048.
    ///
    /// Vision APIs tile large images and charge per tile; a phone photo can
    /// be 4000 px on the long edge with no accuracy benefit over 2048. The
    /// normalizer scales the longest edge down to this cap, preserving
    /// aspect ratio.
    pub max_image_edge: u32,

    /// JPEG quality used when re-encoding the normalized image. Default: 95.
    ///
    /// High enough that compression artefacts do not blur small receipt
    /// print, low enough to keep request bodies well under API upload limits.
    pub jpeg_quality: u8,

    /// Maximum retry attempts on a transient vision API failure. Default: 2.
    ///
    /// Most 5xx and timeout errors are transient. Permanent errors would
    /// fail identically on retry, so the ceiling stays low; a failed attempt
    /// is retryable as a whole through the queue.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s, so concurrent workers
    /// do not hammer a recovering endpoint in lockstep.
    pub retry_backoff_ms: u64,

    /// End-to-end extraction timeout in seconds. Default: 300.
    ///
    /// Covers recognizer + vision model together. Local vision models can
    /// legitimately take minutes on a dense receipt; exceeding the bound is
    /// a failure, never a silent internal retry.
    pub extract_timeout_secs: u64,

    /// Per-HTTP-call timeout for the recognizer and vision adapters, in
    /// seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Business-rule thresholds for the reconciliation engine.
    pub policy: ReconcilePolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 4096,
            max_image_edge: 2048,
            jpeg_quality: 95,
            max_retries: 2,
            retry_backoff_ms: 500,
            extract_timeout_secs: 300,
            api_timeout_secs: 120,
            system_prompt: None,
            policy: ReconcilePolicy::default(),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_image_edge", &self.max_image_edge)
            .field("max_retries", &self.max_retries)
            .field("extract_timeout_secs", &self.extract_timeout_secs)
            .field("policy", &self.policy)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_image_edge(mut self, px: u32) -> Self {
        self.config.max_image_edge = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn extract_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extract_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn policy(mut self, policy: ReconcilePolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.extract_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "extract_timeout_secs must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Reconciliation policy ────────────────────────────────────────────────

/// Per-currency magnitude limits used by the reconciliation engine.
///
/// Receipt currencies differ by four orders of magnitude, so a single set
/// of absolute floors would be either meaningless for VND or absurd for
/// USD. Two profiles cover the product's reality: VND and "everything
/// else"; callers with other high-denomination currencies can supply their
/// own limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyLimits {
    /// Totals above this draw a plausibility warning (never an error).
    pub plausible_max: Decimal,
    /// Absolute floor of the per-item `quantity × unit_price` tolerance.
    pub item_floor: Decimal,
    /// Absolute floor of the grand-total tolerance.
    pub total_floor: Decimal,
    /// Differences at or below this are ignored entirely (receipt rounding).
    pub minor_floor: Decimal,
}

/// Named tolerance thresholds for the reconciliation engine.
///
/// The default is the **lenient** policy: grand-total mismatches warn but
/// never block, because the system's priority is item capture, not
/// cent-perfect totals. [`ReconcilePolicy::strict`] restores the earlier
/// hard-line behaviour (tight floors, mismatch ⇒ error) for deployments
/// that prefer rejection over tolerance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Limits applied when `currency == "VND"`.
    pub vnd: CurrencyLimits,
    /// Limits applied to every other currency.
    pub other: CurrencyLimits,
    /// Per-item tolerance as a fraction of the expected `quantity × unit_price`.
    pub item_pct: Decimal,
    /// Grand-total tolerance as a fraction of the metadata total.
    pub total_pct: Decimal,
    /// When true, a grand-total mismatch beyond tolerance is a blocking
    /// error instead of a warning.
    pub total_mismatch_is_error: bool,
    /// Confidence ceiling applied when any blocking error is present.
    pub error_confidence_cap: f32,
    /// Warnings up to this count are free; each one beyond it decays
    /// confidence by `warning_decay`.
    pub warning_grace: usize,
    /// Per-warning confidence decay beyond the grace count.
    pub warning_decay: f32,
    /// Confidence never drops below this floor.
    pub confidence_floor: f32,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ReconcilePolicy {
    /// The lenient policy: generous floors, percentage-based tolerances,
    /// total mismatches warn but never block.
    pub fn lenient() -> Self {
        Self {
            vnd: CurrencyLimits {
                plausible_max: dec!(50_000_000),
                item_floor: dec!(500),
                total_floor: dec!(10_000),
                minor_floor: dec!(1_000),
            },
            other: CurrencyLimits {
                plausible_max: dec!(10_000),
                item_floor: dec!(0.50),
                total_floor: dec!(5.00),
                minor_floor: dec!(0.05),
            },
            item_pct: dec!(0.10),
            total_pct: dec!(0.50),
            total_mismatch_is_error: false,
            error_confidence_cap: 0.3,
            warning_grace: 1,
            warning_decay: 0.05,
            confidence_floor: 0.1,
        }
    }

    /// The strict policy: small fixed floors, any grand-total mismatch
    /// beyond rounding blocks acceptance.
    pub fn strict() -> Self {
        Self {
            vnd: CurrencyLimits {
                plausible_max: dec!(50_000_000),
                item_floor: dec!(500),
                total_floor: dec!(1_000),
                minor_floor: dec!(0),
            },
            other: CurrencyLimits {
                plausible_max: dec!(10_000),
                item_floor: dec!(0.05),
                total_floor: dec!(0.05),
                minor_floor: dec!(0),
            },
            item_pct: dec!(0.01),
            total_pct: dec!(0.0),
            total_mismatch_is_error: true,
            error_confidence_cap: 0.3,
            warning_grace: 0,
            warning_decay: 0.1,
            confidence_floor: 0.1,
        }
    }

    /// Limits for the given currency code.
    pub fn limits(&self, currency: &str) -> &CurrencyLimits {
        if currency.eq_ignore_ascii_case("VND") {
            &self.vnd
        } else {
            &self.other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let c = ExtractionConfig::builder().build().unwrap();
        assert_eq!(c.model, "gpt-4o");
        assert_eq!(c.max_image_edge, 2048);
        assert_eq!(c.extract_timeout_secs, 300);
        assert!(!c.policy.total_mismatch_is_error);
    }

    #[test]
    fn builder_clamps_quality_and_edge() {
        let c = ExtractionConfig::builder()
            .jpeg_quality(200)
            .max_image_edge(10)
            .build()
            .unwrap();
        assert_eq!(c.jpeg_quality, 100);
        assert_eq!(c.max_image_edge, 100);
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        let err = ExtractionConfig::builder()
            .extract_timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("extract_timeout_secs"));
    }

    #[test]
    fn policy_limits_by_currency() {
        let p = ReconcilePolicy::lenient();
        assert_eq!(p.limits("VND").plausible_max, dec!(50_000_000));
        assert_eq!(p.limits("vnd").plausible_max, dec!(50_000_000));
        assert_eq!(p.limits("USD").plausible_max, dec!(10_000));
    }

    #[test]
    fn strict_policy_blocks_total_mismatch() {
        let p = ReconcilePolicy::strict();
        assert!(p.total_mismatch_is_error);
        assert_eq!(p.warning_grace, 0);
    }
}
