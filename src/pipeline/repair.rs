//! Structured-output repair: the model's raw reply → typed extraction data.
//!
//! ## Why is repair necessary?
//!
//! Even well-prompted vision models routinely return JSON that is
//! *semantically right* but *syntactically broken*:
//!
//! - Wrapped in ` ```json ... ``` ` fences despite the prompt saying
//!   "no markdown"
//! - Truncated mid-object when the item list outruns the token budget
//! - Field names with a recurring misspelling (`purcahse_date`)
//! - Prices emitted as numbers where strings were requested, or vice versa
//!
//! This module applies a short list of cheap, deterministic string rules in
//! a fixed order, then parses. It is a heuristic best-effort repair, not a
//! JSON grammar recovery: it handles truncation and a fixed typo table, and
//! anything else is an unrecoverable parse failure that the orchestrator
//! maps to the stub result.
//!
//! ## Rule Order
//!
//! Fences are stripped before trimming so a trailing fence does not defeat
//! the truncation check; typos are fixed before brace counting because the
//! fixes never change brace or quote counts.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

use crate::error::ExtractError;
use crate::model::default_currency;

/// Field-name misspellings the model is known to produce, with corrections.
///
/// Keys are matched as whole JSON keys (quotes included) so a correction
/// can never touch string *values*.
const KNOWN_TYPOS: &[(&str, &str)] = &[
    ("\"purcahse_date\"", "\"purchase_date\""),
    ("\"merchent_name\"", "\"merchant_name\""),
    ("\"total_ammount\"", "\"total_amount\""),
];

static RE_LEADING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```[a-zA-Z]*\s*\n?").unwrap());

/// Apply all repair rules to the raw model reply.
///
/// Rules (applied in order):
/// 1. Strip a leading code-fence marker, with or without a language tag
/// 2. Strip a trailing code-fence marker, if present (truncated replies
///    often lack one)
/// 3. Trim surrounding whitespace
/// 4. Fix the fixed table of known field-name typos
/// 5. If the blob does not end with `}` (truncated output): close an odd
///    double-quote count with one `"`, then append one `}` per unmatched `{`
pub fn repair_json(raw: &str) -> String {
    let s = raw.trim();
    let s = RE_LEADING_FENCE.replace(s, "");
    let s = s.trim_end_matches("```");
    let mut s = s.trim().to_string();

    for (typo, fix) in KNOWN_TYPOS {
        if s.contains(typo) {
            s = s.replace(typo, fix);
        }
    }

    if !s.ends_with('}') {
        if s.matches('"').count() % 2 == 1 {
            s.push('"');
        }
        let open = s.matches('{').count();
        let close = s.matches('}').count();
        if open > close {
            debug!(
                missing = open - close,
                "closing truncated model output"
            );
            for _ in 0..(open - close) {
                s.push_str("\n}");
            }
        }
    }

    s
}

/// Repair and parse the model reply into the lenient DTO.
///
/// Failure here is the "unrecoverable" signal of the repair contract: the
/// orchestrator responds with the stub result, never an exception.
pub fn parse_extraction(raw: &str) -> Result<RawExtraction, ExtractError> {
    let repaired = repair_json(raw);
    serde_json::from_str(&repaired).map_err(|e| ExtractError::MalformedOutput {
        detail: e.to_string(),
    })
}

// ── Lenient DTO ──────────────────────────────────────────────────────────
//
// The prompt asks for prices as digit-only strings; models return strings,
// numbers, nulls, and occasionally garbage in any of those slots. The DTO
// absorbs the variation so one malformed price does not discard an
// otherwise good extraction.

/// Untyped-but-shaped extraction data as the model returned it.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub metadata: RawMetadata,
    #[serde(default)]
    pub items: Vec<RawItem>,
    #[serde(default)]
    pub raw_text: Option<String>,
}

/// Receipt-level fields before date normalization and validation.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawMetadata {
    #[serde(default)]
    pub merchant_name: Option<String>,
    /// Still a string here; [`crate::pipeline::dates`] canonicalises it.
    #[serde(default, deserialize_with = "de_opt_string")]
    pub purchase_date: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub total_amount: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, deserialize_with = "de_confidence")]
    pub confidence: f32,
}

/// One line item as the model returned it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    #[serde(default = "unknown_item")]
    pub item_name: String,
    #[serde(default = "one", deserialize_with = "de_quantity")]
    pub quantity: f64,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub unit_price: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub total_price: Option<Decimal>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, deserialize_with = "de_confidence")]
    pub confidence: f32,
}

fn unknown_item() -> String {
    "Unknown Item".to_string()
}

fn one() -> f64 {
    1.0
}

fn de_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Decimal from string or number; empty or unparseable values become None
/// rather than failing the whole document.
fn de_opt_decimal<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Decimal>, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(decimal_from_value(&v))
}

fn decimal_from_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => {
            let s = s.trim().replace(',', "");
            if s.is_empty() {
                None
            } else {
                Decimal::from_str(&s).ok()
            }
        }
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn de_quantity<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(match v {
        Value::Number(n) => n.as_f64().unwrap_or(1.0),
        Value::String(s) => s.trim().parse().unwrap_or(1.0),
        _ => 1.0,
    })
}

fn de_confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    let v = Value::deserialize(d)?;
    let c = match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(c.clamp(0.0, 1.0) as f32)
}

// ── Tests ────────────────────────────────────────────────────────────────
