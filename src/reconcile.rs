//! Reconciliation: arithmetic and business-rule cross-checks over one
//! extraction.
//!
//! A pure function of its inputs — no I/O, no clock, no external calls —
//! so every boundary value is directly testable. It is also the sole
//! producer of [`ValidationResult`] and the sole place where the item-sum
//! vs receipt-total comparison happens; nothing else in the crate mutates
//! that verdict.
//!
//! Errors block acceptance (missing total, no items, non-positive
//! quantity). Warnings are advisory and never affect validity: the
//! product's priority is item capture, and a receipt that is off by a
//! rounding step or a missed discount line is still worth storing. All
//! thresholds come from [`ReconcilePolicy`], never inline constants.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::ReconcilePolicy;
use crate::model::{LineItem, ReceiptMetadata, ValidationResult};

/// Merchant names may contain letters in any script (Vietnamese diacritics
/// included), digits, whitespace, and common punctuation. Anything else is
/// only ever a warning — exotic branding is not an extraction failure.
static RE_MERCHANT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}\p{M}\p{N}\s\-'\.&,/+]+$").unwrap());

/// Cross-check extracted metadata and line items, producing the verdict.
pub fn reconcile(
    metadata: &ReceiptMetadata,
    items: &[LineItem],
    policy: &ReconcilePolicy,
) -> ValidationResult {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    let limits = policy.limits(&metadata.currency);

    // 1. Merchant name — warnings only.
    match metadata.merchant_name.as_deref() {
        Some(name) if !RE_MERCHANT.is_match(name) => {
            warnings.push(format!(
                "Merchant name '{name}' contains unusual characters."
            ));
        }
        Some(_) => {}
        None => warnings.push("Merchant name not found.".to_string()),
    }

    // 2. Total amount — absence and non-positive values block; implausible
    //    magnitude only warns.
    match metadata.total_amount {
        None => errors.push("Total amount missing.".to_string()),
        Some(total) if total <= Decimal::ZERO => {
            errors.push("Total amount must be positive.".to_string());
        }
        Some(total) if total > limits.plausible_max => {
            warnings.push(format!(
                "Total amount {} unusually high for {} (>{}).",
                total, metadata.currency, limits.plausible_max
            ));
        }
        Some(_) => {}
    }

    // 3. Line items — the primary purpose of the extraction.
    if items.is_empty() {
        errors.push(
            "No line items extracted. Please check the 'SL' and 'Thành tiền' columns.".to_string(),
        );
    } else {
        let mut item_sum = Decimal::ZERO;

        for (idx, item) in items.iter().enumerate() {
            if item.quantity <= 0.0 {
                errors.push(format!(
                    "Item {} ({}): Quantity must be > 0.",
                    idx + 1,
                    item.item_name
                ));
            }

            // Per-item arithmetic. Discount/refund lines (negative total)
            // are exempt: their unit price column rarely matches.
            if item.total_price >= Decimal::ZERO {
                if let Some(unit_price) = item.unit_price {
                    let qty = Decimal::from_f64_retain(item.quantity).unwrap_or(Decimal::ONE);
                    let expected = (qty * unit_price).round_dp(2);
                    let diff = (expected - item.total_price).abs();
                    let tolerance = (policy.item_pct * expected).max(limits.item_floor);
                    if diff > tolerance {
                        warnings.push(format!(
                            "Item {} ({}): {} × {} = {}, but total price is {} — \
                             quantity and price columns may be swapped.",
                            idx + 1,
                            item.item_name,
                            item.quantity,
                            unit_price,
                            expected,
                            item.total_price
                        ));
                    }
                }
            }

            item_sum += item.total_price;
        }

        // 4. Grand-total reconciliation. Sole writer of this comparison.
        if let Some(total) = metadata.total_amount {
            if total > Decimal::ZERO {
                let diff = (item_sum - total).abs();
                let generous = (policy.total_pct * total).max(limits.total_floor);
                if diff > generous {
                    let pct = (diff * dec!(100) / total).round_dp(1);
                    let message = format!(
                        "Sum of items ({item_sum}) differs from receipt total ({total}) \
                         by {diff} ({pct}%). Re-scan may be needed for missed items or \
                         discount lines."
                    );
                    if policy.total_mismatch_is_error {
                        errors.push(message);
                    } else {
                        warnings.push(message);
                    }
                } else if diff > limits.minor_floor {
                    warnings.push(format!(
                        "Sum of items ({item_sum}) is {diff} off the receipt total \
                         ({total}); likely receipt rounding."
                    ));
                }
            }
        }
    }

    // 5. Confidence adjustment. Errors cap hard; warnings beyond the grace
    //    count decay gently. Never raised above the model's own estimate.
    let base = metadata.confidence.clamp(0.0, 1.0);
    let confidence = if !errors.is_empty() {
        base.min(policy.error_confidence_cap)
    } else if warnings.len() > policy.warning_grace {
        let excess = (warnings.len() - policy.warning_grace) as f32;
        (base - policy.warning_decay * excess).max(policy.confidence_floor)
    } else {
        base
    };

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
        confidence,
    }
}
