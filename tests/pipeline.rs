//! End-to-end pipeline tests with scripted collaborators.
//!
//! No network, no real OCR engine, no live model: the recognizer and the
//! vision model are substituted with in-test implementations, which is
//! exactly what the trait seams exist for. Every test drives the public
//! `Extractor::extract` surface and asserts on the typed result.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use receipt_extract::pipeline::normalize::ImagePayload;
use receipt_extract::{
    ExtractError, ExtractionConfig, ExtractionRequest, Extractor, NoHistory, OcrLine, OcrOutput,
    PurchaseHistory, TextRecognizer, VisionModel,
};

// ── Test helpers ─────────────────────────────────────────────────────────

/// A tiny but valid PNG so the normalizer has something to decode.
fn receipt_image() -> Vec<u8> {
    use image::{DynamicImage, Rgb, RgbImage};
    use std::io::Cursor;
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 96, Rgb([240, 240, 235])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

struct FakeRecognizer {
    text: String,
    fail: bool,
}

impl FakeRecognizer {
    fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            fail: false,
        }
    }

    fn unavailable() -> Self {
        Self {
            text: String::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, _image: &[u8]) -> Result<OcrOutput, ExtractError> {
        if self.fail {
            return Err(ExtractError::OcrUnavailable {
                detail: "engine offline".to_string(),
            });
        }
        Ok(OcrOutput {
            success: true,
            raw_text: self.text.clone(),
            lines: self
                .text
                .lines()
                .map(|l| OcrLine {
                    text: l.to_string(),
                    confidence: 0.95,
                    bounding_box: Default::default(),
                })
                .collect(),
        })
    }
}

struct ScriptedVision {
    reply: String,
    calls: AtomicUsize,
    /// Errors returned before the scripted reply succeeds.
    fail_first: AtomicUsize,
}

impl ScriptedVision {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        })
    }

    fn failing_first(reply: &str, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(failures),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionModel for ScriptedVision {
    async fn complete(
        &self,
        _system: &str,
        _user: &str,
        _image: &ImagePayload,
    ) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ExtractError::VisionApi {
                retries: 0,
                detail: "HTTP 503".to_string(),
            });
        }
        Ok(self.reply.clone())
    }
}

fn fast_config() -> ExtractionConfig {
    ExtractionConfig::builder()
        .max_retries(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn extractor(recognizer: FakeRecognizer, vision: Arc<ScriptedVision>) -> Extractor {
    Extractor::new(
        Arc::new(recognizer),
        vision,
        Arc::new(NoHistory),
        fast_config(),
    )
}

fn request() -> ExtractionRequest {
    ExtractionRequest {
        receipt_id: 17,
        image_location: "minio://receipts/17.jpg".to_string(),
        user_id: 3,
    }
}

const GOOD_REPLY: &str = r#"```json
{
  "metadata": {
    "merchant_name": "BÁCH HÓA XANH",
    "purchase_date": "29/10/2016",
    "total_amount": "46000",
    "currency": "VND",
    "confidence": 0.92
  },
  "items": [
    {"item_name": "Sữa tươi", "quantity": 2, "unit_price": "18000",
     "total_price": "36000", "currency": "VND", "confidence": 0.9},
    {"item_name": "Dưa leo", "quantity": 0.4, "unit_price": "25000",
     "total_price": "10000", "currency": "VND", "confidence": 0.88}
  ],
  "raw_text": ""
}
```"#;

// ── Happy path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_receipt_extracts_and_validates() {
    let vision = ScriptedVision::replying(GOOD_REPLY);
    let ex = extractor(
        FakeRecognizer::with_text("BACH HOA XANH\nSUA TUOI 36.000\nTONG 46.000"),
        Arc::clone(&vision),
    );

    let result = ex.extract(&request(), &receipt_image()).await;

    assert!(result.success, "errors: {:?}", result.validation.errors);
    assert!(result.validation.valid);
    assert_eq!(result.receipt_id, 17);
    assert_eq!(
        result.metadata.merchant_name.as_deref(),
        Some("BÁCH HÓA XANH")
    );
    assert_eq!(result.metadata.total_amount, Some(dec!(46000)));
    assert_eq!(
        result.metadata.purchase_date,
        NaiveDate::from_ymd_opt(2016, 10, 29)
    );
    assert_eq!(result.items.len(), 2);
    assert_eq!(result.items[1].quantity, 0.4);
    assert!(result.error_message.is_none());
    assert_eq!(vision.call_count(), 1);
}

#[tokio::test]
async fn ocr_text_is_preferred_when_model_omits_raw_text() {
    let ex = extractor(
        FakeRecognizer::with_text("RAW OCR LINES"),
        ScriptedVision::replying(GOOD_REPLY),
    );
    let result = ex.extract(&request(), &receipt_image()).await;
    // The scripted reply has an empty raw_text, so the recognizer's text wins.
    assert_eq!(result.raw_text.as_deref(), Some("RAW OCR LINES"));
}

#[tokio::test]
async fn truncated_fenced_reply_is_repaired() {
    // Fence never closed, object truncated mid-string: the repairer closes
    // the quote and both braces.
    let reply = "```json\n{\"metadata\": {\"merchant_name\": \"Mini Mart\", \
                 \"total_amount\": \"20000\", \"confidence\": 0.8";
    let ex = extractor(
        FakeRecognizer::with_text("MINI MART"),
        ScriptedVision::replying(reply),
    );
    let result = ex.extract(&request(), &receipt_image()).await;

    assert_eq!(result.metadata.merchant_name.as_deref(), Some("Mini Mart"));
    assert_eq!(result.metadata.total_amount, Some(dec!(20000)));
    // No items survived the truncation, so validation blocks.
    assert!(!result.success);
    assert!(result
        .validation
        .errors
        .iter()
        .any(|e| e.contains("No line items")));
}

// ── Degraded paths ───────────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_reply_degrades_to_stub() {
    let ex = extractor(
        FakeRecognizer::with_text("SOME TEXT"),
        ScriptedVision::replying("I could not find a receipt in this image, sorry!"),
    );
    let result = ex.extract(&request(), &receipt_image()).await;

    assert_eq!(result.metadata.merchant_name.as_deref(), Some("Mock Store"));
    assert_eq!(result.metadata.total_amount, Some(dec!(0)));
    assert!(result.items.is_empty());
    assert!(!result.success);
    // The stub is visually distinguishable: near-zero confidence.
    assert!(result.validation.confidence <= 0.3);
}

#[tokio::test]
async fn recognizer_outage_is_terminal_for_the_attempt() {
    let vision = ScriptedVision::replying(GOOD_REPLY);
    let ex = extractor(FakeRecognizer::unavailable(), Arc::clone(&vision));
    let result = ex.extract(&request(), &receipt_image()).await;

    assert!(!result.success);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("OCR unavailable"));
    assert!(result.items.is_empty());
    // The model is never consulted without OCR text.
    assert_eq!(vision.call_count(), 0);
}

#[tokio::test]
async fn transient_vision_failures_are_retried() {
    let vision = ScriptedVision::failing_first(GOOD_REPLY, 2);
    let ex = extractor(FakeRecognizer::with_text("TEXT"), Arc::clone(&vision));
    let result = ex.extract(&request(), &receipt_image()).await;

    assert!(result.success, "errors: {:?}", result.validation.errors);
    assert_eq!(vision.call_count(), 3, "two failures then one success");
}

#[tokio::test]
async fn exhausted_retries_surface_as_failure_result() {
    let vision = ScriptedVision::failing_first(GOOD_REPLY, 10);
    let ex = extractor(FakeRecognizer::with_text("TEXT"), Arc::clone(&vision));
    let result = ex.extract(&request(), &receipt_image()).await;

    assert!(!result.success);
    let msg = result.error_message.as_deref().unwrap();
    assert!(msg.contains("Vision model call failed"), "got: {msg}");
    assert_eq!(vision.call_count(), 3, "initial attempt + 2 retries");
}

#[tokio::test]
async fn undecodable_image_fails_cleanly() {
    let ex = extractor(
        FakeRecognizer::with_text("TEXT"),
        ScriptedVision::replying(GOOD_REPLY),
    );
    let result = ex.extract(&request(), b"definitely not an image").await;

    assert!(!result.success);
    assert!(result
        .error_message
        .as_deref()
        .unwrap()
        .contains("decode"));
}

// ── Invariants ───────────────────────────────────────────────────────────

#[tokio::test]
async fn success_always_equals_validation_valid() {
    let scenarios: Vec<(FakeRecognizer, Arc<ScriptedVision>)> = vec![
        (
            FakeRecognizer::with_text("ok"),
            ScriptedVision::replying(GOOD_REPLY),
        ),
        (
            FakeRecognizer::with_text("ok"),
            ScriptedVision::replying("not json at all"),
        ),
        (FakeRecognizer::unavailable(), ScriptedVision::replying(GOOD_REPLY)),
        (
            FakeRecognizer::with_text("ok"),
            ScriptedVision::failing_first(GOOD_REPLY, 10),
        ),
    ];

    for (recognizer, vision) in scenarios {
        let ex = extractor(recognizer, vision);
        let result = ex.extract(&request(), &receipt_image()).await;
        assert_eq!(
            result.success, result.validation.valid,
            "success must mirror validation.valid"
        );
    }
}

#[tokio::test]
async fn history_context_reaches_the_prompt() {
    use receipt_extract::HistoryProvider;

    struct CapturingVision {
        seen: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl VisionModel for CapturingVision {
        async fn complete(
            &self,
            _system: &str,
            user: &str,
            _image: &ImagePayload,
        ) -> Result<String, ExtractError> {
            *self.seen.lock().unwrap() = Some(user.to_string());
            Ok(GOOD_REPLY.to_string())
        }
    }

    struct FixedHistory;

    #[async_trait]
    impl HistoryProvider for FixedHistory {
        async fn history(
            &self,
            _receipt_id: i64,
            _user_id: i64,
        ) -> Result<PurchaseHistory, ExtractError> {
            Ok(PurchaseHistory {
                previous_receipt_count: 4,
                recent_merchants: vec!["BÁCH HÓA XANH".into(), "Co.opmart".into()],
                average_total: Some(dec!(125000)),
            })
        }
    }

    let vision = Arc::new(CapturingVision {
        seen: std::sync::Mutex::new(None),
    });
    let ex = Extractor::new(
        Arc::new(FakeRecognizer::with_text("TEXT")),
        Arc::clone(&vision) as Arc<dyn VisionModel>,
        Arc::new(FixedHistory),
        fast_config(),
    );

    let result = ex.extract(&request(), &receipt_image()).await;
    assert!(result.success);

    let prompt = vision.seen.lock().unwrap().clone().unwrap();
    assert!(prompt.contains("4 previous receipts"));
    assert!(prompt.contains("Co.opmart"));
    assert!(prompt.contains("TEXT"), "OCR text must be in the prompt");
}
