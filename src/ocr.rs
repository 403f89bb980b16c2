//! Text recognizer seam: line-level OCR over the raw receipt image.
//!
//! The recognizer is an explicitly constructed, injectable instance shared
//! read-only across workers (`Arc<dyn TextRecognizer>`), never ambient
//! state. Engines load language models lazily on first use, so constructing
//! one per job would pay a multi-second warm-up each time; constructing one
//! per process and handing out the `Arc` keeps the warm-up a one-time cost.
//!
//! The built-in [`HttpRecognizer`] posts the image to an OCR sidecar
//! service and maps its JSON reply; tests substitute their own
//! implementations of [`TextRecognizer`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtractError;

/// Axis-aligned bounding box of one recognized line, in pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One line of recognized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub bounding_box: BoundingBox,
}

/// Full recognizer output for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrOutput {
    pub success: bool,
    /// All line texts joined in reading order.
    pub raw_text: String,
    pub lines: Vec<OcrLine>,
}

/// The text-extraction capability applied to a receipt image.
///
/// Implementations must be cheap to call concurrently; the engine handle
/// itself is initialized once and shared.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in the given image bytes.
    ///
    /// A transport-level failure is an `Err`; an engine that ran but found
    /// nothing returns `Ok` with `success = true` and empty lines.
    async fn recognize(&self, image: &[u8]) -> Result<OcrOutput, ExtractError>;
}

/// Recognizer adapter backed by an HTTP OCR service.
///
/// Speaks the sidecar's contract: `POST {base_url}/ocr` with the raw image
/// body, JSON reply `{success, raw_text, lines: [{text, confidence,
/// bounding_box}]}`.
pub struct HttpRecognizer {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRecognizer {
    /// Build an adapter for the service at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TextRecognizer for HttpRecognizer {
    async fn recognize(&self, image: &[u8]) -> Result<OcrOutput, ExtractError> {
        let url = format!("{}/ocr", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| ExtractError::OcrUnavailable {
                detail: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ExtractError::OcrUnavailable {
                detail: format!("HTTP {}", response.status()),
            });
        }

        let output: OcrOutput =
            response
                .json()
                .await
                .map_err(|e| ExtractError::OcrUnavailable {
                    detail: format!("bad recognizer reply: {e}"),
                })?;

        debug!(
            chars = output.raw_text.len(),
            lines = output.lines.len(),
            "recognizer returned text"
        );
        Ok(output)
    }
}
