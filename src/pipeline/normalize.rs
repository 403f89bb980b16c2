//! Image normalization: arbitrary upload bytes → consistent model input.
//!
//! Phone photos arrive as 12-megapixel HEIC-converted JPEGs, rotated PNGs,
//! palette-mode screenshots. The vision API tiles whatever it receives and
//! charges per tile, so oversized inputs cost more and help nothing; odd
//! colour modes (RGBA, palette) trip some providers entirely. One pass here
//! gives every downstream consumer the same shape: RGB8 JPEG, longest edge
//! capped, base64-wrapped for the request body.
//!
//! JPEG is chosen over PNG: receipts are photographs, not line art, and at
//! quality 95 the compression artefacts are far below the blur already
//! present in a handheld shot.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

use crate::error::ExtractError;

/// A normalized, base64-encoded image ready for the vision API.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    /// Base64 of the JPEG bytes.
    pub data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl ImagePayload {
    /// Render as the `data:` URI the chat-completions image part expects.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Decode, resize and re-encode the image for model input.
///
/// The longest edge is capped at `max_edge` (aspect ratio preserved,
/// Lanczos3 resampling — text legibility survives downscaling better than
/// with the cheaper filters). Images already within the cap are re-encoded
/// without resizing so the colour-mode guarantee still holds.
pub fn normalize_image(
    bytes: &[u8],
    max_edge: u32,
    jpeg_quality: u8,
) -> Result<ImagePayload, ExtractError> {
    let img = image::load_from_memory(bytes).map_err(|e| ExtractError::ImageDecode {
        detail: e.to_string(),
    })?;

    let (w, h) = (img.width(), img.height());
    let img = if w.max(h) > max_edge {
        let img = img.resize(max_edge, max_edge, FilterType::Lanczos3);
        debug!(
            "resized receipt image {}x{} -> {}x{}",
            w,
            h,
            img.width(),
            img.height()
        );
        img
    } else {
        img
    };

    // Vision providers expect plain RGB; RGBA and palette modes are flattened.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buf = Vec::new();
    let mut cursor = Cursor::new(&mut buf);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut cursor,
        jpeg_quality,
    );
    rgb.write_with_encoder(encoder)
        .map_err(|e| ExtractError::ImageEncode {
            detail: e.to_string(),
        })?;

    Ok(ImagePayload {
        data: STANDARD.encode(&buf),
        mime_type: "image/jpeg",
        width: rgb.width(),
        height: rgb.height(),
    })
}
