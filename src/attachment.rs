//! Client-side image attachment encoding.
//!
//! Turns a user-selected image file into a compact base64 payload without a
//! server round trip: decode, proportional resize to a byte budget, format
//! selection, and quality-stepped re-encoding. Display side reconstructs
//! the data URI by sniffing the payload's magic bytes.
//!
//! Orientation is whatever the decoder produces for the container format;
//! EXIF rotation tags are not applied.

use crate::config::{AttachmentConfig, PreferredFormat};
use crate::error::{MessengerError, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use tracing::debug;

/// Quality reduction per re-encode attempt.
pub const QUALITY_STEP: u8 = 10;

/// Lowest quality the budget loop will try before giving up and returning
/// the oversized payload anyway.
pub const QUALITY_FLOOR: u8 = 50;

/// Side length of the corner region sampled for transparency.
const ALPHA_SAMPLE_SIDE: u32 = 16;

/// Encode a raw image file into a bounded base64 payload.
///
/// The returned string carries no data-URI prefix; see [`data_uri`].
/// Decode and encode are CPU-bound, so the work runs on the blocking pool.
///
/// # Errors
///
/// [`MessengerError::UnsupportedImage`] when the source format cannot be
/// rasterized, [`MessengerError::Image`] when decode or encode fails.
pub async fn encode_attachment(bytes: Vec<u8>, config: &AttachmentConfig) -> Result<String> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || encode_blocking(&bytes, &config))
        .await
        .map_err(|e| MessengerError::Image(format!("encode task failed: {e}")))?
}

fn encode_blocking(bytes: &[u8], config: &AttachmentConfig) -> Result<String> {
    let source_format = image::guess_format(bytes).map_err(|_| {
        MessengerError::UnsupportedImage(
            "unrecognized image data; supported inputs are PNG and JPEG".into(),
        )
    })?;
    if !matches!(source_format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(MessengerError::UnsupportedImage(format!(
            "{source_format:?} cannot be rasterized here; supported inputs are PNG and JPEG"
        )));
    }

    let decoded = image::load_from_memory_with_format(bytes, source_format)
        .map_err(|e| MessengerError::Image(format!("decode failed: {e}")))?;

    let resized = resize_to_budget(&decoded, bytes.len(), config);

    // Lossy by default; a lossless source with genuine transparency keeps
    // the lossless format. A modern format we cannot encode falls back.
    let mut use_png = match config.preferred_format {
        PreferredFormat::Png => true,
        PreferredFormat::Jpeg => false,
        PreferredFormat::WebP => {
            debug!("webp encoding unavailable, falling back to jpeg");
            false
        }
    };
    if source_format == ImageFormat::Png && has_corner_transparency(&resized) {
        use_png = true;
    }

    let mut quality = config.quality.clamp(QUALITY_FLOOR, 100);
    loop {
        let encoded = if use_png {
            encode_png(&resized)?
        } else {
            encode_jpeg(&resized, quality)?
        };
        let payload = BASE64.encode(&encoded);
        let estimate = payload.len() as f64 * 0.75;
        if estimate <= config.max_bytes as f64 {
            return Ok(payload);
        }
        if use_png {
            use_png = false;
            continue;
        }
        if quality <= QUALITY_FLOOR {
            debug!(
                "payload still ~{estimate:.0} bytes over a {} budget at the quality floor",
                config.max_bytes
            );
            return Ok(payload);
        }
        quality = quality.saturating_sub(QUALITY_STEP).max(QUALITY_FLOOR);
    }
}

/// Shrink so the longer edge fits `max_side` *and* the projected encoded
/// size fits the byte budget (encoded size scales roughly with pixel area,
/// hence the square root). The more aggressive factor wins. Dimensions
/// round down to encoder-friendly multiples of 8, minimum 8 px per side.
fn resize_to_budget(
    decoded: &DynamicImage,
    source_len: usize,
    config: &AttachmentConfig,
) -> DynamicImage {
    let (w, h) = decoded.dimensions();
    let longer = f64::from(w.max(h));
    let edge_scale = (f64::from(config.max_side) / longer).min(1.0);
    let byte_scale = (config.max_bytes as f64 / source_len as f64).sqrt().min(1.0);
    let scale = edge_scale.min(byte_scale);

    let target_w = round_dimension(f64::from(w) * scale);
    let target_h = round_dimension(f64::from(h) * scale);
    if (target_w, target_h) == (w, h) {
        decoded.clone()
    } else {
        decoded.resize_exact(target_w, target_h, FilterType::Lanczos3)
    }
}

fn round_dimension(value: f64) -> u32 {
    let truncated = value as u32;
    ((truncated / 8) * 8).max(8)
}

/// Whether the top-left corner region contains any non-opaque pixel.
fn has_corner_transparency(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    for y in 0..h.min(ALPHA_SAMPLE_SIDE) {
        for x in 0..w.min(ALPHA_SAMPLE_SIDE) {
            if rgba.get_pixel(x, y)[3] != u8::MAX {
                return true;
            }
        }
    }
    false
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
    // JPEG has no alpha; flatten first.
    let rgb = img.to_rgb8();
    rgb.write_with_encoder(encoder)
        .map_err(|e| MessengerError::Image(format!("jpeg encode failed: {e}")))?;
    Ok(out)
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut out);
    img.write_with_encoder(encoder)
        .map_err(|e| MessengerError::Image(format!("png encode failed: {e}")))?;
    Ok(out)
}

/// MIME type for a base64 payload, sniffed from its leading magic bytes.
/// Unrecognized payloads default to the lossy format.
#[must_use]
pub fn sniff_mime(payload: &str) -> &'static str {
    // 16 base64 chars decode to the first 12 bytes — enough for every
    // signature checked here.
    let prefix_len = payload.len().min(16);
    let Ok(head) = BASE64.decode(&payload.as_bytes()[..prefix_len - prefix_len % 4]) else {
        return "image/jpeg";
    };
    if head.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Reconstruct a displayable URI from a raw base64 payload. Values that
/// already carry a scheme pass through untouched.
#[must_use]
pub fn data_uri(payload: &str) -> String {
    if payload.starts_with("data:") {
        return payload.to_owned();
    }
    format!("data:{};base64,{}", sniff_mime(payload), payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        encode_png(img).expect("encode png")
    }

    fn opaque_source(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(w, h, |x, y| {
            Rgb([
                (x * 31 % 256) as u8,
                (y * 17 % 256) as u8,
                ((x + y) * 7 % 256) as u8,
            ])
        });
        png_bytes(&DynamicImage::ImageRgb8(img))
    }

    fn transparent_source(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(w, h, |x, _| Rgba([120, 80, 40, (x % 200) as u8]));
        png_bytes(&DynamicImage::ImageRgba8(img))
    }

    fn decode_payload(payload: &str) -> DynamicImage {
        let bytes = BASE64.decode(payload).expect("valid base64");
        image::load_from_memory(&bytes).expect("decodable output")
    }

    #[tokio::test]
    async fn garbage_input_is_rejected_with_a_description() {
        let err = encode_attachment(b"definitely not an image".to_vec(), &AttachmentConfig::default())
            .await
            .expect_err("must reject");
        assert!(matches!(err, MessengerError::UnsupportedImage(_)));
        assert!(err.to_string().contains("unsupported image format"));
    }

    #[tokio::test]
    async fn unrasterizable_format_is_rejected() {
        // A GIF header is recognized but not decodable with this feature set.
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
        let err = encode_attachment(gif, &AttachmentConfig::default())
            .await
            .expect_err("must reject");
        assert!(matches!(err, MessengerError::UnsupportedImage(_)));
    }

    #[tokio::test]
    async fn longer_edge_is_bounded_and_multiple_of_eight() {
        let source = opaque_source(100, 50);
        let config = AttachmentConfig {
            max_side: 64,
            ..Default::default()
        };
        let payload = encode_attachment(source, &config).await.expect("encode");
        let out = decode_payload(&payload);
        assert_eq!(out.dimensions(), (64, 32));
    }

    #[tokio::test]
    async fn tiny_dimensions_clamp_to_eight() {
        let source = opaque_source(100, 4);
        let config = AttachmentConfig {
            max_side: 50,
            ..Default::default()
        };
        let payload = encode_attachment(source, &config).await.expect("encode");
        let out = decode_payload(&payload);
        assert_eq!(out.dimensions(), (48, 8));
    }

    #[tokio::test]
    async fn byte_budget_is_respected() {
        let img = RgbImage::from_fn(512, 512, |x, y| Rgb([(x / 4) as u8, (y / 4) as u8, 128]));
        let source = png_bytes(&DynamicImage::ImageRgb8(img));
        let config = AttachmentConfig {
            max_side: 512,
            max_bytes: 16 * 1024,
            ..Default::default()
        };
        let payload = encode_attachment(source, &config).await.expect("encode");
        let estimate = payload.len() as f64 * 0.75;
        assert!(
            estimate <= config.max_bytes as f64,
            "estimate {estimate:.0} exceeds budget {}",
            config.max_bytes
        );
    }

    #[tokio::test]
    async fn quality_floor_is_the_escape_hatch() {
        // High-frequency content that no quality setting squeezes into a
        // 1 KiB budget: the encode still succeeds with the floor payload.
        let source = opaque_source(256, 256);
        let config = AttachmentConfig {
            max_side: 256,
            max_bytes: 1024,
            ..Default::default()
        };
        let payload = encode_attachment(source, &config).await.expect("encode");
        assert_eq!(sniff_mime(&payload), "image/jpeg");
    }

    #[tokio::test]
    async fn transparent_png_stays_png() {
        let source = transparent_source(64, 64);
        let payload = encode_attachment(source, &AttachmentConfig::default())
            .await
            .expect("encode");
        assert_eq!(sniff_mime(&payload), "image/png");
    }

    #[tokio::test]
    async fn opaque_png_converts_to_the_lossy_default() {
        let source = opaque_source(64, 64);
        let payload = encode_attachment(source, &AttachmentConfig::default())
            .await
            .expect("encode");
        assert_eq!(sniff_mime(&payload), "image/jpeg");
    }

    #[tokio::test]
    async fn webp_preference_falls_back_to_jpeg() {
        let source = opaque_source(64, 64);
        let config = AttachmentConfig {
            preferred_format: PreferredFormat::WebP,
            ..Default::default()
        };
        let payload = encode_attachment(source, &config).await.expect("encode");
        assert_eq!(sniff_mime(&payload), "image/jpeg");
    }

    #[test]
    fn sniff_recognizes_the_three_signatures() {
        assert_eq!(sniff_mime(&BASE64.encode([0x89, b'P', b'N', b'G', 0x0D, 0x0A])), "image/png");
        assert_eq!(sniff_mime(&BASE64.encode([0xFF, 0xD8, 0xFF, 0xE0, 0, 0])), "image/jpeg");
        let webp = b"RIFF\x24\x00\x00\x00WEBPVP8 ";
        assert_eq!(sniff_mime(&BASE64.encode(webp)), "image/webp");
        assert_eq!(sniff_mime(&BASE64.encode(b"plain text here")), "image/jpeg");
    }

    #[test]
    fn data_uri_prefixes_and_passes_through() {
        let payload = BASE64.encode([0x89, b'P', b'N', b'G', 0x0D, 0x0A]);
        let uri = data_uri(&payload);
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(data_uri(&uri), uri);
    }
}
