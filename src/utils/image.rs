//! Image utility functions

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

use crate::engine::preprocess::decode_image;

/// Strip an optional `data:<mime>;base64,` prefix
pub fn strip_data_url(encoded: &str) -> &str {
    let trimmed = encoded.trim();
    match trimmed.split_once(";base64,") {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => trimmed,
    }
}

/// Decode base64 bytes, with or without a data-URL prefix
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(strip_data_url(encoded))
        .context("Invalid base64 payload")
}

/// Decode a base64 encoded image
pub fn decode_base64_image(encoded: &str) -> Result<DynamicImage> {
    let bytes = decode_base64(encoded)?;
    decode_image(&bytes)
}

/// Encode an RGB image to JPEG bytes
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    encoder.encode_image(image).context("Failed to encode JPEG")?;
    Ok(buffer)
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Mean greyscale intensity in 0..=255
pub fn mean_intensity(image: &DynamicImage) -> f32 {
    let gray = image.to_luma8();
    let count = gray.pixels().len();
    if count == 0 {
        return 0.0;
    }
    let total: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    (total as f64 / count as f64) as f32
}
