//! Age regressor
//!
//! EfficientNet-B0 with a single regression output, in years.

use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::DynamicImage;

use super::pool::{ModelPool, ModelType};
use super::preprocess::{image_to_nchw, Normalization, AGE_INPUT_SIZE};
use super::tensor;

pub const MAX_AGE: i32 = 120;

pub struct AgeEstimator {
    pool: Arc<ModelPool>,
}

impl AgeEstimator {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    /// Estimate age from a cropped colour face
    pub fn estimate(&self, face: &DynamicImage) -> Result<i32> {
        let (w, h) = AGE_INPUT_SIZE;
        let resized = face.resize_exact(w, h, FilterType::Triangle);
        let input = image_to_nchw(&resized, Normalization::ImageNet);

        let model = self.pool.get_model(ModelType::Age)?;
        let request = tensor::infer(&model, &input)?;
        let output = tensor::output(&request, 0)?;

        let raw = output
            .data
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Age model returned no value"))?;
        tracing::debug!("Age model raw output: {}", raw);

        Ok(to_years(raw))
    }
}

/// Round to whole years within `0..=MAX_AGE`
pub fn to_years(raw: f32) -> i32 {
    if !raw.is_finite() {
        return 0;
    }
    (raw.round() as i32).clamp(0, MAX_AGE)
}
