//! MiDaS Depth Estimator
//!
//! Produces a relative inverse-depth map. Larger values are closer.

use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::DynamicImage;

use super::pool::{ModelPool, ModelType};
use super::preprocess::{image_to_nchw, Normalization, DEPTH_INPUT_SIZE};
use super::tensor::{self, OutputTensor};

/// Row-major single channel depth values
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if (width as usize) * (height as usize) != data.len() || data.is_empty() {
            anyhow::bail!(
                "Depth map of {}x{} cannot hold {} values",
                width,
                height,
                data.len()
            );
        }
        Ok(Self { width, height, data })
    }

    /// Build from a model output whose last two axes are `H, W`
    pub fn from_output(output: OutputTensor) -> Result<Self> {
        let (h, w) = match output.dims.as_slice() {
            [.., h, w] => (*h, *w),
            dims => anyhow::bail!("Unexpected depth output shape {:?}", dims),
        };
        Self::new(w as u32, h as u32, output.data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at column `u`, row `v`, `None` outside the map
    pub fn sample(&self, u: i64, v: i64) -> Option<f32> {
        if u < 0 || v < 0 || u >= self.width as i64 || v >= self.height as i64 {
            return None;
        }
        Some(self.data[v as usize * self.width as usize + u as usize])
    }

    /// Value at `(width / 2, height / 2)`
    pub fn center(&self) -> f32 {
        let idx = (self.height / 2) as usize * self.width as usize + (self.width / 2) as usize;
        self.data[idx]
    }

    /// Resample to a new size with half-pixel centres, like `cv2.resize`
    pub fn resize(&self, width: u32, height: u32, interpolation: Interpolation) -> DepthMap {
        if width == self.width && height == self.height {
            return self.clone();
        }

        let (sw, sh) = (self.width as usize, self.height as usize);
        let (dw, dh) = (width.max(1) as usize, height.max(1) as usize);

        // separable: rows first, then columns
        let x_taps = interpolation.taps(sw, dw);
        let y_taps = interpolation.taps(sh, dh);

        let mut horizontal = vec![0.0f32; dw * sh];
        for y in 0..sh {
            let row = &self.data[y * sw..(y + 1) * sw];
            for (x, taps) in x_taps.iter().enumerate() {
                horizontal[y * dw + x] = taps.iter().map(|&(i, w)| row[i] * w).sum();
            }
        }

        let mut data = vec![0.0f32; dw * dh];
        for (y, taps) in y_taps.iter().enumerate() {
            for x in 0..dw {
                data[y * dw + x] = taps.iter().map(|&(i, w)| horizontal[i * dw + x] * w).sum();
            }
        }

        DepthMap {
            width: dw as u32,
            height: dh as u32,
            data,
        }
    }
}

/// Resampling kernel for [`DepthMap::resize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Bilinear,
    /// Cubic convolution with a = -0.75, as used by torch `interpolate`
    Bicubic,
}

impl Interpolation {
    /// Source indices and weights for every destination position along one axis
    fn taps(self, src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
        let scale = src_len as f32 / dst_len as f32;
        let last = src_len as i64 - 1;
        let clamp = |i: i64| i.clamp(0, last) as usize;

        (0..dst_len)
            .map(|d| {
                let src = (d as f32 + 0.5) * scale - 0.5;
                match self {
                    Interpolation::Bilinear => {
                        let src = src.max(0.0);
                        let i0 = src.floor() as i64;
                        let t = src - i0 as f32;
                        vec![(clamp(i0), 1.0 - t), (clamp(i0 + 1), t)]
                    }
                    Interpolation::Bicubic => {
                        let i0 = src.floor() as i64;
                        let t = src - i0 as f32;
                        (-1..=2)
                            .map(|k| (clamp(i0 + k), cubic_weight(k as f32 - t)))
                            .collect()
                    }
                }
            })
            .collect()
    }
}

fn cubic_weight(x: f32) -> f32 {
    const A: f32 = -0.75;
    let x = x.abs();
    if x <= 1.0 {
        ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
    } else if x < 2.0 {
        ((A * x - 5.0 * A) * x + 8.0 * A) * x - 4.0 * A
    } else {
        0.0
    }
}

pub struct DepthEstimator {
    pool: Arc<ModelPool>,
}

impl DepthEstimator {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    /// Estimate depth at model resolution
    pub fn estimate(&self, image: &DynamicImage) -> Result<DepthMap> {
        let (w, h) = DEPTH_INPUT_SIZE;
        let resized = image.resize_exact(w, h, FilterType::CatmullRom);
        let input = image_to_nchw(&resized, Normalization::ImageNet);

        let model = self.pool.get_model(ModelType::DepthEstimator)?;
        let request = tensor::infer(&model, &input)?;
        let output = tensor::output(&request, 0)?;

        DepthMap::from_output(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_mismatched_buffer() {
        assert!(DepthMap::new(2, 2, vec![0.0; 3]).is_err());
        assert!(DepthMap::new(0, 0, vec![]).is_err());
    }

    #[test]
    fn test_sample_bounds() {
        let map = DepthMap::new(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(map.sample(0, 0), Some(1.0));
        assert_eq!(map.sample(2, 1), Some(6.0));
        assert_eq!(map.sample(3, 0), None);
        assert_eq!(map.sample(0, -1), None);
    }

    #[test]
    fn test_center_uses_integer_halves() {
        let map = DepthMap::new(3, 2, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        // row 1, column 1
        assert_eq!(map.center(), 5.0);
    }

    #[test]
    fn test_from_output_reads_last_two_axes() {
        let map = DepthMap::from_output(OutputTensor {
            dims: vec![1, 1, 2, 4],
            data: vec![0.0; 8],
        })
        .unwrap();
        assert_eq!((map.width, map.height), (4, 2));
    }

    #[test]
    fn test_resize_constant_map() {
        // values well outside [0, 1] must survive resampling
        let map = DepthMap::new(4, 4, vec![750.0; 16]).unwrap();
        for interpolation in [Interpolation::Bilinear, Interpolation::Bicubic] {
            let resized = map.resize(10, 6, interpolation);
            assert_eq!((resized.width, resized.height), (10, 6));
            assert_eq!(resized.data.len(), 60);
            assert!(resized.data.iter().all(|v| (v - 750.0).abs() < 1e-2));
        }
    }

    #[test]
    fn test_bilinear_upscale_interpolates() {
        let map = DepthMap::new(2, 1, vec![0.0, 100.0]).unwrap();
        let resized = map.resize(4, 1, Interpolation::Bilinear);
        // half-pixel centres: 0, 25, 75, 100
        let expected = [0.0, 25.0, 75.0, 100.0];
        for (v, e) in resized.data.iter().zip(expected) {
            assert!((v - e).abs() < 1e-3, "{} != {}", v, e);
        }
    }

    #[test]
    fn test_cubic_weights_partition_unity() {
        let t = 0.3f32;
        let sum: f32 = (-1..=2).map(|k| cubic_weight(k as f32 - t)).sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
