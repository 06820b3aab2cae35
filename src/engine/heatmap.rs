//! Depth heatmap rendering
//!
//! Raw MiDaS output has no fixed scale, so every frame is divided by the
//! mean centre depth of the recent frames before it is coloured.

use std::collections::VecDeque;

use image::{GrayImage, Luma, RgbImage};
use parking_lot::Mutex;

use super::depth::DepthMap;
use crate::config::DepthConfig;
use crate::utils::colormap::apply_magma;

/// Rolling window of recent centre-depth samples, shared by all requests
pub struct ReferenceWindow {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl ReferenceWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record a sample and return the mean of the window including it
    pub fn push(&self, sample: f32) -> f32 {
        let mut samples = self.samples.lock();
        samples.push_back(sample);
        while samples.len() > self.capacity {
            samples.pop_front();
        }
        samples.iter().sum::<f32>() / samples.len() as f32
    }
}

/// Scale depth against `mean_ref` into the configured band, then to 0..=255
pub fn stabilized_intensity(depth: f32, mean_ref: f32, config: &DepthConfig) -> u8 {
    let stable = if mean_ref.is_finite() && mean_ref.abs() > f32::EPSILON {
        depth / mean_ref * config.target_depth
    } else {
        config.target_depth
    };

    let band = (config.max_depth - config.min_depth).max(f32::EPSILON);
    let stable = stable.clamp(config.min_depth, config.max_depth);
    let vis = 255.0 * (stable - config.min_depth) / band;

    // NaN maps to 0
    vis as u8
}

/// Colour a depth map that is already at output resolution
pub fn render(map: &DepthMap, mean_ref: f32, config: &DepthConfig) -> RgbImage {
    let width = map.width();
    let data = map.data();
    let gray = GrayImage::from_fn(width, map.height(), |x, y| {
        let depth = data[(y * width + x) as usize];
        Luma([stabilized_intensity(depth, mean_ref, config)])
    });
    apply_magma(&gray)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_latest_samples() {
        let window = ReferenceWindow::new(3);
        assert_eq!(window.push(3.0), 3.0);
        assert_eq!(window.push(6.0), 4.5);
        assert_eq!(window.push(9.0), 6.0);
        // 3.0 falls out
        assert_eq!(window.push(12.0), 9.0);
        // 6.0 falls out
        assert_eq!(window.push(0.0), 7.0);
    }

    #[test]
    fn test_intensity_band() {
        let config = DepthConfig::default();
        // depth equal to the reference lands on the target (70 of 10..150)
        let mid = stabilized_intensity(5.0, 5.0, &config);
        assert_eq!(mid, (255.0 * 60.0 / 140.0) as u8);

        assert_eq!(stabilized_intensity(0.0, 5.0, &config), 0);
        assert_eq!(stabilized_intensity(1000.0, 5.0, &config), 255);
    }

    #[test]
    fn test_intensity_without_reference_uses_target() {
        let config = DepthConfig::default();
        let expected = stabilized_intensity(1.0, 1.0, &config);
        assert_eq!(stabilized_intensity(123.0, 0.0, &config), expected);
        assert_eq!(stabilized_intensity(123.0, f32::NAN, &config), expected);
    }

    #[test]
    fn test_render_matches_map_size() {
        let map = DepthMap::new(4, 2, vec![1.0; 8]).unwrap();
        let rgb = render(&map, 1.0, &DepthConfig::default());
        assert_eq!(rgb.dimensions(), (4, 2));
    }
}
