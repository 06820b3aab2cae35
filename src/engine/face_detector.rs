//! SCRFD Face Detector
//!
//! Anchor-free InsightFace detector. Produces boxes and, for `_kps` exports,
//! 5-point landmarks used for ArcFace alignment.

use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use super::pool::{ModelPool, ModelType};
use super::preprocess::{image_to_nchw, letterbox, Normalization, ResizeInfo, FACE_DETECTOR_INPUT_SIZE};
use super::tensor::{self, OutputTensor};
use crate::utils::math::{non_max_suppression, Scored};

const NMS_THRESHOLD: f32 = 0.4;

/// Face detection result in original image coordinates
#[derive(Debug, Clone)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    /// Integer `[left, top, right, bottom]`
    pub fn ltrb(&self) -> [i32; 4] {
        [self.x1 as i32, self.y1 as i32, self.x2 as i32, self.y2 as i32]
    }
}

impl Scored for FaceBox {
    fn rect(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    fn score(&self) -> f32 {
        self.confidence
    }
}

/// Head layout, inferred from how many outputs the export has
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeadLayout {
    strides: &'static [usize],
    anchors_per_cell: usize,
    has_landmarks: bool,
}

impl HeadLayout {
    fn from_output_count(count: usize) -> Result<Self> {
        const THREE: &[usize] = &[8, 16, 32];
        const FIVE: &[usize] = &[8, 16, 32, 64, 128];

        let (strides, anchors_per_cell, has_landmarks) = match count {
            6 => (THREE, 2, false),
            9 => (THREE, 2, true),
            10 => (FIVE, 1, false),
            15 => (FIVE, 1, true),
            n => anyhow::bail!("Unsupported SCRFD export with {} outputs", n),
        };

        Ok(Self {
            strides,
            anchors_per_cell,
            has_landmarks,
        })
    }
}

pub struct FaceDetector {
    pool: Arc<ModelPool>,
    confidence_threshold: f32,
}

impl FaceDetector {
    pub fn new(pool: Arc<ModelPool>, confidence_threshold: f32) -> Self {
        Self {
            pool,
            confidence_threshold,
        }
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceBox>> {
        let resize_info = ResizeInfo::new(image.dimensions(), FACE_DETECTOR_INPUT_SIZE);
        let boxed = letterbox(image, FACE_DETECTOR_INPUT_SIZE, 0, FilterType::Triangle);
        let input = image_to_nchw(&boxed, Normalization::InsightFace);

        let model = self.pool.get_model(ModelType::FaceDetector)?;
        let request = tensor::infer(&model, &input)?;

        let outputs = (0..tensor::output_count(&request))
            .map(|i| tensor::output(&request, i))
            .collect::<Result<Vec<_>>>()?;

        let faces = decode_outputs(&outputs, &resize_info, self.confidence_threshold)?;
        tracing::debug!("Detected {} faces after NMS", faces.len());
        Ok(faces)
    }
}

/// Decode SCRFD outputs ordered as scores, then boxes, then landmarks, one
/// tensor per stride in each group
pub fn decode_outputs(
    outputs: &[OutputTensor],
    resize_info: &ResizeInfo,
    confidence_threshold: f32,
) -> Result<Vec<FaceBox>> {
    let layout = HeadLayout::from_output_count(outputs.len())?;
    let fmc = layout.strides.len();
    let (input_w, input_h) = FACE_DETECTOR_INPUT_SIZE;

    let mut candidates = Vec::new();
    for (idx, &stride) in layout.strides.iter().enumerate() {
        let scores = &outputs[idx].data;
        let bboxes = &outputs[idx + fmc].data;
        let kps = layout.has_landmarks.then(|| &outputs[idx + 2 * fmc].data);

        let feat_w = input_w as usize / stride;
        let feat_h = input_h as usize / stride;
        let stride = stride as f32;

        let anchors = (0..feat_h).flat_map(|y| {
            (0..feat_w).flat_map(move |x| {
                std::iter::repeat(((x as f32) * stride, (y as f32) * stride)).take(layout.anchors_per_cell)
            })
        });

        for (i, (cx, cy)) in anchors.enumerate() {
            let Some(&score) = scores.get(i) else { break };
            if score < confidence_threshold {
                continue;
            }
            let Some(dist) = bboxes.get(i * 4..i * 4 + 4) else { continue };

            // distances to left, top, right, bottom in stride units
            let (x1, y1) = resize_info.to_original_clamped(cx - dist[0] * stride, cy - dist[1] * stride);
            let (x2, y2) = resize_info.to_original_clamped(cx + dist[2] * stride, cy + dist[3] * stride);

            let landmarks = kps.and_then(|k| k.get(i * 10..i * 10 + 10)).map(|k| {
                let mut points = [(0.0f32, 0.0f32); 5];
                for (j, point) in points.iter_mut().enumerate() {
                    *point = resize_info.to_original(cx + k[j * 2] * stride, cy + k[j * 2 + 1] * stride);
                }
                points
            });

            candidates.push(FaceBox {
                x1,
                y1,
                x2,
                y2,
                confidence: score,
                landmarks,
            });
        }
    }

    Ok(non_max_suppression(candidates, NMS_THRESHOLD))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_outputs(with_landmarks: bool) -> Vec<OutputTensor> {
        let (w, h) = FACE_DETECTOR_INPUT_SIZE;
        let cells = |s: usize| (w as usize / s) * (h as usize / s) * 2;
        let mut outputs = Vec::new();
        for per_anchor in [1usize, 4, 10] {
            if per_anchor == 10 && !with_landmarks {
                continue;
            }
            for s in [8, 16, 32] {
                outputs.push(OutputTensor {
                    dims: vec![cells(s), per_anchor],
                    data: vec![0.0; cells(s) * per_anchor],
                });
            }
        }
        outputs
    }

    #[test]
    fn test_layout_from_output_count() {
        assert!(HeadLayout::from_output_count(9).unwrap().has_landmarks);
        assert_eq!(HeadLayout::from_output_count(10).unwrap().strides.len(), 5);
        assert!(HeadLayout::from_output_count(7).is_err());
    }

    #[test]
    fn test_decode_single_face_with_landmarks() {
        let mut outputs = empty_outputs(true);
        // stride 32 grid is 20x20, anchor index of cell (x=5, y=4), first anchor
        let anchor = (4 * 20 + 5) * 2;
        outputs[2].data[anchor] = 0.95;
        outputs[5].data[anchor * 4..anchor * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);
        outputs[8].data[anchor * 10] = 0.5;

        let info = ResizeInfo::new((640, 640), (640, 640));
        let faces = decode_outputs(&outputs, &info, 0.5).unwrap();
        assert_eq!(faces.len(), 1);

        let face = &faces[0];
        // anchor centre (160, 128), one stride each way
        assert_eq!(face.ltrb(), [128, 96, 192, 160]);
        let landmarks = face.landmarks.unwrap();
        assert!((landmarks[0].0 - 176.0).abs() < 1e-3);
        assert!((landmarks[0].1 - 128.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_without_landmarks() {
        let mut outputs = empty_outputs(false);
        outputs[0].data[0] = 0.9;
        outputs[3].data[0..4].copy_from_slice(&[0.0, 0.0, 2.0, 2.0]);

        let info = ResizeInfo::new((640, 640), (640, 640));
        let faces = decode_outputs(&outputs, &info, 0.5).unwrap();
        assert_eq!(faces.len(), 1);
        assert!(faces[0].landmarks.is_none());
    }

    #[test]
    fn test_decode_skips_low_scores() {
        let mut outputs = empty_outputs(true);
        outputs[0].data[10] = 0.3;
        let info = ResizeInfo::new((640, 640), (640, 640));
        assert!(decode_outputs(&outputs, &info, 0.5).unwrap().is_empty());
    }
}
