//! YOLOv8 Object Detector
//!
//! Letterboxed 640x640 input, `[1, 4 + nc, N]` output with `cx, cy, w, h`
//! followed by per-class scores.

use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use super::pool::{ModelPool, ModelType};
use super::preprocess::{image_to_nchw, letterbox, Normalization, ResizeInfo, OBJECT_DETECTOR_INPUT_SIZE};
use super::tensor::{self, OutputTensor};
use crate::utils::math::{non_max_suppression, Scored};

/// Padding value ultralytics uses when letterboxing
const LETTERBOX_FILL: u8 = 114;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// One detected object in original image coordinates
#[derive(Debug, Clone)]
pub struct ObjectDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

impl Scored for ObjectDetection {
    fn rect(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    fn score(&self) -> f32 {
        self.confidence
    }

    fn class_id(&self) -> usize {
        self.class_id
    }
}

pub struct ObjectDetector {
    pool: Arc<ModelPool>,
    confidence_threshold: f32,
    iou_threshold: f32,
    names: Vec<String>,
}

impl ObjectDetector {
    pub fn new(
        pool: Arc<ModelPool>,
        confidence_threshold: f32,
        iou_threshold: f32,
        names: Option<Vec<String>>,
    ) -> Self {
        let names = names.unwrap_or_else(|| COCO_CLASSES.iter().map(|s| s.to_string()).collect());
        Self {
            pool,
            confidence_threshold,
            iou_threshold,
            names,
        }
    }

    pub fn detect(&self, image: &DynamicImage) -> Result<Vec<ObjectDetection>> {
        let resize_info = ResizeInfo::new(image.dimensions(), OBJECT_DETECTOR_INPUT_SIZE);
        let boxed = letterbox(image, OBJECT_DETECTOR_INPUT_SIZE, LETTERBOX_FILL, FilterType::Triangle);
        let input = image_to_nchw(&boxed, Normalization::Unit);

        let model = self.pool.get_model(ModelType::ObjectDetector)?;
        let request = tensor::infer(&model, &input)?;
        let output = tensor::output(&request, 0)?;

        let detections = decode_predictions(
            &output,
            &resize_info,
            self.confidence_threshold,
            self.iou_threshold,
            &self.names,
        )?;

        tracing::debug!("Detected {} objects after NMS", detections.len());
        Ok(detections)
    }
}

/// Turn a raw YOLOv8 head into boxes. Accepts both `[1, 4 + nc, N]` and the
/// transposed `[1, N, 4 + nc]` export layout.
pub fn decode_predictions(
    output: &OutputTensor,
    resize_info: &ResizeInfo,
    confidence_threshold: f32,
    iou_threshold: f32,
    names: &[String],
) -> Result<Vec<ObjectDetection>> {
    let (rows, cols) = match output.dims.as_slice() {
        [1, a, b] | [a, b] => (*a, *b),
        dims => anyhow::bail!("Unexpected detector output shape {:?}", dims),
    };

    // the attribute axis is always the short one
    let channels_first = rows < cols;
    let (num_attrs, num_preds) = if channels_first { (rows, cols) } else { (cols, rows) };
    if num_attrs <= 4 {
        anyhow::bail!("Detector output has no class scores (shape {:?})", output.dims);
    }
    let num_classes = num_attrs - 4;

    let at = |pred: usize, attr: usize| -> f32 {
        if channels_first {
            output.data[attr * num_preds + pred]
        } else {
            output.data[pred * num_attrs + attr]
        }
    };

    let mut candidates = Vec::new();
    for pred in 0..num_preds {
        let (class_id, confidence) = (0..num_classes)
            .map(|c| (c, at(pred, 4 + c)))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(pred, 0), at(pred, 1), at(pred, 2), at(pred, 3));
        let (x1, y1) = resize_info.to_original_clamped(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = resize_info.to_original_clamped(cx + w / 2.0, cy + h / 2.0);

        let label = names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));

        candidates.push(ObjectDetection {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id,
            label,
        });
    }

    Ok(non_max_suppression(candidates, iou_threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["person".to_string(), "cup".to_string()]
    }

    /// Build a channels-first `[1, 6, n]` head from `(cx, cy, w, h, s0, s1)` rows,
    /// zero-padded so the prediction axis stays the long one
    fn head(preds: &[[f32; 6]]) -> OutputTensor {
        let n = preds.len().max(8);
        let mut data = vec![0.0; 6 * n];
        for (p, pred) in preds.iter().enumerate() {
            for (a, v) in pred.iter().enumerate() {
                data[a * n + p] = *v;
            }
        }
        OutputTensor {
            dims: vec![1, 6, n],
            data,
        }
    }

    #[test]
    fn test_decode_maps_back_to_original() {
        // 1280x720 letterboxed into 640x640: scale 0.5, 140px vertical pad
        let info = ResizeInfo::new((1280, 720), (640, 640));
        let output = head(&[
            [320.0, 320.0, 100.0, 50.0, 0.1, 0.9],
            [10.0, 10.0, 5.0, 5.0, 0.1, 0.1],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ]);

        let dets = decode_predictions(&output, &info, 0.25, 0.45, &names()).unwrap();
        assert_eq!(dets.len(), 1);

        let d = &dets[0];
        assert_eq!(d.label, "cup");
        assert_eq!(d.class_id, 1);
        assert!((d.x1 - 540.0).abs() < 1e-3);
        assert!((d.x2 - 740.0).abs() < 1e-3);
        assert!((d.y1 - 310.0).abs() < 1e-3);
        assert!((d.y2 - 410.0).abs() < 1e-3);
    }

    #[test]
    fn test_decode_transposed_layout_matches() {
        let info = ResizeInfo::new((640, 640), (640, 640));
        // eight non-overlapping boxes, one row per prediction
        let transposed = OutputTensor {
            dims: vec![1, 8, 6],
            data: (0..8)
                .flat_map(|i| [50.0 + i as f32 * 70.0, 100.0, 20.0, 20.0, 0.8, 0.0])
                .collect(),
        };

        let dets = decode_predictions(&transposed, &info, 0.5, 0.45, &names()).unwrap();
        assert_eq!(dets.len(), 8);
        assert!(dets.iter().all(|d| d.label == "person"));
    }

    #[test]
    fn test_decode_suppresses_overlaps() {
        let info = ResizeInfo::new((640, 640), (640, 640));
        let output = head(&[
            [100.0, 100.0, 50.0, 50.0, 0.9, 0.0],
            [102.0, 101.0, 50.0, 50.0, 0.7, 0.0],
            [300.0, 300.0, 50.0, 50.0, 0.6, 0.0],
        ]);

        let dets = decode_predictions(&output, &info, 0.25, 0.45, &names()).unwrap();
        let scores: Vec<f32> = dets.iter().map(|d| d.confidence).collect();
        assert_eq!(scores, vec![0.9, 0.6]);
    }

    #[test]
    fn test_unknown_class_gets_placeholder_label() {
        let info = ResizeInfo::new((640, 640), (640, 640));
        let output = head(&[[100.0, 100.0, 10.0, 10.0, 0.0, 0.9]]);
        let dets = decode_predictions(&output, &info, 0.25, 0.45, &["person".to_string()]).unwrap();
        assert_eq!(dets[0].label, "class_1");
    }

    #[test]
    fn test_rejects_bad_shape() {
        let info = ResizeInfo::new((640, 640), (640, 640));
        let output = OutputTensor {
            dims: vec![1, 2, 3, 4],
            data: vec![0.0; 24],
        };
        assert!(decode_predictions(&output, &info, 0.25, 0.45, &names()).is_err());
    }
}
