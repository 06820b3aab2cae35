//! Vector, score and box helpers shared by the model wrappers

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine of the angle between `a` and `b`, 0 for mismatched, empty or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot(a, b) / denom
}

/// Scale to unit length; zero vectors are left untouched
pub fn l2_normalize(v: &mut [f32]) {
    let n = norm(v);
    if n == 0.0 {
        return;
    }
    v.iter_mut().for_each(|x| *x /= n);
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let peak = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - peak).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Index and value of the largest element, `None` for an empty slice
pub fn argmax(x: &[f32]) -> Option<(usize, f32)> {
    x.iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

/// Round to `decimals` places
pub fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}

/// Intersection over union of two `[x1, y1, x2, y2]` boxes
pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let area = |r: [f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let overlap = area([x1, y1, x2, y2]);
    let total = area(a) + area(b) - overlap;

    if total <= 0.0 {
        return 0.0;
    }
    overlap / total
}

/// A scored box that can go through [`non_max_suppression`]
pub trait Scored {
    fn rect(&self) -> [f32; 4];
    fn score(&self) -> f32;
    /// Boxes only suppress boxes of the same class
    fn class_id(&self) -> usize {
        0
    }
}

/// Greedy NMS, result is sorted by descending score
pub fn non_max_suppression<T: Scored>(mut boxes: Vec<T>, iou_threshold: f32) -> Vec<T> {
    boxes.sort_by(|a, b| b.score().total_cmp(&a.score()));

    let mut keep: Vec<T> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = keep.iter().any(|kept| {
            kept.class_id() == candidate.class_id() && iou(kept.rect(), candidate.rect()) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }

    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBox([f32; 4], f32, usize);

    impl Scored for TestBox {
        fn rect(&self) -> [f32; 4] {
            self.0
        }
        fn score(&self) -> f32 {
            self.1
        }
        fn class_id(&self) -> usize {
            self.2
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[2.0, 0.0, 1.0], &[4.0, 0.0, 2.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 3.0], &[5.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = [0.0, 5.0, 12.0];
        l2_normalize(&mut v);
        assert!((v[1] - 5.0 / 13.0).abs() < 1e-6);
        assert!((v[2] - 12.0 / 13.0).abs() < 1e-6);

        let mut zero = [0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, [0.0, 0.0]);
    }

    #[test]
    fn test_softmax() {
        let probs = softmax(&[0.5, 2.5, -1.0]);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert_eq!(argmax(&probs).map(|(i, _)| i), Some(1));
        // large logits must not overflow
        assert!(softmax(&[1000.0, 1000.0]).iter().all(|p| (p - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[1.0, 5.0, 3.0, 2.0]), Some((1, 5.0)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(-0.456, 1), -0.5);
    }

    #[test]
    fn test_iou() {
        // overlap 2x4 = 8, areas 16 and 16
        let v = iou([0.0, 0.0, 4.0, 4.0], [2.0, 0.0, 6.0, 4.0]);
        assert!((v - 8.0 / 24.0).abs() < 1e-6);
        assert_eq!(iou([0.0, 0.0, 1.0, 1.0], [2.0, 2.0, 3.0, 3.0]), 0.0);
    }

    #[test]
    fn test_nms_is_class_aware() {
        let boxes = vec![
            TestBox([0.0, 0.0, 10.0, 10.0], 0.8, 0),
            TestBox([1.0, 1.0, 10.0, 10.0], 0.9, 0),
            TestBox([1.0, 1.0, 10.0, 10.0], 0.7, 1),
            TestBox([50.0, 50.0, 60.0, 60.0], 0.6, 0),
        ];

        let kept = non_max_suppression(boxes, 0.5);
        let scores: Vec<f32> = kept.iter().map(|b| b.1).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.6]);
    }
}
