//! ArcFace Face Embedder
//!
//! Maps an aligned 112x112 face to an L2-normalised identity vector.

use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::DynamicImage;

use super::face_detector::FaceBox;
use super::pool::{ModelPool, ModelType};
use super::preprocess::{align_face, crop_box, image_to_nchw, Normalization, EMBEDDER_INPUT_SIZE};
use super::tensor;
use crate::utils::math::l2_normalize;

/// Unit-length face embedding
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    pub vector: Vec<f32>,
}

impl FaceEmbedding {
    pub fn new(mut vector: Vec<f32>) -> Self {
        l2_normalize(&mut vector);
        Self { vector }
    }
}

pub struct FaceEmbedder {
    pool: Arc<ModelPool>,
}

impl FaceEmbedder {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    /// Embed an already aligned face
    pub fn embed(&self, aligned_face: &DynamicImage) -> Result<FaceEmbedding> {
        let (w, h) = EMBEDDER_INPUT_SIZE;
        let resized = aligned_face.resize_exact(w, h, FilterType::Lanczos3);
        let input = image_to_nchw(&resized, Normalization::InsightFace);

        let model = self.pool.get_model(ModelType::FaceEmbedder)?;
        let request = tensor::infer(&model, &input)?;
        let output = tensor::output(&request, 0)?;

        if output.data.is_empty() {
            anyhow::bail!("Embedder returned an empty vector");
        }
        Ok(FaceEmbedding::new(output.data))
    }

    /// Align on landmarks when the detector produced them, otherwise embed the
    /// plain box crop
    pub fn embed_detection(&self, image: &DynamicImage, face: &FaceBox) -> Result<FaceEmbedding> {
        let aligned = match face.landmarks {
            Some(landmarks) => align_face(image, &landmarks)?,
            None => crop_box(image, face.x1, face.y1, face.x2, face.y2)
                .ok_or_else(|| anyhow::anyhow!("Face box is empty"))?,
        };
        self.embed(&aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_is_normalized() {
        let embedding = FaceEmbedding::new(vec![3.0, 4.0]);
        assert!((embedding.vector[0] - 0.6).abs() < 1e-6);
        assert!((embedding.vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_zero_vector_is_kept() {
        let embedding = FaceEmbedding::new(vec![0.0, 0.0]);
        assert_eq!(embedding.vector, vec![0.0, 0.0]);
    }
}
