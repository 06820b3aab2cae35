//! Facial emotion classifier
//!
//! FER-2013 style network: 48x48 greyscale input, 7 class scores.

use std::sync::Arc;

use anyhow::Result;
use image::imageops::FilterType;
use image::DynamicImage;

use super::pool::{ModelPool, ModelType};
use super::preprocess::{gray_to_nhwc, EMOTION_INPUT_SIZE};
use super::tensor;
use crate::utils::math::{argmax, softmax};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Neutral,
    Sad,
    Surprise,
}

impl Emotion {
    /// Model output order
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "Angry",
            Emotion::Disgust => "Disgust",
            Emotion::Fear => "Fear",
            Emotion::Happy => "Happy",
            Emotion::Neutral => "Neutral",
            Emotion::Sad => "Sad",
            Emotion::Surprise => "Surprise",
        }
    }

    pub fn from_index(idx: usize) -> Option<Self> {
        Self::ALL.get(idx).copied()
    }
}

pub struct EmotionClassifier {
    pool: Arc<ModelPool>,
}

impl EmotionClassifier {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    /// Classify a cropped face
    pub fn classify(&self, face: &DynamicImage) -> Result<(Emotion, f32)> {
        let (w, h) = EMOTION_INPUT_SIZE;
        let resized = face.resize_exact(w, h, FilterType::Triangle);
        let input = gray_to_nhwc(&resized);

        let model = self.pool.get_model(ModelType::Emotion)?;
        let request = tensor::infer(&model, &input)?;
        let output = tensor::output(&request, 0)?;

        pick_emotion(&output.data)
    }
}

/// Arg-max over the class scores, applying softmax when the model emits logits
pub fn pick_emotion(scores: &[f32]) -> Result<(Emotion, f32)> {
    if scores.len() != Emotion::ALL.len() {
        anyhow::bail!(
            "Emotion model returned {} scores, expected {}",
            scores.len(),
            Emotion::ALL.len()
        );
    }

    let probs = if is_distribution(scores) {
        scores.to_vec()
    } else {
        softmax(scores)
    };

    let (idx, confidence) =
        argmax(&probs).ok_or_else(|| anyhow::anyhow!("Emotion scores are empty"))?;
    let emotion = Emotion::from_index(idx).ok_or_else(|| anyhow::anyhow!("No emotion at index {}", idx))?;
    Ok((emotion, confidence))
}

fn is_distribution(scores: &[f32]) -> bool {
    let sum: f32 = scores.iter().sum();
    scores.iter().all(|&s| (0.0..=1.0).contains(&s)) && (sum - 1.0).abs() < 1e-3
}
