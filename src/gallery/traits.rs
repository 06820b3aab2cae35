//! Gallery abstraction

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A reference face
#[derive(Debug, Clone)]
pub struct KnownFace {
    /// File stem of the reference image
    pub name: String,
    /// L2-normalised embedding
    pub embedding: Vec<f32>,
    pub added_at: DateTime<Utc>,
}

impl KnownFace {
    pub fn new(name: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            embedding,
            added_at: Utc::now(),
        }
    }
}

/// Closest known face for a query embedding
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryMatch {
    pub name: String,
    pub similarity: f32,
}

/// Gallery trait
/// Implementations must be thread-safe and async-compatible
#[async_trait]
pub trait FaceGallery: Send + Sync + 'static {
    async fn add(&self, face: KnownFace) -> Result<()>;

    /// Most similar face whose similarity is at least `threshold`.
    /// Earlier entries win ties.
    async fn best_match(&self, embedding: &[f32], threshold: f32) -> Result<Option<GalleryMatch>>;

    /// All faces in insertion order
    async fn list(&self) -> Result<Vec<KnownFace>>;

    async fn count(&self) -> Result<usize>;
}
