//! In-memory gallery

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::traits::{FaceGallery, GalleryMatch, KnownFace};
use crate::utils::math::cosine_similarity;

#[derive(Default)]
pub struct MemoryGallery {
    faces: RwLock<Vec<KnownFace>>,
}

impl MemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FaceGallery for MemoryGallery {
    async fn add(&self, face: KnownFace) -> Result<()> {
        if face.embedding.is_empty() {
            anyhow::bail!("Refusing to add {} with an empty embedding", face.name);
        }
        self.faces.write().push(face);
        Ok(())
    }

    async fn best_match(&self, embedding: &[f32], threshold: f32) -> Result<Option<GalleryMatch>> {
        let faces = self.faces.read();

        let mut best: Option<(&KnownFace, f32)> = None;
        for face in faces.iter() {
            let similarity = cosine_similarity(&face.embedding, embedding);
            if !similarity.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, s)| similarity > s) {
                best = Some((face, similarity));
            }
        }

        Ok(best
            .filter(|(_, similarity)| *similarity >= threshold)
            .map(|(face, similarity)| GalleryMatch {
                name: face.name.clone(),
                similarity,
            }))
    }

    async fn list(&self) -> Result<Vec<KnownFace>> {
        Ok(self.faces.read().clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.faces.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(name: &str, embedding: Vec<f32>) -> KnownFace {
        KnownFace::new(name, embedding)
    }

    #[tokio::test]
    async fn test_empty_gallery_has_no_match() {
        let gallery = MemoryGallery::new();
        assert_eq!(gallery.count().await.unwrap(), 0);
        assert!(gallery.best_match(&[1.0, 0.0], 0.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_best_match_picks_closest() {
        let gallery = MemoryGallery::new();
        gallery.add(face("alice", vec![1.0, 0.0, 0.0])).await.unwrap();
        gallery.add(face("bob", vec![0.0, 1.0, 0.0])).await.unwrap();

        let found = gallery.best_match(&[0.1, 0.9, 0.0], 0.45).await.unwrap().unwrap();
        assert_eq!(found.name, "bob");
        assert!(found.similarity > 0.9);
    }

    #[tokio::test]
    async fn test_threshold_rejects_weak_match() {
        let gallery = MemoryGallery::new();
        gallery.add(face("alice", vec![1.0, 0.0])).await.unwrap();

        // cos(60deg) = 0.5
        let query = [0.5, 0.75f32.sqrt()];
        assert!(gallery.best_match(&query, 0.45).await.unwrap().is_some());
        assert!(gallery.best_match(&query, 0.6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_entry_wins_tie() {
        let gallery = MemoryGallery::new();
        gallery.add(face("first", vec![1.0, 0.0])).await.unwrap();
        gallery.add(face("second", vec![1.0, 0.0])).await.unwrap();

        let found = gallery.best_match(&[1.0, 0.0], 0.5).await.unwrap().unwrap();
        assert_eq!(found.name, "first");
    }

    #[tokio::test]
    async fn test_non_finite_entry_does_not_mask_later_match() {
        let gallery = MemoryGallery::new();
        gallery.add(face("broken", vec![f32::NAN, 0.0])).await.unwrap();
        gallery.add(face("carol", vec![1.0, 0.0])).await.unwrap();

        let found = gallery.best_match(&[1.0, 0.0], 0.45).await.unwrap().unwrap();
        assert_eq!(found.name, "carol");
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let gallery = MemoryGallery::new();
        gallery.add(face("b", vec![1.0])).await.unwrap();
        gallery.add(face("a", vec![1.0])).await.unwrap();
        assert!(gallery.add(face("empty", vec![])).await.is_err());

        let names: Vec<String> = gallery.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
