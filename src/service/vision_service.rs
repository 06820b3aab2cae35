//! Vision Service - Core business logic
//!
//! Runs the models for each request on the blocking pool and shapes their
//! output into response records.

use std::sync::Arc;

use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::depth::Interpolation;
use crate::engine::heatmap::{self, ReferenceWindow};
use crate::engine::preprocess::{crop_box, decode_image};
use crate::engine::{
    AgeEstimator, DepthEstimator, EmotionClassifier, FaceBox, FaceDetector, FaceEmbedder, FaceEmbedding,
    ModelPool, ObjectDetector,
};
use crate::gallery::directory::{face_name, list_face_files, save_face_image};
use crate::gallery::{FaceGallery, KnownFace};
use crate::utils::camera::locate_box;
use crate::utils::image::{encode_base64, encode_jpeg, mean_intensity};
use crate::utils::math::round_to;

use super::types::*;

/// Model wrappers, shared with blocking tasks
struct Engines {
    objects: ObjectDetector,
    depth: DepthEstimator,
    faces: FaceDetector,
    embedder: FaceEmbedder,
    emotion: EmotionClassifier,
    age: AgeEstimator,
}

pub struct VisionService<G: FaceGallery> {
    pool: Arc<ModelPool>,
    engines: Arc<Engines>,
    gallery: Arc<G>,
    reference: Arc<ReferenceWindow>,
    config: Arc<Config>,
}

impl<G: FaceGallery> VisionService<G> {
    pub fn new(pool: Arc<ModelPool>, gallery: Arc<G>, config: Config) -> Self {
        let engines = Engines {
            objects: ObjectDetector::new(
                pool.clone(),
                config.detection.confidence_threshold,
                config.detection.iou_threshold,
                config.detection.class_names.clone(),
            ),
            depth: DepthEstimator::new(pool.clone()),
            faces: FaceDetector::new(pool.clone(), config.detection.face_confidence_threshold),
            embedder: FaceEmbedder::new(pool.clone()),
            emotion: EmotionClassifier::new(pool.clone()),
            age: AgeEstimator::new(pool.clone()),
        };

        Self {
            pool,
            engines: Arc::new(engines),
            gallery,
            reference: Arc::new(ReferenceWindow::new(config.depth.reference_window)),
            config: Arc::new(config),
        }
    }

    pub fn gallery(&self) -> &Arc<G> {
        &self.gallery
    }

    /// Detect objects and place each one in camera space
    pub async fn detect_objects(&self, image: DynamicImage) -> Result<Vec<LocatedObject>> {
        let engines = self.engines.clone();
        let camera = self.config.camera;

        tokio::task::spawn_blocking(move || {
            let (w, h) = image.dimensions();
            let detections = engines.objects.detect(&image)?;
            let depth = engines
                .depth
                .estimate(&image)?
                .resize(w, h, Interpolation::Bilinear);

            let located = detections
                .into_iter()
                .filter_map(|det| {
                    let bbox = [det.x1 as i32, det.y1 as i32, det.x2 as i32, det.y2 as i32];
                    let coordinates_3d = locate_box(bbox, &depth, &camera)?;
                    Some(LocatedObject {
                        label: det.label,
                        confidence: det.confidence,
                        bbox,
                        coordinates_3d,
                    })
                })
                .collect::<Vec<_>>();

            Ok::<_, anyhow::Error>(located)
        })
        .await?
    }

    /// Depth heatmap of the frame plus its centre depth
    pub async fn estimate_depth(&self, image: DynamicImage) -> Result<DepthFrame> {
        let engines = self.engines.clone();
        let reference = self.reference.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let (w, h) = image.dimensions();
            let depth = engines
                .depth
                .estimate(&image)?
                .resize(w, h, Interpolation::Bicubic);

            let center_depth = depth.center();
            let mean_ref = reference.push(center_depth);

            let colored = heatmap::render(&depth, mean_ref, &config.depth);
            let jpeg = encode_jpeg(&colored, config.depth.jpeg_quality)?;

            Ok::<_, anyhow::Error>(DepthFrame {
                processed_image: encode_base64(&jpeg),
                center_depth: round_to(center_depth, 1),
            })
        })
        .await?
    }

    /// Brightness heuristic, no model involved
    pub fn detect_activity(&self, image: &DynamicImage) -> ActivityEstimate {
        let intensity = mean_intensity(image);
        let predicted_activity = if intensity > self.config.activity.intensity_threshold {
            Activity::Running
        } else {
            Activity::Idle
        };

        ActivityEstimate {
            predicted_activity,
            mean_pixel_intensity: intensity,
        }
    }

    pub async fn predict_emotions(&self, image: DynamicImage) -> Result<Vec<EmotionPrediction>> {
        let engines = self.engines.clone();

        tokio::task::spawn_blocking(move || {
            let faces = engines.faces.detect(&image)?;
            let mut predictions = Vec::with_capacity(faces.len());

            for face in &faces {
                let Some(crop) = crop_box(&image, face.x1, face.y1, face.x2, face.y2) else {
                    continue;
                };
                let (emotion, confidence) = engines.emotion.classify(&crop)?;
                predictions.push(EmotionPrediction {
                    emotion: emotion.as_str().to_string(),
                    confidence: round_to(confidence, 2),
                    bbox: face.ltrb(),
                });
            }

            Ok::<_, anyhow::Error>(predictions)
        })
        .await?
    }

    pub async fn predict_ages(&self, image: DynamicImage) -> Result<Vec<AgePrediction>> {
        let engines = self.engines.clone();

        tokio::task::spawn_blocking(move || {
            let faces = engines.faces.detect(&image)?;
            let mut predictions = Vec::with_capacity(faces.len());

            for face in &faces {
                let Some(crop) = crop_box(&image, face.x1, face.y1, face.x2, face.y2) else {
                    continue;
                };
                predictions.push(AgePrediction {
                    age: engines.age.estimate(&crop)?,
                    bbox: face.ltrb(),
                });
            }

            Ok::<_, anyhow::Error>(predictions)
        })
        .await?
    }

    /// Name every face in the frame against the gallery
    pub async fn recognize_faces(&self, image: DynamicImage) -> Result<Vec<RecognizedFace>> {
        if self.gallery.count().await? == 0 {
            warn!("No known faces loaded, every face will be Unknown");
        }

        let engines = self.engines.clone();
        let embedded = tokio::task::spawn_blocking(move || {
            let faces = engines.faces.detect(&image)?;
            Ok::<_, anyhow::Error>(embed_each(faces, |face| {
                engines.embedder.embed_detection(&image, face)
            }))
        })
        .await??;

        let threshold = self.config.recognition.match_threshold;
        let mut recognized = Vec::with_capacity(embedded.len());
        for (face, embedding) in embedded {
            let matched = self.gallery.best_match(&embedding, threshold).await?;
            recognized.push(match matched {
                Some(m) => RecognizedFace {
                    name: m.name,
                    bbox: face.ltrb(),
                    similarity: Some(round_to(m.similarity, 3)),
                },
                None => RecognizedFace {
                    name: "Unknown".to_string(),
                    bbox: face.ltrb(),
                    similarity: None,
                },
            });
        }

        Ok(recognized)
    }

    /// Save the image under `safe_name` and add its first face to the gallery.
    /// The file is removed again if no face is found or embedding fails.
    pub async fn add_face(&self, safe_name: &str, image: DynamicImage) -> Result<AddFaceOutcome> {
        let engines = self.engines.clone();
        let dir = self.config.recognition.known_faces_dir.clone();
        let name = safe_name.to_string();

        let embedding = tokio::task::spawn_blocking(move || {
            let path = save_face_image(&dir, &name, &image)?;
            match first_face_embedding(&engines, &image) {
                Ok(Some(embedding)) => Ok::<_, anyhow::Error>(Some(embedding)),
                Ok(None) => {
                    remove_quietly(&path);
                    Ok(None)
                }
                Err(e) => {
                    remove_quietly(&path);
                    Err(e)
                }
            }
        })
        .await??;

        let Some(embedding) = embedding else {
            return Ok(AddFaceOutcome::NoFace {
                name: safe_name.to_string(),
            });
        };

        self.gallery
            .add(KnownFace::new(safe_name, embedding))
            .await?;
        info!("Dynamically added face for: {}", safe_name);

        Ok(AddFaceOutcome::Added {
            name: safe_name.to_string(),
        })
    }

    /// Embed every reference image in the known-faces directory. Unreadable
    /// files and files without a face are skipped.
    pub async fn load_known_faces(&self) -> Result<usize> {
        let engines = self.engines.clone();
        let dir = self.config.recognition.known_faces_dir.clone();
        info!("Loading known faces from {}", dir.display());

        let loaded: Vec<(String, Vec<f32>)> = tokio::task::spawn_blocking(move || {
            let mut loaded = Vec::new();
            for path in list_face_files(&dir)? {
                let Some(name) = face_name(&path) else { continue };

                let image = match std::fs::read(&path)
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| decode_image(&bytes))
                {
                    Ok(image) => image,
                    Err(e) => {
                        error!("Error processing image {}: {:#}", path.display(), e);
                        continue;
                    }
                };

                match first_face_embedding(&engines, &image) {
                    Ok(Some(embedding)) => {
                        info!("Loaded face: {}", path.display());
                        loaded.push((name, embedding));
                    }
                    Ok(None) => info!("No face found in {}", path.display()),
                    Err(e) => error!("Error processing image {}: {:#}", path.display(), e),
                }
            }
            Ok::<_, anyhow::Error>(loaded)
        })
        .await??;

        let count = loaded.len();
        for (name, embedding) in loaded {
            self.gallery.add(KnownFace::new(name, embedding)).await?;
        }

        info!("Finished loading {} known faces", count);
        Ok(count)
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let models_loaded = self
            .pool
            .status()
            .into_iter()
            .map(|(model, loaded)| (model.as_str().to_string(), loaded))
            .collect();

        Ok(HealthStatus {
            healthy: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            models_loaded,
            known_faces: self.gallery.count().await?,
        })
    }
}

/// Embed each detected face, skipping faces that cannot be embedded
fn embed_each<F>(faces: Vec<FaceBox>, mut embed: F) -> Vec<(FaceBox, Vec<f32>)>
where
    F: FnMut(&FaceBox) -> Result<FaceEmbedding>,
{
    faces
        .into_iter()
        .filter_map(|face| match embed(&face) {
            Ok(embedding) => Some((face, embedding.vector)),
            Err(e) => {
                warn!("Skipping face at {:?}: {:#}", face.ltrb(), e);
                None
            }
        })
        .collect()
}

fn first_face_embedding(engines: &Engines, image: &DynamicImage) -> Result<Option<Vec<f32>>> {
    let faces = engines.faces.detect(image)?;
    let Some(face) = faces.first() else {
        return Ok(None);
    };
    let embedding = engines
        .embedder
        .embed_detection(image, face)
        .context("Failed to embed face")?;
    Ok(Some(embedding.vector))
}

fn remove_quietly(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::MemoryGallery;
    use image::{GrayImage, Luma};

    fn service() -> VisionService<MemoryGallery> {
        let mut config = Config::default();
        config.inference.preload = false;
        let pool = Arc::new(ModelPool::new(&config.inference, &config.models));
        VisionService::new(pool, Arc::new(MemoryGallery::new()), config)
    }

    fn gray(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([value])))
    }

    #[tokio::test]
    async fn test_activity_threshold() {
        let service = service();

        let bright = service.detect_activity(&gray(180));
        assert_eq!(bright.predicted_activity, Activity::Running);
        assert!((bright.mean_pixel_intensity - 180.0).abs() < 1e-6);

        // exactly at the threshold is still idle
        assert_eq!(service.detect_activity(&gray(100)).predicted_activity, Activity::Idle);
        assert_eq!(service.detect_activity(&gray(20)).predicted_activity, Activity::Idle);
    }

    fn face_at(x1: f32, x2: f32) -> FaceBox {
        FaceBox {
            x1,
            y1: 10.0,
            x2,
            y2: 60.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_unembeddable_face_is_skipped() {
        let faces = vec![face_at(10.0, 60.0), face_at(100.0, 100.0), face_at(200.0, 250.0)];

        let embedded = embed_each(faces, |face| {
            if face.x2 <= face.x1 {
                anyhow::bail!("Face box is empty");
            }
            Ok(FaceEmbedding::new(vec![face.x1, 1.0]))
        });

        let lefts: Vec<i32> = embedded.iter().map(|(face, _)| face.ltrb()[0]).collect();
        assert_eq!(lefts, vec![10, 200]);
        assert_eq!(embedded[0].1.len(), 2);
    }

    #[test]
    fn test_all_faces_failing_gives_empty_result() {
        let embedded = embed_each(vec![face_at(5.0, 5.0)], |_| anyhow::bail!("Degenerate landmarks"));
        assert!(embedded.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_every_model() {
        let service = service();
        let health = service.health().await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.known_faces, 0);
        assert_eq!(health.models_loaded.len(), 6);
        assert_eq!(health.models_loaded.get("depth_estimator"), Some(&false));
    }
}
