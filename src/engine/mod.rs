//! Inference engine module
//!
//! OpenVINO-backed models behind a lazily loading pool:
//! - YOLOv8 object detection and MiDaS depth
//! - SCRFD face detection and ArcFace embeddings
//! - emotion classification and age regression

pub mod age;
pub mod depth;
pub mod embedder;
pub mod emotion;
pub mod face_detector;
pub mod heatmap;
pub mod object_detector;
pub mod pool;
pub mod preprocess;
pub mod tensor;

pub use age::AgeEstimator;
pub use depth::{DepthEstimator, DepthMap};
pub use embedder::{FaceEmbedder, FaceEmbedding};
pub use emotion::{Emotion, EmotionClassifier};
pub use face_detector::{FaceBox, FaceDetector};
pub use object_detector::{ObjectDetection, ObjectDetector};
pub use pool::{ModelPool, ModelType};
