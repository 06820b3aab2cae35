//! Service configuration

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub camera: CameraConfig,
    pub depth: DepthConfig,
    pub recognition: RecognitionConfig,
    pub activity: ActivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes
    pub body_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
    /// Seconds a model may stay unused before it is unloaded, 0 keeps models resident
    pub model_idle_timeout: u64,
    /// Load every model at startup and fail fast if one is missing
    pub preload: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub object_detector: PathBuf,
    pub depth_estimator: PathBuf,
    pub face_detector: PathBuf,
    pub face_embedder: PathBuf,
    pub emotion: PathBuf,
    pub age: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub face_confidence_threshold: f32,
    /// Overrides the built-in COCO names when set
    pub class_names: Option<Vec<String>>,
}

/// Pinhole intrinsics used to back-project detections
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub focal_length: f32,
    pub cx: f32,
    pub cy: f32,
    /// Raw depth values are divided by this before projection
    pub depth_scale: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub reference_window: usize,
    pub target_depth: f32,
    pub min_depth: f32,
    pub max_depth: f32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub known_faces_dir: PathBuf,
    pub match_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub intensity_threshold: f32,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// `VISIONLAB_CONFIG` if set, otherwise `config.toml`
    pub fn default_path() -> String {
        std::env::var("VISIONLAB_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            models: ModelsConfig::default(),
            detection: DetectionConfig::default(),
            camera: CameraConfig::default(),
            depth: DepthConfig::default(),
            recognition: RecognitionConfig::default(),
            activity: ActivityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            body_limit: 50 * 1024 * 1024,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            model_idle_timeout: 0,
            preload: true,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            object_detector: PathBuf::from("models/yolov8n.onnx"),
            depth_estimator: PathBuf::from("models/midas_small.onnx"),
            face_detector: PathBuf::from("models/scrfd_10g_kps.onnx"),
            face_embedder: PathBuf::from("models/arcface_r100.onnx"),
            emotion: PathBuf::from("models/emotion_fer.onnx"),
            age: PathBuf::from("models/age_efficientnet_b0.onnx"),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            face_confidence_threshold: 0.5,
            class_names: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        // 640x480 webcam
        Self {
            focal_length: 500.0,
            cx: 320.0,
            cy: 240.0,
            depth_scale: 10.0,
        }
    }
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            reference_window: 30,
            target_depth: 70.0,
            min_depth: 10.0,
            max_depth: 150.0,
            jpeg_quality: 90,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            known_faces_dir: PathBuf::from("known_faces"),
            match_threshold: 0.45,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            intensity_threshold: 100.0,
        }
    }
}
