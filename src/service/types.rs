//! Service layer types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// What `/process_frame` should do with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingType {
    ObjectDetection,
    DepthEstimation,
    ActivityDetection,
}

impl ProcessingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingType::ObjectDetection => "object_detection",
            ProcessingType::DepthEstimation => "depth_estimation",
            ProcessingType::ActivityDetection => "activity_detection",
        }
    }
}

impl FromStr for ProcessingType {
    type Err = UnknownProcessingType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "object_detection" => Ok(ProcessingType::ObjectDetection),
            "depth_estimation" => Ok(ProcessingType::DepthEstimation),
            "activity_detection" => Ok(ProcessingType::ActivityDetection),
            other => Err(UnknownProcessingType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProcessingType(pub String);

impl fmt::Display for UnknownProcessingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown processing type: {}", self.0)
    }
}

impl std::error::Error for UnknownProcessingType {}

/// Object with its back-projected camera-space position
#[derive(Debug, Clone, Serialize)]
pub struct LocatedObject {
    pub label: String,
    pub confidence: f32,
    /// `[x1, y1, x2, y2]`
    pub bbox: [i32; 4],
    /// `[X, Y, Z]`
    pub coordinates_3d: [f32; 3],
}

#[derive(Debug, Clone, Serialize)]
pub struct DepthFrame {
    /// Base64 JPEG heatmap
    pub processed_image: String,
    pub center_depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Activity {
    Running,
    Idle,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEstimate {
    pub predicted_activity: Activity,
    pub mean_pixel_intensity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmotionPrediction {
    pub emotion: String,
    pub confidence: f32,
    pub bbox: [i32; 4],
}

#[derive(Debug, Clone, Serialize)]
pub struct RecognizedFace {
    pub name: String,
    /// `[left, top, right, bottom]`
    pub bbox: [i32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgePrediction {
    pub age: i32,
    pub bbox: [i32; 4],
}

/// Result of registering a new reference face
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddFaceOutcome {
    Added { name: String },
    NoFace { name: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub version: String,
    pub models_loaded: HashMap<String, bool>,
    pub known_faces: usize,
}
