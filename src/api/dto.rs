//! REST API request/response data transfer objects

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::service::{
    ActivityEstimate, AgePrediction, EmotionPrediction, LocatedObject, RecognizedFace,
};

/// JSON body carrying one base64 image
#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub image: Option<String>,
}

/// `/process_frame` body
#[derive(Debug, Deserialize)]
pub struct ProcessFrameRequest {
    pub image: Option<String>,
    #[serde(rename = "type")]
    pub processing_type: Option<String>,
}

/// `{"data": ...}` envelope
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct DetectionsData {
    pub detections: Vec<LocatedObject>,
}

#[derive(Debug, Serialize)]
pub struct ActivitiesData {
    pub activities: Vec<ActivityEstimate>,
}

#[derive(Debug, Serialize)]
pub struct DepthResponse {
    pub processed_image: String,
    pub data: CenterDepth,
}

#[derive(Debug, Serialize)]
pub struct CenterDepth {
    pub center_depth: f32,
}

#[derive(Debug, Serialize)]
pub struct EmotionsResponse {
    pub emotions: Vec<EmotionPrediction>,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub faces: Vec<RecognizedFace>,
}

#[derive(Debug, Serialize)]
pub struct AgeResponse {
    pub age_predictions: Vec<AgePrediction>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
    pub models_loaded: HashMap<String, bool>,
    pub known_faces: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
        }
    }
}

/// List faces response
#[derive(Debug, Serialize)]
pub struct ListFacesResponse {
    pub faces: Vec<KnownFaceDto>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct KnownFaceDto {
    pub name: String,
    pub added_at: DateTime<Utc>,
}
