//! Axum REST API handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use image::DynamicImage;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::engine::preprocess::decode_image;
use crate::gallery::directory::sanitize_name;
use crate::gallery::FaceGallery;
use crate::service::{AddFaceOutcome, ProcessingType, VisionService};
use crate::utils::image::decode_base64_image;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState<G: FaceGallery> {
    pub service: Arc<VisionService<G>>,
}

/// Create the REST API router
pub fn create_rest_router<G: FaceGallery>(state: Arc<AppState<G>>, body_limit: usize) -> Router {
    Router::new()
        .route("/process_frame", post(process_frame_handler::<G>))
        .route("/detect", post(detect_handler::<G>))
        .route("/predict_emotion", post(emotion_handler::<G>))
        .route("/predict_face", post(recognize_handler::<G>))
        .route("/add_face", post(add_face_handler::<G>))
        .route("/predict_age", post(age_handler::<G>))
        .route("/faces", get(list_faces_handler::<G>))
        .route("/health", get(health_handler::<G>))
        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: &str, code: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message, code)))
}

fn internal(route: &str, code: &str, e: anyhow::Error) -> ApiError {
    error!("Error in {}: {:#}", route, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(&format!("{:#}", e), code)),
    )
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| bad_request(&rejection.body_text(), "INVALID_JSON"))
}

/// Image field of a single-image request
fn request_image(payload: Result<Json<ImageRequest>, JsonRejection>) -> Result<DynamicImage, ApiError> {
    let encoded = json_body(payload)?
        .image
        .filter(|s| !s.is_empty())
        .ok_or_else(|| bad_request("Missing image", "MISSING_IMAGE"))?;

    decode_base64_image(&encoded).map_err(|_| bad_request("Could not decode image.", "INVALID_IMAGE"))
}

/// Dispatch a frame to detection, depth or activity
async fn process_frame_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
    payload: Result<Json<ProcessFrameRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;

    let (encoded, processing_type) = match (request.image, request.processing_type) {
        (Some(image), Some(t)) if !image.is_empty() && !t.is_empty() => (image, t),
        _ => {
            return Err(bad_request(
                "Missing image or processing type",
                "MISSING_FIELDS",
            ))
        }
    };

    let image = decode_base64_image(&encoded).map_err(|_| bad_request("Invalid image", "INVALID_IMAGE"))?;

    let processing_type: ProcessingType = processing_type
        .parse()
        .map_err(|e: crate::service::UnknownProcessingType| bad_request(&e.to_string(), "UNKNOWN_TYPE"))?;

    let response = match processing_type {
        ProcessingType::ObjectDetection => {
            let detections = state
                .service
                .detect_objects(image)
                .await
                .map_err(|e| internal("/process_frame", "DETECTION_FAILED", e))?;
            Json(DataResponse {
                data: DetectionsData { detections },
            })
            .into_response()
        }
        ProcessingType::DepthEstimation => {
            let frame = state
                .service
                .estimate_depth(image)
                .await
                .map_err(|e| internal("/process_frame", "DEPTH_FAILED", e))?;
            Json(DepthResponse {
                processed_image: frame.processed_image,
                data: CenterDepth {
                    center_depth: frame.center_depth,
                },
            })
            .into_response()
        }
        ProcessingType::ActivityDetection => {
            let activity = state.service.detect_activity(&image);
            Json(DataResponse {
                data: ActivitiesData {
                    activities: vec![activity],
                },
            })
            .into_response()
        }
    };

    Ok(response)
}

/// Object detection with 3D positions
async fn detect_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<DataResponse<DetectionsData>>, ApiError> {
    let image = request_image(payload)?;

    let detections = state
        .service
        .detect_objects(image)
        .await
        .map_err(|e| internal("/detect", "DETECTION_FAILED", e))?;

    Ok(Json(DataResponse {
        data: DetectionsData { detections },
    }))
}

async fn emotion_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<EmotionsResponse>, ApiError> {
    let image = request_image(payload)?;

    let emotions = state
        .service
        .predict_emotions(image)
        .await
        .map_err(|e| internal("/predict_emotion", "EMOTION_FAILED", e))?;

    Ok(Json(EmotionsResponse { emotions }))
}

async fn recognize_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let image = request_image(payload)?;

    let faces = state
        .service
        .recognize_faces(image)
        .await
        .map_err(|e| internal("/predict_face", "RECOGNITION_FAILED", e))?;

    Ok(Json(RecognizeResponse { faces }))
}

async fn age_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<AgeResponse>, ApiError> {
    let image = request_image(payload)?;

    let age_predictions = state
        .service
        .predict_ages(image)
        .await
        .map_err(|e| internal("/predict_age", "AGE_FAILED", e))?;

    Ok(Json(AgeResponse { age_predictions }))
}

/// Register a reference face (multipart `name` + `image`)
async fn add_face_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
    mut multipart: Multipart,
) -> Result<Json<MessageResponse>, Response> {
    let rejected = |message: String| {
        (StatusCode::BAD_REQUEST, Json(MessageResponse::new(message))).into_response()
    };

    let mut name: Option<String> = None;
    let mut image_data: Option<Vec<u8>> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        bad_request(&e.body_text(), "MULTIPART_ERROR").into_response()
    })? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "name" => {
                name = Some(field.text().await.map_err(|e| {
                    bad_request(&e.body_text(), "READ_ERROR").into_response()
                })?)
            }
            "image" => {
                image_data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(&e.body_text(), "READ_ERROR").into_response())?
                        .to_vec(),
                )
            }
            _ => {}
        }
    }

    let (name, image_data) = match (name, image_data) {
        (Some(n), Some(d)) if !n.is_empty() && !d.is_empty() => (n, d),
        _ => return Err(rejected("Missing name or image".to_string())),
    };

    let safe_name = sanitize_name(&name).ok_or_else(|| rejected("Invalid name provided.".to_string()))?;

    let image = decode_image(&image_data)
        .map_err(|_| rejected("Image is not a valid RGB image.".to_string()))?;

    let outcome = state
        .service
        .add_face(&safe_name, image)
        .await
        .map_err(|e| internal("/add_face", "ADD_FACE_FAILED", e).into_response())?;

    match outcome {
        AddFaceOutcome::Added { name } => {
            Ok(Json(MessageResponse::new(format!("Face for {} added successfully!", name))))
        }
        AddFaceOutcome::NoFace { name } => {
            info!("No face found in upload for {}", name);
            Err(rejected(format!("No face found in the provided image for {}.", name)))
        }
    }
}

async fn list_faces_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
) -> Result<Json<ListFacesResponse>, ApiError> {
    let faces = state
        .service
        .gallery()
        .list()
        .await
        .map_err(|e| internal("/faces", "LIST_FAILED", e))?;

    let faces: Vec<KnownFaceDto> = faces
        .into_iter()
        .map(|f| KnownFaceDto {
            name: f.name,
            added_at: f.added_at,
        })
        .collect();

    Ok(Json(ListFacesResponse {
        total: faces.len(),
        faces,
    }))
}

async fn health_handler<G: FaceGallery>(
    State(state): State<Arc<AppState<G>>>,
) -> Result<Json<HealthResponse>, ApiError> {
    let health = state
        .service
        .health()
        .await
        .map_err(|e| internal("/health", "HEALTH_FAILED", e))?;

    Ok(Json(HealthResponse {
        healthy: health.healthy,
        version: health.version,
        models_loaded: health.models_loaded,
        known_faces: health.known_faces,
    }))
}
