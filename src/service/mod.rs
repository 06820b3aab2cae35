//! Service layer module

pub mod types;
pub mod vision_service;

pub use types::*;
pub use vision_service::VisionService;
