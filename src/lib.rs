//! Vision Lab Service Library

pub mod api;
pub mod config;
pub mod engine;
pub mod gallery;
pub mod service;
pub mod utils;

pub use config::Config;
