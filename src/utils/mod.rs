//! Shared helpers

pub mod camera;
pub mod colormap;
pub mod image;
pub mod math;
