//! Known-face gallery
//!
//! Embeddings of reference faces, loaded from a directory of images at
//! startup and extended at runtime.

pub mod directory;
pub mod memory;
pub mod traits;

pub use memory::MemoryGallery;
pub use traits::{FaceGallery, GalleryMatch, KnownFace};
