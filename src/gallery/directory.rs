//! Known-faces directory on disk

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::utils::image::encode_jpeg;

const SAVE_QUALITY: u8 = 95;

/// Keep alphanumerics, space, `.` and `_`, then drop trailing whitespace.
/// `None` when nothing usable is left.
pub fn sanitize_name(name: &str) -> Option<String> {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_'))
        .collect();
    let kept = kept.trim_end();
    (!kept.is_empty()).then(|| kept.to_string())
}

/// `.jpg`, `.jpeg` or `.png`, in any case
pub fn is_known_face_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Gallery name for a reference image
pub fn face_name(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Create the directory if needed and list its face images, sorted by name
pub fn list_face_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && is_known_face_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Path a sanitised name is saved under
pub fn face_path(dir: &Path, safe_name: &str) -> PathBuf {
    dir.join(format!("{}.jpg", safe_name))
}

/// Write `image` as `<dir>/<safe_name>.jpg`, replacing any previous file
pub fn save_face_image(dir: &Path, safe_name: &str, image: &DynamicImage) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = face_path(dir, safe_name);
    let jpeg = encode_jpeg(&image.to_rgb8(), SAVE_QUALITY)?;
    fs::write(&path, jpeg).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
