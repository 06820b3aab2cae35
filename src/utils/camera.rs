//! Pinhole camera back-projection

use crate::config::CameraConfig;
use crate::engine::depth::DepthMap;

use super::math::round_to;

/// Camera-space point for pixel `(u, v)` at depth `z`
pub fn back_project(u: f32, v: f32, z: f32, camera: &CameraConfig) -> [f32; 3] {
    let x = (u - camera.cx) * z / camera.focal_length;
    let y = (v - camera.cy) * z / camera.focal_length;
    [x, y, z]
}

/// Pixel at the centre of an integer box
pub fn box_center(bbox: [i32; 4]) -> (i64, i64) {
    let [x1, y1, x2, y2] = bbox.map(i64::from);
    // truncate toward zero
    ((x1 + x2) / 2, (y1 + y2) / 2)
}

/// 3D position of a box centre, rounded to 2 decimals.
///
/// `depth` must already be at image resolution. Returns `None` when the
/// centre falls outside the map or the scaled depth is not positive.
pub fn locate_box(bbox: [i32; 4], depth: &DepthMap, camera: &CameraConfig) -> Option<[f32; 3]> {
    let (u, v) = box_center(bbox);
    let raw = depth.sample(u, v)?;

    let z = raw / camera.depth_scale;
    if !(z > 0.0) {
        return None;
    }

    let point = back_project(u as f32, v as f32, z, camera);
    Some(point.map(|c| round_to(c, 2)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraConfig {
        CameraConfig::default()
    }

    #[test]
    fn test_principal_point_maps_to_axis() {
        let [x, y, z] = back_project(320.0, 240.0, 3.0, &camera());
        assert_eq!((x, y, z), (0.0, 0.0, 3.0));
    }

    #[test]
    fn test_back_project_offsets() {
        // 100px right and 50px up at Z = 5 with f = 500
        let [x, y, _] = back_project(420.0, 190.0, 5.0, &camera());
        assert!((x - 1.0).abs() < 1e-6);
        assert!((y + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_box_center_truncates() {
        assert_eq!(box_center([10, 20, 15, 25]), (12, 22));
    }

    #[test]
    fn test_locate_box() {
        let mut data = vec![0.0; 640 * 480];
        data[200 * 640 + 400] = 25.0;
        let depth = DepthMap::new(640, 480, data).unwrap();

        let point = locate_box([390, 190, 410, 210], &depth, &camera()).unwrap();
        // Z = 25 / 10, X = 80 * 2.5 / 500, Y = -40 * 2.5 / 500
        assert_eq!(point, [0.4, -0.2, 2.5]);
    }

    #[test]
    fn test_locate_box_skips_non_positive_depth() {
        let depth = DepthMap::new(4, 4, vec![0.0; 16]).unwrap();
        assert_eq!(locate_box([0, 0, 2, 2], &depth, &camera()), None);

        let depth = DepthMap::new(4, 4, vec![-3.0; 16]).unwrap();
        assert_eq!(locate_box([0, 0, 2, 2], &depth, &camera()), None);
    }

    #[test]
    fn test_locate_box_skips_out_of_bounds() {
        let depth = DepthMap::new(4, 4, vec![50.0; 16]).unwrap();
        assert_eq!(locate_box([10, 10, 20, 20], &depth, &camera()), None);
        assert!(locate_box([0, 0, 2, 2], &depth, &camera()).is_some());
    }
}
