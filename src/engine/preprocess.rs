//! Image preprocessing shared by all models

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb};
use anyhow::{Context, Result};
use ndarray::Array4;

/// Letterbox size of the YOLOv8 detector
pub const OBJECT_DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// Letterbox size of the SCRFD face detector
pub const FACE_DETECTOR_INPUT_SIZE: (u32, u32) = (640, 640);

/// MiDaS small input
pub const DEPTH_INPUT_SIZE: (u32, u32) = (256, 256);

/// Aligned face size for ArcFace
pub const EMBEDDER_INPUT_SIZE: (u32, u32) = (112, 112);

/// Greyscale face size for the FER emotion model
pub const EMOTION_INPUT_SIZE: (u32, u32) = (48, 48);

/// EfficientNet-B0 input for the age regressor
pub const AGE_INPUT_SIZE: (u32, u32) = (224, 224);

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Pixel normalisation applied when building an NCHW tensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Normalization {
    /// RGB scaled to [0, 1]
    Unit,
    /// RGB scaled to [0, 1] then standardised with ImageNet statistics
    ImageNet,
    /// BGR mapped to roughly [-1, 1] as `(x - 127.5) / 128`
    InsightFace,
}

/// Convert an image to a 1x3xHxW tensor
pub fn image_to_nchw(image: &DynamicImage, norm: Normalization) -> Array4<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0.map(|v| v as f32);

        let channels = match norm {
            Normalization::Unit => [r / 255.0, g / 255.0, b / 255.0],
            Normalization::ImageNet => [
                (r / 255.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0],
                (g / 255.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1],
                (b / 255.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2],
            ],
            // InsightFace uses BGR order (swapRB in cv2.dnn.blobFromImage)
            Normalization::InsightFace => [
                (b - 127.5) / 128.0,
                (g - 127.5) / 128.0,
                (r - 127.5) / 128.0,
            ],
        };

        for (c, value) in channels.into_iter().enumerate() {
            tensor[[0, c, y, x]] = value;
        }
    }

    tensor
}

/// 1xHxWx1 greyscale tensor scaled to [0, 1]
pub fn gray_to_nhwc(image: &DynamicImage) -> Array4<f32> {
    let gray = image.to_luma8();
    let (width, height) = gray.dimensions();
    Array4::from_shape_fn((1, height as usize, width as usize, 1), |(_, y, x, _)| {
        gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
    })
}

/// Resize keeping aspect ratio and centre on a `fill` canvas
pub fn letterbox(image: &DynamicImage, target: (u32, u32), fill: u8, filter: FilterType) -> DynamicImage {
    let (target_w, target_h) = target;
    let info = ResizeInfo::new(image.dimensions(), target);

    let new_w = ((info.original_width as f32 * info.scale) as u32).clamp(1, target_w);
    let new_h = ((info.original_height as f32 * info.scale) as u32).clamp(1, target_h);

    let resized = image.resize_exact(new_w, new_h, filter).to_rgb8();
    let mut padded = ImageBuffer::from_pixel(target_w, target_h, Rgb([fill, fill, fill]));
    image::imageops::replace(&mut padded, &resized, info.offset_x as i64, info.offset_y as i64);

    DynamicImage::ImageRgb8(padded)
}

/// Mapping between letterboxed model space and original image space
#[derive(Debug, Clone, Copy)]
pub struct ResizeInfo {
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl ResizeInfo {
    pub fn new(original: (u32, u32), target: (u32, u32)) -> Self {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;

        let scale = f32::min(
            target_w as f32 / orig_w.max(1) as f32,
            target_h as f32 / orig_h.max(1) as f32,
        );

        let new_w = ((orig_w as f32 * scale) as u32).min(target_w);
        let new_h = ((orig_h as f32 * scale) as u32).min(target_h);

        Self {
            scale,
            offset_x: (target_w - new_w) / 2,
            offset_y: (target_h - new_h) / 2,
            original_width: orig_w,
            original_height: orig_h,
        }
    }

    /// Convert model coordinates back to original image space
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.offset_x as f32) / self.scale;
        let y = (y - self.offset_y as f32) / self.scale;
        (x, y)
    }

    /// Convert and clamp to the original image bounds
    pub fn to_original_clamped(&self, x: f32, y: f32) -> (f32, f32) {
        let (x, y) = self.to_original(x, y);
        (
            x.clamp(0.0, self.original_width as f32),
            y.clamp(0.0, self.original_height as f32),
        )
    }
}

/// Crop a pixel box out of the image, `None` if it is empty after clamping
pub fn crop_box(image: &DynamicImage, x1: f32, y1: f32, x2: f32, y2: f32) -> Option<DynamicImage> {
    let (img_w, img_h) = image.dimensions();

    let x1 = x1.max(0.0) as u32;
    let y1 = y1.max(0.0) as u32;
    let x2 = (x2.max(0.0) as u32).min(img_w);
    let y2 = (y2.max(0.0) as u32).min(img_h);

    let w = x2.saturating_sub(x1);
    let h = y2.saturating_sub(y1);
    if w == 0 || h == 0 {
        return None;
    }

    Some(image.crop_imm(x1, y1, w, h))
}

/// Align face using 5-point landmarks onto the standard 112x112 template
pub fn align_face(image: &DynamicImage, landmarks: &[(f32, f32); 5]) -> Result<DynamicImage> {
    // InsightFace ArcFace template
    let dst_points: [(f32, f32); 5] = [
        (38.2946, 51.6963),
        (73.5318, 51.5014),
        (56.0252, 71.7366),
        (41.5493, 92.3655),
        (70.7299, 92.2041),
    ];

    let transform = estimate_similarity_transform(landmarks, &dst_points)?;
    let (w, h) = EMBEDDER_INPUT_SIZE;

    Ok(apply_affine_transform(image, &transform, w, h))
}

/// Umeyama least-squares similarity transform from `src` to `dst`
fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Result<[[f32; 3]; 2]> {
    let n = src.len() as f32;

    let (src_cx, src_cy) = src.iter().fold((0.0, 0.0), |(x, y), p| (x + p.0, y + p.1));
    let (dst_cx, dst_cy) = dst.iter().fold((0.0, 0.0), |(x, y), p| (x + p.0, y + p.1));
    let (src_cx, src_cy) = (src_cx / n, src_cy / n);
    let (dst_cx, dst_cy) = (dst_cx / n, dst_cy / n);

    let mut var_src = 0.0f32;
    let (mut a, mut b, mut c, mut d) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);

    for (s, t) in src.iter().zip(dst.iter()) {
        let sx = s.0 - src_cx;
        let sy = s.1 - src_cy;
        let dx = t.0 - dst_cx;
        let dy = t.1 - dst_cy;

        var_src += sx * sx + sy * sy;
        a += dx * sx;
        b += dx * sy;
        c += dy * sx;
        d += dy * sy;
    }

    var_src /= n;
    if var_src <= 1e-10 {
        anyhow::bail!("Degenerate landmarks, cannot align face");
    }
    let (a, b, c, d) = (a / n, b / n, c / n, d / n);

    // closed-form 2x2 SVD
    let e = (a + d) / 2.0;
    let f = (a - d) / 2.0;
    let g = (c + b) / 2.0;
    let h = (c - b) / 2.0;

    let q = (e * e + h * h).sqrt();
    let r = (f * f + g * g).sqrt();
    let s1 = q + r;
    let s2 = (q - r).abs();

    let a1 = h.atan2(e);
    let a2 = g.atan2(f);
    let theta = (a2 - a1) / 2.0;
    let phi = (a2 + a1) / 2.0;

    let det_sigma = a * d - b * c;

    // diag(1, sign(det)) keeps R a proper rotation
    let (r00, r01, r10, r11, trace_sd) = if det_sigma >= 0.0 {
        let angle = phi - theta;
        (angle.cos(), -angle.sin(), angle.sin(), angle.cos(), s1 + s2)
    } else {
        let angle = phi + theta;
        (angle.cos(), angle.sin(), angle.sin(), -angle.cos(), s1 - s2)
    };

    let scale = trace_sd / var_src;

    let tx = dst_cx - scale * (r00 * src_cx + r01 * src_cy);
    let ty = dst_cy - scale * (r10 * src_cx + r11 * src_cy);

    Ok([
        [scale * r00, scale * r01, tx],
        [scale * r10, scale * r11, ty],
    ])
}

/// Warp with backward mapping and bilinear sampling
fn apply_affine_transform(
    image: &DynamicImage,
    transform: &[[f32; 3]; 2],
    out_width: u32,
    out_height: u32,
) -> DynamicImage {
    let rgb = image.to_rgb8();
    let mut output = ImageBuffer::from_pixel(out_width, out_height, Rgb([0u8, 0, 0]));

    let det = transform[0][0] * transform[1][1] - transform[0][1] * transform[1][0];
    if det.abs() < f32::EPSILON || rgb.width() < 2 || rgb.height() < 2 {
        return DynamicImage::ImageRgb8(output);
    }
    let inv = [
        [transform[1][1] / det, -transform[0][1] / det],
        [-transform[1][0] / det, transform[0][0] / det],
    ];

    let max_x = (rgb.width() - 1) as f32;
    let max_y = (rgb.height() - 1) as f32;

    for (x, y, out) in output.enumerate_pixels_mut() {
        let dx = x as f32 - transform[0][2];
        let dy = y as f32 - transform[1][2];

        let src_x = inv[0][0] * dx + inv[0][1] * dy;
        let src_y = inv[1][0] * dx + inv[1][1] * dy;

        if !(0.0..max_x).contains(&src_x) || !(0.0..max_y).contains(&src_y) {
            continue;
        }

        let x0 = src_x as u32;
        let y0 = src_y as u32;
        let fx = src_x - x0 as f32;
        let fy = src_y - y0 as f32;

        let p00 = rgb.get_pixel(x0, y0);
        let p01 = rgb.get_pixel(x0, y0 + 1);
        let p10 = rgb.get_pixel(x0 + 1, y0);
        let p11 = rgb.get_pixel(x0 + 1, y0 + 1);

        for ch in 0..3 {
            let v = p00[ch] as f32 * (1.0 - fx) * (1.0 - fy)
                + p10[ch] as f32 * fx * (1.0 - fy)
                + p01[ch] as f32 * (1.0 - fx) * fy
                + p11[ch] as f32 * fx * fy;
            out[ch] = v.clamp(0.0, 255.0) as u8;
        }
    }

    DynamicImage::ImageRgb8(output)
}

/// Decode image bytes and apply the EXIF orientation
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data).context("Could not decode image")?;
    Ok(apply_exif_orientation(data, image))
}

/// Rotate or flip according to the EXIF Orientation tag
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    use std::io::Cursor;

    let orientation = match exif::Reader::new().read_from_container(&mut Cursor::new(data)) {
        Ok(exif_data) => exif_data
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    };

    // https://exiftool.org/TagNames/EXIF.html
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_resize_info_round_trip() {
        let info = ResizeInfo::new((1280, 720), (640, 640));
        assert!((info.scale - 0.5).abs() < 1e-6);
        assert_eq!(info.offset_x, 0);
        assert_eq!(info.offset_y, 140);

        let (x, y) = info.to_original(320.0, 320.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_to_original_clamped() {
        let info = ResizeInfo::new((100, 100), (640, 640));
        let (x, y) = info.to_original_clamped(-50.0, 10_000.0);
        assert_eq!(x, 0.0);
        assert_eq!(y, 100.0);
    }

    #[test]
    fn test_letterbox_fills_padding() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 0, 0])));
        let boxed = letterbox(&image, (64, 64), 114, FilterType::Triangle).to_rgb8();

        assert_eq!(boxed.dimensions(), (64, 64));
        assert_eq!(boxed.get_pixel(0, 0).0, [114, 114, 114]);
        let centre = boxed.get_pixel(32, 32).0;
        assert!(centre[0] > 250 && centre[1] < 5 && centre[2] < 5);
    }

    #[test]
    fn test_image_to_nchw_layouts() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 1, Rgb([255, 0, 127])));

        let unit = image_to_nchw(&image, Normalization::Unit);
        assert_eq!(unit.shape(), &[1, 3, 1, 2]);
        assert!((unit[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(unit[[0, 1, 0, 0]].abs() < 1e-6);

        // BGR order puts the blue channel first
        let insight = image_to_nchw(&image, Normalization::InsightFace);
        assert!((insight[[0, 0, 0, 0]] - (127.0 - 127.5) / 128.0).abs() < 1e-6);
        assert!((insight[[0, 2, 0, 0]] - (255.0 - 127.5) / 128.0).abs() < 1e-6);

        let imagenet = image_to_nchw(&image, Normalization::ImageNet);
        assert!((imagenet[[0, 0, 0, 1]] - (1.0 - 0.485) / 0.229).abs() < 1e-4);
    }

    #[test]
    fn test_gray_to_nhwc() {
        let image = DynamicImage::ImageLuma8(image::GrayImage::from_fn(3, 2, |x, y| {
            image::Luma([(y * 3 + x) as u8 * 51])
        }));
        let tensor = gray_to_nhwc(&image);
        assert_eq!(tensor.shape(), &[1, 2, 3, 1]);
        assert!((tensor[[0, 1, 2, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 1, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_crop_box_clamps_and_rejects_empty() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(50, 40));
        let crop = crop_box(&image, -10.0, 5.0, 80.0, 25.0).unwrap();
        assert_eq!(crop.dimensions(), (50, 20));

        assert!(crop_box(&image, 30.0, 30.0, 30.0, 35.0).is_none());
    }

    #[test]
    fn test_align_identity_template() {
        let template = [
            (38.2946, 51.6963),
            (73.5318, 51.5014),
            (56.0252, 71.7366),
            (41.5493, 92.3655),
            (70.7299, 92.2041),
        ];
        let t = estimate_similarity_transform(&template, &template).unwrap();
        assert!((t[0][0] - 1.0).abs() < 1e-3);
        assert!(t[0][1].abs() < 1e-3);
        assert!(t[0][2].abs() < 1e-2);
        assert!((t[1][1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_align_rejects_degenerate_landmarks() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(10, 10));
        assert!(align_face(&image, &[(5.0, 5.0); 5]).is_err());
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(decode_image(b"definitely not an image").is_err());
    }
}
