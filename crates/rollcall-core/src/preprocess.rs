//! Face crop preprocessing into the embedding model's input tensor.

use crate::types::DetectionBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

/// Square input resolution of the embedding model.
pub const FACE_INPUT_SIZE: u32 = 112;
const PIXEL_SCALE: f32 = 255.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("box {0:?} has zero extent")]
    ZeroExtent(DetectionBox),
    #[error("box {0:?} lies outside the {1}x{2} frame")]
    OutOfBounds(DetectionBox, u32, u32),
}

/// Intersect `bbox` with the frame. Returns `(x, y, width, height)` of the
/// visible region.
pub fn crop_region(
    frame_width: u32,
    frame_height: u32,
    bbox: &DetectionBox,
) -> Result<(u32, u32, u32, u32), PreprocessError> {
    if bbox.w <= 0 || bbox.h <= 0 {
        return Err(PreprocessError::ZeroExtent(*bbox));
    }

    // i64 so that x + w cannot overflow.
    let x0 = i64::from(bbox.x).max(0);
    let y0 = i64::from(bbox.y).max(0);
    let x1 = (i64::from(bbox.x) + i64::from(bbox.w)).min(i64::from(frame_width));
    let y1 = (i64::from(bbox.y) + i64::from(bbox.h)).min(i64::from(frame_height));

    if x1 <= x0 || y1 <= y0 {
        return Err(PreprocessError::OutOfBounds(*bbox, frame_width, frame_height));
    }

    Ok((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Crop, resize to 112x112, scale to [0, 1] and lay out as NCHW with batch 1.
pub fn preprocess_face(frame: &RgbImage, bbox: &DetectionBox) -> Result<Array4<f32>, PreprocessError> {
    let (x, y, w, h) = crop_region(frame.width(), frame.height(), bbox)?;

    let crop = imageops::crop_imm(frame, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle);

    let size = FACE_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (px, py, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, py as usize, px as usize]] = pixel[c] as f32 / PIXEL_SCALE;
        }
    }

    Ok(tensor)
}
