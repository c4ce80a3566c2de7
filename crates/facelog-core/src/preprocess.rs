use crate::types::FaceRect;
use image::imageops::{self, FilterType};
use image::GrayImage;
use thiserror::Error;

/// Side length of the canonical face crop fed to the recognizer.
pub const FACE_SIZE: u32 = 200;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("face region {0:?} has no pixels inside a {1}x{2} frame")]
    EmptyRegion(FaceRect, u32, u32),
}

/// Crop `rect` out of `gray` and resize it to `FACE_SIZE` × `FACE_SIZE` (bilinear).
///
/// The crop is clamped to the frame; non-square regions are stretched.
pub fn preprocess_face(gray: &GrayImage, rect: &FaceRect) -> Result<GrayImage, PreprocessError> {
    let (w, h) = gray.dimensions();
    let region = FaceRect::clipped(
        rect.x.min(i32::MAX as u32) as i32,
        rect.y.min(i32::MAX as u32) as i32,
        rect.width.min(i32::MAX as u32) as i32,
        rect.height.min(i32::MAX as u32) as i32,
        w,
        h,
    )
    .ok_or(PreprocessError::EmptyRegion(*rect, w, h))?;

    let crop = imageops::crop_imm(gray, region.x, region.y, region.width, region.height).to_image();
    Ok(imageops::resize(&crop, FACE_SIZE, FACE_SIZE, FilterType::Triangle))
}
