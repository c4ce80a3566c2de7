//! Frame type and raw pixel conversion.

use image::GrayImage;

/// A captured grayscale frame.
#[derive(Clone)]
pub struct Frame {
    pub image: GrayImage,
    /// Monotonic per-source frame counter.
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        Self { image, sequence }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Wrap a row-major grayscale buffer of exactly `width * height` bytes.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height) as usize;
        let actual = data.len();
        let image = GrayImage::from_raw(width, height, data)
            .ok_or(FrameError::InvalidLength { expected, actual })?;
        Ok(Self::new(image, sequence))
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
/// Grayscale = every even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Downscale 16-bit little-endian grayscale to 8 bits (high byte).
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    if buf.len() < pixels * 2 {
        return Err(FrameError::InvalidLength {
            expected: pixels * 2,
            actual: buf.len(),
        });
    }
    Ok(buf[..pixels * 2].chunks_exact(2).map(|px| px[1]).collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_grayscale(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        // 0x1234 and 0xABCD, little-endian
        let buf = vec![0x34, 0x12, 0xCD, 0xAB];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0xAB]);
    }

    #[test]
    fn test_from_gray_checks_length() {
        assert!(Frame::from_gray(vec![0; 6], 3, 2, 0).is_ok());
        assert!(matches!(
            Frame::from_gray(vec![0; 5], 3, 2, 0),
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
    }
}
