//! Frame sources: anything that hands out grayscale frames one at a time.

use crate::frame::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REPLAY_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("no more frames")]
    Exhausted,
    #[error("camera support not compiled in; rebuild with `--features v4l` or replay images with --source <dir>")]
    Unavailable,
}

/// Blocking frame producer. A read error ends the caller's capture loop.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).read_frame()
    }
}

/// Replays the images of a directory in filename order, as grayscale frames.
pub struct ReplaySource {
    files: Vec<PathBuf>,
    next: usize,
}

impl ReplaySource {
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| CameraError::DeviceNotFound(format!("{}: {e}", dir.display())))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|e| e.to_str())
                        .map(|e| REPLAY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                        .unwrap_or(false)
            })
            .collect();
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "opened replay source");
        Ok(Self { files, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let path = self.files.get(self.next).ok_or(CameraError::Exhausted)?;
        let sequence = self.next as u32;
        self.next += 1;

        let image = image::open(path)
            .map_err(|e| CameraError::CaptureFailed(format!("{}: {e}", path.display())))?
            .to_luma8();
        tracing::trace!(path = %path.display(), sequence, "replayed frame");
        Ok(Frame::new(image, sequence))
    }
}
