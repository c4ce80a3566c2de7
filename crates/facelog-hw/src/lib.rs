//! facelog-hw — frame acquisition and on-screen preview.
//!
//! Frames come from a V4L2 webcam (`v4l` feature) or from a directory of
//! images replayed in order. The preview is a minifb window (`window`
//! feature) or headless.

#[cfg(feature = "v4l")]
pub mod camera;
pub mod frame;
pub mod preview;
pub mod source;

#[cfg(feature = "v4l")]
pub use camera::Camera;
pub use frame::Frame;
#[cfg(feature = "window")]
pub use preview::WindowPreview;
pub use preview::{annotate, HeadlessPreview, Overlay, Preview, PreviewError, Tone};
pub use source::{CameraError, FrameSource, ReplaySource};
