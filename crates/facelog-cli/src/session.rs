//! Frame source and preview selection shared by `capture` and `attend`.

use anyhow::{Context, Result};
use clap::Args;
use facelog_core::Config;
use facelog_hw::{FrameSource, HeadlessPreview, Preview, ReplaySource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// Replay images from this directory instead of opening the camera
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,
    /// Do not open a preview window; stop with Ctrl-C
    #[arg(long)]
    pub headless: bool,
}

/// Why a frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Requested number of samples reached.
    Completed,
    /// Operator pressed `q`, closed the window, or hit Ctrl-C.
    Quit,
    /// The frame source failed or ran out of frames.
    SourceEnded,
}

/// Raise a shared flag on Ctrl-C.
pub fn quit_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received, stopping after this frame");
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(flag)
}

pub fn open_source(config: &Config, args: &SessionArgs) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &args.source {
        let source = ReplaySource::open(dir)
            .with_context(|| format!("failed to open frame directory {}", dir.display()))?;
        return Ok(Box::new(source));
    }
    open_camera(config)
}

#[cfg(feature = "v4l")]
fn open_camera(config: &Config) -> Result<Box<dyn FrameSource>> {
    let camera = facelog_hw::Camera::open(
        &config.camera_device,
        config.frame_width,
        config.frame_height,
    )
    .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "v4l"))]
fn open_camera(config: &Config) -> Result<Box<dyn FrameSource>> {
    Err(facelog_hw::CameraError::Unavailable)
        .with_context(|| format!("cannot open {}", config.camera_device))
}

pub fn open_preview(title: &str, args: &SessionArgs, quit: Arc<AtomicBool>) -> Box<dyn Preview> {
    if args.headless {
        return Box::new(HeadlessPreview::new(quit));
    }
    window_preview(title, quit)
}

#[cfg(feature = "window")]
fn window_preview(title: &str, quit: Arc<AtomicBool>) -> Box<dyn Preview> {
    Box::new(facelog_hw::WindowPreview::new(title, quit))
}

#[cfg(not(feature = "window"))]
fn window_preview(title: &str, quit: Arc<AtomicBool>) -> Box<dyn Preview> {
    tracing::info!(title, "built without the `window` feature, running headless (Ctrl-C to stop)");
    Box::new(HeadlessPreview::new(quit))
}
