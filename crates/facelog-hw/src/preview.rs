//! Live preview of annotated frames.
//!
//! The capture and attendance loops hand every frame to a [`Preview`] along
//! with the boxes and labels to draw, then poll it for a quit request.

use crate::frame::Frame;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("failed to open preview window: {0}")]
    Open(String),
    #[error("failed to update preview window: {0}")]
    Update(String),
}

/// Box colour class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// A face saved as a training sample.
    Capture,
    /// A face matched to an enrolled user.
    Recognized,
    Unknown,
}

impl Tone {
    pub fn rgb(self) -> Rgb<u8> {
        match self {
            Tone::Capture => Rgb([0, 0, 255]),
            Tone::Recognized => Rgb([0, 255, 0]),
            Tone::Unknown => Rgb([255, 0, 0]),
        }
    }
}

/// A rectangle and caption drawn over a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub label: String,
    pub tone: Tone,
}

impl Overlay {
    pub fn new(x: u32, y: u32, width: u32, height: u32, label: impl Into<String>, tone: Tone) -> Self {
        Self {
            x,
            y,
            width,
            height,
            label: label.into(),
            tone,
        }
    }
}

pub trait Preview {
    fn show(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), PreviewError>;

    /// True once the operator asked to stop.
    fn quit_requested(&mut self) -> bool;
}

impl<P: Preview + ?Sized> Preview for Box<P> {
    fn show(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), PreviewError> {
        (**self).show(frame, overlays)
    }

    fn quit_requested(&mut self) -> bool {
        (**self).quit_requested()
    }
}

const BOX_THICKNESS: u32 = 2;

/// Render `frame` in colour with a hollow box for each overlay.
///
/// Boxes are clipped to the frame.
pub fn annotate(frame: &Frame, overlays: &[Overlay]) -> RgbImage {
    let (w, h) = frame.image.dimensions();
    let mut out = RgbImage::from_fn(w, h, |x, y| {
        let v = frame.image.get_pixel(x, y)[0];
        Rgb([v, v, v])
    });

    for o in overlays {
        let color = o.tone.rgb();
        let x1 = o.x.saturating_add(o.width).min(w);
        let y1 = o.y.saturating_add(o.height).min(h);
        for y in o.y.min(h)..y1 {
            for x in o.x.min(w)..x1 {
                let on_edge = x < o.x + BOX_THICKNESS
                    || y < o.y + BOX_THICKNESS
                    || x + BOX_THICKNESS >= o.x + o.width
                    || y + BOX_THICKNESS >= o.y + o.height;
                if on_edge {
                    out.put_pixel(x, y, color);
                }
            }
        }
    }
    out
}

/// Preview that draws nothing. Quits when the shared flag is raised
/// (typically by a Ctrl-C handler).
pub struct HeadlessPreview {
    quit: Arc<AtomicBool>,
    last_labels: Vec<String>,
}

impl HeadlessPreview {
    pub fn new(quit: Arc<AtomicBool>) -> Self {
        Self {
            quit,
            last_labels: Vec::new(),
        }
    }
}

impl Preview for HeadlessPreview {
    fn show(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), PreviewError> {
        let labels: Vec<String> = overlays.iter().map(|o| o.label.clone()).collect();
        if labels != self.last_labels {
            tracing::debug!(sequence = frame.sequence, labels = ?labels, "preview");
            self.last_labels = labels;
        }
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// On-screen preview window. `q`, Escape, closing the window or the shared
/// flag all end the session.
///
/// Boxes are drawn on the frame; minifb has no text rendering, so the
/// overlay labels are shown in the window title instead.
#[cfg(feature = "window")]
pub struct WindowPreview {
    title: String,
    window: Option<minifb::Window>,
    buffer: Vec<u32>,
    quit: Arc<AtomicBool>,
}

#[cfg(feature = "window")]
impl WindowPreview {
    /// The window itself opens on the first frame, sized to it.
    pub fn new(title: impl Into<String>, quit: Arc<AtomicBool>) -> Self {
        Self {
            title: title.into(),
            window: None,
            buffer: Vec::new(),
            quit,
        }
    }
}

#[cfg(feature = "window")]
impl Preview for WindowPreview {
    fn show(&mut self, frame: &Frame, overlays: &[Overlay]) -> Result<(), PreviewError> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        if self.window.is_none() {
            let window = minifb::Window::new(&self.title, w, h, minifb::WindowOptions::default())
                .map_err(|e| PreviewError::Open(e.to_string()))?;
            self.window = Some(window);
        }
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };

        let rgb = annotate(frame, overlays);
        self.buffer.clear();
        self.buffer.extend(
            rgb.pixels()
                .map(|p| ((p[0] as u32) << 16) | ((p[1] as u32) << 8) | p[2] as u32),
        );

        if overlays.is_empty() {
            window.set_title(&self.title);
        } else {
            let labels: Vec<&str> = overlays.iter().map(|o| o.label.as_str()).collect();
            window.set_title(&format!("{} | {}", self.title, labels.join(", ")));
        }

        window
            .update_with_buffer(&self.buffer, w, h)
            .map_err(|e| PreviewError::Update(e.to_string()))
    }

    fn quit_requested(&mut self) -> bool {
        if self.quit.load(Ordering::SeqCst) {
            return true;
        }
        match &self.window {
            Some(window) => {
                !window.is_open()
                    || window.is_key_down(minifb::Key::Q)
                    || window.is_key_down(minifb::Key::Escape)
            }
            None => false,
        }
    }
}
