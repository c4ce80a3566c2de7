//! Local Binary Pattern Histogram (LBPH) face recognizer.
//!
//! Each face is encoded as the concatenation of per-cell histograms of
//! circular local binary patterns; prediction returns the label of the
//! nearest training histogram under the chi-square distance.

use crate::config::LbphParams;
use crate::store::{write_atomic, StoreError};
use crate::types::Prediction;
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;
use thiserror::Error;

/// Patterns are stored in `u32`, and `2^neighbors` bins per cell must stay sane.
const MAX_NEIGHBORS: u32 = 16;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; run `facelog train` first")]
    ModelNotFound(String),
    #[error("recognizer has no training samples")]
    NotTrained,
    #[error("empty training set")]
    EmptyTrainingSet,
    #[error("invalid LBPH parameters: {0}")]
    InvalidParams(String),
    #[error("image {width}x{height} is too small for radius {radius} and a {grid_x}x{grid_y} grid")]
    ImageTooSmall {
        width: u32,
        height: u32,
        radius: u32,
        grid_x: u32,
        grid_y: u32,
    },
    #[error("model io: {0}")]
    Io(#[from] std::io::Error),
    #[error("model encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Anything that maps a normalized face crop to a (label, distance) guess.
pub trait Recognizer {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError>;
}

/// Trained LBPH model: one spatial histogram per training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphRecognizer {
    params: LbphParams,
    histograms: Vec<Vec<f32>>,
    labels: Vec<u32>,
}

impl LbphRecognizer {
    pub fn new(params: LbphParams) -> Result<Self, RecognizerError> {
        if params.radius == 0 || params.grid_x == 0 || params.grid_y == 0 {
            return Err(RecognizerError::InvalidParams(format!(
                "radius and grid must be positive: {params:?}"
            )));
        }
        if params.neighbors == 0 || params.neighbors > MAX_NEIGHBORS {
            return Err(RecognizerError::InvalidParams(format!(
                "neighbors must be in 1..={MAX_NEIGHBORS}, got {}",
                params.neighbors
            )));
        }
        Ok(Self {
            params,
            histograms: Vec::new(),
            labels: Vec::new(),
        })
    }

    /// Replace the model with one trained on `samples`.
    pub fn train(&mut self, samples: &[(GrayImage, u32)]) -> Result<(), RecognizerError> {
        if samples.is_empty() {
            return Err(RecognizerError::EmptyTrainingSet);
        }
        let histograms = samples
            .iter()
            .map(|(img, _)| self.describe(img))
            .collect::<Result<Vec<_>, _>>()?;

        self.histograms = histograms;
        self.labels = samples.iter().map(|(_, label)| *label).collect();

        tracing::info!(
            samples = self.labels.len(),
            bins = self.histograms.first().map_or(0, Vec::len),
            "LBPH model trained"
        );
        Ok(())
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// Number of training samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Serialize the model to `path`, replacing any previous model.
    pub fn save(&self, path: &Path) -> Result<(), RecognizerError> {
        let json = serde_json::to_vec(self)?;
        write_atomic(path, &json)?;
        tracing::info!(path = %path.display(), samples = self.len(), "LBPH model saved");
        Ok(())
    }

    /// Load a model written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, RecognizerError> {
        if !path.exists() {
            return Err(RecognizerError::ModelNotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        let model: Self = serde_json::from_slice(&bytes)?;
        // Re-validate parameters from disk.
        Self::new(model.params)?;
        if model.histograms.len() != model.labels.len() {
            return Err(RecognizerError::InvalidParams(format!(
                "{} histograms for {} labels",
                model.histograms.len(),
                model.labels.len()
            )));
        }

        tracing::info!(path = %path.display(), samples = model.len(), "LBPH model loaded");
        Ok(model)
    }

    /// Spatial LBP histogram of one face.
    fn describe(&self, img: &GrayImage) -> Result<Vec<f32>, RecognizerError> {
        let p = &self.params;
        let (w, h) = img.dimensions();
        let too_small = RecognizerError::ImageTooSmall {
            width: w,
            height: h,
            radius: p.radius,
            grid_x: p.grid_x,
            grid_y: p.grid_y,
        };
        if w <= 2 * p.radius || h <= 2 * p.radius {
            return Err(too_small);
        }
        let (lbp, lw, lh) = elbp(img, p.radius, p.neighbors);
        if lw < p.grid_x || lh < p.grid_y {
            return Err(too_small);
        }
        Ok(spatial_histogram(&lbp, lw, lh, 1usize << p.neighbors, p.grid_x, p.grid_y))
    }
}

impl Recognizer for LbphRecognizer {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, RecognizerError> {
        if self.is_empty() {
            return Err(RecognizerError::NotTrained);
        }
        let query = self.describe(face)?;

        let mut best = Prediction {
            label: self.labels[0],
            distance: f64::MAX,
        };
        for (hist, &label) in self.histograms.iter().zip(&self.labels) {
            let d = chi_square(hist, &query);
            if d < best.distance {
                best = Prediction { label, distance: d };
            }
        }
        Ok(best)
    }
}

/// Extended (circular) LBP with bilinear sampling.
///
/// Returns the pattern image and its size, `(w - 2r) × (h - 2r)`.
fn elbp(img: &GrayImage, radius: u32, neighbors: u32) -> (Vec<u32>, u32, u32) {
    let (w, h) = img.dimensions();
    let r = radius as i64;
    let (out_w, out_h) = (w - 2 * radius, h - 2 * radius);
    let mut out = vec![0u32; (out_w * out_h) as usize];
    let px = |x: i64, y: i64| img.get_pixel(x as u32, y as u32)[0] as f32;

    for n in 0..neighbors {
        let angle = 2.0 * PI * n as f32 / neighbors as f32;
        let sx = radius as f32 * angle.cos();
        let sy = -(radius as f32) * angle.sin();
        let (fx, fy) = (sx.floor() as i64, sy.floor() as i64);
        let (cx, cy) = (sx.ceil() as i64, sy.ceil() as i64);
        let (tx, ty) = (sx - fx as f32, sy - fy as f32);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for y in r..(h as i64 - r) {
            for x in r..(w as i64 - r) {
                let t = w1 * px(x + fx, y + fy)
                    + w2 * px(x + cx, y + fy)
                    + w3 * px(x + fx, y + cy)
                    + w4 * px(x + cx, y + cy);
                let center = px(x, y);
                if t > center || (t - center).abs() < f32::EPSILON {
                    out[((y - r) as u32 * out_w + (x - r) as u32) as usize] |= 1 << n;
                }
            }
        }
    }

    (out, out_w, out_h)
}

/// Normalized histograms of `grid_x × grid_y` cells, concatenated row by row.
///
/// Cells are `w / grid_x` by `h / grid_y`; leftover border pixels are ignored.
fn spatial_histogram(lbp: &[u32], w: u32, h: u32, bins: usize, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let (cell_w, cell_h) = (w / grid_x, h / grid_y);
    let cell_pixels = (cell_w * cell_h) as f32;
    let mut out = vec![0.0f32; (grid_x * grid_y) as usize * bins];

    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let base = (gy * grid_x + gx) as usize * bins;
            for y in gy * cell_h..(gy + 1) * cell_h {
                for x in gx * cell_w..(gx + 1) * cell_w {
                    let pattern = lbp[(y * w + x) as usize] as usize;
                    out[base + pattern] += 1.0;
                }
            }
            for v in &mut out[base..base + bins] {
                *v /= cell_pixels;
            }
        }
    }

    out
}

/// Symmetric chi-square distance: `2 * Σ (a - b)² / (a + b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let s = a + b;
            if s > f64::EPSILON {
                (a - b) * (a - b) / s
            } else {
                0.0
            }
        })
        .sum::<f64>()
        * 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> LbphParams {
        LbphParams::default()
    }

    /// Deterministic textured face stand-in; `seed` changes the texture.
    fn texture(seed: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, y| {
            let v = (x * (3 + seed) + y * (5 + 2 * seed) + (x * y) % (7 + seed)) % 256;
            image::Luma([v as u8])
        })
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(LbphRecognizer::new(LbphParams { neighbors: 0, ..params() }).is_err());
        assert!(LbphRecognizer::new(LbphParams { neighbors: 17, ..params() }).is_err());
        assert!(LbphRecognizer::new(LbphParams { grid_x: 0, ..params() }).is_err());
        assert!(LbphRecognizer::new(LbphParams { radius: 0, ..params() }).is_err());
    }

    #[test]
    fn test_empty_training_set() {
        let mut rec = LbphRecognizer::new(params()).unwrap();
        assert!(matches!(rec.train(&[]), Err(RecognizerError::EmptyTrainingSet)));
    }

    #[test]
    fn test_predict_untrained() {
        let rec = LbphRecognizer::new(params()).unwrap();
        assert!(matches!(rec.predict(&texture(1)), Err(RecognizerError::NotTrained)));
    }

    #[test]
    fn test_identical_face_has_zero_distance() {
        let mut rec = LbphRecognizer::new(params()).unwrap();
        rec.train(&[(texture(1), 1), (texture(4), 2)]).unwrap();
        let p = rec.predict(&texture(4)).unwrap();
        assert_eq!(p.label, 2);
        assert!(p.distance.abs() < 1e-9, "distance {}", p.distance);
    }

    #[test]
    fn test_nearest_label_wins() {
        let mut rec = LbphRecognizer::new(params()).unwrap();
        rec.train(&[(texture(1), 10), (texture(9), 20)]).unwrap();
        let p = rec.predict(&texture(1)).unwrap();
        assert_eq!(p.label, 10);
        let far = rec.predict(&GrayImage::from_pixel(64, 64, image::Luma([0]))).unwrap();
        assert!(far.distance > p.distance);
    }

    #[test]
    fn test_histogram_shape_and_normalization() {
        let (lbp, w, h) = elbp(&texture(2), 1, 8);
        assert_eq!((w, h), (62, 62));
        let hist = spatial_histogram(&lbp, w, h, 256, 8, 8);
        assert_eq!(hist.len(), 8 * 8 * 256);
        for cell in hist.chunks(256) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell sums to {total}");
        }
    }

    #[test]
    fn test_chi_square() {
        assert_eq!(chi_square(&[0.5, 0.5], &[0.5, 0.5]), 0.0);
        // 2 * ((1-0)^2/1 + (0-1)^2/1) = 4
        assert!((chi_square(&[1.0, 0.0], &[0.0, 1.0]) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_image_too_small() {
        let mut rec = LbphRecognizer::new(params()).unwrap();
        let tiny = GrayImage::from_pixel(6, 6, image::Luma([1]));
        assert!(matches!(rec.train(&[(tiny, 1)]), Err(RecognizerError::ImageTooSmall { .. })));
    }

    #[test]
    fn test_save_load_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model").join("lbph_model.json");

        let mut rec = LbphRecognizer::new(params()).unwrap();
        rec.train(&[(texture(1), 1), (texture(5), 5)]).unwrap();
        rec.save(&path).unwrap();

        let loaded = LbphRecognizer::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.params(), rec.params());
        let probe = texture(5);
        assert_eq!(loaded.predict(&probe).unwrap(), rec.predict(&probe).unwrap());
    }

    #[test]
    fn test_load_missing_model() {
        let err = LbphRecognizer::load(Path::new("/nonexistent/lbph_model.json"));
        assert!(matches!(err, Err(RecognizerError::ModelNotFound(_))));
    }
}
