//! Multi-scale Haar cascade face detector.
//!
//! Slides the cascade's base window over a pyramid of downscaled frames and
//! merges overlapping hits into one rectangle per face.

use crate::cascade::{Cascade, IntegralImage};
use crate::config::{Config, DetectorParams};
use crate::types::FaceRect;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Relative tolerance when clustering raw hits.
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0}; install OpenCV's haarcascades or set FACELOG_CASCADE_PATH")]
    CascadeNotFound(PathBuf),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("cascade xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("malformed cascade: {0}")]
    Parse(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
}

/// Anything that finds face rectangles in a grayscale frame.
pub trait FaceDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect>;
}

/// Raw (unclipped) detection in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
}

/// Haar cascade detector with fixed tuning.
pub struct CascadeDetector {
    cascade: Cascade,
    params: DetectorParams,
}

impl CascadeDetector {
    /// Load a cascade XML file.
    pub fn load(path: &Path, params: DetectorParams) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::CascadeNotFound(path.to_path_buf()));
        }
        let xml = std::fs::read_to_string(path)?;
        let detector = Self::from_xml(&xml, params)?;

        tracing::info!(
            path = %path.display(),
            window = ?detector.cascade.window(),
            stages = detector.cascade.stage_count(),
            "loaded Haar cascade"
        );

        Ok(detector)
    }

    pub fn from_xml(xml: &str, params: DetectorParams) -> Result<Self, DetectorError> {
        if !(params.scale_factor > 1.0) {
            return Err(DetectorError::InvalidParams(format!(
                "scale factor must be > 1, got {}",
                params.scale_factor
            )));
        }
        Ok(Self {
            cascade: Cascade::parse(xml)?,
            params,
        })
    }

    /// Every window accepted by the cascade, across all scales.
    fn candidates(&self, gray: &GrayImage) -> Vec<Candidate> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = self.cascade.window();
        let (min_w, min_h) = self.params.min_size;
        let mut hits = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let window_w = (win_w as f64 * factor).round() as u32;
            let window_h = (win_h as f64 * factor).round() as u32;
            if window_w > img_w || window_h > img_h {
                break;
            }
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }

            if window_w >= min_w && window_h >= min_h {
                let resized;
                let scaled = if (scaled_w, scaled_h) == (img_w, img_h) {
                    gray
                } else {
                    resized = imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle);
                    &resized
                };
                let ii = IntegralImage::new(scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=scaled_h - win_h).step_by(step) {
                    for x in (0..=scaled_w - win_w).step_by(step) {
                        if self.cascade.evaluate(&ii, x, y) {
                            hits.push(Candidate {
                                x: (x as f64 * factor).round() as i32,
                                y: (y as f64 * factor).round() as i32,
                                width: window_w as i32,
                                height: window_h as i32,
                            });
                        }
                    }
                }
            }

            factor *= self.params.scale_factor;
        }

        hits
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, gray: &GrayImage) -> Vec<FaceRect> {
        let hits = self.candidates(gray);
        let raw = hits.len();
        let grouped = group_candidates(&hits, self.params.min_neighbors, GROUP_EPS);
        let faces: Vec<FaceRect> = grouped
            .into_iter()
            .filter_map(|c| FaceRect::clipped(c.x, c.y, c.width, c.height, gray.width(), gray.height()))
            .collect();
        tracing::trace!(raw, faces = faces.len(), "cascade detection");
        faces
    }
}

/// Build the detector from `config.cascade_path` and `config.detector`.
pub fn load_face_detector(config: &Config) -> Result<CascadeDetector, DetectorError> {
    CascadeDetector::load(&config.cascade_path, config.detector)
}

/// Detect faces in a grayscale frame.
pub fn detect_faces<D: FaceDetector + ?Sized>(gray: &GrayImage, detector: &D) -> Vec<FaceRect> {
    detector.detect(gray)
}

fn similar(a: &Candidate, b: &Candidate, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.width - b.x - b.width).abs() as f64) <= delta
        && ((a.y + a.height - b.y - b.height).abs() as f64) <= delta
}

/// Cluster similar candidates, average each cluster, and keep clusters with
/// more than `min_neighbors` members that are not swallowed by a stronger one.
///
/// `min_neighbors == 0` returns the candidates unchanged.
fn group_candidates(hits: &[Candidate], min_neighbors: u32, eps: f64) -> Vec<Candidate> {
    if min_neighbors == 0 || hits.is_empty() {
        return hits.to_vec();
    }

    let labels = partition(hits, |a, b| similar(a, b, eps));
    let classes = labels.iter().copied().max().map_or(0, |m| m + 1);

    let mut sums = vec![[0i64; 4]; classes];
    let mut counts = vec![0u32; classes];
    for (hit, &label) in hits.iter().zip(&labels) {
        let s = &mut sums[label];
        s[0] += hit.x as i64;
        s[1] += hit.y as i64;
        s[2] += hit.width as i64;
        s[3] += hit.height as i64;
        counts[label] += 1;
    }

    let averaged: Vec<Candidate> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &n)| {
            let n = n as f64;
            Candidate {
                x: (s[0] as f64 / n).round() as i32,
                y: (s[1] as f64 / n).round() as i32,
                width: (s[2] as f64 / n).round() as i32,
                height: (s[3] as f64 / n).round() as i32,
            }
        })
        .collect();

    let mut kept = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let swallowed = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i32;
            let dy = (r2.height as f64 * eps).round() as i32;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.width <= r2.x + r2.width + dx
                && r1.y + r1.height <= r2.y + r2.height + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !swallowed {
            kept.push(*r1);
        }
    }
    kept
}

/// Equivalence classes under `same`, numbered by first appearance.
fn partition<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..items.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..items.len() {
        for j in 0..i {
            if same(&items[i], &items[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[ri] = rj;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; items.len()];
    let mut next = 0;
    (0..items.len())
        .map(|i| {
            let root = find(&mut parent, i);
            if class_of_root[root] == usize::MAX {
                class_of_root[root] = next;
                next += 1;
            }
            class_of_root[root]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::tests::{edge_image, EDGE_CASCADE};

    fn params(min_neighbors: u32, min_size: u32) -> DetectorParams {
        DetectorParams {
            scale_factor: 1.2,
            min_neighbors,
            min_size: (min_size, min_size),
        }
    }

    fn cand(x: i32, y: i32, w: i32, h: i32) -> Candidate {
        Candidate { x, y, width: w, height: h }
    }

    #[test]
    fn test_detects_edge_pattern() {
        let detector = CascadeDetector::from_xml(EDGE_CASCADE, params(0, 8)).unwrap();
        let faces = detect_faces(&edge_image(8, 8), &detector);
        assert_eq!(faces, vec![FaceRect::new(0, 0, 8, 8)]);
    }

    #[test]
    fn test_flat_frame_has_no_faces() {
        let detector = CascadeDetector::from_xml(EDGE_CASCADE, params(0, 8)).unwrap();
        let flat = GrayImage::from_pixel(64, 48, image::Luma([90]));
        assert!(detector.detect(&flat).is_empty());
    }

    #[test]
    fn test_min_size_larger_than_frame() {
        let detector = CascadeDetector::from_xml(EDGE_CASCADE, params(0, 100)).unwrap();
        assert!(detector.detect(&edge_image(32, 32)).is_empty());
    }

    #[test]
    fn test_detections_stay_inside_frame() {
        let detector = CascadeDetector::from_xml(EDGE_CASCADE, params(0, 8)).unwrap();
        let img = edge_image(40, 30);
        let faces = detector.detect(&img);
        assert!(!faces.is_empty());
        for face in faces {
            assert!(face.x + face.width <= 40 && face.y + face.height <= 30, "{face:?}");
        }
    }

    #[test]
    fn test_detects_pattern_at_larger_scales_with_grouping() {
        // White 40x40 square on black; the edge cascade fires along its right side (x = 60).
        let img = GrayImage::from_fn(96, 80, |x, y| {
            let inside = (20..60).contains(&x) && (16..56).contains(&y);
            image::Luma([if inside { 255 } else { 0 }])
        });
        let detector = CascadeDetector::from_xml(EDGE_CASCADE, params(3, 16)).unwrap();
        let faces = detector.detect(&img);

        assert!(!faces.is_empty());
        for face in &faces {
            assert!(face.width >= 16, "{face:?}");
            assert_eq!(face.width, face.height, "{face:?}");
            let (x, y, size) = (face.x as i64, face.y as i64, face.width as i64);
            let slack = size / 4;
            // straddles the square's right edge and overlaps its rows
            assert!(x < 60 + slack && x + size > 60 - slack, "{face:?}");
            assert!(y < 56 + slack && y + size > 16 - slack, "{face:?}");
            assert!(face.x + face.width <= 96 && face.y + face.height <= 80, "{face:?}");
        }
    }

    #[test]
    fn test_rejects_non_increasing_scale() {
        let mut p = params(3, 8);
        p.scale_factor = 1.0;
        assert!(matches!(
            CascadeDetector::from_xml(EDGE_CASCADE, p),
            Err(DetectorError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_load_missing_cascade() {
        let err = CascadeDetector::load(Path::new("/nonexistent/cascade.xml"), params(5, 100));
        assert!(matches!(err, Err(DetectorError::CascadeNotFound(_))));
    }

    #[test]
    fn test_group_keeps_dense_cluster() {
        let hits = vec![
            cand(100, 100, 50, 50),
            cand(102, 101, 50, 50),
            cand(98, 99, 52, 52),
            cand(400, 300, 50, 50),
        ];
        let grouped = group_candidates(&hits, 2, GROUP_EPS);
        assert_eq!(grouped, vec![cand(100, 100, 51, 51)]);
    }

    #[test]
    fn test_group_zero_neighbors_passthrough() {
        let hits = vec![cand(0, 0, 10, 10), cand(1, 1, 10, 10)];
        assert_eq!(group_candidates(&hits, 0, GROUP_EPS), hits);
    }

    #[test]
    fn test_group_drops_nested_weaker_cluster() {
        let mut hits = vec![cand(100, 100, 100, 100); 6];
        hits.extend(vec![cand(130, 130, 30, 30); 2]);
        let grouped = group_candidates(&hits, 1, GROUP_EPS);
        assert_eq!(grouped, vec![cand(100, 100, 100, 100)]);
    }

    #[test]
    fn test_partition_transitive() {
        let items = [1, 2, 3, 10, 11];
        let labels = partition(&items, |a: &i32, b: &i32| (a - b).abs() <= 1);
        assert_eq!(labels, vec![0, 0, 0, 1, 1]);
    }
}
