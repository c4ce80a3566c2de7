use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ID → display name mapping, stored as a JSON object with string keys.
pub type LabelMap = BTreeMap<u32, String>;

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Clip a signed rectangle to a `frame_w` × `frame_h` frame.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the frame.
    pub fn clipped(x: i32, y: i32, width: i32, height: i32, frame_w: u32, frame_h: u32) -> Option<Self> {
        let x0 = x.max(0) as i64;
        let y0 = y.max(0) as i64;
        let x1 = (x as i64 + width as i64).min(frame_w as i64);
        let y1 = (y as i64 + height as i64).min(frame_h as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }
}

/// Output of a recognizer for one normalized face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: u32,
    /// Histogram distance to the nearest training sample. Lower = more confident.
    pub distance: f64,
}

/// Outcome of applying the acceptance rule to a prediction.
#[derive(Debug, Clone, PartialEq)]
pub enum Identity {
    Known { user_id: u32, name: String, distance: f64 },
    Unknown { distance: f64 },
}

impl Identity {
    /// Accept a prediction only if `distance <= threshold` and its label is enrolled.
    pub fn resolve(prediction: &Prediction, labels: &LabelMap, threshold: f64) -> Self {
        match labels.get(&prediction.label) {
            Some(name) if prediction.distance <= threshold => Identity::Known {
                user_id: prediction.label,
                name: name.clone(),
                distance: prediction.distance,
            },
            _ => Identity::Unknown {
                distance: prediction.distance,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelMap {
        LabelMap::from([(7, "Ana".to_string())])
    }

    #[test]
    fn test_clip_inside() {
        assert_eq!(FaceRect::clipped(10, 20, 30, 40, 100, 100), Some(FaceRect::new(10, 20, 30, 40)));
    }

    #[test]
    fn test_clip_overhanging() {
        assert_eq!(FaceRect::clipped(-5, 90, 20, 20, 100, 100), Some(FaceRect::new(0, 90, 15, 10)));
    }

    #[test]
    fn test_clip_outside() {
        assert_eq!(FaceRect::clipped(120, 0, 10, 10, 100, 100), None);
    }

    #[test]
    fn test_resolve_accepts_within_threshold() {
        let p = Prediction { label: 7, distance: 40.0 };
        assert_eq!(
            Identity::resolve(&p, &labels(), 70.0),
            Identity::Known { user_id: 7, name: "Ana".into(), distance: 40.0 }
        );
    }

    #[test]
    fn test_resolve_threshold_is_inclusive() {
        let p = Prediction { label: 7, distance: 70.0 };
        assert!(matches!(Identity::resolve(&p, &labels(), 70.0), Identity::Known { .. }));
    }

    #[test]
    fn test_resolve_rejects_far_match() {
        let p = Prediction { label: 7, distance: 85.0 };
        assert_eq!(Identity::resolve(&p, &labels(), 70.0), Identity::Unknown { distance: 85.0 });
    }

    #[test]
    fn test_resolve_rejects_unenrolled_label() {
        let p = Prediction { label: 9, distance: 10.0 };
        assert!(matches!(Identity::resolve(&p, &labels(), 70.0), Identity::Unknown { .. }));
    }
}
