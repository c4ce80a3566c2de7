//! facelog-core — face detection, recognition and attendance bookkeeping.
//!
//! Detection uses an OpenCV Haar cascade evaluated in-process; recognition
//! uses Local Binary Pattern Histograms. All persisted state is plain files
//! under the configured data directory.

pub mod cascade;
pub mod config;
pub mod detector;
pub mod ledger;
pub mod preprocess;
pub mod recognizer;
pub mod store;
pub mod types;

pub use config::{Config, DetectorParams, LbphParams};
pub use detector::{detect_faces, load_face_detector, CascadeDetector, FaceDetector};
pub use preprocess::{preprocess_face, FACE_SIZE};
pub use recognizer::{LbphRecognizer, Recognizer};
pub use types::{FaceRect, Identity, LabelMap, Prediction};
