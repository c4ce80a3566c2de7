use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Well-known install locations of OpenCV's bundled frontal-face cascade.
const CASCADE_CANDIDATES: [&str; 4] = [
    "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
    "/usr/local/share/opencv4/haarcascades/haarcascade_frontalface_default.xml",
    "/usr/share/opencv/haarcascades/haarcascade_frontalface_default.xml",
    "/usr/local/share/opencv/haarcascades/haarcascade_frontalface_default.xml",
];

const LABEL_MAP_FILE: &str = "labels.json";
const MODEL_FILE: &str = "lbph_model.json";

/// Multi-scale cascade detection tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorParams {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f64,
    /// Neighbouring raw detections a face needs to survive grouping.
    pub min_neighbors: u32,
    /// Smallest face, (width, height) in pixels.
    pub min_size: (u32, u32),
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.2,
            min_neighbors: 5,
            min_size: (100, 100),
        }
    }
}

/// LBPH recognizer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
        }
    }
}

/// Tool configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all persisted state (default: ./data).
    pub data_dir: PathBuf,
    pub dataset_dir: PathBuf,
    pub model_dir: PathBuf,
    pub attendance_dir: PathBuf,
    /// OpenCV Haar cascade XML for frontal faces.
    pub cascade_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture resolution; the driver may negotiate another.
    pub frame_width: u32,
    pub frame_height: u32,
    pub detector: DetectorParams,
    /// Samples captured per user when `--samples` is not given.
    pub samples_default: usize,
    pub lbph: LbphParams,
    /// Maximum LBPH distance accepted as a match (lower is stricter).
    pub match_threshold: f64,
}

impl Config {
    /// Load configuration from `FACELOG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACELOG_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        let mut config = Self::with_data_dir(data_dir);

        if let Ok(path) = std::env::var("FACELOG_CASCADE_PATH") {
            config.cascade_path = PathBuf::from(path);
        }
        if let Ok(device) = std::env::var("FACELOG_CAMERA_DEVICE") {
            config.camera_device = device;
        }
        config.frame_width = env_u32("FACELOG_FRAME_WIDTH", config.frame_width);
        config.frame_height = env_u32("FACELOG_FRAME_HEIGHT", config.frame_height);
        config.detector.scale_factor =
            env_f64("FACELOG_SCALE_FACTOR", config.detector.scale_factor);
        config.detector.min_neighbors =
            env_u32("FACELOG_MIN_NEIGHBORS", config.detector.min_neighbors);
        let min_face = env_u32("FACELOG_MIN_FACE_SIZE", config.detector.min_size.0);
        config.detector.min_size = (min_face, min_face);
        config.match_threshold = env_f64("FACELOG_MATCH_THRESHOLD", config.match_threshold);

        config
    }

    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            dataset_dir: data_dir.join("dataset"),
            model_dir: data_dir.join("model"),
            attendance_dir: data_dir.join("attendance"),
            data_dir,
            cascade_path: default_cascade_path(),
            camera_device: "/dev/video0".to_string(),
            frame_width: 640,
            frame_height: 480,
            detector: DetectorParams::default(),
            samples_default: 100,
            lbph: LbphParams::default(),
            match_threshold: 70.0,
        }
    }

    /// Path to the ID → name JSON side-table.
    pub fn label_map_path(&self) -> PathBuf {
        self.model_dir.join(LABEL_MAP_FILE)
    }

    /// Path to the serialized LBPH model.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE)
    }

    /// Per-user dataset directory (not created).
    pub fn dataset_dir_for(&self, user_id: u32) -> PathBuf {
        self.dataset_dir.join(user_id.to_string())
    }

    /// Attendance CSV for a calendar day.
    pub fn attendance_path_for(&self, date: NaiveDate) -> PathBuf {
        self.attendance_dir
            .join(format!("attendance_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Attendance CSV for the current local date.
    pub fn today_attendance_path(&self) -> PathBuf {
        self.attendance_path_for(Local::now().date_naive())
    }
}

/// Locate OpenCV's bundled frontal-face cascade.
///
/// Returns the first candidate that exists, or the primary opencv4 location
/// so the detector reports a precise not-found path.
pub fn default_cascade_path() -> PathBuf {
    CASCADE_CANDIDATES
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new(CASCADE_CANDIDATES[0]))
        .to_path_buf()
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
