//! File-backed state: data directories, the label map, and dataset samples.

use crate::config::Config;
use crate::types::LabelMap;
use chrono::{DateTime, Local};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions (lowercase) recognised as dataset images.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed label map {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create the data, dataset, model and attendance directories if missing.
pub fn ensure_dirs(config: &Config) -> Result<(), StoreError> {
    for dir in [
        &config.data_dir,
        &config.dataset_dir,
        &config.model_dir,
        &config.attendance_dir,
    ] {
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    }
    Ok(())
}

/// Return the dataset directory for `user_id`, creating it if needed.
pub fn dataset_dir_for_user(config: &Config, user_id: u32) -> Result<PathBuf, StoreError> {
    let dir = config.dataset_dir_for(user_id);
    std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
    Ok(dir)
}

/// Overwrite the label-map file with `labels`.
pub fn save_label_map(config: &Config, labels: &LabelMap) -> Result<(), StoreError> {
    let path = config.label_map_path();
    let json = serde_json::to_string_pretty(labels).map_err(|source| StoreError::Json {
        path: path.clone(),
        source,
    })?;
    write_atomic(&path, json.as_bytes())?;
    tracing::debug!(path = %path.display(), users = labels.len(), "label map saved");
    Ok(())
}

/// Load the label-map file. Fails with [`StoreError::NotFound`] if it is absent.
pub fn load_label_map(config: &Config) -> Result<LabelMap, StoreError> {
    let path = config.label_map_path();
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path));
        }
        Err(e) => return Err(StoreError::io(&path, e)),
    };
    serde_json::from_str(&text).map_err(|source| StoreError::Json { path, source })
}

/// Load the label map, or an empty one if none has been saved yet.
pub fn load_label_map_or_default(config: &Config) -> Result<LabelMap, StoreError> {
    match load_label_map(config) {
        Err(StoreError::NotFound(_)) => Ok(LabelMap::new()),
        other => other,
    }
}

/// Unique sample path `<dir>/<user_id>_<YYYYmmdd_HHMMSS_ffffff>.png`.
///
/// A `-<n>` suffix is appended when two samples land in the same microsecond.
pub fn sample_path(dir: &Path, user_id: u32, now: DateTime<Local>) -> PathBuf {
    let stem = format!("{user_id}_{}", now.format("%Y%m%d_%H%M%S_%6f"));
    let mut path = dir.join(format!("{stem}.png"));
    let mut n = 1u32;
    while path.exists() {
        path = dir.join(format!("{stem}-{n}.png"));
        n += 1;
    }
    path
}

/// Numerically-named user directories under the dataset root, sorted by ID.
pub fn list_user_dirs(config: &Config) -> Result<Vec<(u32, PathBuf)>, StoreError> {
    let root = &config.dataset_dir;
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(root, e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name();
        match name.to_str().and_then(|n| n.parse::<u32>().ok()) {
            Some(user_id) => dirs.push((user_id, path)),
            None => tracing::warn!(path = %path.display(), "skipping non-numeric dataset directory"),
        }
    }
    dirs.sort_by_key(|(id, _)| *id);
    Ok(dirs)
}

/// Image files directly inside `dir`, sorted by name.
pub fn list_samples(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Replace `path` with `bytes` via a temp file in the same directory and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
    tmp.as_file().sync_all().map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}
