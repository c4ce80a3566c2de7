use crate::session::StopReason;
use anyhow::{Context, Result};
use chrono::Local;
use facelog_core::store::{self, StoreError};
use facelog_core::{detect_faces, preprocess_face, Config, FaceDetector};
use facelog_hw::{FrameSource, Overlay, Preview, Tone};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub saved: usize,
    pub stop: StopReason,
}

/// Record `user_id -> name` in the label map and return the user's dataset directory.
///
/// An existing entry for the same ID is renamed.
pub fn register_user(config: &Config, user_id: u32, name: &str) -> Result<PathBuf, StoreError> {
    let mut labels = store::load_label_map_or_default(config)?;
    match labels.insert(user_id, name.to_string()) {
        Some(previous) if previous != name => {
            tracing::warn!(user_id, previous = %previous, name, "renaming existing user");
        }
        Some(_) => tracing::info!(user_id, name, "user already registered, adding samples"),
        None => tracing::info!(user_id, name, "registered new user"),
    }
    store::save_label_map(config, &labels)?;
    store::dataset_dir_for_user(config, user_id)
}

/// Save every detected face as a training sample until `samples` have been
/// written, the operator quits, or the source stops producing frames.
///
/// A frame with several faces saves all of them, so the final count can
/// overshoot `samples`.
pub fn record<D, S, P>(
    dataset_dir: &Path,
    user_id: u32,
    samples: usize,
    detector: &D,
    source: &mut S,
    preview: &mut P,
) -> Result<CaptureSummary>
where
    D: FaceDetector + ?Sized,
    S: FrameSource + ?Sized,
    P: Preview + ?Sized,
{
    let mut saved = 0usize;

    let stop = loop {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to read frame");
                break StopReason::SourceEnded;
            }
        };

        let faces = detect_faces(&frame.image, detector);
        let mut overlays = Vec::with_capacity(faces.len());
        for rect in &faces {
            let face = match preprocess_face(&frame.image, rect) {
                Ok(face) => face,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping face");
                    continue;
                }
            };
            let path = store::sample_path(dataset_dir, user_id, Local::now());
            face.save(&path)
                .with_context(|| format!("failed to write sample {}", path.display()))?;
            saved += 1;
            tracing::debug!(path = %path.display(), saved, "saved sample");

            overlays.push(Overlay::new(
                rect.x,
                rect.y,
                rect.width,
                rect.height,
                format!("Sample {saved}/{samples}"),
                Tone::Capture,
            ));
        }

        preview.show(&frame, &overlays)?;

        if saved >= samples {
            break StopReason::Completed;
        }
        if preview.quit_requested() {
            break StopReason::Quit;
        }
    };

    tracing::info!(user_id, saved, stop = ?stop, "capture finished");
    Ok(CaptureSummary { saved, stop })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{FixedDetector, RecordingPreview, ScriptedSource};
    use facelog_core::{FaceRect, FACE_SIZE};

    fn config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        store::ensure_dirs(&config).unwrap();
        (dir, config)
    }

    #[test]
    fn test_capture_three_samples_for_one_user() {
        let (_tmp, config) = config();
        let dataset = register_user(&config, 7, "Ana").unwrap();

        let detector = FixedDetector(vec![FaceRect::new(40, 30, 120, 120)]);
        let mut source = ScriptedSource::new(10);
        let mut preview = RecordingPreview::default();
        let summary = record(&dataset, 7, 3, &detector, &mut source, &mut preview).unwrap();

        assert_eq!(summary, CaptureSummary { saved: 3, stop: StopReason::Completed });
        assert_eq!(source.served, 3);

        let files = store::list_samples(&config.dataset_dir.join("7")).unwrap();
        assert_eq!(files.len(), 3);
        for file in &files {
            let name = file.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("7_") && name.ends_with(".png"), "{name}");
            let img = image::open(file).unwrap().to_luma8();
            assert_eq!(img.dimensions(), (FACE_SIZE, FACE_SIZE));
        }

        let raw = std::fs::read_to_string(config.label_map_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["7"], "Ana");

        let labels: Vec<_> = preview.shown.iter().flatten().map(|o| o.label.clone()).collect();
        assert_eq!(labels, ["Sample 1/3", "Sample 2/3", "Sample 3/3"]);
    }

    #[test]
    fn test_register_keeps_other_users_and_renames() {
        let (_tmp, config) = config();
        register_user(&config, 1, "Bo").unwrap();
        register_user(&config, 7, "Ana").unwrap();
        register_user(&config, 7, "Ana Maria").unwrap();

        let labels = store::load_label_map(&config).unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(labels[&1], "Bo");
        assert_eq!(labels[&7], "Ana Maria");
    }

    #[test]
    fn test_source_failure_stops_capture() {
        let (_tmp, config) = config();
        let dataset = register_user(&config, 2, "Cy").unwrap();
        let detector = FixedDetector(vec![FaceRect::new(0, 0, 50, 50)]);
        let mut source = ScriptedSource::new(2);
        let mut preview = RecordingPreview::default();

        let summary = record(&dataset, 2, 100, &detector, &mut source, &mut preview).unwrap();
        assert_eq!(summary, CaptureSummary { saved: 2, stop: StopReason::SourceEnded });
    }

    #[test]
    fn test_quit_stops_capture() {
        let (_tmp, config) = config();
        let dataset = register_user(&config, 3, "Di").unwrap();
        let detector = FixedDetector(Vec::new());
        let mut source = ScriptedSource::new(50);
        let mut preview = RecordingPreview { quit_after: Some(4), ..Default::default() };

        let summary = record(&dataset, 3, 5, &detector, &mut source, &mut preview).unwrap();
        assert_eq!(summary, CaptureSummary { saved: 0, stop: StopReason::Quit });
        assert_eq!(preview.shown.len(), 4);
    }

    #[test]
    fn test_every_face_in_a_frame_is_saved() {
        let (_tmp, config) = config();
        let dataset = register_user(&config, 4, "Ed").unwrap();
        let detector = FixedDetector(vec![FaceRect::new(0, 0, 60, 60), FaceRect::new(150, 100, 60, 60)]);
        let mut source = ScriptedSource::new(10);
        let mut preview = RecordingPreview::default();

        let summary = record(&dataset, 4, 3, &detector, &mut source, &mut preview).unwrap();
        assert_eq!(summary.saved, 4);
        assert_eq!(store::list_samples(&dataset).unwrap().len(), 4);
    }
}
