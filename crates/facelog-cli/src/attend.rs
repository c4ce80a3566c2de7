use crate::session::StopReason;
use anyhow::{Context, Result};
use facelog_core::ledger;
use facelog_core::store::{self, StoreError};
use facelog_core::{detect_faces, preprocess_face, Config, FaceDetector, Identity, LabelMap, LbphRecognizer, Recognizer};
use facelog_hw::{FrameSource, Overlay, Preview, Tone};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendSummary {
    pub frames: usize,
    /// Faces accepted as an enrolled user (repeats included).
    pub recognitions: usize,
    /// New rows appended to a day-file.
    pub rows_written: usize,
}

/// Load the trained model and label map.
///
/// `Ok(None)` means a precondition is missing; the operator has been told and
/// the caller should return without touching the camera.
pub fn preflight(config: &Config) -> Result<Option<(LbphRecognizer, LabelMap)>> {
    let model_path = config.model_path();
    if !model_path.exists() {
        tracing::warn!(path = %model_path.display(), "model file missing");
        println!("Model not found. Train the model first");
        return Ok(None);
    }
    let recognizer = LbphRecognizer::load(&model_path)
        .with_context(|| format!("failed to load model {}", model_path.display()))?;

    let labels = match store::load_label_map(config) {
        Ok(labels) => labels,
        Err(StoreError::NotFound(path)) => {
            tracing::warn!(path = %path.display(), "label map missing");
            println!("Label map not found. Capture a user first");
            return Ok(None);
        }
        Err(e) => return Err(e).context("failed to load label map"),
    };
    Ok(Some((recognizer, labels)))
}

/// Recognize faces frame by frame and mark each accepted user once per day.
pub fn run<R, D, S, P>(
    config: &Config,
    recognizer: &R,
    labels: &LabelMap,
    detector: &D,
    source: &mut S,
    preview: &mut P,
) -> Result<(AttendSummary, StopReason)>
where
    R: Recognizer + ?Sized,
    D: FaceDetector + ?Sized,
    S: FrameSource + ?Sized,
    P: Preview + ?Sized,
{
    let mut summary = AttendSummary::default();

    let stop = loop {
        let frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to read frame");
                break StopReason::SourceEnded;
            }
        };
        summary.frames += 1;

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
            let prediction = recognizer.predict(&face)?;

            let (label, tone) = match Identity::resolve(&prediction, labels, config.match_threshold) {
                Identity::Known { user_id, name, distance } => {
                    summary.recognitions += 1;
                    // Recomputed per face so a session crossing midnight starts a new file.
                    let path = config.today_attendance_path();
                    let added = ledger::mark_attendance(&path, user_id, &name)
                        .with_context(|| format!("failed to update {}", path.display()))?;
                    if added {
                        summary.rows_written += 1;
                        tracing::info!(user_id, name = %name, distance, "attendance marked");
                    }
                    (format!("{name} ({distance:.1})"), Tone::Recognized)
                }
                Identity::Unknown { distance } => {
                    tracing::debug!(label = prediction.label, distance, "unknown face");
                    ("Unknown".to_string(), Tone::Unknown)
                }
            };
            overlays.push(Overlay::new(rect.x, rect.y, rect.width, rect.height, label, tone));
        }

        preview.show(&frame, &overlays)?;
        if preview.quit_requested() {
            break StopReason::Quit;
        }
    };

    tracing::info!(
        frames = summary.frames,
        recognitions = summary.recognitions,
        rows = summary.rows_written,
        "attendance session finished"
    );
    Ok((summary, stop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{FixedDetector, FixedRecognizer, RecordingPreview, ScriptedSource};
    use facelog_core::{FaceRect, Prediction};

    fn setup() -> (tempfile::TempDir, Config, LabelMap) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        store::ensure_dirs(&config).unwrap();
        let labels = LabelMap::from([(7, "Ana".to_string())]);
        store::save_label_map(&config, &labels).unwrap();
        (dir, config, labels)
    }

    fn session(
        config: &Config,
        labels: &LabelMap,
        distance: f64,
        frames: usize,
    ) -> (AttendSummary, StopReason, RecordingPreview) {
        let recognizer = FixedRecognizer(Prediction { label: 7, distance });
        let detector = FixedDetector(vec![FaceRect::new(60, 40, 120, 120)]);
        let mut source = ScriptedSource::new(frames);
        let mut preview = RecordingPreview::default();
        let (summary, stop) = run(config, &recognizer, labels, &detector, &mut source, &mut preview).unwrap();
        (summary, stop, preview)
    }

    #[test]
    fn test_confident_match_is_marked_once() {
        let (_tmp, config, labels) = setup();
        let (summary, stop, preview) = session(&config, &labels, 40.0, 1);
        assert_eq!(summary.rows_written, 1);
        assert_eq!(stop, StopReason::SourceEnded);
        assert_eq!(preview.shown[0][0].label, "Ana (40.0)");
        assert_eq!(preview.shown[0][0].tone, Tone::Recognized);

        // second session the same day: recognized again, no new row
        let (summary, _, _) = session(&config, &labels, 40.0, 1);
        assert_eq!(summary.recognitions, 1);
        assert_eq!(summary.rows_written, 0);

        let records = ledger::read_attendance(&config.today_attendance_path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!((records[0].user_id, records[0].name.as_str()), (7, "Ana"));
    }

    #[test]
    fn test_repeated_frames_write_one_row() {
        let (_tmp, config, labels) = setup();
        let (summary, _, _) = session(&config, &labels, 12.5, 5);
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.recognitions, 5);
        assert_eq!(summary.rows_written, 1);
    }

    #[test]
    fn test_distant_match_is_unknown() {
        let (_tmp, config, labels) = setup();
        let (summary, _, preview) = session(&config, &labels, 85.0, 1);
        assert_eq!(summary.recognitions, 0);
        assert_eq!(summary.rows_written, 0);
        assert_eq!(preview.shown[0][0].label, "Unknown");
        assert!(!config.today_attendance_path().exists());
    }

    #[test]
    fn test_label_missing_from_map_is_unknown() {
        let (_tmp, config, _) = setup();
        let (summary, _, preview) = session(&config, &LabelMap::new(), 10.0, 1);
        assert_eq!(summary.rows_written, 0);
        assert_eq!(preview.shown[0][0].label, "Unknown");
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (_tmp, config, labels) = setup();
        let (summary, _, _) = session(&config, &labels, config.match_threshold, 1);
        assert_eq!(summary.rows_written, 1);
    }

    #[test]
    fn test_preflight_without_model_returns_early() {
        let (_tmp, config, _) = setup();
        assert!(preflight(&config).unwrap().is_none());
    }

    #[test]
    fn test_preflight_without_label_map_returns_early() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        store::ensure_dirs(&config).unwrap();
        let mut model = LbphRecognizer::new(config.lbph).unwrap();
        model
            .train(&[(image::GrayImage::from_pixel(32, 32, image::Luma([9])), 1)])
            .unwrap();
        model.save(&config.model_path()).unwrap();

        assert!(preflight(&config).unwrap().is_none());
        store::save_label_map(&config, &LabelMap::from([(1, "Fay".to_string())])).unwrap();
        let (loaded, labels) = preflight(&config).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(labels[&1], "Fay");
    }
}
