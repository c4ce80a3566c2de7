use anyhow::{bail, Context, Result};
use facelog_core::store;
use facelog_core::{Config, LbphRecognizer};
use image::GrayImage;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainSummary {
    pub images: usize,
    /// Samples loaded per user ID.
    pub per_user: BTreeMap<u32, usize>,
}

/// Load every decodable sample under the dataset directory as `(image, user_id)`.
pub fn collect_training_data(config: &Config) -> Result<(Vec<(GrayImage, u32)>, BTreeMap<u32, usize>)> {
    let mut samples = Vec::new();
    let mut per_user = BTreeMap::new();

    for (user_id, dir) in store::list_user_dirs(config)? {
        let mut loaded = 0usize;
        for path in store::list_samples(&dir)? {
            match image::open(&path) {
                Ok(img) => {
                    samples.push((img.to_luma8(), user_id));
                    loaded += 1;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable sample"),
            }
        }
        per_user.insert(user_id, loaded);
    }

    Ok((samples, per_user))
}

/// Train one LBPH model over the whole dataset and overwrite the model file.
pub fn run(config: &Config) -> Result<TrainSummary> {
    store::ensure_dirs(config)?;

    let (samples, per_user) = collect_training_data(config)?;
    for (user_id, count) in &per_user {
        tracing::info!(user_id, samples = count, "loaded training samples");
    }
    if samples.is_empty() {
        bail!("no training images found in {}", config.dataset_dir.display());
    }

    let mut recognizer = LbphRecognizer::new(config.lbph)?;
    recognizer.train(&samples).context("training failed")?;

    let path = config.model_path();
    recognizer
        .save(&path)
        .with_context(|| format!("failed to write model {}", path.display()))?;
    tracing::info!(path = %path.display(), images = samples.len(), users = per_user.len(), "model trained");

    Ok(TrainSummary {
        images: samples.len(),
        per_user,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelog_core::Recognizer;
    use image::Luma;

    fn config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        (dir, config)
    }

    fn stripes(period: u32) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| Luma([if (x / period) % 2 == 0 { 230 } else { 20 }]))
    }

    #[test]
    fn test_no_images_is_fatal_and_writes_nothing() {
        let (_tmp, config) = config();
        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("no training images found"), "{err}");
        assert!(!config.model_path().exists());
    }

    #[test]
    fn test_empty_user_dirs_are_still_fatal() {
        let (_tmp, config) = config();
        store::dataset_dir_for_user(&config, 7).unwrap();
        assert!(run(&config).is_err());
        assert!(!config.model_path().exists());
    }

    #[test]
    fn test_trains_on_all_users_and_skips_bad_files() {
        let (_tmp, config) = config();
        let ana = store::dataset_dir_for_user(&config, 7).unwrap();
        let bo = store::dataset_dir_for_user(&config, 9).unwrap();
        stripes(2).save(ana.join("7_a.png")).unwrap();
        stripes(2).save(ana.join("7_b.png")).unwrap();
        std::fs::write(ana.join("7_c.png"), b"garbage").unwrap();
        stripes(16).save(bo.join("9_a.png")).unwrap();

        let summary = run(&config).unwrap();
        assert_eq!(summary.images, 3);
        assert_eq!(summary.per_user, BTreeMap::from([(7, 2), (9, 1)]));

        let model = LbphRecognizer::load(&config.model_path()).unwrap();
        assert_eq!(model.len(), 3);
        let prediction = model.predict(&stripes(16)).unwrap();
        assert_eq!(prediction.label, 9);
        assert!(prediction.distance < 1e-6, "{}", prediction.distance);
    }
}
