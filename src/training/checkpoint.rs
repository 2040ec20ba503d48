//! Model checkpoints
//!
//! Weights are written at full precision with Burn's named MessagePack
//! recorder (`<path>.mpk`), so an exported checkpoint carries exactly the
//! trained f32 values. A JSON
//! sidecar (`<path>.json`) records the architecture and the metrics of the
//! saved epoch so the model can be rebuilt without the run configuration.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::Backend,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::default_class_names;
use crate::model::cnn::{EmotionCnn, EmotionCnnConfig};
use crate::training::history::EpochRecord;
use crate::utils::error::{EmotionError, Result};

/// Sidecar written next to every checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// Zero-based epoch the weights come from
    pub epoch: usize,
    pub val_accuracy: f64,
    pub val_loss: f64,
    pub learning_rate: f64,
    /// RFC 3339 local time
    pub timestamp: String,
    pub model: EmotionCnnConfig,
    pub class_names: Vec<String>,
    pub version: String,
}

impl CheckpointMetadata {
    pub fn new(record: &EpochRecord, model: &EmotionCnnConfig, class_names: &[String]) -> Self {
        Self {
            epoch: record.epoch,
            val_accuracy: record.val_accuracy,
            val_loss: record.val_loss,
            learning_rate: record.learning_rate,
            timestamp: Local::now().to_rfc3339(),
            model: model.clone(),
            class_names: class_names.to_vec(),
            version: crate::VERSION.to_string(),
        }
    }

    /// Metadata for a model that has no training record
    pub fn untrained(model: &EmotionCnnConfig) -> Self {
        Self {
            epoch: 0,
            val_accuracy: 0.0,
            val_loss: 0.0,
            learning_rate: 0.0,
            timestamp: Local::now().to_rfc3339(),
            model: model.clone(),
            class_names: default_class_names(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Recorder for checkpoint weights
pub type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Extension the recorder appends to checkpoint paths
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// Path of the weight file the recorder writes for `path`
pub fn weights_path(path: &Path) -> PathBuf {
    path.with_extension(WEIGHTS_EXTENSION)
}

pub fn metadata_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}

pub fn checkpoint_exists(path: &Path) -> bool {
    weights_path(path).is_file()
}

pub fn save_checkpoint<B: Backend>(
    model: &EmotionCnn<B>,
    path: &Path,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let recorder = CheckpointRecorder::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| EmotionError::Model(format!("Failed to save model: {:?}", e)))?;

    std::fs::write(metadata_path(path), serde_json::to_string_pretty(metadata)?)?;
    debug!("Checkpoint written to {:?}", weights_path(path));
    Ok(())
}

pub fn load_metadata(path: &Path) -> Result<Option<CheckpointMetadata>> {
    let meta = metadata_path(path);
    if !meta.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(meta)?;
    Ok(Some(serde_json::from_str(&text)?))
}

/// Rebuild a model from a checkpoint
///
/// The architecture comes from the sidecar when present and falls back to
/// `fallback` otherwise.
pub fn load_checkpoint<B: Backend>(
    path: &Path,
    fallback: &EmotionCnnConfig,
    device: &B::Device,
) -> Result<(EmotionCnn<B>, CheckpointMetadata)> {
    if !checkpoint_exists(path) {
        return Err(EmotionError::PathNotFound(weights_path(path)));
    }
    info!("Loading checkpoint from {:?}", weights_path(path));

    let metadata = load_metadata(path)?.unwrap_or_else(|| CheckpointMetadata::untrained(fallback));
    metadata.model.validate().map_err(EmotionError::Model)?;

    let recorder = CheckpointRecorder::new();
    let model = EmotionCnn::<B>::new(&metadata.model, device)
        .load_file(path, &recorder, device)
        .map_err(|e| EmotionError::Model(format!("Failed to load model: {:?}", e)))?;

    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;
    use burn::tensor::Tensor;

    type TestBackend = InferenceBackend;

    fn small_config() -> EmotionCnnConfig {
        EmotionCnnConfig::new()
            .with_input_size(16)
            .with_base_filters(2)
            .with_dense_units(4)
    }

    fn record() -> EpochRecord {
        EpochRecord {
            epoch: 3,
            loss: 1.1,
            accuracy: 0.55,
            val_loss: 1.2,
            val_accuracy: 0.5,
            learning_rate: 1e-3,
            duration_secs: 1.0,
        }
    }

    #[test]
    fn test_paths() {
        let p = Path::new("out/models/emotion_model");
        assert_eq!(weights_path(p), PathBuf::from("out/models/emotion_model.mpk"));
        assert_eq!(metadata_path(p), PathBuf::from("out/models/emotion_model.json"));
    }

    #[test]
    fn test_save_then_load_restores_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("emotion_model");
        let device = Default::default();
        let config = small_config();
        let model = EmotionCnn::<TestBackend>::new(&config, &device);

        let names = default_class_names();
        save_checkpoint(&model, &path, &CheckpointMetadata::new(&record(), &config, &names)).unwrap();
        assert!(checkpoint_exists(&path));

        // fallback deliberately differs; the sidecar must win
        let (loaded, meta) =
            load_checkpoint::<TestBackend>(&path, &EmotionCnnConfig::new(), &device).unwrap();
        assert_eq!(meta.epoch, 3);
        assert_eq!(meta.model.input_size, 16);
        assert_eq!(meta.class_names, names);

        let input = Tensor::<TestBackend, 4>::ones([1, 1, 16, 16], &device);
        let a = model.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
        let b = loaded.forward(input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nothing");
        assert!(!checkpoint_exists(&path));
        assert!(load_checkpoint::<TestBackend>(&path, &small_config(), &Default::default()).is_err());
    }
}
