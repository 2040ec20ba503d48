//! Export module
//!
//! Writes trained models in the TensorFlow.js layers-model format so the
//! browser client can load them with `tf.loadLayersModel`.

pub mod tfjs;

use std::path::Path;

use burn::tensor::backend::Backend;
use tracing::{info, warn};

use crate::model::cnn::{EmotionCnn, EmotionCnnConfig};
use crate::training::checkpoint::{checkpoint_exists, load_checkpoint};
use crate::utils::error::Result;

pub use tfjs::{export_tfjs, model_topology, ExportSummary, ModelJson, MODEL_FILE, SHARD_FILE};

/// Export the checkpoint at `model_path`
pub fn export_checkpoint<B: Backend>(
    model_path: &Path,
    fallback: &EmotionCnnConfig,
    out_dir: &Path,
    device: &B::Device,
) -> Result<ExportSummary> {
    let (model, metadata) = load_checkpoint::<B>(model_path, fallback, device)?;
    info!(
        "Exporting checkpoint from epoch {} (val_accuracy {:.4})",
        metadata.epoch + 1,
        metadata.val_accuracy
    );
    export_tfjs(&model, &metadata.model, out_dir)
}

/// Export the best checkpoint, or `final_model` when none was written
pub fn export_best_or_final<B: Backend>(
    model_path: &Path,
    final_model: &EmotionCnn<B>,
    config: &EmotionCnnConfig,
    out_dir: &Path,
    device: &B::Device,
) -> Result<ExportSummary> {
    if checkpoint_exists(model_path) {
        export_checkpoint::<B>(model_path, config, out_dir, device)
    } else {
        warn!("No checkpoint at {:?}, exporting the final model", model_path);
        export_tfjs(final_model, config, out_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;
    use crate::training::checkpoint::{save_checkpoint, CheckpointMetadata};
    use burn::module::Module;

    type TestBackend = InferenceBackend;

    fn config() -> EmotionCnnConfig {
        EmotionCnnConfig::new()
            .with_input_size(8)
            .with_base_filters(2)
            .with_dense_units(4)
    }

    #[test]
    fn test_falls_back_to_final_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = EmotionCnn::<TestBackend>::new(&config(), &device);
        let out = dir.path().join("web");

        let summary =
            export_best_or_final(&dir.path().join("missing"), &model, &config(), &out, &device)
                .unwrap();
        assert!(summary.model_json.is_file());
        assert!(out.join(SHARD_FILE).is_file());
    }

    #[test]
    fn test_exports_checkpoint_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let path = dir.path().join("emotion_model");
        let saved = EmotionCnn::<TestBackend>::new(&config(), &device);
        save_checkpoint(&saved, &path, &CheckpointMetadata::untrained(&config())).unwrap();

        // a model with another architecture must be ignored
        let other_config = config().with_dense_units(6);
        let other = EmotionCnn::<TestBackend>::new(&other_config, &device);
        let summary =
            export_best_or_final(&path, &other, &other_config, &dir.path().join("web"), &device)
                .unwrap();
        assert_eq!(summary.num_params, saved.num_params());
    }

    #[test]
    fn test_exported_shard_matches_saved_weights_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let path = dir.path().join("emotion_model");
        let out = dir.path().join("web");
        let saved = EmotionCnn::<TestBackend>::new(&config(), &device);
        save_checkpoint(&saved, &path, &CheckpointMetadata::untrained(&config())).unwrap();

        let final_model = EmotionCnn::<TestBackend>::new(&config(), &device);
        export_best_or_final(&path, &final_model, &config(), &out, &device).unwrap();

        let shard = std::fs::read(out.join(SHARD_FILE)).unwrap();
        let expected: Vec<u32> = tfjs::extract_weights(&saved, &config())
            .unwrap()
            .iter()
            .flat_map(|w| w.data.iter().map(|v| v.to_bits()))
            .collect();
        let written: Vec<u32> = shard
            .chunks_exact(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(written.len(), saved.num_params());
        assert_eq!(written, expected);
    }
}
