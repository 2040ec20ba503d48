//! Run Configuration
//!
//! Hyperparameters, callback settings and paths for one training run.
//! Every field has a default, so a config file only needs the values it
//! changes. Files are read as TOML or JSON depending on their extension.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::model::cnn::EmotionCnnConfig;
use crate::training::callbacks::{Mode, Monitor};
use crate::utils::error::{EmotionError, Result};

fn default_model_config() -> EmotionCnnConfig {
    EmotionCnnConfig::new()
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Dataset root holding `train/` and `test/` class trees
    pub data_dir: PathBuf,

    /// History, chart and evaluation files
    pub output_dir: PathBuf,

    /// Best checkpoint, without extension
    pub model_path: PathBuf,

    /// Target directory of the web export
    pub web_model_dir: PathBuf,

    pub epochs: usize,
    pub batch_size: usize,

    /// Initial Adam learning rate
    pub learning_rate: f64,

    /// Seeds shuffling and augmentation
    pub seed: u64,

    #[serde(default = "default_model_config")]
    pub model: EmotionCnnConfig,

    pub augmentation: AugmentationConfig,
    pub checkpoint: CheckpointConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub reduce_lr: ReduceLrConfig,

    /// Export the best checkpoint once training finishes
    pub export_after_training: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/FER2013"),
            output_dir: PathBuf::from("output"),
            model_path: PathBuf::from("output/models/emotion_model"),
            web_model_dir: PathBuf::from("output/web_model"),
            epochs: 50,
            batch_size: 64,
            learning_rate: 1e-3,
            seed: 42,
            model: default_model_config(),
            augmentation: AugmentationConfig::default(),
            checkpoint: CheckpointConfig::default(),
            early_stopping: EarlyStoppingConfig::default(),
            reduce_lr: ReduceLrConfig::default(),
            export_after_training: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub monitor: Monitor,
    pub mode: Mode,
    pub save_best_only: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValAccuracy,
            mode: Mode::Max,
            save_best_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub enabled: bool,
    pub monitor: Monitor,
    pub patience: usize,
    pub min_delta: f64,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor: Monitor::ValLoss,
            patience: 10,
            min_delta: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReduceLrConfig {
    pub enabled: bool,
    pub monitor: Monitor,
    /// Multiplier applied on a plateau, in (0, 1)
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
    pub cooldown: usize,
}

impl Default for ReduceLrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            monitor: Monitor::ValLoss,
            factor: 0.1,
            patience: 5,
            min_lr: 1e-5,
            min_delta: 1e-4,
            cooldown: 0,
        }
    }
}

impl TrainingConfig {
    /// Short run for smoke tests
    pub fn debug() -> Self {
        Self {
            epochs: 2,
            batch_size: 16,
            export_after_training: false,
            ..Self::default()
        }
    }

    pub fn train_dir(&self) -> PathBuf {
        self.data_dir.join("train")
    }

    pub fn test_dir(&self) -> PathBuf {
        self.data_dir.join("test")
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(EmotionError::Config(msg.to_string()));

        if self.epochs == 0 {
            return fail("epochs must be greater than 0");
        }
        if self.batch_size == 0 {
            return fail("batch_size must be greater than 0");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail("learning_rate must be positive");
        }
        if !(self.reduce_lr.factor > 0.0 && self.reduce_lr.factor < 1.0) {
            return fail("reduce_lr.factor must be in (0, 1)");
        }
        if self.reduce_lr.min_lr < 0.0 {
            return fail("reduce_lr.min_lr must be non-negative");
        }
        if self.early_stopping.min_delta < 0.0 || self.reduce_lr.min_delta < 0.0 {
            return fail("min_delta must be non-negative");
        }
        self.model.validate().map_err(EmotionError::Config)?;
        self.augmentation.validate().map_err(EmotionError::Config)?;
        Ok(())
    }

    /// Load from `.toml` or `.json`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(EmotionError::PathNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = match extension(path).as_str() {
            "toml" => toml::from_str(&text)?,
            "json" => serde_json::from_str(&text)?,
            other => {
                return Err(EmotionError::Config(format!(
                    "unsupported config format '{}' (expected .toml or .json)",
                    other
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Save as `.toml` or `.json`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = match extension(path).as_str() {
            "toml" => toml::to_string_pretty(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            other => {
                return Err(EmotionError::Config(format!(
                    "unsupported config format '{}' (expected .toml or .json)",
                    other
                )))
            }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, text)?;
        Ok(())
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 50);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.learning_rate, 1e-3);
        assert_eq!(config.checkpoint.monitor, Monitor::ValAccuracy);
        assert_eq!(config.early_stopping.patience, 10);
        assert_eq!(config.reduce_lr.patience, 5);
        assert_eq!(config.reduce_lr.min_lr, 1e-5);
        assert_eq!(config.train_dir(), PathBuf::from("data/FER2013/train"));
        assert_eq!(config.test_dir(), PathBuf::from("data/FER2013/test"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TrainingConfig::default();
        config.epochs = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.reduce_lr.factor = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.model.input_size = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            "epochs = 3\n\n[reduce_lr]\npatience = 2\n\n[early_stopping]\nmonitor = \"val_accuracy\"\n",
        )
        .unwrap();

        let config = TrainingConfig::load(&path).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.reduce_lr.patience, 2);
        assert_eq!(config.reduce_lr.factor, 0.1);
        assert_eq!(config.early_stopping.monitor, Monitor::ValAccuracy);
        assert_eq!(config.model.num_classes, 7);
    }

    #[test]
    fn test_save_and_load_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TrainingConfig::default();
        config.seed = 7;
        config.augmentation.horizontal_flip = false;

        for name in ["cfg.toml", "cfg.json"] {
            let path = dir.path().join(name);
            config.save(&path).unwrap();
            let loaded = TrainingConfig::load(&path).unwrap();
            assert_eq!(loaded.seed, 7);
            assert!(!loaded.augmentation.horizontal_flip);
        }
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.yaml");
        std::fs::write(&path, "epochs: 1").unwrap();
        assert!(TrainingConfig::load(&path).is_err());
        assert!(matches!(
            TrainingConfig::load(dir.path().join("missing.toml")),
            Err(EmotionError::PathNotFound(_))
        ));
    }
}
