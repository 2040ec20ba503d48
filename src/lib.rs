//! # FER Emotion
//!
//! A Rust library for facial emotion recognition on FER2013-style data using the Burn framework.
//! Trains a compact CNN on 48x48 grayscale face crops and exports it as a TensorFlow.js
//! layers-model for in-browser inference.
//!
//! ## Features
//!
//! - **Directory datasets** with one sub-folder per emotion, sorted alphabetically into labels
//! - **Keras-style augmentation**: rotation, shifts, shear, zoom and horizontal flips
//! - **Training callbacks**: best-model checkpointing, early stopping, LR reduction on plateau
//! - **Web export** to `model.json` + binary weight shard
//!
//! ## Modules
//!
//! - `dataset`: Directory loading, augmentation and Burn batching
//! - `model`: The emotion CNN and run configuration
//! - `training`: Fit loop, callbacks, history and evaluation
//! - `export`: TensorFlow.js layers-model writer
//! - `inference`: Single-image prediction
//! - `utils`: Logging, metrics, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fer_emotion::dataset::FerDataset;
//! use fer_emotion::model::cnn::{EmotionCnn, EmotionCnnConfig};
//!
//! let train = FerDataset::new("data/FER2013/train")?;
//! let model = EmotionCnn::<MyBackend>::new(&EmotionCnnConfig::new(), &device);
//! ```

pub mod backend;
pub mod dataset;
pub mod export;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{
    AugmentingBatcher, FerBatch, FerBatcher, FerDataset, FerImageDataset, FerItem,
};
pub use inference::predictor::{PredictionResult, Predictor};
pub use model::cnn::{EmotionCnn, EmotionCnnConfig};
pub use model::config::TrainingConfig;
pub use training::history::TrainingHistory;
pub use utils::error::{EmotionError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Number of emotion categories in FER2013
pub const NUM_CLASSES: usize = 7;

/// Side length of the square grayscale input images
pub const IMAGE_SIZE: usize = 48;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
