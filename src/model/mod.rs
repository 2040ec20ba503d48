//! Model module
//!
//! - `cnn`: the emotion CNN built with Burn
//! - `config`: run configuration (hyperparameters, callbacks, paths)

pub mod cnn;
pub mod config;

pub use cnn::{EmotionCnn, EmotionCnnConfig};
pub use config::TrainingConfig;
