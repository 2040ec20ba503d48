//! Inference module
//!
//! Single-image and directory prediction with a trained checkpoint.

pub mod predictor;

pub use predictor::{PredictionResult, Predictor};
