//! Inference Predictor Module
//!
//! Loads a checkpoint and classifies face images the same way the browser
//! client does with the exported model: grayscale, resize, rescale, softmax.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::dataset::augmentation::rescale_image;
use crate::dataset::{default_class_names, emotion_name};
use crate::dataset::loader::{is_image_file, load_grayscale};
use crate::model::cnn::{EmotionCnn, EmotionCnnConfig};
use crate::training::checkpoint::load_checkpoint;
use crate::utils::error::{EmotionError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub image_path: Option<PathBuf>,
    pub predicted_class: usize,
    pub label: String,
    /// Probability of the predicted class
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    /// All classes, most likely first
    pub ranked: Vec<(String, f32)>,
    pub inference_time_ms: f64,
}

impl PredictionResult {
    pub fn new(
        probabilities: Vec<f32>,
        class_names: &[String],
        inference_time: Duration,
        image_path: Option<PathBuf>,
    ) -> Self {
        let name = |idx: usize| {
            class_names
                .get(idx)
                .cloned()
                .or_else(|| emotion_name(idx).map(String::from))
                .unwrap_or_else(|| format!("class_{}", idx))
        };

        let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (predicted_class, confidence) = indexed.first().copied().unwrap_or((0, 0.0));
        let ranked = indexed.iter().map(|&(idx, p)| (name(idx), p)).collect();

        Self {
            image_path,
            predicted_class,
            label: name(predicted_class),
            confidence,
            probabilities,
            ranked,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    pub fn display(&self) -> String {
        let mut output = String::new();
        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {:?}\n", path));
        }
        output.push_str(&format!(
            "Prediction: {} ({:.2}%)\n",
            self.label,
            self.confidence * 100.0
        ));
        for (name, p) in &self.ranked {
            output.push_str(&format!("  {:<12} {:>6.2}%\n", name, p * 100.0));
        }
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));
        output
    }
}

/// A loaded model plus its label list
pub struct Predictor<B: Backend> {
    model: EmotionCnn<B>,
    class_names: Vec<String>,
    image_size: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: EmotionCnn<B>, class_names: Vec<String>, image_size: usize, device: B::Device) -> Self {
        Self {
            model,
            class_names,
            image_size,
            device,
        }
    }

    /// Load from a checkpoint written during training
    pub fn load(model_path: &Path, device: &B::Device) -> Result<Self> {
        let (model, metadata) = load_checkpoint::<B>(model_path, &EmotionCnnConfig::new(), device)?;
        let class_names = if metadata.class_names.len() == metadata.model.num_classes {
            metadata.class_names
        } else {
            default_class_names()
        };
        Ok(Self::new(model, class_names, metadata.model.input_size, device.clone()))
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Class probabilities for preprocessed pixels in `[0, 1]`
    pub fn predict_pixels(&self, pixels: Vec<f32>) -> Result<Vec<f32>> {
        let expected = self.image_size * self.image_size;
        if pixels.len() != expected {
            return Err(EmotionError::InvalidInput(format!(
                "expected {} pixels, got {}",
                expected,
                pixels.len()
            )));
        }

        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(pixels, [1, 1, self.image_size, self.image_size]),
            &self.device,
        );
        self.model
            .forward_softmax(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| EmotionError::Inference(format!("{:?}", e)))
    }

    pub fn predict_image(&self, path: &Path) -> Result<PredictionResult> {
        let image = load_grayscale(path, self.image_size as u32)?;
        let start = Instant::now();
        let probabilities = self.predict_pixels(rescale_image(&image))?;
        Ok(PredictionResult::new(
            probabilities,
            &self.class_names,
            start.elapsed(),
            Some(path.to_path_buf()),
        ))
    }

    /// Predict every image under `dir`, in sorted order
    ///
    /// Unreadable images are reported as errors next to their path.
    pub fn predict_dir(&self, dir: &Path) -> Result<Vec<(PathBuf, Result<PredictionResult>)>> {
        if !dir.is_dir() {
            return Err(EmotionError::PathNotFound(dir.to_path_buf()));
        }
        Ok(WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
            .map(|e| {
                let path = e.path().to_path_buf();
                let result = self.predict_image(&path);
                (path, result)
            })
            .collect())
    }
}
