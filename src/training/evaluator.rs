//! Model evaluation
//!
//! Runs the inference (non-autodiff) model over a decoded split and collects
//! the loss, accuracy and per-sample predictions.

use std::path::Path;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use tracing::{debug, info};

use crate::dataset::burn_dataset::{FerBatch, FerBatcher, FerImageDataset};
use crate::model::cnn::EmotionCnn;
use crate::utils::error::{EmotionError, Result};
use crate::utils::metrics::{Metrics, RunningMean};

/// Loss, accuracy and raw predictions over a split
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Sample-weighted mean cross-entropy
    pub loss: f64,
    pub accuracy: f64,
    pub predictions: Vec<usize>,
    pub labels: Vec<usize>,
}

impl Evaluation {
    pub fn num_samples(&self) -> usize {
        self.labels.len()
    }

    pub fn metrics(&self, num_classes: usize, class_names: &[String]) -> Result<Metrics> {
        Metrics::from_predictions(
            &self.predictions,
            &self.labels,
            num_classes,
            class_names,
            self.loss,
        )
    }
}

/// Number of correct predictions in a batch
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let correct: i64 = logits
        .argmax(1)
        .reshape([batch_size])
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

fn to_labels<B: Backend>(tensor: Tensor<B, 1, Int>) -> Result<Vec<usize>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map(|v| v.into_iter().map(|x| x as usize).collect())
        .map_err(|e| EmotionError::Model(format!("{:?}", e)))
}

/// Evaluate `model` over `dataset` in order
///
/// With `max_batches = None` every sample is used, including a final partial
/// batch. With `Some(n)` only the first `n` full batches are evaluated.
pub fn evaluate<B: Backend>(
    model: &EmotionCnn<B>,
    dataset: &FerImageDataset,
    batch_size: usize,
    device: &B::Device,
    max_batches: Option<usize>,
) -> Result<Evaluation> {
    if batch_size == 0 {
        return Err(EmotionError::InvalidInput("batch_size must be positive".into()));
    }

    let len = dataset.len();
    let end = match max_batches {
        Some(n) => (n * batch_size).min(len / batch_size * batch_size),
        None => len,
    };
    if end == 0 {
        return Err(EmotionError::Dataset("nothing to evaluate".into()));
    }

    let num_classes = model.num_classes();
    if let Some(label) = dataset.labels()[..end].iter().find(|&&l| l >= num_classes) {
        return Err(EmotionError::InvalidInput(format!(
            "label {} out of range for a {}-class model",
            label, num_classes
        )));
    }

    let batcher = FerBatcher::new(dataset.image_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut loss = RunningMean::new();
    let mut correct = 0usize;
    let mut predictions = Vec::with_capacity(end);
    let mut labels = Vec::with_capacity(end);

    for start in (0..end).step_by(batch_size) {
        let stop = (start + batch_size).min(end);
        let indices: Vec<usize> = (start..stop).collect();
        let items = dataset.items_at(&indices);
        let n = items.len();
        if n == 0 {
            continue;
        }

        let batch: FerBatch<B> = batcher.batch(items, device);
        let logits = model.forward(batch.images);

        let batch_loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        loss.update_weighted(batch_loss, n as f64);

        let predicted = to_labels(logits.argmax(1).reshape([n]))?;
        let actual = to_labels(batch.targets)?;
        correct += predicted.iter().zip(&actual).filter(|(p, a)| p == a).count();
        predictions.extend(predicted);
        labels.extend(actual);
    }

    let total = labels.len();
    let evaluation = Evaluation {
        loss: loss.mean(),
        accuracy: if total > 0 { correct as f64 / total as f64 } else { 0.0 },
        predictions,
        labels,
    };
    debug!(
        "Evaluated {} samples: loss {:.4}, accuracy {:.4}",
        total, evaluation.loss, evaluation.accuracy
    );
    Ok(evaluation)
}

/// Evaluate over the whole split and write `evaluation.json` and
/// `confusion_matrix.csv` into `output_dir`
pub fn evaluate_and_report<B: Backend>(
    model: &EmotionCnn<B>,
    dataset: &FerImageDataset,
    batch_size: usize,
    device: &B::Device,
    class_names: &[String],
    output_dir: &Path,
) -> Result<Metrics> {
    let evaluation = evaluate(model, dataset, batch_size, device, None)?;
    let metrics = evaluation.metrics(model.num_classes(), class_names)?;

    std::fs::create_dir_all(output_dir)?;
    metrics.save_json(output_dir.join("evaluation.json"))?;
    metrics
        .confusion_matrix
        .save_csv(output_dir.join("confusion_matrix.csv"), class_names)?;
    info!(
        "Evaluation on {} samples written to {:?}",
        metrics.total_samples, output_dir
    );
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;
    use crate::dataset::burn_dataset::FerItem;
    use crate::model::cnn::EmotionCnnConfig;
    use burn::tensor::TensorData;
    use image::{GrayImage, Luma};

    type TestBackend = InferenceBackend;

    fn tiny_model(device: &<TestBackend as Backend>::Device) -> EmotionCnn<TestBackend> {
        let config = EmotionCnnConfig::new()
            .with_input_size(8)
            .with_base_filters(2)
            .with_dense_units(4);
        EmotionCnn::new(&config, device)
    }

    fn dataset(n: usize) -> FerImageDataset {
        let items = (0..n)
            .map(|i| FerItem {
                image: GrayImage::from_pixel(8, 8, Luma([(i * 20) as u8])),
                label: i % 7,
                path: String::new(),
            })
            .collect();
        FerImageDataset::from_items(items, 8)
    }

    #[test]
    fn test_count_correct() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![0.9f32, 0.1, 0.2, 0.8, 0.7, 0.3], [3, 2]),
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_data(
            TensorData::new(vec![0i64, 1, 1], [3]),
            &device,
        );
        assert_eq!(count_correct(logits, targets), 2);
    }

    #[test]
    fn test_full_pass_includes_partial_batch() {
        let device = Default::default();
        let model = tiny_model(&device);
        let eval = evaluate(&model, &dataset(10), 4, &device, None).unwrap();
        assert_eq!(eval.num_samples(), 10);
        assert_eq!(eval.predictions.len(), 10);
        assert_eq!(eval.labels, dataset(10).labels());
        assert!(eval.loss.is_finite() && eval.loss > 0.0);
        assert!((0.0..=1.0).contains(&eval.accuracy));
    }

    #[test]
    fn test_limited_pass_uses_full_batches_only() {
        let device = Default::default();
        let model = tiny_model(&device);
        let eval = evaluate(&model, &dataset(10), 4, &device, Some(5)).unwrap();
        assert_eq!(eval.num_samples(), 8);

        let eval = evaluate(&model, &dataset(10), 4, &device, Some(1)).unwrap();
        assert_eq!(eval.num_samples(), 4);
    }

    #[test]
    fn test_empty_split_is_an_error() {
        let device = Default::default();
        let model = tiny_model(&device);
        assert!(evaluate(&model, &dataset(3), 4, &device, Some(1)).is_err());
        assert!(evaluate(&model, &dataset(3), 0, &device, None).is_err());
    }

    #[test]
    fn test_label_outside_model_classes_is_rejected() {
        let device = Default::default();
        let model = tiny_model(&device);
        let items = (0..4)
            .map(|i| FerItem {
                image: GrayImage::from_pixel(8, 8, Luma([10])),
                label: if i == 2 { 7 } else { 0 },
                path: String::new(),
            })
            .collect();
        let data = FerImageDataset::from_items(items, 8);

        let err = evaluate(&model, &data, 2, &device, None).unwrap_err();
        assert!(matches!(err, EmotionError::InvalidInput(_)));
        // the bad label sits outside the first batch
        assert!(evaluate(&model, &data, 2, &device, Some(1)).is_ok());
    }

    #[test]
    fn test_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let model = tiny_model(&device);
        let names = crate::dataset::default_class_names();
        let metrics =
            evaluate_and_report(&model, &dataset(9), 4, &device, &names, dir.path()).unwrap();
        assert_eq!(metrics.total_samples, 9);
        assert!(dir.path().join("evaluation.json").is_file());
        assert!(dir.path().join("confusion_matrix.csv").is_file());
    }
}
