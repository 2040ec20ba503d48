//! End-to-end training run
//!
//! Loads both splits, fits the model, writes the history files, evaluates
//! the final model on the full test split and exports the best checkpoint.

use std::path::PathBuf;

use burn::{
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    tensor::backend::AutodiffBackend,
};
use colored::Colorize;
use tracing::{info, warn};

use crate::dataset::burn_dataset::FerImageDataset;
use crate::dataset::loader::FerDataset;
use crate::export::{export_best_or_final, ExportSummary};
use crate::model::cnn::EmotionCnn;
use crate::model::config::TrainingConfig;
use crate::training::evaluator::evaluate_and_report;
use crate::training::history::TrainingHistory;
use crate::training::trainer::fit;
use crate::utils::error::Result;
use crate::utils::metrics::Metrics;

/// Everything a finished run produced
#[derive(Debug)]
pub struct TrainingReport {
    pub class_names: Vec<String>,
    pub history: TrainingHistory,
    /// Final model on the full test split
    pub test_metrics: Metrics,
    pub checkpoint_path: Option<PathBuf>,
    pub export: Option<ExportSummary>,
}

/// Decoded train and shuffled test splits with their shared label list
pub fn load_splits(config: &TrainingConfig) -> Result<(FerImageDataset, FerImageDataset, Vec<String>)> {
    let train_index = FerDataset::new(config.train_dir())?;
    let test_index = FerDataset::new(config.test_dir())?;
    train_index.ensure_same_classes(&test_index)?;

    println!("{}", "Dataset".cyan().bold());
    train_index.get_stats().print();
    test_index.get_stats().print();

    let image_size = config.model.input_size;
    let train = FerImageDataset::from_split(&train_index, image_size)?;
    let mut test = FerImageDataset::from_split(&test_index, image_size)?;
    test.shuffle(config.seed);

    Ok((train, test, train_index.class_names))
}

/// Run the whole pipeline on backend `B`
pub fn run_training<B: AutodiffBackend>(config: &TrainingConfig, device: &B::Device) -> Result<TrainingReport> {
    config.validate()?;
    let mut config = config.clone();

    let (train, test, class_names) = load_splits(&config)?;
    if class_names.len() != config.model.num_classes {
        warn!(
            "Dataset has {} classes, model configured for {}; using {}",
            class_names.len(),
            config.model.num_classes,
            class_names.len()
        );
        config.model.num_classes = class_names.len();
    }

    std::fs::create_dir_all(&config.output_dir)?;
    config.save(config.output_dir.join("config.toml"))?;

    B::seed(config.seed);
    let model = EmotionCnn::<B>::new(&config.model, device);
    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Training samples:   {}", train.len());
    println!("  Validation samples: {}", test.len());
    println!("  Parameters:         {}", crate::utils::format_number(model.num_params()));
    println!("  Epochs:             {}", config.epochs);
    println!("  Batch size:         {}", config.batch_size);
    println!("  Learning rate:      {}", config.learning_rate);
    println!("  Device:             {:?}", device);
    println!();

    let outcome = fit(model, &train, &test, &config, &class_names, device)?;

    let history = outcome.history;
    history.save_json(config.output_dir.join("history.json"))?;
    history.save_csv(config.output_dir.join("history.csv"))?;
    history.plot(config.output_dir.join("training_history.svg"))?;
    info!("History written to {:?}", config.output_dir);

    let final_model = outcome.model.valid();
    let test_metrics = evaluate_and_report(
        &final_model,
        &test,
        config.batch_size,
        device,
        &class_names,
        &config.output_dir,
    )?;
    println!();
    println!("{}", format!("Test Loss: {:.4}", test_metrics.loss).green());
    println!("{}", format!("Test Accuracy: {:.4}", test_metrics.accuracy).green().bold());

    let export = if config.export_after_training {
        let summary = export_best_or_final(
            &config.model_path,
            &final_model,
            &config.model,
            &config.web_model_dir,
            device,
        )?;
        println!("  Web model written to {:?}", config.web_model_dir);
        Some(summary)
    } else {
        None
    };

    Ok(TrainingReport {
        class_names,
        history,
        test_metrics,
        checkpoint_path: outcome.checkpoint_saved.then(|| config.model_path.clone()),
        export,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::dataset::augmentation::AugmentationConfig;
    use crate::model::cnn::EmotionCnnConfig;
    use image::{GrayImage, Luma};
    use std::path::Path;

    fn write_tree(root: &Path, per_class: usize) {
        for (label, class) in ["angry", "happy"].iter().enumerate() {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..per_class {
                let value = if label == 0 { 40 } else { 210 };
                GrayImage::from_pixel(8, 8, Luma([value + i as u8]))
                    .save(dir.join(format!("{}.png", i)))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_run_training_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        write_tree(&data.join("train"), 6);
        write_tree(&data.join("test"), 3);

        let mut config = TrainingConfig::debug();
        config.data_dir = data;
        config.output_dir = dir.path().join("output");
        config.model_path = dir.path().join("output/models/emotion_model");
        config.web_model_dir = dir.path().join("output/web_model");
        config.export_after_training = true;
        config.batch_size = 4;
        config.augmentation = AugmentationConfig::none();
        config.model = EmotionCnnConfig::new()
            .with_input_size(8)
            .with_base_filters(2)
            .with_dense_units(4);

        let device = Default::default();
        let report = run_training::<TrainingBackend>(&config, &device).unwrap();

        assert_eq!(report.class_names, vec!["angry", "happy"]);
        assert_eq!(report.history.len(), 2);
        assert_eq!(report.test_metrics.total_samples, 6);
        assert!(report.checkpoint_path.is_some());
        assert!(report.export.is_some());

        let out = &config.output_dir;
        for file in [
            "history.json",
            "history.csv",
            "training_history.svg",
            "evaluation.json",
            "confusion_matrix.csv",
            "config.toml",
        ] {
            assert!(out.join(file).is_file(), "missing {}", file);
        }
        assert!(config.web_model_dir.join("model.json").is_file());
    }

    #[test]
    fn test_class_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        write_tree(&data.join("train"), 2);
        std::fs::create_dir_all(data.join("test").join("sad")).unwrap();
        GrayImage::from_pixel(8, 8, Luma([1]))
            .save(data.join("test").join("sad").join("0.png"))
            .unwrap();

        let mut config = TrainingConfig::debug();
        config.data_dir = data;
        assert!(load_splits(&config).is_err());
    }
}
