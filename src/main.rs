//! FER Emotion CLI
//!
//! Trains the emotion CNN on a FER2013-style directory tree, evaluates and
//! exports checkpoints, and runs predictions on face images.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use fer_emotion::backend::{backend_name, default_device, InferenceBackend, TrainingBackend};
use fer_emotion::dataset::{FerDataset, FerImageDataset};
use fer_emotion::export::export_checkpoint;
use fer_emotion::inference::Predictor;
use fer_emotion::model::{EmotionCnnConfig, TrainingConfig};
use fer_emotion::training::checkpoint::{load_checkpoint, WEIGHTS_EXTENSION};
use fer_emotion::training::evaluator::evaluate_and_report;
use fer_emotion::training::run_training;
use fer_emotion::utils::charts::write_bar_chart;
use fer_emotion::utils::format_duration;
use fer_emotion::utils::logging::{init_logging, LogConfig, LogLevel};

/// Facial emotion recognition on FER2013 with Burn
#[derive(Parser, Debug)]
#[command(name = "fer_emotion")]
#[command(version)]
#[command(about = "Train, evaluate and export a facial emotion CNN", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides -v and -q
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train, evaluate and export the model
    Train {
        /// TOML or JSON run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset root with train/ and test/ sub-directories
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,

        /// Best-checkpoint path (without extension)
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Web export directory
        #[arg(long)]
        web_model_dir: Option<PathBuf>,

        /// Directory for history, chart and evaluation files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Skip the web export after training
        #[arg(long, default_value = "false")]
        no_export: bool,
    },

    /// Evaluate a checkpoint on a labeled directory tree
    Evaluate {
        /// Checkpoint path
        #[arg(short, long, default_value = "output/models/emotion_model")]
        model: PathBuf,

        /// Test tree (one sub-directory per class)
        #[arg(short, long, default_value = "data/FER2013/test")]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "64")]
        batch_size: usize,

        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Export a checkpoint as a TensorFlow.js layers-model
    Export {
        #[arg(short, long, default_value = "output/models/emotion_model")]
        model: PathBuf,

        #[arg(short, long, default_value = "output/web_model")]
        output_dir: PathBuf,
    },

    /// Predict the emotion of an image or every image in a directory
    Predict {
        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "output/models/emotion_model")]
        model: PathBuf,

        /// Print results as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Show class statistics of a directory tree
    Stats {
        #[arg(short, long, default_value = "data/FER2013/train")]
        data_dir: PathBuf,

        /// Write a class-distribution bar chart (SVG)
        #[arg(long)]
        chart: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = cli.log_level {
        log_config.level = level;
    }
    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            data_dir,
            epochs,
            batch_size,
            learning_rate,
            seed,
            model_path,
            web_model_dir,
            output_dir,
            no_export,
        } => {
            let mut run = match config {
                Some(path) => TrainingConfig::load(&path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => TrainingConfig::default(),
            };
            if let Some(v) = data_dir {
                run.data_dir = v;
            }
            if let Some(v) = epochs {
                run.epochs = v;
            }
            if let Some(v) = batch_size {
                run.batch_size = v;
            }
            if let Some(v) = learning_rate {
                run.learning_rate = v;
            }
            if let Some(v) = seed {
                run.seed = v;
            }
            if let Some(v) = model_path {
                run.model_path = v;
            }
            if let Some(v) = web_model_dir {
                run.web_model_dir = v;
            }
            if let Some(v) = output_dir {
                run.output_dir = v;
            }
            if no_export {
                run.export_after_training = false;
            }
            cmd_train(&run)?;
        }

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
            output_dir,
        } => cmd_evaluate(&model, &data_dir, batch_size, &output_dir)?,

        Commands::Export { model, output_dir } => cmd_export(&model, &output_dir)?,

        Commands::Predict { input, model, json } => cmd_predict(&input, &model, json)?,

        Commands::Stats { data_dir, chart } => cmd_stats(&data_dir, chart.as_deref())?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ==============================================================
   FER Emotion
   Facial emotion recognition with Burn + Rust
 ==============================================================
  "#
        .green()
    );
}

/// Accept checkpoint paths with or without the recorder extension
fn checkpoint_stem(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext == WEIGHTS_EXTENSION => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

fn cmd_train(config: &TrainingConfig) -> Result<()> {
    config.validate().context("Invalid training configuration")?;
    info!("Training with data from {:?}", config.data_dir);

    println!("{}", "Initializing Training...".green().bold());
    println!("  Backend: {}", backend_name());

    let device = default_device();
    let report = run_training::<TrainingBackend>(config, &device).context("Training failed")?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Epochs run: {}", report.history.len());
    println!(
        "  Training time: {}",
        format_duration(report.history.epochs.iter().map(|r| r.duration_secs).sum())
    );
    if let Some(best) = report.history.best_by_val_accuracy() {
        println!(
            "  Best val_accuracy: {:.4} (epoch {})",
            best.val_accuracy,
            best.epoch + 1
        );
    }
    if let Some(stopped) = report.history.stopped_epoch {
        println!("  Early stopping at epoch {}", stopped + 1);
    }
    if let Some(path) = &report.checkpoint_path {
        println!("  Best checkpoint: {:?}", path);
    }
    if let Some(export) = &report.export {
        println!(
            "  Web model: {:?} ({} parameters)",
            export.model_json, export.num_params
        );
    }
    println!();
    println!("{}", "Next steps:".cyan().bold());
    println!(
        "  fer_emotion predict --model {:?} --input <image>",
        config.model_path
    );
    Ok(())
}

fn cmd_evaluate(model: &Path, data_dir: &Path, batch_size: usize, output_dir: &Path) -> Result<()> {
    let model_path = checkpoint_stem(model);
    let device = default_device();

    let (model, metadata) =
        load_checkpoint::<InferenceBackend>(&model_path, &EmotionCnnConfig::new(), &device)
            .with_context(|| format!("Failed to load checkpoint {:?}", model_path))?;

    let index = FerDataset::new(data_dir)?;
    if index.class_names != metadata.class_names {
        anyhow::bail!(
            "dataset classes {:?} differ from checkpoint classes {:?}",
            index.class_names,
            metadata.class_names
        );
    }
    let dataset = FerImageDataset::from_split(&index, metadata.model.input_size)?;

    println!("{}", "Evaluating...".cyan());
    let metrics = evaluate_and_report(
        &model,
        &dataset,
        batch_size,
        &device,
        &index.class_names,
        output_dir,
    )?;

    println!();
    print!("{}", metrics);
    println!();
    println!("{}", metrics.confusion_matrix.display(&index.class_names));
    Ok(())
}

fn cmd_export(model: &Path, output_dir: &Path) -> Result<()> {
    let model_path = checkpoint_stem(model);
    let device = default_device();

    println!("{}", "Exporting model...".cyan());
    let summary = export_checkpoint::<InferenceBackend>(
        &model_path,
        &EmotionCnnConfig::new(),
        output_dir,
        &device,
    )
    .with_context(|| format!("Failed to export {:?}", model_path))?;

    println!("  model.json: {:?}", summary.model_json);
    println!(
        "  weights:    {:?} ({} tensors, {} bytes)",
        summary.weights_bin, summary.num_tensors, summary.bytes
    );
    println!("{}", "Export complete".green().bold());
    Ok(())
}

fn cmd_predict(input: &Path, model: &Path, json: bool) -> Result<()> {
    let model_path = checkpoint_stem(model);
    let device = default_device();
    let predictor = Predictor::<InferenceBackend>::load(&model_path, &device)
        .with_context(|| format!("Failed to load checkpoint {:?}", model_path))?;

    let results = if input.is_dir() {
        predictor.predict_dir(input)?
    } else {
        vec![(input.to_path_buf(), predictor.predict_image(input))]
    };

    for (path, result) in results {
        match result {
            Ok(prediction) if json => println!("{}", serde_json::to_string(&prediction)?),
            Ok(prediction) => {
                println!("{}", prediction.display());
            }
            Err(e) => println!("{} {:?}: {}", "Error:".red(), path, e),
        }
    }
    Ok(())
}

fn cmd_stats(data_dir: &Path, chart: Option<&Path>) -> Result<()> {
    info!("Computing dataset statistics for {:?}", data_dir);

    let dataset = FerDataset::new(data_dir)
        .with_context(|| format!("Failed to index {:?}", data_dir))?;
    let stats = dataset.get_stats();
    stats.print();

    if let Some(path) = chart {
        let bars: Vec<(String, usize)> = stats
            .class_names
            .iter()
            .cloned()
            .zip(stats.class_counts.iter().copied())
            .collect();
        write_bar_chart("Class distribution", &bars, path)?;
        println!("  Chart written to {:?}", path);
    }
    Ok(())
}
