//! Fit loop
//!
//! A hand-written Burn training loop: seeded per-epoch shuffling, augmented
//! full batches, Adam updates, then validation on the inference model and
//! the epoch-end callbacks.

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::dataset::burn_dataset::{AugmentingBatcher, FerBatch, FerImageDataset};
use crate::model::cnn::EmotionCnn;
use crate::model::config::TrainingConfig;
use crate::training::callbacks::{
    CheckpointDecision, EarlyStopping, Mode, ModelCheckpoint, ReduceLrOnPlateau,
};
use crate::training::checkpoint::{save_checkpoint, CheckpointMetadata};
use crate::training::evaluator::{count_correct, evaluate};
use crate::training::history::{EpochRecord, TrainingHistory};
use crate::utils::error::{EmotionError, Result};
use crate::utils::logging::EpochLogger;
use crate::utils::metrics::RunningMean;

/// Adam epsilon matching the Keras default
pub const ADAM_EPSILON: f32 = 1e-7;

/// Result of a completed fit
pub struct FitOutcome<B: AutodiffBackend> {
    /// Weights after the last epoch run
    pub model: EmotionCnn<B>,
    pub history: TrainingHistory,
    /// Best monitored checkpoint value, if any checkpoint was written
    pub best_checkpoint_value: Option<f64>,
    pub checkpoint_saved: bool,
}

/// Number of full batches per epoch for a split
pub fn full_batches(len: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        0
    } else {
        len / batch_size
    }
}

fn progress_bar(steps: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_err(|e| EmotionError::Training(e.to_string()))?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

/// Train `model` on `train`, validating on the first full batches of `valid`
///
/// Checkpoints go to `config.model_path` whenever the monitored metric
/// improves. Training ends after `config.epochs` or when early stopping fires.
pub fn fit<B: AutodiffBackend>(
    mut model: EmotionCnn<B>,
    train: &FerImageDataset,
    valid: &FerImageDataset,
    config: &TrainingConfig,
    class_names: &[String],
    device: &B::Device,
) -> Result<FitOutcome<B>> {
    config.validate()?;
    if train.image_size() != config.model.input_size || valid.image_size() != config.model.input_size {
        return Err(EmotionError::Training(format!(
            "image size {} does not match model input size {}",
            train.image_size(),
            config.model.input_size
        )));
    }

    let batch_size = config.batch_size;
    let steps_per_epoch = full_batches(train.len(), batch_size);
    let validation_steps = full_batches(valid.len(), batch_size);
    if steps_per_epoch == 0 {
        return Err(EmotionError::Training(format!(
            "{} training samples are not enough for one batch of {}",
            train.len(),
            batch_size
        )));
    }
    if validation_steps == 0 {
        return Err(EmotionError::Training(format!(
            "{} validation samples are not enough for one batch of {}",
            valid.len(),
            batch_size
        )));
    }
    info!(
        "Fitting for up to {} epochs: {} steps/epoch, {} validation steps",
        config.epochs, steps_per_epoch, validation_steps
    );
    // dropout masks
    B::seed(config.seed);

    let batcher = AugmentingBatcher::new(config.augmentation.clone(), train.image_size(), config.seed);
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut optimizer = AdamConfig::new().with_epsilon(ADAM_EPSILON).init();

    let mut checkpoint = ModelCheckpoint::new(
        config.checkpoint.monitor,
        config.checkpoint.mode,
        config.checkpoint.save_best_only,
    );
    let mut early_stopping = config.early_stopping.enabled.then(|| {
        EarlyStopping::new(
            config.early_stopping.monitor,
            Mode::Auto,
            config.early_stopping.patience,
            config.early_stopping.min_delta,
        )
    });
    let mut reduce_lr = config.reduce_lr.enabled.then(|| {
        let r = &config.reduce_lr;
        ReduceLrOnPlateau::new(
            r.monitor,
            Mode::Auto,
            r.factor,
            r.patience,
            r.min_lr,
            r.min_delta,
            r.cooldown,
        )
    });

    let mut epoch_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..train.len()).collect();
    let mut learning_rate = config.learning_rate;
    let mut history = TrainingHistory::new();
    let mut checkpoint_saved = false;
    let mut logger = EpochLogger::new(config.epochs);

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);
        indices.shuffle(&mut epoch_rng);

        let pb = progress_bar(steps_per_epoch)?;
        let mut loss_mean = RunningMean::new();
        let mut correct = 0usize;
        let mut seen = 0usize;

        for step in 0..steps_per_epoch {
            let batch_indices = &indices[step * batch_size..(step + 1) * batch_size];
            let batch: FerBatch<B> = batcher.batch(train.items_at(batch_indices), device);

            let logits = model.forward(batch.images);
            let loss = loss_fn.forward(logits.clone(), batch.targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();

            correct += count_correct(logits, batch.targets);
            seen += batch_size;
            loss_mean.update(loss_value);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);

            pb.inc(1);
            pb.set_message(format!(
                "loss: {:.4} - accuracy: {:.4}",
                loss_mean.mean(),
                correct as f64 / seen as f64
            ));
        }
        pb.finish_and_clear();

        let valid_model = model.valid();
        let validation = evaluate(&valid_model, valid, batch_size, device, Some(validation_steps))?;

        let record = EpochRecord {
            epoch,
            loss: loss_mean.mean(),
            accuracy: correct as f64 / seen as f64,
            val_loss: validation.loss,
            val_accuracy: validation.accuracy,
            learning_rate,
            duration_secs: logger.epoch_seconds(),
        };
        logger.end_epoch(
            record.loss,
            record.accuracy,
            record.val_loss,
            record.val_accuracy,
            learning_rate,
        );

        let monitor = checkpoint.monitor();
        match checkpoint.on_epoch_end(&record) {
            CheckpointDecision::Save { previous, current } => {
                let improved = checkpoint.best() == Some(current) && previous != Some(current);
                match previous {
                    Some(prev) if improved => info!(
                        "Epoch {}: {} improved from {:.5} to {:.5}, saving model to {:?}",
                        epoch + 1, monitor, prev, current, config.model_path
                    ),
                    _ => info!(
                        "Epoch {}: {} = {:.5}, saving model to {:?}",
                        epoch + 1, monitor, current, config.model_path
                    ),
                }
                let metadata = CheckpointMetadata::new(&record, &config.model, class_names);
                save_checkpoint(&valid_model, &config.model_path, &metadata)?;
                checkpoint_saved = true;
            }
            CheckpointDecision::Skip { best, .. } => {
                info!("Epoch {}: {} did not improve from {:.5}", epoch + 1, monitor, best);
            }
        }

        let stop = match early_stopping.as_mut() {
            Some(es) => es.on_epoch_end(&record),
            None => false,
        };

        if let Some(plateau) = reduce_lr.as_mut() {
            let new_lr = plateau.on_epoch_end(&record, learning_rate);
            if new_lr < learning_rate {
                info!(
                    "Epoch {}: ReduceLROnPlateau reducing learning rate to {:e}",
                    epoch + 1,
                    new_lr
                );
            }
            learning_rate = new_lr;
        }

        history.push(record);

        if stop {
            warn!("Epoch {}: early stopping", epoch + 1);
            history.stopped_epoch = Some(epoch);
            break;
        }
        debug!("Next epoch learning rate: {:e}", learning_rate);
    }

    let best_val_accuracy = history
        .best_by_val_accuracy()
        .map(|r| r.val_accuracy)
        .unwrap_or(0.0);
    logger.log_complete(history.len(), best_val_accuracy);

    Ok(FitOutcome {
        model,
        history,
        best_checkpoint_value: checkpoint.best(),
        checkpoint_saved,
    })
}
