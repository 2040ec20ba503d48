//! Training module
//!
//! - `trainer`: the fit loop (augmented batches, Adam, validation)
//! - `callbacks`: checkpointing, early stopping and LR reduction on plateau
//! - `checkpoint`: model records plus JSON metadata
//! - `evaluator`: loss/accuracy over a split
//! - `history`: per-epoch metrics, JSON/CSV output and charts
//! - `pipeline`: the complete train → evaluate → export run

pub mod callbacks;
pub mod checkpoint;
pub mod evaluator;
pub mod history;
pub mod pipeline;
pub mod trainer;

pub use callbacks::{EarlyStopping, Mode, ModelCheckpoint, Monitor, ReduceLrOnPlateau};
pub use checkpoint::{load_checkpoint, save_checkpoint, CheckpointMetadata};
pub use evaluator::{evaluate, Evaluation};
pub use history::{EpochRecord, TrainingHistory};
pub use pipeline::{run_training, TrainingReport};
pub use trainer::{fit, FitOutcome};
