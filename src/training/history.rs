//! Per-epoch training history
//!
//! Serialized as JSON (full record) and CSV (one row per epoch), and rendered
//! as a two-panel accuracy/loss chart.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::charts::{self, DataSeries, Panel, COLOR_TRAIN, COLOR_VALIDATION};
use crate::utils::error::Result;

/// Metrics reported at the end of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// Zero-based epoch index
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Learning rate used during this epoch
    pub learning_rate: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    /// Epoch at which early stopping fired
    pub stopped_epoch: Option<usize>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EpochRecord) {
        self.epochs.push(record);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    /// Epoch with the highest validation accuracy; ties keep the earliest
    pub fn best_by_val_accuracy(&self) -> Option<&EpochRecord> {
        self.epochs.iter().fold(None, |best: Option<&EpochRecord>, r| match best {
            Some(b) if b.val_accuracy >= r.val_accuracy => Some(b),
            _ => Some(r),
        })
    }

    fn column(&self, f: impl Fn(&EpochRecord) -> f64) -> Vec<f64> {
        self.epochs.iter().map(f).collect()
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "epoch,loss,accuracy,val_loss,val_accuracy,lr,duration_secs")?;
        for r in &self.epochs {
            writeln!(
                file,
                "{},{:.6},{:.6},{:.6},{:.6},{:e},{:.2}",
                r.epoch + 1,
                r.loss,
                r.accuracy,
                r.val_loss,
                r.val_accuracy,
                r.learning_rate,
                r.duration_secs
            )?;
        }
        Ok(())
    }

    /// Accuracy and loss curves, train vs validation
    pub fn plot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let panels = [
            Panel {
                title: "Model Accuracy".into(),
                y_label: "Accuracy".into(),
                series: vec![
                    DataSeries::new("Train", self.column(|r| r.accuracy), COLOR_TRAIN),
                    DataSeries::new("Validation", self.column(|r| r.val_accuracy), COLOR_VALIDATION),
                ],
            },
            Panel {
                title: "Model Loss".into(),
                y_label: "Loss".into(),
                series: vec![
                    DataSeries::new("Train", self.column(|r| r.loss), COLOR_TRAIN),
                    DataSeries::new("Validation", self.column(|r| r.val_loss), COLOR_VALIDATION),
                ],
            },
        ];
        charts::write_line_panels(&panels, "Epoch", path.as_ref())
    }
}
