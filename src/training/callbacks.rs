//! Epoch-end training callbacks
//!
//! - `ModelCheckpoint`: decides when the current weights are the best so far
//! - `EarlyStopping`: stops after `patience` epochs without improvement
//! - `ReduceLrOnPlateau`: scales the learning rate down when a metric stalls
//!
//! Callbacks only track state and return decisions; the fit loop performs
//! the actual saving, stopping and optimizer changes.

use serde::{Deserialize, Serialize};

use crate::training::history::EpochRecord;

/// Metric watched by a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    Loss,
    Accuracy,
    ValLoss,
    ValAccuracy,
}

impl Monitor {
    pub fn value(self, record: &EpochRecord) -> f64 {
        match self {
            Monitor::Loss => record.loss,
            Monitor::Accuracy => record.accuracy,
            Monitor::ValLoss => record.val_loss,
            Monitor::ValAccuracy => record.val_accuracy,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Monitor::Loss => "loss",
            Monitor::Accuracy => "accuracy",
            Monitor::ValLoss => "val_loss",
            Monitor::ValAccuracy => "val_accuracy",
        }
    }
}

impl std::fmt::Display for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of improvement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Min,
    Max,
    /// Max for accuracies, min for losses
    Auto,
}

impl Mode {
    fn resolve(self, monitor: Monitor) -> Mode {
        match self {
            Mode::Auto => match monitor {
                Monitor::Accuracy | Monitor::ValAccuracy => Mode::Max,
                Monitor::Loss | Monitor::ValLoss => Mode::Min,
            },
            other => other,
        }
    }
}

/// Best-so-far tracker shared by the callbacks
#[derive(Debug, Clone)]
struct BestValue {
    mode: Mode,
    min_delta: f64,
    best: f64,
}

impl BestValue {
    fn new(monitor: Monitor, mode: Mode, min_delta: f64) -> Self {
        let mode = mode.resolve(monitor);
        let best = match mode {
            Mode::Max => f64::NEG_INFINITY,
            _ => f64::INFINITY,
        };
        Self {
            mode,
            min_delta: min_delta.abs(),
            best,
        }
    }

    fn is_improvement(&self, current: f64) -> bool {
        if current.is_nan() {
            return false;
        }
        match self.mode {
            Mode::Max => current > self.best + self.min_delta,
            _ => current < self.best - self.min_delta,
        }
    }
}

/// Saves only when the monitored metric improves
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    monitor: Monitor,
    save_best_only: bool,
    tracker: BestValue,
}

impl ModelCheckpoint {
    pub fn new(monitor: Monitor, mode: Mode, save_best_only: bool) -> Self {
        Self {
            monitor,
            save_best_only,
            tracker: BestValue::new(monitor, mode, 0.0),
        }
    }

    pub fn monitor(&self) -> Monitor {
        self.monitor
    }

    /// Best value seen so far, `None` before the first improvement
    pub fn best(&self) -> Option<f64> {
        self.tracker.best.is_finite().then_some(self.tracker.best)
    }

    /// Whether the model should be written for this epoch
    pub fn on_epoch_end(&mut self, record: &EpochRecord) -> CheckpointDecision {
        let current = self.monitor.value(record);
        let previous = self.best();
        if self.tracker.is_improvement(current) {
            self.tracker.best = current;
            CheckpointDecision::Save { previous, current }
        } else if !self.save_best_only {
            CheckpointDecision::Save { previous, current }
        } else {
            CheckpointDecision::Skip {
                best: previous.unwrap_or(current),
                current,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckpointDecision {
    Save { previous: Option<f64>, current: f64 },
    Skip { best: f64, current: f64 },
}

impl CheckpointDecision {
    pub fn should_save(&self) -> bool {
        matches!(self, CheckpointDecision::Save { .. })
    }
}

/// Stops training once the monitored metric stalls for `patience` epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    monitor: Monitor,
    patience: usize,
    tracker: BestValue,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(monitor: Monitor, mode: Mode, patience: usize, min_delta: f64) -> Self {
        Self {
            monitor,
            patience,
            tracker: BestValue::new(monitor, mode, min_delta),
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn wait(&self) -> usize {
        self.wait
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    /// Returns `true` when training should stop after this epoch
    pub fn on_epoch_end(&mut self, record: &EpochRecord) -> bool {
        let current = self.monitor.value(record);
        self.wait += 1;
        if self.tracker.is_improvement(current) {
            self.tracker.best = current;
            self.wait = 0;
            return false;
        }

        if self.wait >= self.patience && record.epoch > 0 {
            self.stopped_epoch = Some(record.epoch);
            return true;
        }
        false
    }
}

/// Multiplies the learning rate by `factor` after `patience` stalled epochs
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    monitor: Monitor,
    factor: f64,
    patience: usize,
    min_lr: f64,
    cooldown: usize,
    cooldown_counter: usize,
    tracker: BestValue,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(
        monitor: Monitor,
        mode: Mode,
        factor: f64,
        patience: usize,
        min_lr: f64,
        min_delta: f64,
        cooldown: usize,
    ) -> Self {
        Self {
            monitor,
            factor,
            patience,
            min_lr,
            cooldown,
            cooldown_counter: 0,
            tracker: BestValue::new(monitor, mode, min_delta),
            wait: 0,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_counter > 0
    }

    /// Learning rate for the next epoch
    pub fn on_epoch_end(&mut self, record: &EpochRecord, current_lr: f64) -> f64 {
        let current = self.monitor.value(record);

        if self.in_cooldown() {
            self.cooldown_counter -= 1;
            self.wait = 0;
        }

        if self.tracker.is_improvement(current) {
            self.tracker.best = current;
            self.wait = 0;
        } else if !self.in_cooldown() {
            self.wait += 1;
            if self.wait >= self.patience && current_lr > self.min_lr {
                let new_lr = (current_lr * self.factor).max(self.min_lr);
                self.cooldown_counter = self.cooldown;
                self.wait = 0;
                return new_lr;
            }
        }

        current_lr
    }
}
