//! Logging Module
//!
//! Structured logging on top of `tracing`. The CLI installs one global
//! subscriber at startup; `RUST_LOG` overrides the configured level.

use std::str::FromStr;
use std::time::Instant;

use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Include the module path of each event
    pub include_target: bool,
    pub include_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug-level logging with targets and thread ids
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(config.level.to_tracing_level()).into())
            .parse_lossy("")
    });

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Per-epoch timing and metric log lines for the fit loop
pub struct EpochLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl EpochLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Seconds spent in the current epoch so far
    pub fn epoch_seconds(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    pub fn total_seconds(&self) -> f64 {
        self.training_start.elapsed().as_secs_f64()
    }

    pub fn end_epoch(
        &self,
        loss: f64,
        accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
        learning_rate: f64,
    ) {
        tracing::info!(
            "Epoch {}/{} - {:.1}s - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} - lr: {:.2e}",
            self.epoch + 1,
            self.total_epochs,
            self.epoch_seconds(),
            loss,
            accuracy,
            val_loss,
            val_accuracy,
            learning_rate
        );
    }

    pub fn log_complete(&self, epochs_run: usize, best_val_accuracy: f64) {
        tracing::info!(
            "Training finished after {} epochs in {:.1}s | best val_accuracy: {:.4}",
            epochs_run,
            self.total_seconds(),
            best_val_accuracy
        );
    }
}
