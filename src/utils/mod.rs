//! Utilities: logging, metrics, charts, error types and formatting helpers.

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{EmotionError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{ConfusionMatrix, Metrics};

/// Format a duration in a human-readable way
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{:.1}s", seconds)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor();
        format!("{}m {:.0}s", minutes as u32, seconds - minutes * 60.0)
    } else {
        let hours = (seconds / 3600.0).floor();
        let minutes = ((seconds - hours * 3600.0) / 60.0).floor();
        format!("{}h {}m", hours as u32, minutes as u32)
    }
}

/// Thousands separators, e.g. `28709` -> `28,709`
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Fixed-width bar for terminal histograms
pub fn format_bar(fraction: f64, width: usize) -> String {
    let filled = (fraction.clamp(0.0, 1.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(12.34), "12.3s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(7260.0), "2h 1m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(28709), "28,709");
        assert_eq!(format_number(1234567), "1,234,567");
    }

    #[test]
    fn test_format_bar() {
        assert_eq!(format_bar(0.5, 4), "██░░");
        assert_eq!(format_bar(2.0, 3), "███");
    }
}
