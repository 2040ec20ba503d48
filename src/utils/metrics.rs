//! Evaluation metrics
//!
//! Accuracy, per-class precision/recall/F1 and a confusion matrix for the
//! held-out test split, plus a running mean used by the fit loop.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{EmotionError, Result};

/// Test-set evaluation summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub total_samples: usize,
    pub correct_predictions: usize,
    pub accuracy: f64,
    /// Sample-weighted mean cross-entropy
    pub loss: f64,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
    /// F1 weighted by class support
    pub weighted_f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Build metrics from predicted and true labels
    ///
    /// `class_names` labels the per-class rows; it may be shorter than
    /// `num_classes`, in which case the remaining rows stay unnamed.
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
        class_names: &[String],
        loss: f64,
    ) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(EmotionError::InvalidInput(format!(
                "{} predictions for {} labels",
                predictions.len(),
                ground_truth.len()
            )));
        }

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);
        let total_samples = predictions.len();
        let correct_predictions = confusion_matrix.correct();

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|idx| {
                let metrics = ClassMetrics::from_confusion_matrix(&confusion_matrix, idx);
                match class_names.get(idx) {
                    Some(name) => metrics.with_name(name),
                    None => metrics,
                }
            })
            .collect();

        let supported: Vec<&ClassMetrics> = per_class.iter().filter(|m| m.support > 0).collect();
        let macro_avg = |f: fn(&ClassMetrics) -> f64| {
            if supported.is_empty() {
                0.0
            } else {
                supported.iter().map(|m| f(m)).sum::<f64>() / supported.len() as f64
            }
        };

        let macro_precision = macro_avg(|m| m.precision);
        let macro_recall = macro_avg(|m| m.recall);
        let macro_f1 = macro_avg(|m| m.f1);

        let weighted_f1 = if total_samples > 0 {
            per_class.iter().map(|m| m.f1 * m.support as f64).sum::<f64>() / total_samples as f64
        } else {
            0.0
        };

        Ok(Self {
            total_samples,
            correct_predictions,
            accuracy: confusion_matrix.accuracy(),
            loss,
            macro_precision,
            macro_recall,
            macro_f1,
            weighted_f1,
            per_class,
            confusion_matrix,
        })
    }

    /// Per-class table for terminal output
    pub fn class_report(&self) -> String {
        let mut out = format!(
            "{:<12} {:>9} {:>9} {:>9} {:>8}\n",
            "class", "precision", "recall", "f1", "support"
        );
        for m in &self.per_class {
            let name = m
                .class_name
                .clone()
                .unwrap_or_else(|| format!("class_{}", m.class_idx));
            out.push_str(&format!(
                "{:<12} {:>9.4} {:>9.4} {:>9.4} {:>8}\n",
                name, m.precision, m.recall, m.f1, m.support
            ));
        }
        out.push_str(&format!(
            "{:<12} {:>9.4} {:>9.4} {:>9.4} {:>8}\n",
            "macro avg", self.macro_precision, self.macro_recall, self.macro_f1, self.total_samples
        ));
        out
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Test Loss: {:.4}", self.loss)?;
        writeln!(f, "Test Accuracy: {:.4}", self.accuracy)?;
        write!(f, "{}", self.class_report())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub class_name: Option<String>,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of samples whose true label is this class
    pub support: usize,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);
        let false_positives = cm.col_sum(class_idx) - true_positives;
        let false_negatives = cm.row_sum(class_idx) - true_positives;

        let ratio = |num: usize, den: usize| {
            if den > 0 {
                num as f64 / den as f64
            } else {
                0.0
            }
        };

        let precision = ratio(true_positives, true_positives + false_positives);
        let recall = ratio(true_positives, true_positives + false_negatives);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support: true_positives + false_negatives,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }
}

/// Row = actual class, column = predicted class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    /// Row-major counts
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(predictions: &[usize], ground_truth: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth) {
            cm.add(actual, pred);
        }
        cm
    }

    /// Out-of-range labels are ignored
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn row_sum(&self, actual: usize) -> usize {
        (0..self.num_classes).map(|col| self.get(actual, col)).sum()
    }

    pub fn col_sum(&self, predicted: usize) -> usize {
        (0..self.num_classes).map(|row| self.get(row, predicted)).sum()
    }

    /// Text table with abbreviated class names as headers
    pub fn display(&self, class_names: &[String]) -> String {
        let label = |i: usize| -> String {
            class_names
                .get(i)
                .map(|n| n.chars().take(8).collect())
                .unwrap_or_else(|| i.to_string())
        };

        let mut out = format!("{:>10}", "true\\pred");
        for col in 0..self.num_classes {
            out.push_str(&format!(" {:>8}", label(col)));
        }
        out.push('\n');
        for row in 0..self.num_classes {
            out.push_str(&format!("{:>10}", label(row)));
            for col in 0..self.num_classes {
                out.push_str(&format!(" {:>8}", self.get(row, col)));
            }
            out.push('\n');
        }
        out
    }

    /// Write as CSV with a header row of predicted class names
    pub fn save_csv<P: AsRef<Path>>(&self, path: P, class_names: &[String]) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        let names: Vec<String> = (0..self.num_classes)
            .map(|i| class_names.get(i).cloned().unwrap_or_else(|| i.to_string()))
            .collect();

        writeln!(file, "actual,{}", names.join(","))?;
        for (row, name) in names.iter().enumerate() {
            let counts: Vec<String> = (0..self.num_classes)
                .map(|col| self.get(row, col).to_string())
                .collect();
            writeln!(file, "{},{}", name, counts.join(","))?;
        }
        Ok(())
    }
}

/// Mean of a stream of values, optionally weighted
#[derive(Debug, Clone, Default)]
pub struct RunningMean {
    sum: f64,
    weight: f64,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.update_weighted(value, 1.0);
    }

    pub fn update_weighted(&mut self, value: f64, weight: f64) {
        self.sum += value * weight;
        self.weight += weight;
    }

    pub fn mean(&self) -> f64 {
        if self.weight > 0.0 {
            self.sum / self.weight
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        ["angry", "happy", "sad"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_confusion_matrix_counts() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1, 2], &[0, 1, 2, 2], 3);
        assert_eq!(cm.get(2, 1), 1);
        assert_eq!(cm.correct(), 3);
        assert_eq!(cm.total(), 4);
        assert!((cm.accuracy() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_confusion_matrix_ignores_out_of_range() {
        let mut cm = ConfusionMatrix::new(2);
        cm.add(5, 0);
        assert_eq!(cm.total(), 0);
    }

    #[test]
    fn test_class_metrics() {
        // class 1: TP=1, FP=1 (actual 2 predicted 1), FN=0
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1, 2], &[0, 1, 2, 2], 3);
        let m = ClassMetrics::from_confusion_matrix(&cm, 1);
        assert_eq!(m.true_positives, 1);
        assert_eq!(m.false_positives, 1);
        assert!((m.precision - 0.5).abs() < 1e-9);
        assert!((m.recall - 1.0).abs() < 1e-9);
        assert_eq!(m.support, 1);
    }

    #[test]
    fn test_metrics_from_predictions() {
        let metrics = Metrics::from_predictions(&[0, 1, 1, 2], &[0, 1, 2, 2], 3, &names(), 0.7).unwrap();
        assert_eq!(metrics.total_samples, 4);
        assert_eq!(metrics.correct_predictions, 3);
        assert_eq!(metrics.per_class[1].class_name.as_deref(), Some("happy"));
        assert!(metrics.macro_f1 > 0.0 && metrics.macro_f1 <= 1.0);
        assert!(format!("{}", metrics).contains("Test Accuracy: 0.7500"));
    }

    #[test]
    fn test_metrics_length_mismatch() {
        assert!(Metrics::from_predictions(&[0], &[0, 1], 2, &[], 0.0).is_err());
    }

    #[test]
    fn test_save_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.csv");
        let cm = ConfusionMatrix::from_predictions(&[0, 2], &[0, 1], 3);
        cm.save_csv(&path, &names()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "actual,angry,happy,sad");
        assert_eq!(lines[2], "happy,0,0,1");
    }

    #[test]
    fn test_running_mean_weighted() {
        let mut mean = RunningMean::new();
        assert_eq!(mean.mean(), 0.0);
        mean.update_weighted(1.0, 3.0);
        mean.update_weighted(3.0, 1.0);
        assert!((mean.mean() - 1.5).abs() < 1e-9);
    }
}
