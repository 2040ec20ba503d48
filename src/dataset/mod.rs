//! Dataset module for FER2013-style emotion data
//!
//! - `loader`: discovers `root/<emotion>/<image>` trees and decodes grayscale faces
//! - `augmentation`: random affine transforms for training batches
//! - `burn_dataset`: in-memory Burn datasets and batchers
//!
//! Labels follow the alphabetical order of the class directories, so a
//! standard FER2013 export maps to [`EMOTIONS`].

pub mod augmentation;
pub mod burn_dataset;
pub mod loader;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{AugmentingBatcher, FerBatch, FerBatcher, FerImageDataset, FerItem};
pub use loader::{DatasetStats, FerDataset, ImageSample};

/// Emotion labels in class-index order
pub const EMOTIONS: [&str; 7] = [
    "angry",
    "disgusted",
    "fearful",
    "happy",
    "neutral",
    "sad",
    "surprised",
];

/// Emotion name for a class index
pub fn emotion_name(label: usize) -> Option<&'static str> {
    EMOTIONS.get(label).copied()
}

/// Default label list as owned strings, used when no dataset is at hand
pub fn default_class_names() -> Vec<String> {
    EMOTIONS.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emotions_sorted() {
        let mut sorted = EMOTIONS;
        sorted.sort();
        assert_eq!(sorted, EMOTIONS);
        assert_eq!(EMOTIONS.len(), crate::NUM_CLASSES);
    }

    #[test]
    fn test_emotion_lookup() {
        assert_eq!(emotion_name(3), Some("happy"));
        assert_eq!(emotion_name(7), None);
    }
}
