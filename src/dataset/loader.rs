//! Directory loader for emotion datasets
//!
//! Each split is a directory with one sub-directory per class. Classes are
//! sorted by name and numbered from zero; images inside a class directory are
//! collected recursively in file-name order.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GrayImage, ImageReader, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{EmotionError, Result};
use crate::utils::format_bar;
use crate::NUM_CLASSES;

/// File extensions accepted as images
pub const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// One image file and its label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
    pub class_name: String,
}

/// An indexed split (`train/` or `test/`); pixels are not decoded here
#[derive(Debug, Clone)]
pub struct FerDataset {
    pub root_dir: PathBuf,
    pub samples: Vec<ImageSample>,
    /// Class names in label order
    pub class_names: Vec<String>,
}

impl FerDataset {
    /// Index a split directory
    ///
    /// ```text
    /// root_dir/
    /// ├── angry/
    /// │   ├── im0.png
    /// │   └── ...
    /// ├── disgusted/
    /// └── ...
    /// ```
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Indexing dataset at {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(EmotionError::PathNotFound(root_dir));
        }

        let mut class_names = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(EmotionError::Dataset(format!(
                "no class directories found in {:?}",
                root_dir
            )));
        }
        if class_names.len() != NUM_CLASSES {
            warn!(
                "Found {} classes in {:?}, expected {}",
                class_names.len(),
                root_dir,
                NUM_CLASSES
            );
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let before = samples.len();
            for entry in WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if is_image_file(entry.path()) {
                    samples.push(ImageSample {
                        path: entry.into_path(),
                        label,
                        class_name: class_name.clone(),
                    });
                }
            }
            debug!("Class '{}' (label {}): {} images", class_name, label, samples.len() - before);
        }

        info!(
            "Found {} images belonging to {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            samples,
            class_names,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// (path, label) pairs for the Burn dataset loader
    pub fn labeled_paths(&self) -> Vec<(PathBuf, usize)> {
        self.samples.iter().map(|s| (s.path.clone(), s.label)).collect()
    }

    /// Fail unless both splits share the same label mapping
    pub fn ensure_same_classes(&self, other: &FerDataset) -> Result<()> {
        if self.class_names != other.class_names {
            return Err(EmotionError::Dataset(format!(
                "class mismatch between {:?} {:?} and {:?} {:?}",
                self.root_dir, self.class_names, other.root_dir, other.class_names
            )));
        }
        Ok(())
    }

    pub fn get_stats(&self) -> DatasetStats {
        let mut class_counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            class_counts[sample.label] += 1;
        }

        DatasetStats {
            root_dir: self.root_dir.clone(),
            total_samples: self.samples.len(),
            class_names: self.class_names.clone(),
            class_counts,
        }
    }
}

/// Per-class sample counts of a split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub root_dir: PathBuf,
    pub total_samples: usize,
    pub class_names: Vec<String>,
    pub class_counts: Vec<usize>,
}

impl DatasetStats {
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Largest class count divided by the smallest non-empty one
    pub fn imbalance_ratio(&self) -> f64 {
        let max = self.class_counts.iter().copied().max().unwrap_or(0);
        let min = self.class_counts.iter().copied().filter(|&c| c > 0).min();
        match min {
            Some(min) => max as f64 / min as f64,
            None => 0.0,
        }
    }

    pub fn print(&self) {
        println!("\n📊 Dataset: {:?}", self.root_dir);
        println!("  Total samples: {}", crate::utils::format_number(self.total_samples));
        println!("  Classes: {}", self.num_classes());
        for (idx, (name, count)) in self.class_names.iter().zip(&self.class_counts).enumerate() {
            let fraction = if self.total_samples > 0 {
                *count as f64 / self.total_samples as f64
            } else {
                0.0
            };
            println!(
                "    {:2}. {:<12} {:>6} {:>5.1}% {}",
                idx,
                name,
                count,
                fraction * 100.0,
                format_bar(fraction, 30)
            );
        }
        println!("  Imbalance ratio: {:.1}x", self.imbalance_ratio());
    }
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// ITU-R 601 luma (`0.299 R + 0.587 G + 0.114 B`), truncated to 8 bits
///
/// Matches PIL's `'L'` mode used for FER2013 and the browser client's
/// preprocessing.
pub fn rgb_to_luma601(rgb: &RgbImage) -> GrayImage {
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000;
        Luma([luma as u8])
    })
}

/// Decode an image as 8-bit grayscale at `size`x`size`
///
/// Images already at the target size are left untouched; others are resized
/// with nearest-neighbour sampling.
pub fn load_grayscale(path: &Path, size: u32) -> Result<GrayImage> {
    let img = ImageReader::open(path)
        .map_err(|e| EmotionError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| EmotionError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| EmotionError::ImageLoad(path.to_path_buf(), e.to_string()))?;
    let img = match img {
        image::DynamicImage::ImageLuma8(gray) => gray,
        other => rgb_to_luma601(&other.to_rgb8()),
    };

    if img.width() == size && img.height() == size {
        Ok(img)
    } else {
        Ok(image::imageops::resize(&img, size, size, FilterType::Nearest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(path: &Path, size: u32, value: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        GrayImage::from_pixel(size, size, Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_classes_sorted_and_labelled() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("sad/b.png"), 48, 10);
        write_image(&dir.path().join("angry/a.png"), 48, 20);
        write_image(&dir.path().join("angry/c.png"), 48, 30);
        std::fs::write(dir.path().join("angry/notes.txt"), "skip me").unwrap();

        let ds = FerDataset::new(dir.path()).unwrap();
        assert_eq!(ds.class_names, vec!["angry", "sad"]);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.samples[0].label, 0);
        assert!(ds.samples[0].path.ends_with("a.png"));
        assert_eq!(ds.samples[2].label, 1);
        assert_eq!(ds.get_stats().class_counts, vec![2, 1]);
    }

    #[test]
    fn test_missing_root() {
        let err = FerDataset::new("/definitely/not/here").unwrap_err();
        assert!(matches!(err, EmotionError::PathNotFound(_)));
    }

    #[test]
    fn test_no_classes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FerDataset::new(dir.path()).is_err());
    }

    #[test]
    fn test_ensure_same_classes() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_image(&a.path().join("happy/x.png"), 4, 0);
        write_image(&b.path().join("sad/x.png"), 4, 0);

        let a = FerDataset::new(a.path()).unwrap();
        let b = FerDataset::new(b.path()).unwrap();
        assert!(a.ensure_same_classes(&a).is_ok());
        assert!(a.ensure_same_classes(&b).is_err());
    }

    #[test]
    fn test_load_grayscale_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        write_image(&path, 96, 200);

        let img = load_grayscale(&path, 48).unwrap();
        assert_eq!(img.dimensions(), (48, 48));
        assert_eq!(img.get_pixel(10, 10)[0], 200);
    }

    #[test]
    fn test_load_grayscale_uses_601_weights() {
        let dir = tempfile::tempdir().unwrap();
        let green = dir.path().join("green.png");
        let red = dir.path().join("red.png");
        let grey = dir.path().join("grey.png");
        RgbImage::from_pixel(48, 48, image::Rgb([0, 255, 0])).save(&green).unwrap();
        RgbImage::from_pixel(48, 48, image::Rgb([255, 0, 0])).save(&red).unwrap();
        RgbImage::from_pixel(48, 48, image::Rgb([128, 128, 128])).save(&grey).unwrap();

        assert_eq!(load_grayscale(&green, 48).unwrap().get_pixel(0, 0)[0], 149);
        assert_eq!(load_grayscale(&red, 48).unwrap().get_pixel(5, 5)[0], 76);
        assert_eq!(load_grayscale(&grey, 48).unwrap().get_pixel(47, 47)[0], 128);
    }

    #[test]
    fn test_load_grayscale_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            load_grayscale(&path, 48),
            Err(EmotionError::ImageLoad(_, _))
        ));
    }

    #[test]
    fn test_imbalance_ratio() {
        let stats = DatasetStats {
            root_dir: PathBuf::new(),
            total_samples: 12,
            class_names: vec!["a".into(), "b".into(), "c".into()],
            class_counts: vec![8, 4, 0],
        };
        assert!((stats.imbalance_ratio() - 2.0).abs() < 1e-9);
    }
}
