//! Burn Dataset Integration
//!
//! FER2013 is small enough to decode once and keep in memory as 8-bit
//! grayscale. Two batchers turn cached items into tensors:
//!
//! - `FerBatcher`: rescale only (validation, evaluation, inference)
//! - `AugmentingBatcher`: random affine augmentation then rescale (training)
//!
//! Batches are `[batch, 1, H, W]` with values in `[0, 1]`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::GrayImage;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::dataset::augmentation::{rescale, rescale_image, AugmentationConfig, Augmenter};
use crate::dataset::loader::{load_grayscale, FerDataset};
use crate::utils::error::{EmotionError, Result};

/// A decoded face and its label
#[derive(Clone)]
pub struct FerItem {
    pub image: GrayImage,
    pub label: usize,
    pub path: String,
}

impl FerItem {
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        Ok(Self {
            image: load_grayscale(path, image_size as u32)?,
            label,
            path: path.to_string_lossy().to_string(),
        })
    }
}

impl std::fmt::Debug for FerItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FerItem")
            .field("label", &self.label)
            .field("path", &self.path)
            .field(
                "image_size",
                &format!("{}x{}", self.image.width(), self.image.height()),
            )
            .finish()
    }
}

/// In-memory split implementing Burn's `Dataset`
#[derive(Clone)]
pub struct FerImageDataset {
    items: Vec<FerItem>,
    image_size: usize,
}

impl std::fmt::Debug for FerImageDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FerImageDataset")
            .field("len", &self.items.len())
            .field("image_size", &self.image_size)
            .finish()
    }
}

impl FerImageDataset {
    /// Decode every sample in parallel
    ///
    /// Files that fail to decode are skipped with a warning.
    pub fn load(samples: &[(PathBuf, usize)], image_size: usize) -> Result<Self> {
        let total = samples.len();
        info!("Decoding {} images", total);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .map_err(|e| EmotionError::Dataset(e.to_string()))?
                .progress_chars("#>-"),
        );

        let done = AtomicUsize::new(0);
        let items: Vec<FerItem> = samples
            .par_iter()
            .filter_map(|(path, label)| {
                let item = match FerItem::from_path(path, *label, image_size) {
                    Ok(item) => Some(item),
                    Err(e) => {
                        warn!("Skipping {:?}: {}", path, e);
                        None
                    }
                };
                let count = done.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 256 == 0 || count == total {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect();

        pb.finish_and_clear();
        if items.len() < total {
            warn!("{} of {} images could not be decoded", total - items.len(), total);
        }
        info!("Loaded {} images", items.len());

        Ok(Self { items, image_size })
    }

    /// Index a split directory and decode it
    pub fn from_split(split: &FerDataset, image_size: usize) -> Result<Self> {
        Self::load(&split.labeled_paths(), image_size)
    }

    pub fn from_items(items: Vec<FerItem>, image_size: usize) -> Self {
        Self { items, image_size }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Shuffle item order in place with a fixed seed
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.items.shuffle(&mut rng);
    }

    pub fn labels(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.label).collect()
    }

    /// Cloned items for the given indices; out-of-range indices are skipped
    pub fn items_at(&self, indices: &[usize]) -> Vec<FerItem> {
        indices.iter().filter_map(|&i| self.items.get(i).cloned()).collect()
    }
}

impl Dataset<FerItem> for FerImageDataset {
    fn get(&self, index: usize) -> Option<FerItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

#[derive(Clone, Debug)]
pub struct FerBatch<B: Backend> {
    /// `[batch_size, 1, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

fn build_batch<B: Backend>(
    pixels: Vec<f32>,
    labels: Vec<i64>,
    image_size: usize,
    device: &B::Device,
) -> FerBatch<B> {
    let batch_size = labels.len();
    let images = Tensor::<B, 4>::from_floats(
        TensorData::new(pixels, [batch_size, 1, image_size, image_size]),
        device,
    );
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);
    FerBatch { images, targets }
}

/// Rescale-only batcher
#[derive(Clone, Debug)]
pub struct FerBatcher {
    image_size: usize,
}

impl FerBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, FerItem, FerBatch<B>> for FerBatcher {
    fn batch(&self, items: Vec<FerItem>, device: &B::Device) -> FerBatch<B> {
        let mut pixels = Vec::with_capacity(items.len() * self.image_size * self.image_size);
        let mut labels = Vec::with_capacity(items.len());
        for item in &items {
            pixels.extend(rescale_image(&item.image));
            labels.push(item.label as i64);
        }
        build_batch(pixels, labels, self.image_size, device)
    }
}

/// Training batcher with on-the-fly augmentation
///
/// Each call draws a fresh RNG from the base seed and a batch counter, so a
/// run is reproducible as long as batches are requested in the same order.
pub struct AugmentingBatcher {
    augmenter: Augmenter,
    image_size: usize,
    seed: u64,
    batches_drawn: AtomicU64,
}

impl std::fmt::Debug for AugmentingBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentingBatcher")
            .field("config", self.augmenter.config())
            .field("image_size", &self.image_size)
            .field("seed", &self.seed)
            .finish()
    }
}

impl AugmentingBatcher {
    pub fn new(config: AugmentationConfig, image_size: usize, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(config),
            image_size,
            seed,
            batches_drawn: AtomicU64::new(0),
        }
    }

    fn next_rng(&self) -> ChaCha8Rng {
        let n = self.batches_drawn.fetch_add(1, Ordering::Relaxed);
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(n.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
    }
}

impl<B: Backend> Batcher<B, FerItem, FerBatch<B>> for AugmentingBatcher {
    fn batch(&self, items: Vec<FerItem>, device: &B::Device) -> FerBatch<B> {
        let mut rng = self.next_rng();
        let mut pixels = Vec::with_capacity(items.len() * self.image_size * self.image_size);
        let mut labels = Vec::with_capacity(items.len());
        for item in &items {
            let augmented = self.augmenter.augment(&item.image, &mut rng);
            pixels.extend(rescale(&augmented));
            labels.push(item.label as i64);
        }
        build_batch(pixels, labels, self.image_size, device)
    }
}
