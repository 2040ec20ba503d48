//! Random affine augmentation for grayscale faces
//!
//! Training images get a random rotation, shift, shear and zoom composed into
//! a single affine map about the image centre, followed by an optional
//! horizontal mirror. Each output pixel is mapped back into the source and
//! sampled bilinearly; coordinates outside the source take the nearest edge
//! pixel. Test images are never augmented.
//!
//! Coordinates are `(row, col)`. The composed matrix maps output coordinates
//! to input coordinates:
//!
//! ```text
//! M = C · R(theta) · T(tx, ty) · S(shear) · Z(zx, zy) · C⁻¹
//! ```
//!
//! where `C` moves the origin to the image centre.

use image::GrayImage;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Augmentation ranges
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    /// Maximum rotation in degrees, sampled from ±rotation_range
    pub rotation_range: f32,
    /// Horizontal shift as a fraction of the width
    pub width_shift_range: f32,
    /// Vertical shift as a fraction of the height
    pub height_shift_range: f32,
    /// Maximum shear angle in degrees
    pub shear_range: f32,
    /// Zoom factors are sampled from [1 - zoom_range, 1 + zoom_range] per axis
    pub zoom_range: f32,
    /// Mirror left-right with probability 0.5
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_range: 20.0,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            shear_range: 0.1,
            zoom_range: 0.1,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Identity transform
    pub fn none() -> Self {
        Self {
            rotation_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::none()
    }

    pub fn validate(&self) -> Result<(), String> {
        let ranges = [
            ("rotation_range", self.rotation_range),
            ("width_shift_range", self.width_shift_range),
            ("height_shift_range", self.height_shift_range),
            ("shear_range", self.shear_range),
        ];
        for (name, value) in ranges {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(format!("{} must be a finite non-negative number", name));
            }
        }
        if !(0.0..1.0).contains(&self.zoom_range) {
            return Err("zoom_range must be in [0, 1)".into());
        }
        Ok(())
    }
}

/// Concrete parameters for one augmented sample
#[derive(Clone, Debug, PartialEq)]
pub struct TransformParams {
    /// Rotation in radians
    pub theta: f32,
    /// Row shift in pixels
    pub tx: f32,
    /// Column shift in pixels
    pub ty: f32,
    /// Shear in radians
    pub shear: f32,
    pub zx: f32,
    pub zy: f32,
    pub flip_horizontal: bool,
}

impl TransformParams {
    pub fn identity() -> Self {
        Self {
            theta: 0.0,
            tx: 0.0,
            ty: 0.0,
            shear: 0.0,
            zx: 1.0,
            zy: 1.0,
            flip_horizontal: false,
        }
    }

    fn is_affine_identity(&self) -> bool {
        self.theta == 0.0
            && self.tx == 0.0
            && self.ty == 0.0
            && self.shear == 0.0
            && self.zx == 1.0
            && self.zy == 1.0
    }

    /// Output-to-input matrix about the centre of a `height`x`width` image
    fn matrix(&self, height: u32, width: u32) -> Affine {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let rotation = Affine([[cos_t, -sin_t, 0.0], [sin_t, cos_t, 0.0]]);
        let shift = Affine([[1.0, 0.0, self.tx], [0.0, 1.0, self.ty]]);
        let shear = Affine([[1.0, -self.shear.sin(), 0.0], [0.0, self.shear.cos(), 0.0]]);
        let zoom = Affine([[self.zx, 0.0, 0.0], [0.0, self.zy, 0.0]]);

        let o_r = height as f32 / 2.0 - 0.5;
        let o_c = width as f32 / 2.0 - 0.5;
        let to_centre = Affine([[1.0, 0.0, o_r], [0.0, 1.0, o_c]]);
        let from_centre = Affine([[1.0, 0.0, -o_r], [0.0, 1.0, -o_c]]);

        to_centre
            .then(&rotation)
            .then(&shift)
            .then(&shear)
            .then(&zoom)
            .then(&from_centre)
    }
}

/// 2x3 affine matrix acting on `(row, col, 1)`
#[derive(Clone, Copy, Debug)]
struct Affine([[f32; 3]; 2]);

impl Affine {
    /// `self · other`
    fn then(&self, other: &Affine) -> Affine {
        let a = &self.0;
        let b = &other.0;
        let mut out = [[0.0f32; 3]; 2];
        for (i, row) in out.iter_mut().enumerate() {
            row[0] = a[i][0] * b[0][0] + a[i][1] * b[1][0];
            row[1] = a[i][0] * b[0][1] + a[i][1] * b[1][1];
            row[2] = a[i][0] * b[0][2] + a[i][1] * b[1][2] + a[i][2];
        }
        Affine(out)
    }

    fn apply(&self, r: f32, c: f32) -> (f32, f32) {
        let m = &self.0;
        (
            m[0][0] * r + m[0][1] * c + m[0][2],
            m[1][0] * r + m[1][1] * c + m[1][2],
        )
    }
}

/// Samples and applies random transforms
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Draw transform parameters for an image of the given size
    ///
    /// Ranges set to zero draw nothing from the RNG.
    pub fn random_params(&self, height: u32, width: u32, rng: &mut ChaCha8Rng) -> TransformParams {
        let cfg = &self.config;
        let mut uniform = |range: f32| {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        let theta = uniform(cfg.rotation_range).to_radians();
        let tx = uniform(cfg.height_shift_range) * height as f32;
        let ty = uniform(cfg.width_shift_range) * width as f32;
        let shear = uniform(cfg.shear_range).to_radians();

        let (zx, zy) = if cfg.zoom_range > 0.0 {
            let lo = 1.0 - cfg.zoom_range;
            let hi = 1.0 + cfg.zoom_range;
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        } else {
            (1.0, 1.0)
        };

        let flip_horizontal = cfg.horizontal_flip && rng.gen::<f32>() < 0.5;

        TransformParams {
            theta,
            tx,
            ty,
            shear,
            zx,
            zy,
            flip_horizontal,
        }
    }

    /// Randomly transform `img`, returning row-major pixel values in 0..=255
    pub fn augment(&self, img: &GrayImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let params = self.random_params(img.height(), img.width(), rng);
        apply_transform(img, &params)
    }
}

/// Apply fixed transform parameters to an image
///
/// Returns row-major `f32` pixel values in the source range, same size as
/// the input.
pub fn apply_transform(img: &GrayImage, params: &TransformParams) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut out: Vec<f32> = if params.is_affine_identity() {
        img.pixels().map(|p| p[0] as f32).collect()
    } else {
        let matrix = params.matrix(height, width);
        let mut buf = Vec::with_capacity((width * height) as usize);
        for r in 0..height {
            for c in 0..width {
                let (src_r, src_c) = matrix.apply(r as f32, c as f32);
                buf.push(sample_bilinear_nearest(img, src_r, src_c));
            }
        }
        buf
    };

    if params.flip_horizontal {
        for row in out.chunks_mut(width as usize) {
            row.reverse();
        }
    }

    out
}

/// Bilinear sample; taps outside the image clamp to the nearest edge
fn sample_bilinear_nearest(img: &GrayImage, r: f32, c: f32) -> f32 {
    let max_r = img.height() as i64 - 1;
    let max_c = img.width() as i64 - 1;

    let r0 = r.floor();
    let c0 = c.floor();
    let fr = r - r0;
    let fc = c - c0;

    let tap = |rr: i64, cc: i64| -> f32 {
        let rr = rr.clamp(0, max_r) as u32;
        let cc = cc.clamp(0, max_c) as u32;
        img.get_pixel(cc, rr)[0] as f32
    };

    let (r0, c0) = (r0 as i64, c0 as i64);
    let top = tap(r0, c0) * (1.0 - fc) + tap(r0, c0 + 1) * fc;
    let bottom = tap(r0 + 1, c0) * (1.0 - fc) + tap(r0 + 1, c0 + 1) * fc;
    top * (1.0 - fr) + bottom * fr
}

/// Rescale 0..=255 values to 0..=1
pub fn rescale(pixels: &[f32]) -> Vec<f32> {
    pixels.iter().map(|v| v / 255.0).collect()
}

/// Rescale an unaugmented image to 0..=1, row-major
pub fn rescale_image(img: &GrayImage) -> Vec<f32> {
    img.pixels().map(|p| p[0] as f32 / 255.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::SeedableRng;

    /// 8x8 gradient: pixel value = 10 * row + col
    fn gradient() -> GrayImage {
        GrayImage::from_fn(8, 8, |x, y| Luma([(10 * y + x) as u8]))
    }

    #[test]
    fn test_default_matches_reference_ranges() {
        let cfg = AugmentationConfig::default();
        assert_eq!(cfg.rotation_range, 20.0);
        assert_eq!(cfg.zoom_range, 0.1);
        assert!(cfg.horizontal_flip);
        assert!(cfg.validate().is_ok());
        assert!(AugmentationConfig::none().is_identity());
    }

    #[test]
    fn test_invalid_zoom_rejected() {
        let cfg = AugmentationConfig {
            zoom_range: 1.5,
            ..AugmentationConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_identity_preserves_pixels() {
        let img = gradient();
        let aug = Augmenter::new(AugmentationConfig::none());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let out = aug.augment(&img, &mut rng);
        let expected: Vec<f32> = img.pixels().map(|p| p[0] as f32).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_row_shift_moves_content_up() {
        let img = gradient();
        let params = TransformParams {
            tx: 1.0,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        // output row 0 reads source row 1; the last row clamps to the edge
        assert!((out[0] - 10.0).abs() < 1e-3);
        assert!((out[7 * 8 + 3] - 73.0).abs() < 1e-3);
    }

    #[test]
    fn test_flip_mirrors_rows() {
        let img = gradient();
        let params = TransformParams {
            flip_horizontal: true,
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        assert_eq!(out[0], 7.0);
        assert_eq!(out[7], 0.0);
        assert_eq!(out[8], 17.0);
    }

    #[test]
    fn test_rotation_stays_in_source_range() {
        let img = gradient();
        let params = TransformParams {
            theta: 30f32.to_radians(),
            zx: 0.9,
            zy: 1.1,
            shear: 0.1f32.to_radians(),
            ..TransformParams::identity()
        };
        let out = apply_transform(&img, &params);
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|v| (-1e-3..=77.001).contains(v)));
    }

    #[test]
    fn test_params_within_ranges() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..100 {
            let p = aug.random_params(48, 48, &mut rng);
            assert!(p.theta.abs() <= 20f32.to_radians() + 1e-6);
            assert!(p.tx.abs() <= 4.8 + 1e-4 && p.ty.abs() <= 4.8 + 1e-4);
            assert!((0.9..=1.1).contains(&p.zx) && (0.9..=1.1).contains(&p.zy));
        }
    }

    #[test]
    fn test_seeded_augmentation_is_reproducible() {
        let img = gradient();
        let aug = Augmenter::new(AugmentationConfig::default());
        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(99));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(99));
        assert_eq!(a, b);
    }

    #[test]
    fn test_rescale() {
        let img = GrayImage::from_pixel(2, 2, Luma([255]));
        assert_eq!(rescale_image(&img), vec![1.0; 4]);
        assert_eq!(rescale(&[0.0, 51.0]), vec![0.0, 0.2]);
    }
}
