//! Random training-time augmentation.
//!
//! One affine warp combines rotation, shift and zoom around the image
//! centre. Pixels are resampled bilinearly, and source coordinates that fall
//! outside the frame are resolved with the configured [`FillMode`]. A
//! horizontal flip and a brightness scale follow the warp.

use civic_core::{AugmentationConfig, FillMode};
use image::{Rgb, RgbImage};
use rand::Rng;

/// Parameters of one random transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    /// Rotation in degrees
    pub rotation: f32,
    /// Shift in pixels along x
    pub shift_x: f32,
    /// Shift in pixels along y
    pub shift_y: f32,
    /// Zoom along x (values > 1 zoom out)
    pub zoom_x: f32,
    /// Zoom along y
    pub zoom_y: f32,
    pub flip_horizontal: bool,
    pub brightness: f32,
}

impl TransformParams {
    /// Parameters that leave an image unchanged
    pub fn identity() -> Self {
        Self {
            rotation: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            zoom_x: 1.0,
            zoom_y: 1.0,
            flip_horizontal: false,
            brightness: 1.0,
        }
    }

    fn has_geometry(&self) -> bool {
        self.rotation != 0.0
            || self.shift_x != 0.0
            || self.shift_y != 0.0
            || self.zoom_x != 1.0
            || self.zoom_y != 1.0
    }
}

/// Augmentation pipeline for the training split
#[derive(Debug, Clone)]
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

    /// Draw random transform parameters for an image of the given size.
    pub fn sample_params<R: Rng>(&self, width: u32, height: u32, rng: &mut R) -> TransformParams {
        if !self.config.enabled {
            return TransformParams::identity();
        }
        let c = &self.config;

        let uniform = |rng: &mut R, range: f32| {
            if range > 0.0 {
                rng.gen_range(-range..=range)
            } else {
                0.0
            }
        };

        let rotation = uniform(&mut *rng, c.rotation_range);
        let shift_x = uniform(&mut *rng, c.width_shift_range) * width as f32;
        let shift_y = uniform(&mut *rng, c.height_shift_range) * height as f32;
        let (zoom_x, zoom_y) = if c.zoom_range > 0.0 {
            let lo = 1.0 - c.zoom_range;
            let hi = 1.0 + c.zoom_range;
            (rng.gen_range(lo..=hi), rng.gen_range(lo..=hi))
        } else {
            (1.0, 1.0)
        };
        let flip_horizontal = c.horizontal_flip && rng.gen_bool(0.5);
        let (lo, hi) = c.brightness_range;
        let brightness = if hi > lo { rng.gen_range(lo..=hi) } else { lo };

        TransformParams {
            rotation,
            shift_x,
            shift_y,
            zoom_x,
            zoom_y,
            flip_horizontal,
            brightness,
        }
    }

    /// Apply a random transform.
    pub fn augment<R: Rng>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        let params = self.sample_params(image.width(), image.height(), rng);
        self.apply(image, &params)
    }

    /// Apply the given transform.
    pub fn apply(&self, image: &RgbImage, params: &TransformParams) -> RgbImage {
        let mut out = if params.has_geometry() {
            warp_affine(image, params, self.config.fill_mode)
        } else {
            image.clone()
        };

        if params.flip_horizontal {
            out = image::imageops::flip_horizontal(&out);
        }

        if params.brightness != 1.0 {
            scale_brightness(&mut out, params.brightness);
        }

        out
    }
}

/// Resample `image` through the inverse of rotation * zoom, plus a shift.
fn warp_affine(image: &RgbImage, params: &TransformParams, fill: FillMode) -> RgbImage {
    let (width, height) = image.dimensions();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let theta = params.rotation.to_radians();
    let (sin, cos) = theta.sin_cos();

    RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = params.zoom_x * (cos * dx - sin * dy) + cx + params.shift_x;
        let sy = params.zoom_y * (sin * dx + cos * dy) + cy + params.shift_y;
        sample_bilinear(image, sx, sy, fill)
    })
}

fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32, fill: FillMode) -> Rgb<u8> {
    let x0 = sx.floor();
    let y0 = sy.floor();
    let fx = sx - x0;
    let fy = sy - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);

    let p00 = fetch(image, x0, y0, fill);
    let p10 = fetch(image, x0 + 1, y0, fill);
    let p01 = fetch(image, x0, y0 + 1, fill);
    let p11 = fetch(image, x0 + 1, y0 + 1, fill);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn fetch(image: &RgbImage, x: i64, y: i64, fill: FillMode) -> [u8; 3] {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let resolved = match fill {
        FillMode::Constant(value) => {
            if x < 0 || y < 0 || x >= w || y >= h {
                return [value; 3];
            }
            (x, y)
        }
        FillMode::Nearest => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
        FillMode::Reflect => (reflect(x, w), reflect(y, h)),
        FillMode::Wrap => (x.rem_euclid(w), y.rem_euclid(h)),
    };
    image.get_pixel(resolved.0 as u32, resolved.1 as u32).0
}

/// Mirror index into `[0, n)`: `d c b a | a b c d | d c b a`.
fn reflect(i: i64, n: i64) -> i64 {
    let period = 2 * n;
    let m = i.rem_euclid(period);
    if m < n {
        m
    } else {
        period - 1 - m
    }
}

fn scale_brightness(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (*c as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 100]))
    }

    #[test]
    fn test_identity_is_noop() {
        let img = gradient(8, 6);
        let aug = Augmenter::new(AugmentationConfig::default());
        assert_eq!(aug.apply(&img, &TransformParams::identity()), img);
    }

    #[test]
    fn test_disabled_config_samples_identity() {
        let aug = Augmenter::new(AugmentationConfig::disabled());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(aug.sample_params(10, 10, &mut rng), TransformParams::identity());
    }

    #[test]
    fn test_sampled_params_within_ranges() {
        let aug = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..200 {
            let p = aug.sample_params(100, 50, &mut rng);
            assert!(p.rotation.abs() <= 20.0);
            assert!(p.shift_x.abs() <= 15.0 + 1e-3);
            assert!(p.shift_y.abs() <= 7.5 + 1e-3);
            assert!((0.75..=1.25).contains(&p.zoom_x));
            assert!((0.75..=1.25).contains(&p.zoom_y));
            assert!((0.8..=1.2).contains(&p.brightness));
        }
    }

    #[test]
    fn test_seeded_augmentation_is_reproducible() {
        let img = gradient(12, 12);
        let aug = Augmenter::new(AugmentationConfig::default());
        let a = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        let b = aug.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), img.dimensions());
    }

    #[test]
    fn test_flip_and_brightness() {
        let img = gradient(4, 1);
        let aug = Augmenter::new(AugmentationConfig::default());
        let params = TransformParams {
            flip_horizontal: true,
            brightness: 2.0,
            ..TransformParams::identity()
        };
        let out = aug.apply(&img, &params);
        // Leftmost pixel now holds the former rightmost one, doubled
        assert_eq!(out.get_pixel(0, 0).0, [120, 0, 200]);
    }

    #[test]
    fn test_shift_with_nearest_fill_repeats_edge() {
        let img = gradient(5, 1);
        let aug = Augmenter::new(AugmentationConfig::default());
        let params = TransformParams {
            shift_x: 2.0,
            ..TransformParams::identity()
        };
        let out = aug.apply(&img, &params);
        // Output x samples source x + 2; the last columns clamp to the edge
        assert_eq!(out.get_pixel(0, 0).0[0], 40);
        assert_eq!(out.get_pixel(3, 0).0[0], 80);
        assert_eq!(out.get_pixel(4, 0).0[0], 80);
    }

    #[test]
    fn test_constant_fill() {
        let img = gradient(5, 1);
        let config = AugmentationConfig {
            fill_mode: FillMode::Constant(7),
            ..AugmentationConfig::default()
        };
        let aug = Augmenter::new(config);
        let params = TransformParams {
            shift_x: 3.0,
            ..TransformParams::identity()
        };
        let out = aug.apply(&img, &params);
        assert_eq!(out.get_pixel(4, 0).0, [7, 7, 7]);
    }

    #[test]
    fn test_reflect_and_wrap_indices() {
        assert_eq!(reflect(-1, 4), 0);
        assert_eq!(reflect(-2, 4), 1);
        assert_eq!(reflect(4, 4), 3);
        assert_eq!(reflect(5, 4), 2);
        assert_eq!((-1i64).rem_euclid(4), 3);
    }
}
