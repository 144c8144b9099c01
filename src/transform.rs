use image::{imageops::FilterType, DynamicImage, GenericImageView};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

pub const CHANNEL_COUNT: usize = 3;

const MEAN: [f32; CHANNEL_COUNT] = [0.485, 0.456, 0.406];
const STD: [f32; CHANNEL_COUNT] = [0.229, 0.224, 0.225];

const CROP_SCALE: (f64, f64) = (0.08, 1.0);
const CROP_RATIO: (f64, f64) = (3.0 / 4.0, 4.0 / 3.0);
const CROP_ATTEMPTS: usize = 10;

/// Per-partition image pipeline. Both variants end in a `crop x crop` RGB image
/// converted to CHW floats and normalized with ImageNet statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Random area/aspect crop resized to `crop`.
    Augment { crop: u32 },
    /// Shorter side resized to `resize`, then a center `crop`.
    Eval { resize: u32, crop: u32 },
}

impl Transform {
    pub fn train(crop: u32) -> Self {
        Self::Augment { crop }
    }

    /// Keeps the usual 256/224 resize-to-crop ratio for any crop size.
    pub fn eval(crop: u32) -> Self {
        Self::Eval {
            resize: (crop * 256 / 224).max(crop),
            crop,
        }
    }

    pub fn crop_size(&self) -> u32 {
        match *self {
            Self::Augment { crop } | Self::Eval { crop, .. } => crop,
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, Self::Augment { .. })
    }

    /// `seed` drives the random crop and is ignored by the eval pipeline.
    pub fn apply(&self, image: &DynamicImage, seed: u64) -> Vec<f32> {
        let image = match *self {
            Self::Augment { crop } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                random_resized_crop(image, crop, &mut rng)
            }
            Self::Eval { resize, crop } => center_crop(&resize_shorter_side(image, resize), crop),
        };

        normalize(&image)
    }
}

fn random_resized_crop(image: &DynamicImage, size: u32, rng: &mut ChaCha8Rng) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (x, y, w, h) = crop_window(width, height, rng);

    image
        .crop_imm(x, y, w, h)
        .resize_exact(size, size, FilterType::Triangle)
}

fn crop_window(width: u32, height: u32, rng: &mut ChaCha8Rng) -> (u32, u32, u32, u32) {
    let area = width as f64 * height as f64;
    let log_ratio = (CROP_RATIO.0.ln(), CROP_RATIO.1.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.gen_range(CROP_SCALE.0..=CROP_SCALE.1);
        let aspect = rng.gen_range(log_ratio.0..=log_ratio.1).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    // Fall back to the largest centered window within the aspect bounds.
    let in_ratio = width as f64 / height as f64;
    let (w, h) = if in_ratio < CROP_RATIO.0 {
        (width, (width as f64 / CROP_RATIO.0).round() as u32)
    } else if in_ratio > CROP_RATIO.1 {
        ((height as f64 * CROP_RATIO.1).round() as u32, height)
    } else {
        (width, height)
    };
    let (w, h) = (w.clamp(1, width), h.clamp(1, height));

    ((width - w) / 2, (height - h) / 2, w, h)
}

fn resize_shorter_side(image: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();

    let (w, h) = if width <= height {
        (size, ((height as u64 * size as u64) / width as u64) as u32)
    } else {
        (((width as u64 * size as u64) / height as u64) as u32, size)
    };

    image.resize_exact(w.max(1), h.max(1), FilterType::Triangle)
}

fn center_crop(image: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if width < size || height < size {
        return image.resize_exact(size, size, FilterType::Triangle);
    }

    let x = ((width - size) as f64 / 2.0).round() as u32;
    let y = ((height - size) as f64 / 2.0).round() as u32;

    image.crop_imm(x, y, size, size)
}

fn normalize(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let plane = width as usize * height as usize;

    let mut data = vec![0.0; CHANNEL_COUNT * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        for channel in 0..CHANNEL_COUNT {
            let value = pixel[channel] as f32 / 255.0;
            data[channel * plane + i] = (value - MEAN[channel]) / STD[channel];
        }
    }

    data
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        }))
    }

    #[test]
    fn both_pipelines_produce_crop_sized_chw() {
        let image = gradient(40, 30);

        for transform in [Transform::train(16), Transform::eval(16)] {
            assert_eq!(transform.apply(&image, 3).len(), CHANNEL_COUNT * 16 * 16);
        }
    }

    #[test]
    fn eval_is_deterministic() {
        let image = gradient(50, 37);
        let transform = Transform::eval(24);

        assert_eq!(transform.apply(&image, 1), transform.apply(&image, 2));
        assert!(!transform.is_random());
    }

    #[test]
    fn augment_depends_on_seed_only() {
        let image = gradient(64, 48);
        let transform = Transform::train(16);

        assert_eq!(transform.apply(&image, 11), transform.apply(&image, 11));
        assert_ne!(transform.apply(&image, 11), transform.apply(&image, 12));
        assert!(transform.is_random());
    }

    #[test]
    fn eval_resize_keeps_ratio() {
        assert_eq!(Transform::eval(224), Transform::Eval { resize: 256, crop: 224 });
        assert_eq!(Transform::eval(8).crop_size(), 8);
    }

    #[test]
    fn normalization_uses_imagenet_statistics() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255])));
        let data = normalize(&white);

        for channel in 0..CHANNEL_COUNT {
            let expected = (1.0 - MEAN[channel]) / STD[channel];
            assert!((data[channel * 16] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn crop_window_stays_inside_image() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        for _ in 0..200 {
            let (x, y, w, h) = crop_window(31, 17, &mut rng);
            assert!(w > 0 && h > 0);
            assert!(x + w <= 31 && y + h <= 17);
        }
    }

    #[test]
    fn crop_window_handles_gigapixel_sizes() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let side = 100_000;

        for _ in 0..20 {
            let (x, y, w, h) = crop_window(side, side, &mut rng);
            assert!(w > 0 && h > 0);
            assert!(x as u64 + w as u64 <= side as u64);
            assert!(y as u64 + h as u64 <= side as u64);
        }
    }
}
