//! Burn Dataset and Batcher integration.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use civic_core::{ImageSample, Result};
use rand::Rng;

use crate::augmentation::Augmenter;
use crate::folder::ImageFolder;
use crate::preprocess::{load_image, resize_rgb, rgb_to_chw};

/// A single preprocessed image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Flattened CHW float array `[3 * H * W]` in `[0, 1]`
    pub pixels: Vec<f32>,
    /// Class label
    pub label: usize,
}

/// Lazily-decoded dataset over the samples of one split
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    samples: Vec<ImageSample>,
    image_size: usize,
    augmenter: Option<Augmenter>,
}

impl ImageFolderDataset {
    pub fn new(samples: Vec<ImageSample>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            augmenter: None,
        }
    }

    pub fn from_folder(folder: &ImageFolder, image_size: usize) -> Self {
        Self::new(folder.samples.clone(), image_size)
    }

    /// Attach a random augmentation used by [`Self::load_augmented`].
    pub fn with_augmentation(mut self, augmenter: Augmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    fn sample(&self, index: usize) -> Result<&ImageSample> {
        self.samples.get(index).ok_or_else(|| {
            civic_core::Error::InvalidArgument(format!(
                "sample index {index} out of range ({} samples)",
                self.samples.len()
            ))
        })
    }

    /// Decode and preprocess without augmentation.
    pub fn load_item(&self, index: usize) -> Result<ImageItem> {
        let sample = self.sample(index)?;
        let image = load_image(&sample.path)?;
        Ok(ImageItem {
            pixels: rgb_to_chw(&resize_rgb(&image, self.image_size)),
            label: sample.label,
        })
    }

    /// Decode, resize, then apply the attached augmentation (if any).
    pub fn load_augmented<R: Rng>(&self, index: usize, rng: &mut R) -> Result<ImageItem> {
        let Some(augmenter) = &self.augmenter else {
            return self.load_item(index);
        };
        let sample = self.sample(index)?;
        let image = load_image(&sample.path)?;
        let resized = resize_rgb(&image, self.image_size);
        let augmented = augmenter.augment(&resized, rng);
        Ok(ImageItem {
            pixels: rgb_to_chw(&augmented),
            label: sample.label,
        })
    }
}

/// `get` logs and skips samples that fail to decode. The training loop
/// reads through [`ImageFolderDataset::load_item`] and
/// [`ImageFolderDataset::load_augmented`], which propagate the error.
impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        match self.load_item(index) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Skipping sample {}: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images with shape `[N, 3, H, W]` and labels `[N]`
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`ImageItem`]s into an [`ImageBatch`]
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    image_size: usize,
}

impl ImageBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let (h, w) = (self.image_size, self.image_size);

        let mut pixels = Vec::with_capacity(batch_size * 3 * h * w);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend_from_slice(&item.pixels);
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(TensorData::new(pixels, [batch_size, 3, h, w]), device);
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AugmentationConfig;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn write_image(path: &Path, color: [u8; 3]) {
        image::RgbImage::from_pixel(20, 10, image::Rgb(color)).save(path).unwrap();
    }

    fn dataset(tmp: &TempDir) -> ImageFolderDataset {
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        write_image(&a, [255, 0, 0]);
        write_image(&b, [0, 0, 255]);
        ImageFolderDataset::new(
            vec![
                ImageSample::new(a, 0, "fire"),
                ImageSample::new(b, 1, "glass"),
            ],
            8,
        )
    }

    #[test]
    fn test_dataset_get_and_len() {
        let tmp = TempDir::new().unwrap();
        let ds = dataset(&tmp);
        assert_eq!(ds.len(), 2);

        let item = ds.get(1).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!(item.pixels.len(), 3 * 8 * 8);
        // blue plane is fully lit
        assert!(item.pixels[2 * 64..].iter().all(|&v| v == 1.0));
        assert!(ds.get(5).is_none());
    }

    #[test]
    fn test_augmented_item_keeps_shape() {
        let tmp = TempDir::new().unwrap();
        let ds = dataset(&tmp).with_augmentation(Augmenter::new(AugmentationConfig::default()));
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let item = ds.load_augmented(0, &mut rng).unwrap();
        assert_eq!(item.pixels.len(), 3 * 8 * 8);
        assert!(item.pixels.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_batcher_shapes() {
        let tmp = TempDir::new().unwrap();
        let ds = dataset(&tmp);
        let items = vec![ds.get(0).unwrap(), ds.get(1).unwrap()];

        let device = Default::default();
        let batch: ImageBatch<TestBackend> = ImageBatcher::new(8).batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [2]);

        let labels: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(labels, vec![0, 1]);
    }

    #[test]
    fn test_undecodable_sample_is_skipped_by_get_and_reported_by_load() {
        let tmp = TempDir::new().unwrap();
        let broken = tmp.path().join("broken.jpg");
        std::fs::write(&broken, b"not an image").unwrap();
        let ds = ImageFolderDataset::new(vec![ImageSample::new(broken, 0, "fire")], 8);

        assert!(ds.get(0).is_none());
        assert!(ds.load_item(0).is_err());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(ds.load_augmented(0, &mut rng).is_err());
    }
}
