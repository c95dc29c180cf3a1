//! Image decoding and tensor layout shared by training and serving.
//!
//! Images are resized to a square with nearest-neighbour sampling and scaled
//! to `[0, 1]`. There is no mean/std normalisation.

use std::path::Path;

use civic_core::{Error, Result};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};

/// Decode an image file, sniffing the format from its content.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .map_err(|e| Error::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| Error::ImageLoad(path.to_path_buf(), e.to_string()))?;

    reader
        .decode()
        .map_err(|e| Error::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Resize to `size x size` RGB.
pub fn resize_rgb(image: &DynamicImage, size: usize) -> RgbImage {
    image
        .resize_exact(size as u32, size as u32, FilterType::Nearest)
        .to_rgb8()
}

/// Flatten an RGB image into CHW order scaled by 1/255.
pub fn rgb_to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in image.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        data[offset] = pixel[0] as f32 / 255.0;
        data[plane + offset] = pixel[1] as f32 / 255.0;
        data[2 * plane + offset] = pixel[2] as f32 / 255.0;
    }

    data
}

/// Resize and flatten a decoded image for the model.
pub fn image_to_chw(image: &DynamicImage, size: usize) -> Vec<f32> {
    rgb_to_chw(&resize_rgb(image, size))
}
