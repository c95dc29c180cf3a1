//! Loss and accuracy over a held-out split.

use burn::{
    data::dataloader::batcher::Batcher,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use civic_core::{EvaluationResult, Result};
use civic_dataset::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
use indicatif::{ProgressBar, ProgressStyle};

use crate::model::CivicClassifier;

/// Bar over `len` batches; hidden when `visible` is false.
pub(crate) fn batch_progress(len: usize, visible: bool, label: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(label.to_string());
    pb
}

/// Number of correct predictions in a batch
pub(crate) fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// Evaluate `model` over `dataset` in file order.
///
/// The loss is the sample-weighted mean of per-batch cross-entropy.
pub fn evaluate<B: Backend>(
    model: &CivicClassifier<B>,
    dataset: &ImageFolderDataset,
    batch_size: usize,
    device: &B::Device,
    show_progress: bool,
) -> Result<EvaluationResult> {
    let order: Vec<usize> = (0..dataset.samples().len()).collect();
    evaluate_in_order(model, dataset, &order, batch_size, device, show_progress)
}

/// Evaluate over the samples at `order`, batched in that sequence.
pub fn evaluate_in_order<B: Backend>(
    model: &CivicClassifier<B>,
    dataset: &ImageFolderDataset,
    order: &[usize],
    batch_size: usize,
    device: &B::Device,
    show_progress: bool,
) -> Result<EvaluationResult> {
    let batcher = ImageBatcher::new(dataset.image_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let total = order.len();
    let batch_size = batch_size.max(1);

    let progress = batch_progress(total.div_ceil(batch_size), show_progress, "eval");
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;

    for chunk in order.chunks(batch_size) {
        let items = chunk
            .iter()
            .map(|&i| dataset.load_item(i))
            .collect::<Result<Vec<ImageItem>>>()?;
        let n = items.len();

        let batch: ImageBatch<B> = batcher.batch(items, device);
        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.targets.clone());

        let loss_value: f64 = loss.into_scalar().elem();
        loss_sum += loss_value * n as f64;
        correct += count_correct(logits, batch.targets);
        progress.inc(1);
    }
    progress.finish_and_clear();

    if total == 0 {
        return Ok(EvaluationResult::default());
    }

    Ok(EvaluationResult {
        loss: loss_sum / total as f64,
        accuracy: correct as f64 / total as f64,
        num_samples: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassifierConfig;
    use burn::backend::NdArray;
    use civic_core::ImageSample;
    use tempfile::TempDir;

    #[test]
    fn test_evaluate_reports_bounded_metrics() {
        let tmp = TempDir::new().unwrap();
        let mut samples = Vec::new();
        for i in 0..5 {
            let path = tmp.path().join(format!("{i}.png"));
            image::RgbImage::from_pixel(16, 16, image::Rgb([i as u8 * 40, 10, 200]))
                .save(&path)
                .unwrap();
            samples.push(ImageSample::new(path, i % 2, "x"));
        }
        let dataset = ImageFolderDataset::new(samples, 32);

        let device = Default::default();
        let model = ClassifierConfig::new(2)
            .with_hidden_units(8)
            .with_width_multiplier(0.35)
            .init::<NdArray>(&device);

        let result = evaluate(&model, &dataset, 2, &device, false).unwrap();
        assert_eq!(result.num_samples, 5);
        assert!((0.0..=1.0).contains(&result.accuracy));
        assert!(result.loss.is_finite() && result.loss > 0.0);

        // batch order does not change the metrics
        let shuffled = evaluate_in_order(&model, &dataset, &[4, 2, 0, 3, 1], 2, &device, false).unwrap();
        assert!((shuffled.loss - result.loss).abs() < 1e-5);
        assert_eq!(shuffled.accuracy, result.accuracy);
    }

    #[test]
    fn test_evaluate_empty_dataset() {
        let device = Default::default();
        let model = ClassifierConfig::new(2)
            .with_hidden_units(8)
            .with_width_multiplier(0.35)
            .init::<NdArray>(&device);
        let dataset = ImageFolderDataset::new(Vec::new(), 32);
        let result = evaluate(&model, &dataset, 4, &device, false).unwrap();
        assert_eq!(result, EvaluationResult::default());
    }
}
