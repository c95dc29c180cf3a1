//! Core type definitions shared across the workspace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Labels served by the prediction endpoint, in class-index order.
///
/// The order matches the sorted class directory names produced by the
/// dataset scan, so index `i` of a model output maps to `CLASS_NAMES[i]`.
pub const CLASS_NAMES: [&str; 8] = [
    "cardboard", "fire", "glass", "metal", "paper", "plastic", "pothole", "trash",
];

/// Number of classes in the fixed label set
pub const NUM_CLASSES: usize = CLASS_NAMES.len();

/// Square input resolution expected by the backbone
pub const IMAGE_SIZE: usize = 224;

/// File extensions counted as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// Returns true when the path carries one of the recognised image extensions.
pub fn is_image_file(path: &std::path::Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Represents an image sample with its label
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label (index)
    pub label: usize,
    /// Class name (parent directory)
    pub class_name: String,
}

impl ImageSample {
    /// Creates a new image sample
    pub fn new(path: PathBuf, label: usize, class_name: impl Into<String>) -> Self {
        Self {
            path,
            label,
            class_name: class_name.into(),
        }
    }
}

/// Data split type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataSplit {
    /// Training data
    Train,
    /// Validation data
    Validation,
    /// Test data
    Test,
}

impl DataSplit {
    /// All splits in checking order
    pub const ALL: [DataSplit; 3] = [DataSplit::Train, DataSplit::Validation, DataSplit::Test];

    /// Name of the split directory under the dataset root
    pub fn dir_name(&self) -> &'static str {
        match self {
            DataSplit::Train => "train",
            DataSplit::Validation => "valid",
            DataSplit::Test => "test",
        }
    }
}

impl std::fmt::Display for DataSplit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSplit::Train => write!(f, "Train"),
            DataSplit::Validation => write!(f, "Validation"),
            DataSplit::Test => write!(f, "Test"),
        }
    }
}

/// Training phase of the two-phase schedule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrainingPhase {
    /// Backbone frozen, head only
    Initial,
    /// Trailing backbone layers unfrozen
    FineTune,
}

impl std::fmt::Display for TrainingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingPhase::Initial => write!(f, "Initial"),
            TrainingPhase::FineTune => write!(f, "Fine-tune"),
        }
    }
}

/// Result of classifying a single image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    /// Predicted label
    pub class: String,
    /// Max softmax probability
    pub confidence: f64,
}

impl Prediction {
    /// Builds a prediction from a probability vector and the matching labels.
    ///
    /// Returns `None` when the vector is empty or longer than the label list.
    pub fn from_probabilities<S: AsRef<str>>(probabilities: &[f32], labels: &[S]) -> Option<Self> {
        if probabilities.is_empty() || probabilities.len() > labels.len() {
            return None;
        }

        let (index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });

        Some(Self {
            class: labels[index].as_ref().to_string(),
            confidence: f64::from(confidence).clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_class_names_sorted() {
        let mut sorted = CLASS_NAMES;
        sorted.sort();
        assert_eq!(sorted, CLASS_NAMES);
        assert_eq!(NUM_CLASSES, 8);
    }

    #[test]
    fn test_is_image_file() {
        assert!(is_image_file(Path::new("a/b.JPG")));
        assert!(is_image_file(Path::new("x.gif")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("no_extension")));
    }

    #[test]
    fn test_split_dir_names() {
        assert_eq!(DataSplit::Train.dir_name(), "train");
        assert_eq!(DataSplit::Validation.dir_name(), "valid");
        assert_eq!(DataSplit::Test.dir_name(), "test");
    }

    #[test]
    fn test_prediction_argmax() {
        let probs = [0.05, 0.7, 0.25];
        let pred = Prediction::from_probabilities(&probs, &CLASS_NAMES).unwrap();
        assert_eq!(pred.class, "fire");
        assert!((pred.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_prediction_rejects_mismatched_lengths() {
        assert!(Prediction::from_probabilities(&[], &CLASS_NAMES).is_none());
        assert!(Prediction::from_probabilities(&[0.5, 0.5], &["only"]).is_none());
    }

    #[test]
    fn test_prediction_serializes_class_key() {
        let pred = Prediction { class: "glass".into(), confidence: 0.5 };
        let json = serde_json::to_value(&pred).unwrap();
        assert_eq!(json["class"], "glass");
        assert_eq!(json["confidence"], 0.5);
    }
}
