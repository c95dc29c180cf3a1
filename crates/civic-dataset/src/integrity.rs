//! Dataset integrity checks.
//!
//! Each split directory must hold one subdirectory per class and every class
//! must contain at least one image. Problems are reported, never raised; the
//! caller aggregates them across splits and decides whether to abort.

use std::fs;
use std::path::{Path, PathBuf};

use civic_core::is_image_file;
use tracing::{error, info, warn};

/// Problem found in a single split
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitIssue {
    /// Base directory does not exist
    MissingDirectory,
    /// Base directory could not be listed
    Unreadable(String),
    /// No class subdirectories
    NoClasses,
    /// These classes exist but hold no images
    EmptyClasses(Vec<String>),
}

/// Outcome of checking one split directory
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub base_dir: PathBuf,
    /// `(class, image count)` sorted by class name
    pub class_counts: Vec<(String, usize)>,
    pub issue: Option<SplitIssue>,
}

impl SplitReport {
    pub fn has_issues(&self) -> bool {
        self.issue.is_some()
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.class_counts.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn total_images(&self) -> usize {
        self.class_counts.iter().map(|(_, n)| n).sum()
    }
}

/// Aggregated outcome over several splits
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    pub splits: Vec<SplitReport>,
    /// Splits whose class set differs from the first split's
    pub class_set_mismatches: Vec<PathBuf>,
}

impl IntegrityReport {
    pub fn has_issues(&self) -> bool {
        self.splits.iter().any(SplitReport::has_issues) || !self.class_set_mismatches.is_empty()
    }
}

/// Sorted names of the immediate subdirectories of `dir`.
pub fn list_class_dirs(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut classes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            classes.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    classes.sort();
    Ok(classes)
}

/// Number of image files directly inside `dir` (not recursive).
pub fn count_images(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            count += 1;
        }
    }
    Ok(count)
}

/// Check one split directory.
pub fn check_dataset_classes(base_dir: &Path) -> SplitReport {
    info!("Checking dataset at: {}", base_dir.display());

    let mut report = SplitReport {
        base_dir: base_dir.to_path_buf(),
        class_counts: Vec::new(),
        issue: None,
    };

    if !base_dir.is_dir() {
        error!(
            "Dataset directory '{}' not found. Please ensure it exists.",
            base_dir.display()
        );
        report.issue = Some(SplitIssue::MissingDirectory);
        return report;
    }

    let classes = match list_class_dirs(base_dir) {
        Ok(classes) => classes,
        Err(e) => {
            error!("Cannot list '{}': {}", base_dir.display(), e);
            report.issue = Some(SplitIssue::Unreadable(e.to_string()));
            return report;
        }
    };

    if classes.is_empty() {
        error!(
            "No class subdirectories found in '{}'. Training cannot proceed.",
            base_dir.display()
        );
        report.issue = Some(SplitIssue::NoClasses);
        return report;
    }

    let mut empty = Vec::new();
    for class in classes {
        let count = match count_images(&base_dir.join(&class)) {
            Ok(count) => count,
            Err(e) => {
                warn!("Cannot read class '{}' in '{}': {}", class, base_dir.display(), e);
                0
            }
        };
        if count == 0 {
            warn!(
                "Class '{}' in '{}' exists but is empty! Training may be affected.",
                class,
                base_dir.display()
            );
            empty.push(class.clone());
        }
        report.class_counts.push((class, count));
    }

    if !empty.is_empty() {
        warn!("Some classes are empty. This can lead to errors or poor model performance.");
        report.issue = Some(SplitIssue::EmptyClasses(empty));
    }

    report
}

/// Check every split and aggregate the results.
///
/// Besides the per-split checks, all splits that have classes must share the
/// class set of the first one, otherwise class indices would disagree.
pub fn check_splits(dirs: &[PathBuf]) -> IntegrityReport {
    let splits: Vec<SplitReport> = dirs.iter().map(|d| check_dataset_classes(d)).collect();

    let mut class_set_mismatches = Vec::new();
    let mut with_classes = splits.iter().filter(|s| !s.class_counts.is_empty());
    if let Some(reference) = with_classes.next() {
        let expected = reference.class_names();
        for split in with_classes {
            if split.class_names() != expected {
                error!(
                    "Class set of '{}' {:?} differs from '{}' {:?}",
                    split.base_dir.display(),
                    split.class_names(),
                    reference.base_dir.display(),
                    expected
                );
                class_set_mismatches.push(split.base_dir.clone());
            }
        }
    }

    IntegrityReport {
        splits,
        class_set_mismatches,
    }
}
