//! Image-folder dataset scanning.
//!
//! A split directory is laid out as one subdirectory per class:
//!
//! ```text
//! train/
//! ├── cardboard/
//! │   ├── 0001.jpg
//! │   └── ...
//! ├── fire/
//! └── ...
//! ```
//!
//! Class indices follow the sorted directory names, so every split built from
//! the same class set agrees on the label of each class.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use civic_core::{is_image_file, Error, ImageSample, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::integrity::list_class_dirs;

/// Labelled samples of one split
#[derive(Debug, Clone)]
pub struct ImageFolder {
    /// Root directory of the split
    pub root_dir: PathBuf,
    /// All samples, grouped by class and sorted by path within a class
    pub samples: Vec<ImageSample>,
    /// Class names in index order
    pub classes: Vec<String>,
    /// Mapping from class name to label index
    pub class_to_idx: HashMap<String, usize>,
}

impl ImageFolder {
    /// Scan a split directory.
    ///
    /// Images are collected recursively below each class directory.
    pub fn scan<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image folder: {}", root_dir.display());

        if !root_dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Dataset directory does not exist: {}",
                root_dir.display()
            )));
        }

        let classes = list_class_dirs(&root_dir)?;
        if classes.is_empty() {
            return Err(Error::Dataset(format!(
                "No class subdirectories in {}",
                root_dir.display()
            )));
        }

        let class_to_idx: HashMap<String, usize> = classes
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            let before = samples.len();

            for entry in WalkDir::new(&class_dir)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if entry.file_type().is_file() && is_image_file(path) {
                    samples.push(ImageSample::new(path.to_path_buf(), label, class_name.clone()));
                }
            }

            debug!(
                "Class '{}' (label {}): {} samples",
                class_name,
                label,
                samples.len() - before
            );
        }

        info!(
            "Found {} images belonging to {} classes",
            samples.len(),
            classes.len()
        );

        Ok(Self {
            root_dir,
            samples,
            classes,
            class_to_idx,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fail unless `other` uses exactly the same classes in the same order.
    pub fn ensure_same_classes(&self, other: &ImageFolder) -> Result<()> {
        if self.classes != other.classes {
            return Err(Error::Dataset(format!(
                "Class mismatch between {} {:?} and {} {:?}",
                self.root_dir.display(),
                self.classes,
                other.root_dir.display(),
                other.classes
            )));
        }
        Ok(())
    }

    /// `{class: index}` rendered in index order
    pub fn class_indices_display(&self) -> String {
        let entries: Vec<String> = self
            .classes
            .iter()
            .enumerate()
            .map(|(idx, name)| format!("'{name}': {idx}"))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_image(path: &Path) {
        let img = image::ImageBuffer::from_fn(8, 8, |_, _| image::Rgb([255u8, 0u8, 0u8]));
        img.save(path).unwrap();
    }

    fn build_split(root: &Path) {
        for class in ["paper", "fire", "glass"] {
            fs::create_dir_all(root.join(class)).unwrap();
        }
        create_test_image(&root.join("fire/b.png"));
        create_test_image(&root.join("fire/a.png"));
        create_test_image(&root.join("glass/x.jpg"));
        fs::create_dir_all(root.join("paper/nested")).unwrap();
        create_test_image(&root.join("paper/nested/deep.bmp"));
        fs::write(root.join("glass/notes.txt"), "skip me").unwrap();
    }

    #[test]
    fn test_scan_sorts_classes_and_samples() {
        let tmp = TempDir::new().unwrap();
        build_split(tmp.path());

        let folder = ImageFolder::scan(tmp.path()).unwrap();
        assert_eq!(folder.classes, vec!["fire", "glass", "paper"]);
        assert_eq!(folder.class_to_idx["paper"], 2);
        assert_eq!(folder.len(), 4);

        let names: Vec<_> = folder
            .samples
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.png", "b.png", "x.jpg", "deep.bmp"]);
        assert_eq!(folder.samples[3].label, 2);
    }

    #[test]
    fn test_scan_missing_dir() {
        let result = ImageFolder::scan("/definitely/not/here");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_class_indices_display() {
        let tmp = TempDir::new().unwrap();
        build_split(tmp.path());
        let folder = ImageFolder::scan(tmp.path()).unwrap();
        assert_eq!(folder.class_indices_display(), "{'fire': 0, 'glass': 1, 'paper': 2}");
    }

    #[test]
    fn test_ensure_same_classes() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        build_split(a.path());
        build_split(b.path());
        let fa = ImageFolder::scan(a.path()).unwrap();
        let fb = ImageFolder::scan(b.path()).unwrap();
        assert!(fa.ensure_same_classes(&fb).is_ok());

        fs::create_dir_all(b.path().join("trash")).unwrap();
        create_test_image(&b.path().join("trash/t.png"));
        let fb = ImageFolder::scan(b.path()).unwrap();
        assert!(fa.ensure_same_classes(&fb).is_err());
    }
}
