//! Per-class image counts for a split.

use std::path::Path;

use civic_core::Result;

use crate::integrity::count_images;

/// Image count per class of one split, in class-index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDistribution {
    /// Column label suffix, e.g. "Train"
    pub name: String,
    pub counts: Vec<(String, usize)>,
}

impl ClassDistribution {
    /// Count the images directly inside each class directory of `split_dir`.
    ///
    /// A class directory that does not exist counts as zero.
    pub fn from_dir<S: AsRef<str>>(name: &str, split_dir: &Path, classes: &[S]) -> Result<Self> {
        let mut counts = Vec::with_capacity(classes.len());
        for class in classes {
            let class = class.as_ref();
            let dir = split_dir.join(class);
            let count = if dir.is_dir() { count_images(&dir)? } else { 0 };
            counts.push((class.to_string(), count));
        }
        Ok(Self {
            name: name.to_string(),
            counts,
        })
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }

    /// Two right-aligned columns: `Class` and `<name>_Count`.
    pub fn render(&self) -> String {
        let count_header = format!("{}_Count", self.name);
        let class_width = self
            .counts
            .iter()
            .map(|(c, _)| c.len())
            .chain(std::iter::once("Class".len()))
            .max()
            .unwrap_or(5);
        let count_width = self
            .counts
            .iter()
            .map(|(_, n)| n.to_string().len())
            .chain(std::iter::once(count_header.len()))
            .max()
            .unwrap_or(count_header.len());

        let mut out = format!("{:>cw$}  {:>nw$}\n", "Class", count_header, cw = class_width, nw = count_width);
        for (class, count) in &self.counts {
            out.push_str(&format!("{:>cw$}  {:>nw$}\n", class, count, cw = class_width, nw = count_width));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_dir_and_render() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("fire")).unwrap();
        for i in 0..3 {
            let img = image::RgbImage::new(2, 2);
            img.save(tmp.path().join(format!("fire/{i}.png"))).unwrap();
        }

        let dist = ClassDistribution::from_dir("Train", tmp.path(), &["fire", "metal"]).unwrap();
        assert_eq!(dist.counts, vec![("fire".into(), 3), ("metal".into(), 0)]);
        assert_eq!(dist.total(), 3);

        let table = dist.render();
        let lines: Vec<_> = table.lines().collect();
        assert_eq!(lines[0], "Class  Train_Count");
        assert_eq!(lines[1], " fire            3");
        assert_eq!(lines[2], "metal            0");
    }
}
