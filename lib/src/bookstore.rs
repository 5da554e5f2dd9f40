//! File layout of a book: `PREFIX/PPPP/LLLL<suffix>`, one directory per
//! page and one file per line and kind of data.

use crate::error::{Error, Result};
use crate::seg::{from_packed_rgb, to_packed_rgb, Segmentation};
use glob::glob;
use image::GrayImage;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// line image
pub const IMAGE: &str = ".png";
/// atomic (raw) segmentation
pub const RSEG: &str = ".rseg.png";
/// character segmentation
pub const CSEG: &str = ".cseg.png";
pub const GROUND_TRUTH: &str = ".gt.txt";
pub const TEXT: &str = ".txt";
pub const COSTS: &str = ".costs";
pub const LATTICE: &str = ".fst";

#[derive(Clone, Debug)]
pub struct BookStore {
    prefix: PathBuf,
}

impl BookStore {
    pub fn new<P: Into<PathBuf>>(prefix: P) -> BookStore {
        BookStore {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Path of one line's file, e.g. `book/0001/0010.gt.txt`.
    pub fn path(&self, page: u32, line: u32, suffix: &str) -> PathBuf {
        self.prefix
            .join(format!("{:04}", page))
            .join(format!("{:04}{}", line, suffix))
    }

    /// All line bases (paths without suffix) having a file with `suffix`,
    /// in page and line order.
    pub fn lines(&self, suffix: &str) -> Result<Vec<PathBuf>> {
        let pattern = self
            .prefix
            .join(format!("[0-9][0-9][0-9][0-9]/[0-9][0-9][0-9][0-9]{}", suffix));
        let mut bases = Vec::new();
        for entry in glob(&pattern.to_string_lossy())? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => return Err(Error::Io(e.into())),
            };
            if let Some(base) = strip_suffix(&path, suffix) {
                bases.push(base);
            }
        }
        bases.sort();
        Ok(bases)
    }
}

/// `base` with `suffix` appended: `0001/0002` + `.png`.
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut s = base.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// The line base of `path` if it ends in `suffix`.
pub fn strip_suffix(path: &Path, suffix: &str) -> Option<PathBuf> {
    let s = path.to_str()?;
    s.strip_suffix(suffix).map(PathBuf::from)
}

fn image_error(path: &Path, source: image::error::ImageError) -> Error {
    Error::Image {
        path: path.display().to_string(),
        source,
    }
}

pub fn read_line_image(path: &Path) -> Result<GrayImage> {
    Ok(image::open(path)
        .map_err(|e| image_error(path, e))?
        .into_luma8())
}

pub fn write_line_image(path: &Path, image: &GrayImage) -> Result<()> {
    image.save(path).map_err(|e| image_error(path, e))
}

/// Read a segmentation stored as packed RGB.
pub fn read_segmentation(path: &Path) -> Result<Segmentation> {
    let rgb = image::open(path)
        .map_err(|e| image_error(path, e))?
        .into_rgb8();
    Ok(from_packed_rgb(&rgb))
}

pub fn write_segmentation(path: &Path, seg: &Segmentation) -> Result<()> {
    to_packed_rgb(seg)
        .save(path)
        .map_err(|e| image_error(path, e))
}

/// Read a transcript; the trailing newline is not part of it.
pub fn read_transcript(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)?;
    Ok(text.trim_end_matches(|c| c == '\n' || c == '\r').to_string())
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", text)?;
    Ok(())
}

/// Write one `"{index} {cost}"` line per path step.
pub fn write_costs(path: &Path, costs: &[f32]) -> Result<()> {
    let mut out = String::new();
    for (i, cost) in costs.iter().enumerate() {
        out.push_str(&format!("{} {}\n", i, cost));
    }
    fs::write(path, out)?;
    Ok(())
}

pub fn read_costs(path: &Path) -> Result<Vec<f32>> {
    let text = fs::read_to_string(path)?;
    let mut costs = Vec::new();
    for line in text.lines() {
        let cost = line
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("{}: bad cost line {:?}", path.display(), line),
                )
            })?;
        costs.push(cost);
    }
    Ok(costs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_paths() {
        let store = BookStore::new("book");
        let p = store.path(1, 23, GROUND_TRUTH);
        assert_eq!(p, Path::new("book/0001/0023.gt.txt"));
        let base = strip_suffix(&p, GROUND_TRUTH).unwrap();
        assert_eq!(with_suffix(&base, CSEG), Path::new("book/0001/0023.cseg.png"));
        assert!(strip_suffix(&p, COSTS).is_none());
    }

    #[test]
    fn test_discovery_and_io() {
        let dir = tempfile::tempdir().unwrap();
        let store = BookStore::new(dir.path());
        fs::create_dir_all(dir.path().join("0002")).unwrap();
        fs::create_dir_all(dir.path().join("0001")).unwrap();
        write_text(&store.path(2, 1, GROUND_TRUTH), "later").unwrap();
        write_text(&store.path(1, 7, GROUND_TRUTH), "first").unwrap();
        fs::write(dir.path().join("0001/notes.gt.txt"), "x").unwrap();
        let lines = store.lines(GROUND_TRUTH).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            read_transcript(&with_suffix(&lines[0], GROUND_TRUTH)).unwrap(),
            "first"
        );

        let mut seg = Segmentation::new(4, 2);
        seg.put_pixel(1, 0, Luma([3]));
        seg.put_pixel(2, 1, Luma([0x10203]));
        let path = store.path(1, 7, CSEG);
        write_segmentation(&path, &seg).unwrap();
        assert_eq!(read_segmentation(&path).unwrap(), seg);
        // a character segmentation is not a line image
        assert!(store.lines(IMAGE).unwrap().is_empty());

        let costs_path = store.path(1, 7, COSTS);
        write_costs(&costs_path, &[1.5, 0.25]).unwrap();
        assert_eq!(read_costs(&costs_path).unwrap(), vec![1.5, 0.25]);
        assert!(matches!(
            read_line_image(&store.path(9, 9, IMAGE)),
            Err(Error::Image { .. })
        ));
    }
}
