//! Segmentation images and the operations that relate them to each other.
//!
//! A [Segmentation] labels every pixel of a line with a component id. `0`
//! is background; atomic components ("rseg") and characters ("cseg") are
//! numbered from 1.

use crate::error::{Error, Result};
use crate::geom::Rect;
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;

pub type Segmentation = ImageBuffer<Luma<u32>, Vec<u32>>;

/// Background color of segmentations stored as packed RGB images.
pub const WHITE: u32 = 0x00ff_ffff;

/// The largest label in `seg`, 0 for an empty segmentation.
pub fn max_label(seg: &Segmentation) -> u32 {
    seg.as_raw().iter().copied().max().unwrap_or(0)
}

/// Renumber the labels of `seg` densely, keeping their relative order.
///
/// Returns the number of components.
pub fn renumber_labels(seg: &mut Segmentation) -> u32 {
    let mut map = vec![0u32; max_label(seg) as usize + 1];
    for &v in seg.as_raw().iter() {
        map[v as usize] = 1;
    }
    let mut next = 0;
    for (label, slot) in map.iter_mut().enumerate() {
        if label > 0 && *slot > 0 {
            next += 1;
            *slot = next;
        } else {
            *slot = 0;
        }
    }
    for p in seg.pixels_mut() {
        p[0] = map[p[0] as usize];
    }
    next
}

/// Bounding boxes indexed by label; entry 0 and labels without pixels are
/// empty rectangles.
pub fn bounding_boxes(seg: &Segmentation) -> Vec<Rect> {
    let mut boxes = vec![Rect::empty(); max_label(seg) as usize + 1];
    for (x, y, p) in seg.enumerate_pixels() {
        if p[0] > 0 {
            boxes[p[0] as usize].include(x as i32, y as i32);
        }
    }
    boxes
}

/// Relabel the foreground of `seg` by 8-connectivity, ignoring its ids.
pub fn label_components(seg: &Segmentation) -> Segmentation {
    let ink = GrayImage::from_fn(seg.width(), seg.height(), |x, y| {
        if seg.get_pixel(x, y)[0] > 0 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });
    connected_components(&ink, Connectivity::Eight, Luma([0u8]))
}

/// Render a segmentation as a black-on-white line image.
pub fn segmentation_as_bitmap(seg: &Segmentation) -> GrayImage {
    GrayImage::from_fn(seg.width(), seg.height(), |x, y| {
        if seg.get_pixel(x, y)[0] > 0 {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    })
}

/// Assign every atomic id of `seg` to the ground-truth id of `cseg` it
/// overlaps most.
///
/// The result is indexed by ground-truth id and lists the atomic ids
/// assigned to it in ascending order. Ties go to the smallest
/// ground-truth id; atomic ids without pixels land in entry 0.
pub fn correspondences(seg: &Segmentation, cseg: &Segmentation) -> Result<Vec<Vec<u32>>> {
    if seg.dimensions() != cseg.dimensions() {
        return Err(Error::DimensionMismatch {
            image: seg.dimensions(),
            segmentation: cseg.dimensions(),
        });
    }
    let nseg = max_label(seg) as usize + 1;
    let ncseg = max_label(cseg) as usize + 1;
    let mut overlaps: Vec<BTreeMap<u32, u32>> = vec![BTreeMap::new(); nseg];
    for (s, c) in seg.as_raw().iter().zip(cseg.as_raw().iter()) {
        *overlaps[*s as usize].entry(*c).or_insert(0) += 1;
    }
    let mut segments = vec![Vec::new(); ncseg];
    for (i, row) in overlaps.iter().enumerate() {
        let mut best = (0u32, 0u32);
        for (&j, &count) in row.iter() {
            if count > best.1 {
                best = (j, count);
            }
        }
        segments[best.0 as usize].push(i as u32);
    }
    Ok(segments)
}

/// Pack an inclusive run of atomic ids into a lattice input label.
pub fn pack_run(start: u32, end: u32) -> i32 {
    ((start << 16) | (end & 0xffff)) as i32
}

/// Split a lattice input label into its inclusive run of atomic ids.
pub fn unpack_run(id: i32) -> (u32, u32) {
    let id = id as u32;
    (id >> 16, id & 0xffff)
}

/// Recolor an atomic segmentation with the character runs chosen by the
/// decoder.
///
/// Every nonzero entry of `ids` is a packed run and becomes the next
/// color, starting at 1. Atomic ids covered by no run become background.
pub fn recolor(rseg: &Segmentation, ids: &[i32]) -> Result<Segmentation> {
    let ncomponents = max_label(rseg) + 1;
    let mut map = vec![0u32; ncomponents as usize];
    let mut color = 0;
    for &id in ids.iter().filter(|&&id| id != 0) {
        color += 1;
        let (start, end) = unpack_run(id);
        if start > end {
            return Err(Error::BrokenRun { start, end });
        }
        if start >= ncomponents || end >= ncomponents {
            return Err(Error::RunOutOfRange {
                start,
                end,
                ncomponents,
            });
        }
        for slot in &mut map[start as usize..=end as usize] {
            *slot = color;
        }
    }
    let mut cseg = Segmentation::new(rseg.width(), rseg.height());
    for (out, p) in cseg.pixels_mut().zip(rseg.pixels()) {
        out[0] = map[p[0] as usize];
    }
    Ok(cseg)
}

/// Recover the packed runs behind a recolored segmentation: for every
/// color, the smallest and largest atomic id underneath it.
pub fn runs_from_cseg(cseg: &Segmentation, rseg: &Segmentation) -> Vec<i32> {
    let ncolors = max_label(cseg) as usize;
    let mut ranges = vec![(u32::MAX, 0u32); ncolors + 1];
    for (c, r) in cseg.as_raw().iter().zip(rseg.as_raw().iter()) {
        if *c == 0 {
            continue;
        }
        let range = &mut ranges[*c as usize];
        range.0 = range.0.min(*r);
        range.1 = range.1.max(*r);
    }
    ranges
        .iter()
        .skip(1)
        .filter(|(lo, _)| *lo != u32::MAX)
        .map(|&(lo, hi)| pack_run(lo, hi))
        .collect()
}

/// Encode a segmentation as an RGB image, one 24-bit label per pixel,
/// with background stored white.
pub fn to_packed_rgb(seg: &Segmentation) -> RgbImage {
    RgbImage::from_fn(seg.width(), seg.height(), |x, y| {
        let v = match seg.get_pixel(x, y)[0] {
            0 => WHITE,
            v => v & WHITE,
        };
        Rgb([(v >> 16) as u8, (v >> 8) as u8, v as u8])
    })
}

/// Decode a packed RGB segmentation; white becomes background.
pub fn from_packed_rgb(img: &RgbImage) -> Segmentation {
    Segmentation::from_fn(img.width(), img.height(), |x, y| {
        let Rgb([r, g, b]) = *img.get_pixel(x, y);
        let v = (r as u32) << 16 | (g as u32) << 8 | b as u32;
        Luma([if v == WHITE { 0 } else { v }])
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a segmentation from rows of digits; `.` is background.
    pub(crate) fn seg_from_rows(rows: &[&str]) -> Segmentation {
        let h = rows.len() as u32;
        let w = rows[0].len() as u32;
        Segmentation::from_fn(w, h, |x, y| {
            let c = rows[y as usize].as_bytes()[x as usize];
            Luma([if c == b'.' { 0 } else { (c - b'0') as u32 }])
        })
    }

    #[test]
    fn test_renumber_labels() {
        let mut seg = seg_from_rows(&["3..7", "3..9"]);
        assert_eq!(renumber_labels(&mut seg), 3);
        assert_eq!(seg, seg_from_rows(&["1..2", "1..3"]));
    }

    #[test]
    fn test_bounding_boxes() {
        let seg = seg_from_rows(&["1..2", ".1.2", "...2"]);
        let boxes = bounding_boxes(&seg);
        assert_eq!(boxes.len(), 3);
        assert!(boxes[0].is_empty());
        assert_eq!(boxes[1], Rect::new(0, 0, 2, 2));
        assert_eq!(boxes[2], Rect::new(3, 0, 4, 3));
    }

    #[test]
    fn test_correspondences() {
        let seg = seg_from_rows(&["1122.334", "1122.334"]);
        let cseg = seg_from_rows(&["1111.222", "1111.222"]);
        let segments = correspondences(&seg, &cseg).unwrap();
        assert_eq!(segments, vec![vec![0], vec![1, 2], vec![3, 4]]);
        // idempotent
        assert_eq!(correspondences(&seg, &cseg).unwrap(), segments);
    }

    #[test]
    fn test_correspondences_tie_goes_to_first() {
        let seg = seg_from_rows(&["11"]);
        let cseg = seg_from_rows(&["21"]);
        let segments = correspondences(&seg, &cseg).unwrap();
        assert_eq!(segments[1], vec![1]);
        assert!(segments[2].is_empty());
    }

    #[test]
    fn test_recolor_round_trip() {
        let rseg = seg_from_rows(&["1.23.45.6", "1.23.45.6"]);
        let ids = vec![pack_run(1, 1), 0, pack_run(2, 3), pack_run(4, 6)];
        let cseg = recolor(&rseg, &ids).unwrap();
        assert_eq!(cseg, seg_from_rows(&["1.22.33.3", "1.22.33.3"]));
        let runs = runs_from_cseg(&cseg, &rseg);
        let expected: Vec<i32> = ids.into_iter().filter(|&id| id != 0).collect();
        assert_eq!(runs, expected);
    }

    #[test]
    fn test_recolor_rejects_broken_runs() {
        let rseg = seg_from_rows(&["123"]);
        match recolor(&rseg, &[pack_run(3, 1)]) {
            Err(Error::BrokenRun { start: 3, end: 1 }) => {}
            other => panic!("unexpected {:?}", other),
        }
        match recolor(&rseg, &[pack_run(2, 4)]) {
            Err(Error::RunOutOfRange { end: 4, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_packed_rgb() {
        let mut seg = seg_from_rows(&["1.2"]);
        seg.put_pixel(1, 0, Luma([0x0001_0203]));
        let rgb = to_packed_rgb(&seg);
        assert_eq!(*rgb.get_pixel(0, 0), Rgb([0, 0, 1]));
        assert_eq!(*rgb.get_pixel(1, 0), Rgb([1, 2, 3]));
        let mut blank = seg.clone();
        blank.put_pixel(1, 0, Luma([0]));
        let white = to_packed_rgb(&blank);
        assert_eq!(*white.get_pixel(1, 0), Rgb([255, 255, 255]));
        assert_eq!(from_packed_rgb(&white), blank);
        assert_eq!(from_packed_rgb(&rgb), seg);
    }

    #[test]
    fn test_label_components() {
        let seg = seg_from_rows(&["11.1", "...1"]);
        let labels = label_components(&seg);
        assert_eq!(max_label(&labels), 2);
    }
}
