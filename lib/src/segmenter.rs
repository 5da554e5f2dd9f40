//! Over-segmentation of binarized text lines into atomic components.

use crate::config::set_param;
use crate::error::{Error, Result};
use crate::geom::Rect;
use crate::seg::{bounding_boxes, max_label, Segmentation};
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};
use log::debug;
use serde::{Deserialize, Serialize};

/// Lines whose gray values span less than this are treated as blank.
const MIN_CONTRAST: u8 = 16;

/// Binarize a dark-on-light line image with Otsu's threshold.
///
/// Ink pixels become 255, background 0.
pub fn binarize(image: &GrayImage) -> GrayImage {
    let (lo, hi) = image
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    if hi < lo || hi - lo < MIN_CONTRAST {
        return GrayImage::new(image.width(), image.height());
    }
    let level = otsu_level(image);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] <= level {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Splits a binarized line into atomic components.
pub trait SegmentLine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Label every ink pixel of `binarized` (nonzero = ink) with a
    /// component id from 1; background stays 0.
    fn charseg(&self, binarized: &GrayImage) -> Result<Segmentation>;

    /// Set one parameter from its string form.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// Create a segmenter by name.
pub fn make_segmenter(name: &str) -> Result<Box<dyn SegmentLine>> {
    match name {
        "ccs" => Ok(Box::new(CcsSegmenter::default())),
        _ => Err(Error::UnknownComponent(name.to_string())),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// maximum height of input line
    pub maxheight: u32,
    /// merge components whose horizontal overlap exceeds this fraction of
    /// the narrower one
    pub merge_overlap: f32,
    /// cut components wider than this multiple of their height
    pub max_width_factor: f32,
    /// never cut pieces narrower than this
    pub min_cut_width: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        SegmenterConfig {
            maxheight: 300,
            merge_overlap: 0.5,
            max_width_factor: 1.0,
            min_cut_width: 4,
        }
    }
}

/// Connected components, merged vertically and cut horizontally at ink
/// minima.
#[derive(Clone, Debug, Default)]
pub struct CcsSegmenter {
    pub config: SegmenterConfig,
}

impl CcsSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        CcsSegmenter { config }
    }

    /// Merge components that sit above each other, like the dot and the
    /// stem of an `i`.
    fn merge_stacked(&self, labels: &mut Segmentation) {
        let boxes = bounding_boxes(labels);
        let mut parent: Vec<usize> = (0..boxes.len()).collect();
        fn find(parent: &mut Vec<usize>, mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }
        for i in 1..boxes.len() {
            for j in i + 1..boxes.len() {
                let (a, b) = (&boxes[i], &boxes[j]);
                if a.is_empty() || b.is_empty() {
                    continue;
                }
                let narrow = a.width().min(b.width()) as f32;
                if a.horizontal_overlap(b) as f32 > self.config.merge_overlap * narrow {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
        let roots: Vec<u32> = (0..boxes.len())
            .map(|i| find(&mut parent, i) as u32)
            .collect();
        for p in labels.pixels_mut() {
            p[0] = roots[p[0] as usize];
        }
    }

    /// Cut wide components at the column with the least ink in their
    /// middle half until every piece is narrow enough.
    fn cut_wide(&self, labels: &mut Segmentation) {
        let boxes = bounding_boxes(labels);
        let mut heights: Vec<i32> = boxes
            .iter()
            .filter(|b| !b.is_empty())
            .map(|b| b.height())
            .collect();
        heights.sort_unstable();
        let typical = heights.get(heights.len() / 2).copied().unwrap_or(0);
        let mut next = max_label(labels) + 1;
        let mut work: Vec<(u32, Rect)> = boxes
            .into_iter()
            .enumerate()
            .skip(1)
            .filter(|(_, b)| !b.is_empty())
            .map(|(l, b)| (l as u32, b))
            .collect();
        let min_cut = self.config.min_cut_width as i32;
        while let Some((label, b)) = work.pop() {
            let limit = self.config.max_width_factor * b.height().max(typical) as f32;
            if (b.width() as f32) <= limit || b.width() < 2 * min_cut {
                continue;
            }
            let lo = (b.x0 + b.width() / 4).max(b.x0 + min_cut);
            let hi = (b.x1 - b.width() / 4).min(b.x1 - min_cut);
            if lo >= hi {
                continue;
            }
            let mut cut = lo;
            let mut least = u32::MAX;
            for x in lo..hi {
                let ink = (b.y0..b.y1)
                    .filter(|&y| labels.get_pixel(x as u32, y as u32)[0] == label)
                    .count() as u32;
                if ink < least {
                    least = ink;
                    cut = x;
                }
            }
            let mut left = Rect::empty();
            let mut right = Rect::empty();
            for y in b.y0..b.y1 {
                for x in b.x0..b.x1 {
                    let p = labels.get_pixel_mut(x as u32, y as u32);
                    if p[0] != label {
                        continue;
                    }
                    if x >= cut {
                        p[0] = next;
                        right.include(x, y);
                    } else {
                        left.include(x, y);
                    }
                }
            }
            debug!("cut component {} at x={} (ink {})", label, cut, least);
            if !left.is_empty() {
                work.push((label, left));
            }
            if !right.is_empty() {
                work.push((next, right));
            }
            next += 1;
        }
    }
}

impl SegmentLine for CcsSegmenter {
    fn name(&self) -> &'static str {
        "ccs"
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        set_param(&mut self.config, key, value)
    }

    fn charseg(&self, binarized: &GrayImage) -> Result<Segmentation> {
        let (width, height) = binarized.dimensions();
        if height > self.config.maxheight {
            return Err(Error::LineTooHigh { width, height });
        }
        let mut labels = connected_components(binarized, Connectivity::Eight, Luma([0u8]));
        if max_label(&labels) == 0 {
            return Err(Error::NoComponents);
        }
        self.merge_stacked(&mut labels);
        self.cut_wide(&mut labels);

        // number components from left to right
        let boxes = bounding_boxes(&labels);
        let mut order: Vec<usize> = (1..boxes.len()).filter(|&l| !boxes[l].is_empty()).collect();
        order.sort_by_key(|&l| (boxes[l].x0, boxes[l].y0, l));
        let mut map = vec![0u32; boxes.len()];
        for (rank, &l) in order.iter().enumerate() {
            map[l] = rank as u32 + 1;
        }
        for p in labels.pixels_mut() {
            p[0] = map[p[0] as usize];
        }
        debug!("charseg: {} components", order.len());
        Ok(labels)
    }
}
