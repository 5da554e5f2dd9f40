//! Baseline and x-height estimation from connected components.
//!
//! Coordinates follow the image: `y` grows downwards, so the baseline is
//! the line `y = intercept + slope * x` that character bottoms sit on.

use crate::error::{Error, Result};
use crate::geom::Rect;
use crate::seg::bounding_boxes;
use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use log::debug;

/// Components with fewer pixels than this are ignored (specks).
const MIN_AREA: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineInfo {
    pub intercept: f32,
    pub slope: f32,
    pub xheight: f32,
    /// how far descenders reach below the baseline
    pub descender_sink: f32,
    /// how far ascenders reach above the x-height
    pub ascender_rise: f32,
}

impl LineInfo {
    /// Estimate the line geometry of a binarized line (ink = nonzero).
    ///
    /// Fails with [Error::BadTextLine] when there is no usable component or
    /// the x-height comes out below `min_xheight`.
    pub fn estimate(binarized: &GrayImage, min_xheight: f32) -> Result<LineInfo> {
        let labels = connected_components(binarized, Connectivity::Eight, Luma([0u8]));
        let boxes: Vec<Rect> = bounding_boxes(&labels)
            .into_iter()
            .filter(|b| !b.is_empty() && b.width() * b.height() >= MIN_AREA)
            .collect();
        if boxes.is_empty() {
            return Err(Error::BadTextLine("no components".to_string()));
        }
        let mut heights: Vec<f32> = boxes.iter().map(|b| b.height() as f32).collect();
        heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = heights[heights.len() / 2];

        // fit the bottoms, then refit without the ones far off the line
        // (descenders, punctuation)
        let bottoms: Vec<(f32, f32)> = boxes
            .iter()
            .map(|b| ((b.x0 + b.x1) as f32 / 2.0, b.y1 as f32))
            .collect();
        let (mut slope, mut intercept) = linear_fit(&bottoms);
        let tolerance = 0.25 * median;
        let inliers: Vec<(f32, f32)> = bottoms
            .iter()
            .copied()
            .filter(|&(x, y)| (y - (intercept + slope * x)).abs() <= tolerance)
            .collect();
        if !inliers.is_empty() {
            let refit = linear_fit(&inliers);
            slope = refit.0;
            intercept = refit.1;
        }
        let baseline = |x: f32| intercept + slope * x;

        let mut rises: Vec<f32> = boxes
            .iter()
            .filter(|b| {
                let x = (b.x0 + b.x1) as f32 / 2.0;
                (b.y1 as f32 - baseline(x)).abs() <= tolerance
            })
            .map(|b| baseline((b.x0 + b.x1) as f32 / 2.0) - b.y0 as f32)
            .collect();
        if rises.is_empty() {
            rises = heights.clone();
        }
        rises.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let xheight = rises[rises.len() / 2];

        let mut descender_sink = 0f32;
        let mut top = 0f32;
        for b in boxes.iter() {
            let x = (b.x0 + b.x1) as f32 / 2.0;
            descender_sink = descender_sink.max(b.y1 as f32 - baseline(x));
            top = top.max(baseline(x) - b.y0 as f32);
        }
        let info = LineInfo {
            intercept,
            slope,
            xheight,
            descender_sink,
            ascender_rise: (top - xheight).max(0.0),
        };
        debug!(
            "LineInfo {} {} {} {} {}",
            info.intercept, info.slope, info.xheight, info.descender_sink, info.ascender_rise
        );
        if !(xheight >= min_xheight) {
            return Err(Error::BadTextLine(format!(
                "x-height {} below {}",
                xheight, min_xheight
            )));
        }
        Ok(info)
    }

    /// Baseline `y` at column `x`.
    pub fn baseline(&self, x: f32) -> f32 {
        self.intercept + self.slope * x
    }
}

/// Least-squares fit `y = slope * x + intercept`; a horizontal line
/// through the mean when the points do not determine a slope.
fn linear_fit(points: &[(f32, f32)]) -> (f32, f32) {
    let n = points.len() as f32;
    let (mut sx, mut sy, mut sxx, mut sxy) = (0f32, 0f32, 0f32, 0f32);
    for &(x, y) in points {
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }
    let factor = n * sxx - sx * sx;
    if points.len() < 2 || factor.abs() < 1e-6 {
        return (0.0, sy / n.max(1.0));
    }
    let slope = (n * sxy - sx * sy) / factor;
    let intercept = (sxx * sy - sx * sxy) / factor;
    (slope, intercept)
}
