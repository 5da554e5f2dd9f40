//! Feature extraction for character hypotheses.
//!
//! A feature map is told about the whole line first (`set_line`), then
//! asked for the feature vector of one candidate box and mask at a time.

use crate::config::{set_param, ComponentState};
use crate::error::{Error, Result};
use crate::geom::Rect;
use crate::lineinfo::LineInfo;
use crate::segmenter::binarize;
use image::imageops::{resize, FilterType};
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use serde::{Deserialize, Serialize};

pub trait FeatureMap: Send + Sync {
    fn name(&self) -> &'static str;

    /// Prepare for the boxes of a new line image (dark ink on light).
    fn set_line(&mut self, image: &GrayImage) -> Result<()>;

    /// Features of the box `bbox`; `mask` has the box's dimensions and
    /// marks member pixels with nonzero values.
    fn extract_features(&self, bbox: Rect, mask: &GrayImage) -> Result<Vec<f32>>;

    /// Line geometry estimated by `set_line`, if the map computes one.
    fn line_info(&self) -> Option<&LineInfo> {
        None
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    fn state(&self) -> Result<serde_json::Value>;
}

/// Create a feature map with default parameters by name.
pub fn make_feature_map(name: &str) -> Result<Box<dyn FeatureMap>> {
    match name {
        "cfmap" => Ok(Box::new(CenterFeatureMap::default())),
        "sfmap" => Ok(Box::new(ScaledFeatureMap::default())),
        _ => Err(Error::UnknownComponent(name.to_string())),
    }
}

/// Recreate a saved feature map.
pub fn restore_feature_map(saved: &ComponentState) -> Result<Box<dyn FeatureMap>> {
    match saved.name.as_str() {
        "cfmap" => Ok(Box::new(CenterFeatureMap::new(serde_json::from_value(
            saved.state.clone(),
        )?))),
        "sfmap" => Ok(Box::new(ScaledFeatureMap::new(serde_json::from_value(
            saved.state.clone(),
        )?))),
        name => Err(Error::UnknownComponent(name.to_string())),
    }
}

/// Append a unary ("thermometer") code of `value`: step `i` fires with
/// `weight` when `value >= lo + i * (hi - lo) / steps`.
pub fn push_unary(v: &mut Vec<f32>, value: f32, lo: f32, hi: f32, steps: usize, weight: f32) {
    let delta = (hi - lo) / steps as f32;
    for i in 0..steps {
        let thresh = i as f32 * delta + lo;
        v.push(if value >= thresh { weight } else { 0.0 });
    }
}

/// Surround `mask` with a zero border of `dx` columns and `dy` rows.
pub fn pad_by(mask: &GrayImage, dx: u32, dy: u32) -> GrayImage {
    let mut out = GrayImage::new(mask.width() + 2 * dx, mask.height() + 2 * dy);
    for (x, y, p) in mask.enumerate_pixels() {
        out.put_pixel(x + dx, y + dy, *p);
    }
    out
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaledFeatureMapConfig {
    /// side of the rescaled character window
    pub size: u32,
}

impl Default for ScaledFeatureMapConfig {
    fn default() -> Self {
        ScaledFeatureMapConfig { size: 32 }
    }
}

/// Pixel features: the masked ink inside the box, rescaled to a square
/// window.
#[derive(Clone, Debug)]
pub struct ScaledFeatureMap {
    pub config: ScaledFeatureMapConfig,
    ink: GrayImage,
}

impl Default for ScaledFeatureMap {
    fn default() -> Self {
        ScaledFeatureMap::new(ScaledFeatureMapConfig::default())
    }
}

impl ScaledFeatureMap {
    pub fn new(config: ScaledFeatureMapConfig) -> Self {
        ScaledFeatureMap {
            config,
            ink: GrayImage::new(0, 0),
        }
    }
}

impl FeatureMap for ScaledFeatureMap {
    fn name(&self) -> &'static str {
        "sfmap"
    }

    fn set_line(&mut self, image: &GrayImage) -> Result<()> {
        self.ink = GrayImage::from_fn(image.width(), image.height(), |x, y| {
            Luma([255 - image.get_pixel(x, y)[0]])
        });
        Ok(())
    }

    fn extract_features(&self, bbox: Rect, mask: &GrayImage) -> Result<Vec<f32>> {
        let size = self.config.size;
        if bbox.is_empty() {
            return Ok(vec![0.0; (size * size) as usize]);
        }
        let (w, h) = (bbox.width() as u32, bbox.height() as u32);
        if mask.dimensions() != (w, h) {
            return Err(Error::DimensionMismatch {
                image: (w, h),
                segmentation: mask.dimensions(),
            });
        }
        let (iw, ih) = (self.ink.width() as i32, self.ink.height() as i32);
        let window = GrayImage::from_fn(w, h, |x, y| {
            let (ix, iy) = (bbox.x0 + x as i32, bbox.y0 + y as i32);
            if ix < 0 || iy < 0 || ix >= iw || iy >= ih || mask.get_pixel(x, y)[0] == 0 {
                Luma([0u8])
            } else {
                *self.ink.get_pixel(ix as u32, iy as u32)
            }
        });
        let scaled = resize(&window, size, size, FilterType::Triangle);
        Ok(scaled.pixels().map(|p| p[0] as f32 / 255.0).collect())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        set_param(&mut self.config, key, value)
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CenterFeatureMapConfig {
    /// steps of each unary property code
    pub csize: usize,
    /// maximum height of a padded box
    pub maxheight: f32,
    /// how much context to include (1.0 = no context)
    pub context: f32,
    /// dilate the extraction mask by this much
    pub mdilate: u8,
    /// minimum size of bounding box in terms of xheight
    pub minsize_factor: f32,
    /// use character properties (aspect ratio, etc.)
    pub use_props: bool,
    /// lines with a smaller x-height are rejected
    pub min_xheight: f32,
    pub sfmap: ScaledFeatureMapConfig,
}

impl Default for CenterFeatureMapConfig {
    fn default() -> Self {
        CenterFeatureMapConfig {
            csize: 40,
            maxheight: 300.0,
            context: 1.5,
            mdilate: 2,
            minsize_factor: 1.3,
            use_props: true,
            min_xheight: 4.0,
            sfmap: ScaledFeatureMapConfig::default(),
        }
    }
}

/// Normalizes a box around the character (dilation, squaring, context,
/// minimum size) before handing it to a [ScaledFeatureMap], and appends
/// baseline-relative shape properties.
#[derive(Clone, Debug)]
pub struct CenterFeatureMap {
    pub config: CenterFeatureMapConfig,
    inner: ScaledFeatureMap,
    info: Option<LineInfo>,
}

impl Default for CenterFeatureMap {
    fn default() -> Self {
        CenterFeatureMap::new(CenterFeatureMapConfig::default())
    }
}

impl CenterFeatureMap {
    pub fn new(config: CenterFeatureMapConfig) -> Self {
        let inner = ScaledFeatureMap::new(config.sfmap.clone());
        CenterFeatureMap {
            config,
            inner,
            info: None,
        }
    }

    fn info(&self) -> Result<&LineInfo> {
        self.info
            .as_ref()
            .ok_or_else(|| Error::BadTextLine("no line set".to_string()))
    }

    fn push_props(&self, v: &mut Vec<f32>, b: Rect) -> Result<()> {
        let info = self.info()?;
        let xheight = info.xheight;
        let baseline = info.baseline(b.x0 as f32);
        let bottom = (baseline - b.y1 as f32) / xheight;
        let top = (baseline - b.y0 as f32) / xheight;
        let width = b.width() as f32 / xheight;
        let height = b.height() as f32 / xheight;
        let aspect = (b.height().max(1) as f32 / b.width().max(1) as f32).ln();
        let csize = self.config.csize;
        for &value in [top, bottom, width, height, aspect].iter() {
            push_unary(v, value, -1.0, 4.0, csize, 1.0);
        }
        Ok(())
    }
}

impl FeatureMap for CenterFeatureMap {
    fn name(&self) -> &'static str {
        "cfmap"
    }

    fn set_line(&mut self, image: &GrayImage) -> Result<()> {
        self.info = None;
        self.inner.set_line(image)?;
        let info = LineInfo::estimate(&binarize(image), self.config.min_xheight)?;
        self.info = Some(info);
        Ok(())
    }

    fn extract_features(&self, bbox: Rect, mask: &GrayImage) -> Result<Vec<f32>> {
        let config = &self.config;
        let xheight = self.info()?.xheight;
        let too_high = |b: &Rect| Error::BoxTooHigh {
            height: b.height(),
            maxheight: config.maxheight,
        };
        if bbox.height() as f32 >= config.maxheight {
            return Err(too_high(&bbox));
        }
        let mut b = bbox;
        let mut mask = mask.clone();
        if config.mdilate > 0 {
            let d = config.mdilate as u32;
            mask = dilate(&pad_by(&mask, d, d), Norm::L1, config.mdilate);
            b.pad_by(d as i32, d as i32);
        }
        if b.width() > b.height() {
            let dy = (b.width() - b.height()) / 2;
            b.pad_by(0, dy);
            mask = pad_by(&mask, 0, dy as u32);
        } else {
            let dx = (b.height() - b.width()) / 2;
            b.pad_by(dx, 0);
            mask = pad_by(&mask, dx as u32, 0);
        }
        let r = ((config.context - 1.0) * b.width() as f32) as i32;
        if r > 0 {
            b.pad_by(r, r);
            mask = pad_by(&mask, r as u32, r as u32);
        }
        if config.minsize_factor >= 0.0 {
            let minsize = (config.minsize_factor * xheight) as i32;
            let p = (minsize - b.width()).max(minsize - b.height());
            if p > 0 {
                b.pad_by(p, p);
                mask = pad_by(&mask, p as u32, p as u32);
            }
        }
        if b.height() as f32 >= config.maxheight {
            return Err(too_high(&b));
        }
        let mut v = self.inner.extract_features(b, &mask)?;
        if config.use_props {
            self.push_props(&mut v, bbox)?;
        }
        Ok(v)
    }

    fn line_info(&self) -> Option<&LineInfo> {
        self.info.as_ref()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        set_param(&mut self.config, key, value)?;
        self.inner.config = self.config.sfmap.clone();
        Ok(())
    }

    fn state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&self.config)?)
    }
}
