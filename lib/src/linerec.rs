//! The line recognizer: trains a classifier from segmented ground truth
//! and turns line images into recognition lattices.

use crate::classifier::{make_classifier, restore_classifier, Classifier, OutputVector};
use crate::config::{set_param, ComponentState};
use crate::error::{Error, Result};
use crate::featuremap::{make_feature_map, restore_feature_map, FeatureMap};
use crate::fst::Fst;
use crate::geom::Rect;
use crate::grouper::{Grouper, GrouperConfig};
use crate::seg::{
    bounding_boxes, correspondences, label_components, renumber_labels, segmentation_as_bitmap,
    Segmentation,
};
use crate::segmenter::{binarize, make_segmenter, SegmentLine};
use image::GrayImage;
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Class used for training samples that are not characters.
pub const REJECT_CLASS: i32 = '~' as i32;
/// Class given to big groups nothing could be said about.
pub const NOISE_CLASS: i32 = '#' as i32;

const MAGIC_LEGACY: &[u8; 7] = b"linerec";
const MAGIC: &[u8; 7] = b"linerc2";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LinerecConfig {
    /// character classifier
    pub classifier: String,
    /// feature map to be used for recognition
    pub fmap: String,
    pub segmenter: String,
    /// saved recognizer to be loaded prior to training
    pub cpreload: String,
    /// correct the classifier output by priors
    pub use_priors: bool,
    /// use a reject class (use posteriors only and train on junk chars)
    pub use_reject: bool,
    /// maximum cost of a character to be added to the output
    pub maxcost: f32,
    /// minimum output class to be added (default=unicode space)
    pub minclass: i32,
    /// minimum probability for a character to appear in the output at all
    pub minprob: f32,
    /// maximum height of input line
    pub maxheight: u32,
    /// maximum height/width ratio of input line
    pub maxaspect: f32,
    pub space_fractile: f32,
    pub space_multiplier: f32,
    /// minimum space threshold (in xheight)
    pub space_min: f32,
    /// maximum space threshold (in xheight)
    pub space_max: f32,
    /// cost of inserting a space
    pub space_yes: f32,
    /// cost of not inserting a space
    pub space_no: f32,
    pub high_cost: f32,
    /// x-height assumed when the feature map has no estimate
    pub nominal_xheight: f32,
    pub grouper: GrouperConfig,
}

impl Default for LinerecConfig {
    fn default() -> Self {
        LinerecConfig {
            classifier: "nearest-mean".to_string(),
            fmap: "cfmap".to_string(),
            segmenter: "ccs".to_string(),
            cpreload: "none".to_string(),
            use_priors: false,
            use_reject: true,
            maxcost: 20.0,
            minclass: 32,
            minprob: 1e-6,
            maxheight: 300,
            maxaspect: 1.0,
            space_fractile: 0.5,
            space_multiplier: 2.0,
            space_min: 0.2,
            space_max: 1.1,
            space_yes: 1.0,
            space_no: 5.0,
            high_cost: 100.0,
            nominal_xheight: 10.0,
            grouper: GrouperConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrainingStats {
    /// samples added with a character class
    pub trained: usize,
    /// samples labelled with the reject class
    pub junk: usize,
    /// groups whose features could not be extracted
    pub skipped: usize,
    /// groups matching a ground-truth segment past the end of the transcript
    pub mismatched: usize,
}

#[derive(Clone, Debug)]
pub struct Recognition {
    /// the atomic segmentation the lattice input labels refer to
    pub segmentation: Segmentation,
    pub lattice: Fst,
    /// groups whose features could not be extracted; they only carry
    /// the fallback hypothesis
    pub skipped: usize,
}

/// What happened to one group during a parallel pass.
enum GroupOutcome<T> {
    Ready(T),
    Skip(Error),
    Mismatch,
}

struct Sample {
    class: i32,
    features: Vec<f32>,
}

struct Scores {
    classes: Vec<(i32, f32)>,
    space: bool,
}

#[derive(Serialize, Deserialize)]
struct SavedRecognizer {
    config: LinerecConfig,
    featuremap: ComponentState,
    classifier: ComponentState,
    #[serde(default)]
    counts: BTreeMap<i32, u64>,
}

pub struct LineRecognizer {
    config: LinerecConfig,
    segmenter: Box<dyn SegmentLine>,
    grouper: Grouper,
    featuremap: Box<dyn FeatureMap>,
    classifier: Box<dyn Classifier>,
    counts: BTreeMap<i32, u64>,
    counts_warned: bool,
    segmentation: Segmentation,
}

impl LineRecognizer {
    pub fn new() -> Result<LineRecognizer> {
        LineRecognizer::with_config(LinerecConfig::default())
    }

    pub fn with_config(config: LinerecConfig) -> Result<LineRecognizer> {
        Ok(LineRecognizer {
            segmenter: make_line_segmenter(&config)?,
            grouper: Grouper::new(config.grouper.clone()),
            featuremap: make_feature_map(&config.fmap)?,
            classifier: make_classifier(&config.classifier)?,
            counts: BTreeMap::new(),
            counts_warned: false,
            segmentation: Segmentation::new(0, 0),
            config,
        })
    }

    pub fn config(&self) -> &LinerecConfig {
        &self.config
    }

    /// Training samples seen per character class.
    pub fn counts(&self) -> &BTreeMap<i32, u64> {
        &self.counts
    }

    pub fn feature_map(&self) -> &dyn FeatureMap {
        self.featuremap.as_ref()
    }

    pub fn classifier(&self) -> &dyn Classifier {
        self.classifier.as_ref()
    }

    pub fn grouper(&self) -> &Grouper {
        &self.grouper
    }

    /// The atomic segmentation of the last line.
    pub fn segmentation(&self) -> &Segmentation {
        &self.segmentation
    }

    /// Set a parameter of the recognizer, its grouper, feature map or
    /// classifier, in that order of lookup. A key prefixed with a
    /// component name (`cfmap.maxheight`, `grouper.maxdist`) only goes to
    /// that component. Changing a component name replaces the component
    /// with a fresh one.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some((component, param)) = key.split_once('.') {
            return self.set_component(component, param, value);
        }
        match set_param(&mut self.config, key, value) {
            Ok(()) => {
                match key {
                    "classifier" => self.classifier = make_classifier(&self.config.classifier)?,
                    "fmap" => self.featuremap = make_feature_map(&self.config.fmap)?,
                    "segmenter" | "maxheight" => {
                        self.segmenter = make_line_segmenter(&self.config)?
                    }
                    "grouper" => self.grouper = Grouper::new(self.config.grouper.clone()),
                    _ => {}
                }
                return Ok(());
            }
            Err(Error::UnknownParameter(_)) => {}
            Err(e) => return Err(e),
        }
        match set_param(&mut self.config.grouper, key, value) {
            Ok(()) => {
                self.grouper.config = self.config.grouper.clone();
                return Ok(());
            }
            Err(Error::UnknownParameter(_)) => {}
            Err(e) => return Err(e),
        }
        match self.featuremap.set(key, value) {
            Err(Error::UnknownParameter(_)) => self.classifier.set(key, value),
            other => other,
        }
    }

    fn set_component(&mut self, component: &str, key: &str, value: &str) -> Result<()> {
        if component == "grouper" {
            set_param(&mut self.config.grouper, key, value)?;
            self.grouper.config = self.config.grouper.clone();
            Ok(())
        } else if component == self.featuremap.name() {
            self.featuremap.set(key, value)
        } else if component == self.classifier.name() {
            self.classifier.set(key, value)
        } else if component == self.segmenter.name() {
            self.segmenter.set(key, value)
        } else {
            Err(Error::UnknownParameter(format!("{}.{}", component, key)))
        }
    }

    fn check_line(&self, width: u32, height: u32) -> Result<()> {
        if height > self.config.maxheight {
            return Err(Error::LineTooHigh { width, height });
        }
        if height as f32 / width.max(1) as f32 > self.config.maxaspect {
            return Err(Error::BadAspectRatio { width, height });
        }
        Ok(())
    }

    /// Segment a line image and enumerate its groups.
    pub fn set_line(&mut self, image: &GrayImage) -> Result<()> {
        if image.height() > self.config.maxheight {
            return Err(Error::LineTooHigh {
                width: image.width(),
                height: image.height(),
            });
        }
        self.featuremap.set_line(image)?;
        let binarized = binarize(image);
        let mut segmentation = self.segmenter.charseg(&binarized)?;
        let n = renumber_labels(&mut segmentation);
        self.grouper.set_segmentation(&segmentation)?;
        debug!(
            "set_line: {}x{}, {} components, {} groups",
            image.width(),
            image.height(),
            n,
            self.grouper.len()
        );
        self.segmentation = segmentation;
        Ok(())
    }

    /// Preload a saved recognizer when `cpreload` names one.
    pub fn start_training(&mut self) -> Result<()> {
        if self.config.cpreload != "none" {
            let path = self.config.cpreload.clone();
            self.load(BufReader::new(File::open(&path)?))?;
            info!("preloaded classifier {}", path);
        }
        Ok(())
    }

    pub fn finish_training(&mut self) -> Result<()> {
        self.classifier.update_model()
    }

    /// Train from a ground-truth segmentation alone, rendered as a
    /// black-on-white line.
    pub fn add_training_segmentation(
        &mut self,
        cseg: &Segmentation,
        transcript: &str,
    ) -> Result<TrainingStats> {
        let image = segmentation_as_bitmap(cseg);
        self.add_training_line(cseg, &image, transcript)
    }

    /// Train from a line image, its character segmentation `cseg` (color
    /// `k` is the `k`-th character of `transcript`) and the transcript.
    ///
    /// Groups whose components are exactly those of a ground-truth
    /// character are trained as that character, all other groups as the
    /// reject class.
    pub fn add_training_line(
        &mut self,
        cseg: &Segmentation,
        image: &GrayImage,
        transcript: &str,
    ) -> Result<TrainingStats> {
        self.check_line(image.width(), image.height())?;
        if image.dimensions() != cseg.dimensions() {
            return Err(Error::DimensionMismatch {
                image: image.dimensions(),
                segmentation: cseg.dimensions(),
            });
        }
        if let Some(c) = transcript.chars().find(|&c| (c as u32) < 32) {
            return Err(Error::BadTranscript(c));
        }
        self.set_line(image)?;
        let chars: Vec<char> = transcript.chars().collect();
        let segments = correspondences(&self.segmentation, cseg)?;

        let this = &*self;
        let outcomes = (0..this.grouper.len())
            .into_par_iter()
            .map(|i| this.training_sample(i, &segments, &chars))
            .collect::<Result<Vec<_>>>()?;

        let mut stats = TrainingStats::default();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            let sample = match outcome {
                GroupOutcome::Ready(sample) => sample,
                GroupOutcome::Mismatch => {
                    info!("mismatch between transcript and cseg: {:?}", transcript);
                    stats.mismatched += 1;
                    continue;
                }
                GroupOutcome::Skip(e) => {
                    warn!("feature extraction failed [{}]: {}", i, e);
                    stats.skipped += 1;
                    continue;
                }
            };
            if sample.class == REJECT_CLASS {
                stats.junk += 1;
                if self.config.use_reject {
                    self.classifier.add(&sample.features, sample.class)?;
                }
            } else {
                self.classifier.add(&sample.features, sample.class)?;
                stats.trained += 1;
                *self.counts.entry(sample.class).or_insert(0) += 1;
            }
        }
        debug!(
            "add_training_line trained {} chars, {} junk, {} skipped",
            stats.trained, stats.junk, stats.skipped
        );
        Ok(stats)
    }

    fn training_sample(
        &self,
        i: usize,
        segments: &[Vec<u32>],
        chars: &[char],
    ) -> Result<GroupOutcome<Sample>> {
        let segs = self.grouper.segments(i)?;
        let matching = segments
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, s)| **s == segs)
            .map(|(j, _)| j - 1);
        let class = match matching {
            None => REJECT_CLASS,
            Some(position) => match chars.get(position) {
                Some(&c) => c as i32,
                None => return Ok(GroupOutcome::Mismatch),
            },
        };
        let (bbox, mask) = self.grouper.mask(i, 0)?;
        Ok(match self.featuremap.extract_features(bbox, &mask) {
            Ok(features) => GroupOutcome::Ready(Sample { class, features }),
            Err(e) => GroupOutcome::Skip(e),
        })
    }

    /// Threshold above which the gap after a group is a space candidate.
    pub fn estimate_space_size(&self) -> f32 {
        let labels = label_components(&self.segmentation);
        let boxes: Vec<Rect> = bounding_boxes(&labels)
            .into_iter()
            .skip(1)
            .filter(|b| !b.is_empty())
            .collect();
        let mut distances: Vec<f32> = boxes
            .iter()
            .map(|b| {
                boxes
                    .iter()
                    .map(|n| b.gap_to(n))
                    .filter(|&delta| delta >= 0)
                    .min()
                    .map_or(99999.0, |delta| delta as f32)
            })
            .collect();
        let xheight = self
            .featuremap
            .line_info()
            .map_or(self.config.nominal_xheight, |info| info.xheight);
        let lo = self.config.space_min * xheight;
        let hi = self.config.space_max * xheight;
        if distances.is_empty() {
            return hi;
        }
        let interchar = fractile(&mut distances, self.config.space_fractile);
        let threshold = (interchar * self.config.space_multiplier).max(lo).min(hi);
        debug!("space threshold {} (xheight {})", threshold, xheight);
        threshold
    }

    /// Recognize a line image, producing a lattice over its groups.
    pub fn recognize_line(&mut self, image: &GrayImage) -> Result<Recognition> {
        self.check_line(image.width(), image.height())?;
        self.set_line(image)?;

        let mut priors = None;
        if self.config.use_priors {
            let total: u64 = self.counts.values().sum();
            if total > 0 {
                priors = Some(
                    self.counts
                        .iter()
                        .map(|(&c, &n)| (c, n as f32 / total as f32))
                        .collect::<BTreeMap<i32, f32>>(),
                );
            } else if !self.counts_warned {
                warn!("use_priors specified but priors unavailable (old model)");
                self.counts_warned = true;
            }
        }
        let space_threshold = self.estimate_space_size();

        let this = &*self;
        let outcomes = (0..this.grouper.len())
            .into_par_iter()
            .map(|i| this.score_group(i, priors.as_ref(), space_threshold))
            .collect::<Result<Vec<_>>>()?;

        let mut skipped = 0;
        for (i, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                GroupOutcome::Ready(scores) => {
                    for (class, cost) in scores.classes {
                        self.grouper.set_class(i, class, cost)?;
                    }
                    if scores.space {
                        let (yes, no) = (self.config.space_yes, self.config.space_no);
                        self.grouper.set_space_cost(i, yes, no)?;
                    }
                }
                GroupOutcome::Skip(e) => {
                    warn!("feature extraction failed [{}]: {}", i, e);
                    let (class, cost) = self.fallback_hypothesis(self.grouper.bbox(i)?);
                    self.grouper.set_class(i, class, cost)?;
                    skipped += 1;
                }
                GroupOutcome::Mismatch => skipped += 1,
            }
        }
        let lattice = self.grouper.lattice()?;
        Ok(Recognition {
            segmentation: self.segmentation.clone(),
            lattice,
            skipped,
        })
    }

    fn score_group(
        &self,
        i: usize,
        priors: Option<&BTreeMap<i32, f32>>,
        space_threshold: f32,
    ) -> Result<GroupOutcome<Scores>> {
        let config = &self.config;
        let (bbox, mask) = self.grouper.mask(i, 0)?;
        let features = match self.featuremap.extract_features(bbox, &mask) {
            Ok(features) => features,
            Err(e) => return Ok(GroupOutcome::Skip(e)),
        };
        let (mut base, mut outputs): (f32, OutputVector) = self.classifier.outputs(&features)?;
        if config.use_reject {
            base = 0.0;
            outputs.normalize();
        }
        let mut classes = Vec::new();
        for (class, value) in outputs.iter() {
            if class < config.minclass || class == REJECT_CLASS {
                continue;
            }
            if !(value > 0.0) || value < config.minprob {
                continue;
            }
            let mut cost = -value.ln() + base;
            trace!("group {} class {} cost {}", i, class, cost);
            if cost >= config.maxcost {
                continue;
            }
            if let Some(prior) = priors.and_then(|p| p.get(&class)) {
                cost = (cost + prior.ln()).max(0.0);
            }
            classes.push((class, cost));
        }
        if classes.is_empty() {
            classes.push(self.fallback_hypothesis(bbox));
        }
        let space = match self.grouper.pixel_space(i)? {
            Some(gap) => gap as f32 > space_threshold,
            None => false,
        };
        Ok(GroupOutcome::Ready(Scores { classes, space }))
    }

    /// The hypothesis for a group nothing better is known about: small
    /// specks are rejects, anything else is noise costing in proportion
    /// to its width.
    fn fallback_hypothesis(&self, bbox: Rect) -> (i32, f32) {
        let config = &self.config;
        let xheight = config.nominal_xheight;
        let (w, h) = (bbox.width() as f32, bbox.height() as f32);
        if h < xheight / 2.0 && w < xheight / 2.0 {
            (REJECT_CLASS, config.high_cost / 2.0)
        } else {
            (NOISE_CLASS, w / xheight * config.high_cost)
        }
    }

    /// Write the recognizer: a 7-byte tag followed by a JSON document.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let saved = SavedRecognizer {
            config: self.config.clone(),
            featuremap: ComponentState {
                name: self.featuremap.name().to_string(),
                state: self.featuremap.state()?,
            },
            classifier: ComponentState {
                name: self.classifier.name().to_string(),
                state: self.classifier.state()?,
            },
            counts: self.counts.clone(),
        };
        writer.write_all(MAGIC)?;
        serde_json::to_writer(&mut writer, &saved)?;
        writer.flush()?;
        Ok(())
    }

    /// Replace this recognizer's state with a saved one. Legacy models
    /// carry no class counts and were trained without a minimum box size.
    pub fn load<R: Read>(&mut self, mut reader: R) -> Result<()> {
        let mut magic = [0u8; 7];
        reader.read_exact(&mut magic)?;
        let legacy = match &magic {
            MAGIC => false,
            MAGIC_LEGACY => true,
            _ => return Err(Error::BadMagic(String::from_utf8_lossy(&magic).into_owned())),
        };
        let saved: SavedRecognizer = serde_json::from_reader(reader)?;
        self.segmenter = make_line_segmenter(&saved.config)?;
        self.grouper = Grouper::new(saved.config.grouper.clone());
        self.featuremap = restore_feature_map(&saved.featuremap)?;
        self.classifier = restore_classifier(&saved.classifier)?;
        self.config = saved.config;
        if legacy {
            self.counts.clear();
            match self.featuremap.set("minsize_factor", "0") {
                Ok(()) | Err(Error::UnknownParameter(_)) => {}
                Err(e) => return Err(e),
            }
        } else {
            self.counts = saved.counts;
        }
        self.counts_warned = false;
        Ok(())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.save(BufWriter::new(File::create(path)?))
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<LineRecognizer> {
        let mut recognizer = LineRecognizer::new()?;
        recognizer.load(BufReader::new(File::open(path)?))?;
        Ok(recognizer)
    }
}

/// The configured segmenter, limited to the recognizer's line height.
fn make_line_segmenter(config: &LinerecConfig) -> Result<Box<dyn SegmentLine>> {
    let mut segmenter = make_segmenter(&config.segmenter)?;
    match segmenter.set("maxheight", &config.maxheight.to_string()) {
        Ok(()) | Err(Error::UnknownParameter(_)) => Ok(segmenter),
        Err(e) => Err(e),
    }
}

/// The `f`-fractile of `values` (sorted in place).
fn fractile(values: &mut [f32], f: f32) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = (f.max(0.0) * values.len() as f32) as usize;
    values[index.min(values.len() - 1)]
}
