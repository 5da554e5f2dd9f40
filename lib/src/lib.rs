//! Recognition of single text lines.
//!
//! A line image is over-segmented into atomic components, neighbouring
//! components are grouped into character candidates, and every candidate
//! is classified. The result is a weighted lattice of character and space
//! hypotheses, which is decoded against a language model automaton with a
//! beam search.
//!
//! # Basic usage
//! ```no_run
//! # use linerec::{decode, Decoded, Fst, LineRecognizer};
//! # use linerec::bookstore::read_line_image;
//! # use std::path::Path;
//! let mut recognizer = LineRecognizer::load_file("model.linerec")?;
//! let image = read_line_image(Path::new("book/0001/0001.png"))?;
//! let recognition = recognizer.recognize_line(&image)?;
//! let lm = Fst::load("lm.fst")?;
//! match decode(&recognition.lattice, &lm, 100, 1e10) {
//!     Decoded::Text(path) => println!("{}", path.text()),
//!     Decoded::Unrecognized(_) => println!("(unrecognized)"),
//! }
//! # Ok::<(), linerec::Error>(())
//! ```
//!
//! Training takes a line image together with its character segmentation
//! (`cseg`, color `k` marks the pixels of the `k`-th character) and the
//! transcript:
//!
//! ```no_run
//! # use linerec::LineRecognizer;
//! # use linerec::bookstore::{read_line_image, read_segmentation, read_transcript};
//! # use std::path::Path;
//! let mut recognizer = LineRecognizer::new()?;
//! recognizer.start_training()?;
//! let image = read_line_image(Path::new("book/0001/0001.png"))?;
//! let cseg = read_segmentation(Path::new("book/0001/0001.cseg.png"))?;
//! let transcript = read_transcript(Path::new("book/0001/0001.gt.txt"))?;
//! recognizer.add_training_line(&cseg, &image, &transcript)?;
//! recognizer.finish_training()?;
//! recognizer.save_file("model.linerec")?;
//! # Ok::<(), linerec::Error>(())
//! ```

mod beam;
mod classifier;
mod config;
mod error;
mod featuremap;
mod fst;
mod geom;
mod grouper;
mod lineinfo;
mod linerec;
mod segmenter;

pub mod batch;
pub mod bookstore;
pub mod seg;

pub use beam::{align, beam_search, decode, BeamPath, Decoded};
pub use classifier::{
    make_classifier, restore_classifier, Classifier, NearestMean, NearestMeanConfig,
    OutputVector,
};
pub use config::{set_param, ComponentState};
pub use error::{Error, Result};
pub use featuremap::{
    make_feature_map, pad_by, push_unary, restore_feature_map, CenterFeatureMap,
    CenterFeatureMapConfig, FeatureMap, ScaledFeatureMap, ScaledFeatureMapConfig,
};
pub use fst::{Arc, Fst, EPSILON};
pub use geom::Rect;
pub use grouper::{
    ClassHypothesis, Group, Grouper, GrouperConfig, GrouperState, SpaceCost, FALLBACK_CLASS,
};
pub use lineinfo::LineInfo;
pub use linerec::{
    LineRecognizer, LinerecConfig, Recognition, TrainingStats, NOISE_CLASS, REJECT_CLASS,
};
pub use seg::Segmentation;
pub use segmenter::{binarize, make_segmenter, CcsSegmenter, SegmentLine, SegmenterConfig};
