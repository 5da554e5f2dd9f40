use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The line image is taller than the configured maximum
    #[error("input line too high ({width} x {height})")]
    LineTooHigh { width: u32, height: u32 },
    /// The line image is too tall for its width
    #[error("input line has bad aspect ratio ({width} x {height})")]
    BadAspectRatio { width: u32, height: u32 },
    #[error("image is {image:?} but segmentation is {segmentation:?}")]
    DimensionMismatch {
        image: (u32, u32),
        segmentation: (u32, u32),
    },
    #[error("transcript contains control character {0:?}")]
    BadTranscript(char),
    /// Baseline or x-height could not be estimated
    #[error("bad text line: {0}")]
    BadTextLine(String),
    #[error("no components found in line image")]
    NoComponents,
    #[error("segmentation has {0} components, at most 65535 can be grouped")]
    TooManySegments(u32),
    #[error("feature extraction: bbox height {height} > maxheight {maxheight}")]
    BoxTooHigh { height: i32, maxheight: f32 },
    #[error("expected {expected} features, got {actual}")]
    FeatureDimension { expected: usize, actual: usize },
    #[error("group {index} out of range ({len} groups)")]
    GroupIndex { index: usize, len: usize },
    #[error("grouper: {0}")]
    GrouperState(&'static str),
    /// An encoded run has its start after its end
    #[error("segmentation encoded in ids looks seriously broken: {start} > {end}")]
    BrokenRun { start: u32, end: u32 },
    /// An encoded run refers to components the segmentation does not have
    #[error("segmentation encoded in ids doesn't fit: {start}..={end} with {ncomponents} components")]
    RunOutOfRange {
        start: u32,
        end: u32,
        ncomponents: u32,
    },
    #[error("unknown component {0:?}")]
    UnknownComponent(String),
    #[error("unknown parameter {0:?}")]
    UnknownParameter(String),
    /// A deserialized automaton refers to a state it does not have
    #[error("automaton refers to state {state} but has {nstates} states")]
    BadState { state: usize, nstates: usize },
    #[error("bad model header {0:?}")]
    BadMagic(String),
    #[error("{}: failed to load language model", path.display())]
    ModelLoad {
        path: PathBuf,
        source: Box<Error>,
    },
    /// A batch was stopped at the first failing line
    #[error("aborting after error in {}", path.display())]
    Aborted {
        path: PathBuf,
        source: Box<Error>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    /// Error decoding or encoding an image
    #[error("Image {path} could not be decoded")]
    Image {
        path: String,
        source: image::error::ImageError,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, Error>;
