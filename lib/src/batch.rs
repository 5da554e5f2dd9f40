//! Drivers that run the recognizer and the decoder over a whole book.
//!
//! Every driver walks the lines of a [BookStore] that have the file it
//! needs, logs per-line failures and keeps going, unless
//! [BatchOptions::abort_on_error] is set, in which case the first
//! failure ends the batch with [Error::Aborted].

use crate::beam::{align, decode, Decoded};
use crate::bookstore::{
    read_line_image, read_segmentation, read_transcript, with_suffix, write_costs,
    write_segmentation, write_text, BookStore, COSTS, CSEG, GROUND_TRUTH, IMAGE, LATTICE, RSEG,
    TEXT,
};
use crate::error::{Error, Result};
use crate::fst::Fst;
use crate::linerec::{LineRecognizer, TrainingStats};
use crate::seg::recolor;
use log::{debug, error, info};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub beam_width: usize,
    /// stop at the first line that fails
    pub abort_on_error: bool,
    /// decoded paths at least this expensive count as unrecognized
    pub reject_threshold: f64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            beam_width: 100,
            abort_on_error: false,
            reject_threshold: 1e10,
        }
    }
}

impl BatchOptions {
    /// Defaults overridden by `BEAM_WIDTH`, `ABORT_ON_ERROR` and
    /// `REJECT_THRESHOLD` from the environment.
    pub fn from_env() -> BatchOptions {
        let mut options = BatchOptions::default();
        if let Some(width) = env_value("BEAM_WIDTH") {
            options.beam_width = width;
        }
        if let Some(abort) = env_value::<i32>("ABORT_ON_ERROR") {
            options.abort_on_error = abort != 0;
        }
        if let Some(threshold) = env_value("REJECT_THRESHOLD") {
            options.reject_threshold = threshold;
        }
        options
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub recognized: usize,
    pub unrecognized: usize,
    pub failed: usize,
}

enum LineOutcome {
    Done,
    Unrecognized(Option<f64>),
}

impl BatchSummary {
    /// Account for one line; returns the error that ends the batch, if any.
    fn record(
        &mut self,
        base: &Path,
        outcome: Result<LineOutcome>,
        options: &BatchOptions,
    ) -> Result<()> {
        self.processed += 1;
        if self.processed % 1000 == 0 {
            info!("{} lines processed", self.processed);
        }
        match outcome {
            Ok(LineOutcome::Done) => self.recognized += 1,
            Ok(LineOutcome::Unrecognized(cost)) => {
                self.unrecognized += 1;
                match cost {
                    Some(cost) => info!("{}\t{}", base.display(), cost),
                    None => info!("{}\tinf", base.display()),
                }
            }
            Err(e) => {
                error!("{}: {}", base.display(), e);
                self.failed += 1;
                if options.abort_on_error {
                    return Err(Error::Aborted {
                        path: base.to_path_buf(),
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Run `f` over all lines in parallel, then account for the results in
/// line order. With `abort_on_error` the lines are run one by one so
/// that nothing after the failing line is written.
fn run_parallel<F>(bases: Vec<PathBuf>, options: &BatchOptions, f: F) -> Result<BatchSummary>
where
    F: Fn(&Path) -> Result<LineOutcome> + Sync,
{
    let mut summary = BatchSummary::default();
    if options.abort_on_error {
        for base in bases.iter() {
            summary.record(base, f(base), options)?;
        }
        return Ok(summary);
    }
    let outcomes: Vec<Result<LineOutcome>> = bases.par_iter().map(|base| f(base)).collect();
    for (base, outcome) in bases.iter().zip(outcomes) {
        summary.record(base, outcome, options)?;
    }
    Ok(summary)
}

/// Load the language model automaton; without it no batch can run.
pub fn load_language_model<P: AsRef<Path>>(path: P) -> Result<Fst> {
    let path = path.as_ref();
    Fst::load(path).map_err(|e| Error::ModelLoad {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

/// Write the character segmentation and step costs of a decoded path.
fn write_path_outputs(base: &Path, inputs: &[i32], costs: &[f32]) -> Result<()> {
    let rseg = read_segmentation(&with_suffix(base, RSEG))?;
    let cseg = recolor(&rseg, inputs)?;
    write_segmentation(&with_suffix(base, CSEG), &cseg)?;
    write_costs(&with_suffix(base, COSTS), costs)
}

/// Align every lattice with its ground truth, writing `.cseg.png` and
/// `.costs`.
pub fn align_dir(store: &BookStore, options: &BatchOptions) -> Result<BatchSummary> {
    let bases = store.lines(LATTICE)?;
    let summary = run_parallel(bases, options, |base| {
        let lattice = Fst::load(with_suffix(base, LATTICE))?;
        let transcript = read_transcript(&with_suffix(base, GROUND_TRUTH))?;
        match align(&lattice, &transcript, options.beam_width) {
            Some(path) => {
                debug!("{}: aligned at cost {}", base.display(), path.total_cost());
                write_path_outputs(base, &path.inputs, &path.costs)?;
                Ok(LineOutcome::Done)
            }
            None => Ok(LineOutcome::Unrecognized(None)),
        }
    })?;
    info!("align: {:?}", summary);
    Ok(summary)
}

/// Decode every lattice against the language model, writing `.txt`,
/// `.cseg.png` and `.costs` for recognized lines.
pub fn fsts2text_dir(store: &BookStore, lm: &Fst, options: &BatchOptions) -> Result<BatchSummary> {
    let bases = store.lines(LATTICE)?;
    let summary = run_parallel(bases, options, |base| {
        let lattice = Fst::load(with_suffix(base, LATTICE))?;
        match decode(&lattice, lm, options.beam_width, options.reject_threshold) {
            Decoded::Text(path) => {
                write_text(&with_suffix(base, TEXT), &path.text())?;
                write_path_outputs(base, &path.inputs, &path.costs)?;
                Ok(LineOutcome::Done)
            }
            Decoded::Unrecognized(cost) => Ok(LineOutcome::Unrecognized(cost)),
        }
    })?;
    info!("fsts2text: {:?}", summary);
    Ok(summary)
}

/// Write the best path of every lattice alone as `.txt`.
pub fn bestpaths_dir(store: &BookStore, options: &BatchOptions) -> Result<BatchSummary> {
    let bases = store.lines(LATTICE)?;
    run_parallel(bases, options, |base| {
        let lattice = Fst::load(with_suffix(base, LATTICE))?;
        match lattice.best_path() {
            Some(path) => {
                write_text(&with_suffix(base, TEXT), &path.text())?;
                Ok(LineOutcome::Done)
            }
            None => Ok(LineOutcome::Unrecognized(None)),
        }
    })
}

fn recognize_one(recognizer: &mut LineRecognizer, base: &Path) -> Result<()> {
    let image = read_line_image(&with_suffix(base, IMAGE))?;
    let recognition = recognizer.recognize_line(&image)?;
    recognition.lattice.save(with_suffix(base, LATTICE))?;
    write_segmentation(&with_suffix(base, RSEG), &recognition.segmentation)
}

/// Recognize every line image, writing its lattice (`.fst`) and atomic
/// segmentation (`.rseg.png`).
pub fn recognize_dir(
    store: &BookStore,
    recognizer: &mut LineRecognizer,
    options: &BatchOptions,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    for base in store.lines(IMAGE)? {
        let outcome = recognize_one(recognizer, &base).map(|_| LineOutcome::Done);
        summary.record(&base, outcome, options)?;
    }
    info!("recognize: {:?}", summary);
    Ok(summary)
}

fn train_one(recognizer: &mut LineRecognizer, base: &Path) -> Result<TrainingStats> {
    let cseg = read_segmentation(&with_suffix(base, CSEG))?;
    let transcript = read_transcript(&with_suffix(base, GROUND_TRUTH))?;
    let image_path = with_suffix(base, IMAGE);
    if image_path.exists() {
        let image = read_line_image(&image_path)?;
        recognizer.add_training_line(&cseg, &image, &transcript)
    } else {
        recognizer.add_training_segmentation(&cseg, &transcript)
    }
}

/// Train on every line that has a ground-truth transcript and character
/// segmentation; lines without an image are trained from the rendered
/// segmentation. The model is updated once at the end.
pub fn train_dir(
    store: &BookStore,
    recognizer: &mut LineRecognizer,
    options: &BatchOptions,
) -> Result<(BatchSummary, TrainingStats)> {
    recognizer.start_training()?;
    let mut summary = BatchSummary::default();
    let mut total = TrainingStats::default();
    for base in store.lines(GROUND_TRUTH)? {
        if !with_suffix(&base, CSEG).exists() {
            continue;
        }
        let outcome = train_one(recognizer, &base).map(|stats| {
            total.trained += stats.trained;
            total.junk += stats.junk;
            total.skipped += stats.skipped;
            total.mismatched += stats.mismatched;
            LineOutcome::Done
        });
        summary.record(&base, outcome, options)?;
    }
    recognizer.finish_training()?;
    info!("train: {:?} {:?}", summary, total);
    Ok((summary, total))
}
