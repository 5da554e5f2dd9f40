//! Weighted finite-state automata: recognition lattices, ground-truth
//! transcripts and language models all share this representation.
//!
//! Labels are `i32`; `0` is epsilon. Output labels are Unicode scalar
//! values, lattice input labels are packed runs of atomic components
//! (see [crate::seg::pack_run]). Costs are negative log probabilities,
//! lower is better.

use crate::beam::BeamPath;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// The epsilon label.
pub const EPSILON: i32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub input: i32,
    pub output: i32,
    pub cost: f32,
    pub target: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct State {
    arcs: Vec<Arc>,
    final_cost: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fst {
    start: Option<usize>,
    states: Vec<State>,
}

impl Fst {
    pub fn new() -> Fst {
        Fst::default()
    }

    /// Build the chain automaton accepting exactly `text`, one arc per
    /// character with identical input and output.
    pub fn from_transcript(text: &str) -> Fst {
        let mut fst = Fst::new();
        let mut state = fst.add_state();
        fst.set_start(state);
        for c in text.chars() {
            let next = fst.add_state();
            fst.add_transition(state, next, c as i32, c as i32, 0.0);
            state = next;
        }
        fst.set_final(state, 0.0);
        fst
    }

    pub fn add_state(&mut self) -> usize {
        self.states.push(State::default());
        self.states.len() - 1
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    pub fn set_start(&mut self, state: usize) {
        self.start = Some(state);
    }

    pub fn start(&self) -> Option<usize> {
        self.start
    }

    pub fn set_final(&mut self, state: usize, cost: f32) {
        self.states[state].final_cost = Some(cost);
    }

    /// The cost of stopping in `state`, `None` if it is not accepting.
    pub fn final_cost(&self, state: usize) -> Option<f32> {
        self.states[state].final_cost
    }

    pub fn add_transition(&mut self, from: usize, to: usize, input: i32, output: i32, cost: f32) {
        self.states[from].arcs.push(Arc {
            input,
            output,
            cost,
            target: to,
        });
    }

    pub fn arcs(&self, state: usize) -> &[Arc] {
        &self.states[state].arcs
    }

    pub fn n_arcs(&self) -> usize {
        self.states.iter().map(|s| s.arcs.len()).sum()
    }

    /// Add a loop on every state, e.g. to let a ground-truth automaton
    /// absorb spaces anywhere: `add_self_loops(' ' as i32, EPSILON)`.
    pub fn add_self_loops(&mut self, input: i32, output: i32) {
        for state in 0..self.states.len() {
            self.add_transition(state, state, input, output, 0.0);
        }
    }

    /// The cheapest accepting path through this automaton alone.
    pub fn best_path(&self) -> Option<BeamPath> {
        let start = self.start?;
        let n = self.states.len();
        let mut dist = vec![f64::INFINITY; n];
        let mut back: Vec<Option<(usize, Arc)>> = vec![None; n];
        let mut heap = BinaryHeap::new();
        dist[start] = 0.0;
        heap.push(Entry(0.0, start));
        let mut best: Option<(f64, usize)> = None;
        while let Some(Entry(d, s)) = heap.pop() {
            if d > dist[s] {
                continue;
            }
            if let Some((b, _)) = best {
                if d >= b {
                    break;
                }
            }
            if let Some(f) = self.final_cost(s) {
                let total = d + f as f64;
                if best.map_or(true, |(b, _)| total < b) {
                    best = Some((total, s));
                }
            }
            for arc in self.arcs(s) {
                let nd = d + arc.cost as f64;
                if nd < dist[arc.target] {
                    dist[arc.target] = nd;
                    back[arc.target] = Some((s, *arc));
                    heap.push(Entry(nd, arc.target));
                }
            }
        }
        let (_, last) = best?;
        let mut path = BeamPath::default();
        let mut s = last;
        while let Some((prev, arc)) = back[s] {
            if path.costs.len() > n {
                return None;
            }
            path.states1.push(arc.target);
            path.inputs.push(arc.input);
            path.outputs.push(arc.output);
            path.costs.push(arc.cost);
            s = prev;
        }
        path.states1.push(start);
        path.states1.reverse();
        path.inputs.reverse();
        path.outputs.reverse();
        path.costs.reverse();
        path.inputs.push(EPSILON);
        path.outputs.push(EPSILON);
        path.costs.push(self.final_cost(last).unwrap_or(0.0));
        Some(path)
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read an automaton written by [Fst::write]. The start state and
    /// all arc targets must be states of the automaton.
    pub fn read<R: Read>(reader: R) -> Result<Fst> {
        let fst: Fst = serde_json::from_reader(reader)?;
        fst.check_states()?;
        Ok(fst)
    }

    fn check_states(&self) -> Result<()> {
        let nstates = self.states.len();
        let targets = self
            .states
            .iter()
            .flat_map(|s| s.arcs.iter().map(|a| a.target));
        for state in self.start.into_iter().chain(targets) {
            if state >= nstates {
                return Err(Error::BadState { state, nstates });
            }
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Fst> {
        Fst::read(BufReader::new(File::open(path)?))
    }
}

/// Heap entry ordered so that the smallest cost pops first.
#[derive(PartialEq)]
struct Entry(f64, usize);

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .partial_cmp(&self.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.1.cmp(&self.1))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcript_best_path() {
        let fst = Fst::from_transcript("abc");
        assert_eq!(fst.n_states(), 4);
        let path = fst.best_path().unwrap();
        assert_eq!(path.text(), "abc");
        assert_eq!(path.total_cost(), 0.0);
        assert_eq!(path.states1, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_best_path_prefers_cheap_detour() {
        let mut fst = Fst::new();
        for _ in 0..4 {
            fst.add_state();
        }
        fst.set_start(0);
        fst.set_final(3, 0.5);
        fst.add_transition(0, 3, 7, 'x' as i32, 5.0);
        fst.add_transition(0, 1, 1, 'a' as i32, 1.0);
        fst.add_transition(1, 2, 2, 'b' as i32, 1.0);
        fst.add_transition(2, 3, 3, 'c' as i32, 1.0);
        let path = fst.best_path().unwrap();
        assert_eq!(path.text(), "abc");
        assert_eq!(path.inputs, vec![1, 2, 3, 0]);
        assert!((path.total_cost() - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_no_path() {
        let mut fst = Fst::new();
        let s = fst.add_state();
        fst.set_start(s);
        assert!(fst.best_path().is_none());
        assert!(Fst::new().best_path().is_none());
    }

    #[test]
    fn test_write_read() {
        let mut fst = Fst::from_transcript("hi");
        fst.add_self_loops(' ' as i32, EPSILON);
        let mut buf = Vec::new();
        fst.write(&mut buf).unwrap();
        assert_eq!(Fst::read(&buf[..]).unwrap(), fst);
    }

    #[test]
    fn test_read_rejects_missing_states() {
        let json = r#"{"start":0,"states":[{"arcs":[{"input":1,"output":97,"cost":0.0,"target":7}],"final_cost":0.0}]}"#;
        assert!(matches!(
            Fst::read(json.as_bytes()),
            Err(Error::BadState { state: 7, nstates: 1 })
        ));
        let json = r#"{"start":3,"states":[]}"#;
        assert!(matches!(
            Fst::read(json.as_bytes()),
            Err(Error::BadState { state: 3, nstates: 0 })
        ));
    }
}
