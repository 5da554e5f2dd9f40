//! Beam search over the synchronous product of two automata.
//!
//! `fst1` is usually a recognition lattice, `fst2` a language model or a
//! ground-truth transcript. A step either moves both automata on a shared
//! symbol (`fst1` output equals `fst2` input), moves only `fst1` along an
//! epsilon output, or moves only `fst2` along an epsilon input.

use crate::fst::{Fst, EPSILON};
use log::{debug, trace};
use std::collections::BTreeMap;

/// The best path found by a search, one entry per step. The last step
/// carries the final costs of both automata and epsilon labels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BeamPath {
    pub states1: Vec<usize>,
    pub states2: Vec<usize>,
    pub inputs: Vec<i32>,
    pub outputs: Vec<i32>,
    pub costs: Vec<f32>,
}

impl BeamPath {
    pub fn total_cost(&self) -> f64 {
        self.costs.iter().map(|&c| c as f64).sum()
    }

    /// The output labels as text; epsilons are dropped.
    pub fn text(&self) -> String {
        self.outputs
            .iter()
            .filter(|&&c| c > 0)
            .filter_map(|&c| std::char::from_u32(c as u32))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }
}

/// Result of decoding a lattice against a language model.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded {
    Text(BeamPath),
    /// No accepting path, or one whose cost reached the threshold.
    Unrecognized(Option<f64>),
}

#[derive(Clone, Copy, Debug)]
struct Node {
    s1: usize,
    s2: usize,
    cost: f64,
    parent: Option<usize>,
    input: i32,
    output: i32,
    step_cost: f32,
}

/// Find the cheapest accepting path through the product of `fst1` and
/// `fst2`, keeping at most `width` hypotheses per step.
///
/// Returns `None` when no path reaches a pair of final states.
pub fn beam_search(fst1: &Fst, fst2: &Fst, width: usize) -> Option<BeamPath> {
    let width = width.max(1);
    let (start1, start2) = (fst1.start()?, fst2.start()?);
    let mut nodes = vec![Node {
        s1: start1,
        s2: start2,
        cost: 0.0,
        parent: None,
        input: EPSILON,
        output: EPSILON,
        step_cost: 0.0,
    }];
    let mut beam = vec![0usize];
    // (total, node, final cost)
    let mut best: Option<(f64, usize, f32)> = None;
    let max_steps = (fst1.n_states() + 1) * (fst2.n_states() + 1);

    let completions = |beam: &[usize], nodes: &[Node], best: &mut Option<(f64, usize, f32)>| {
        for &i in beam.iter() {
            let n = nodes[i];
            if let (Some(f1), Some(f2)) = (fst1.final_cost(n.s1), fst2.final_cost(n.s2)) {
                let total = n.cost + f1 as f64 + f2 as f64;
                if best.map_or(true, |(b, _, _)| total < b) {
                    *best = Some((total, i, f1 + f2));
                }
            }
        }
    };
    completions(&beam, &nodes, &mut best);

    for step in 0..max_steps {
        let mut next: BTreeMap<(usize, usize), Node> = BTreeMap::new();
        let mut offer = |node: Node| {
            let slot = next.entry((node.s1, node.s2)).or_insert(node);
            if node.cost < slot.cost {
                *slot = node;
            }
        };
        for &i in beam.iter() {
            let n = nodes[i];
            for a1 in fst1.arcs(n.s1) {
                if a1.output == EPSILON {
                    offer(Node {
                        s1: a1.target,
                        s2: n.s2,
                        cost: n.cost + a1.cost as f64,
                        parent: Some(i),
                        input: a1.input,
                        output: EPSILON,
                        step_cost: a1.cost,
                    });
                    continue;
                }
                for a2 in fst2.arcs(n.s2).iter().filter(|a2| a2.input == a1.output) {
                    let step_cost = a1.cost + a2.cost;
                    offer(Node {
                        s1: a1.target,
                        s2: a2.target,
                        cost: n.cost + step_cost as f64,
                        parent: Some(i),
                        input: a1.input,
                        output: a2.output,
                        step_cost,
                    });
                }
            }
            for a2 in fst2.arcs(n.s2).iter().filter(|a2| a2.input == EPSILON) {
                offer(Node {
                    s1: n.s1,
                    s2: a2.target,
                    cost: n.cost + a2.cost as f64,
                    parent: Some(i),
                    input: EPSILON,
                    output: a2.output,
                    step_cost: a2.cost,
                });
            }
        }

        let mut candidates: Vec<Node> = next.into_iter().map(|(_, node)| node).collect();
        candidates.sort_by(|a, b| {
            a.cost
                .partial_cmp(&b.cost)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(width);
        beam.clear();
        for node in candidates {
            beam.push(nodes.len());
            nodes.push(node);
        }
        trace!("beam step {}: {} nodes", step, beam.len());
        completions(&beam, &nodes, &mut best);

        if beam.is_empty() {
            break;
        }
        if let Some((b, _, _)) = best {
            let cheapest = nodes[beam[0]].cost;
            if cheapest >= b {
                break;
            }
        }
    }

    let (total, last, final_cost) = best?;
    debug!("beam search: cost {} after {} nodes", total, nodes.len());
    let mut path = BeamPath::default();
    let mut i = last;
    loop {
        let n = nodes[i];
        path.states1.push(n.s1);
        path.states2.push(n.s2);
        match n.parent {
            Some(parent) => {
                path.inputs.push(n.input);
                path.outputs.push(n.output);
                path.costs.push(n.step_cost);
                i = parent;
            }
            None => break,
        }
    }
    path.states1.reverse();
    path.states2.reverse();
    path.inputs.reverse();
    path.outputs.reverse();
    path.costs.reverse();
    path.inputs.push(EPSILON);
    path.outputs.push(EPSILON);
    path.costs.push(final_cost);
    Some(path)
}

/// Decode a recognition lattice against a language model.
pub fn decode(lattice: &Fst, lm: &Fst, width: usize, reject_threshold: f64) -> Decoded {
    match beam_search(lattice, lm, width) {
        Some(path) => {
            let total = path.total_cost();
            if total < reject_threshold {
                Decoded::Text(path)
            } else {
                Decoded::Unrecognized(Some(total))
            }
        }
        None => Decoded::Unrecognized(None),
    }
}

/// Align a lattice with its ground-truth transcript. Spaces may appear
/// anywhere in the lattice path without being in the transcript.
pub fn align(lattice: &Fst, transcript: &str, width: usize) -> Option<BeamPath> {
    let mut gt = Fst::from_transcript(transcript);
    gt.add_self_loops(' ' as i32, EPSILON);
    beam_search(lattice, &gt, width)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A chain lattice with one state per position; each position
    /// offers the given (char, cost) choices.
    fn chain(choices: &[&[(char, f32)]]) -> Fst {
        let mut fst = Fst::new();
        let mut state = fst.add_state();
        fst.set_start(state);
        for (i, options) in choices.iter().enumerate() {
            let next = fst.add_state();
            for &(c, cost) in options.iter() {
                fst.add_transition(state, next, i as i32 + 1, c as i32, cost);
            }
            state = next;
        }
        fst.set_final(state, 0.0);
        fst
    }

    /// Only the bigrams AB and BA are allowed.
    fn alternating_lm() -> Fst {
        let mut lm = Fst::new();
        let s0 = lm.add_state();
        let sa = lm.add_state();
        let sb = lm.add_state();
        lm.set_start(s0);
        let (a, b) = ('A' as i32, 'B' as i32);
        lm.add_transition(s0, sa, a, a, 0.0);
        lm.add_transition(s0, sb, b, b, 0.0);
        lm.add_transition(sa, sb, b, b, 0.0);
        lm.add_transition(sb, sa, a, a, 0.0);
        lm.set_final(sa, 0.0);
        lm.set_final(sb, 0.0);
        lm
    }

    #[test]
    fn test_global_beats_greedy() {
        let lattice = chain(&[&[('A', 0.1), ('B', 5.0)], &[('A', 0.2)], &[('B', 0.1)]]);
        let path = beam_search(&lattice, &alternating_lm(), 10).unwrap();
        assert_eq!(path.text(), "BAB");
        assert!((path.total_cost() - 5.3).abs() < 1e-5);
        assert_eq!(path.states1, vec![0, 1, 2, 3]);
        assert_eq!(path.inputs, vec![1, 2, 3, EPSILON]);
        assert_eq!(path.costs.len(), path.states2.len());
    }

    #[test]
    fn test_width_monotonicity() {
        let lattice = chain(&[
            &[('A', 0.3), ('B', 0.2)],
            &[('A', 0.1), ('B', 0.4)],
            &[('A', 1.0), ('B', 0.1)],
            &[('A', 0.2), ('B', 0.9)],
        ]);
        let lm = alternating_lm();
        let exhaustive = beam_search(&lattice, &lm, 1000).unwrap().total_cost();
        for width in 1..6 {
            if let Some(path) = beam_search(&lattice, &lm, width) {
                assert!(path.total_cost() >= exhaustive - 1e-9);
            }
        }
    }

    #[test]
    fn test_unrecognized() {
        let lattice = chain(&[&[('A', 0.1)], &[('A', 0.1)]]);
        assert_eq!(
            decode(&lattice, &alternating_lm(), 10, 1e10),
            Decoded::Unrecognized(None)
        );
        let lattice = chain(&[&[('A', 3.0)], &[('B', 3.0)]]);
        match decode(&lattice, &alternating_lm(), 10, 5.0) {
            Decoded::Unrecognized(Some(cost)) => assert!((cost - 6.0).abs() < 1e-6),
            other => panic!("unexpected {:?}", other),
        }
        match decode(&lattice, &alternating_lm(), 10, 1e10) {
            Decoded::Text(path) => assert_eq!(path.text(), "AB"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_epsilon_moves() {
        // a lattice arc with epsilon output moves only the lattice
        let mut lattice = chain(&[&[('H', 1.0)], &[('i', 1.0)]]);
        let extra = lattice.add_state();
        lattice.add_transition(2, extra, 9, EPSILON, 0.5);
        lattice.set_final(extra, 0.0);
        let path = align(&lattice, "Hi", 10).unwrap();
        assert_eq!(path.text(), "Hi");
        assert!((path.total_cost() - 2.0).abs() < 1e-6);
        assert!(align(&lattice, "Ho", 10).is_none());
    }

    #[test]
    fn test_align_absorbs_spaces() {
        let lattice = chain(&[&[('a', 1.0)], &[(' ', 0.5)], &[('b', 1.0)]]);
        let path = align(&lattice, "ab", 10).unwrap();
        assert_eq!(path.inputs, vec![1, 2, 3, EPSILON]);
        // the space is consumed by a self-loop with epsilon output
        assert_eq!(path.text(), "ab");
        assert!((path.total_cost() - 2.5).abs() < 1e-6);
        let path = align(&lattice, "a b", 10).unwrap();
        assert_eq!(path.text(), "a b");
    }
}
