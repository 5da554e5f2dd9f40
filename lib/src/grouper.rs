//! Grouping of atomic components into character hypotheses and assembly
//! of the recognition lattice.

use crate::error::{Error, Result};
use crate::fst::{Fst, EPSILON};
use crate::geom::Rect;
use crate::seg::{bounding_boxes, max_label, pack_run, Segmentation};
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Class assigned to groups that never received a hypothesis.
pub const FALLBACK_CLASS: i32 = '~' as i32;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GrouperConfig {
    /// maximum number of components that are grouped together
    pub maxrange: usize,
    /// maximum horizontal gap (pixels) between grouped components
    pub maxdist: i32,
    /// cost of the hypothesis given to groups nobody scored
    pub fallback_cost: f32,
}

impl Default for GrouperConfig {
    fn default() -> Self {
        GrouperConfig {
            maxrange: 5,
            maxdist: 5,
            fallback_cost: 100.0,
        }
    }
}

/// A candidate character: the atomic components `start..=end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Group {
    pub start: u32,
    pub end: u32,
    pub bbox: Rect,
}

impl Group {
    pub fn segments(&self) -> Vec<u32> {
        (self.start..=self.end).collect()
    }

    /// The lattice input label of this group.
    pub fn id(&self) -> i32 {
        pack_run(self.start, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassHypothesis {
    pub class: i32,
    pub cost: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpaceCost {
    pub yes: f32,
    pub no: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrouperState {
    Unset,
    Ready,
    Scored,
    Finalized,
}

/// Enumerates groups of up to `maxrange` neighbouring components and
/// collects the class and space hypotheses assigned to them.
#[derive(Clone, Debug)]
pub struct Grouper {
    pub config: GrouperConfig,
    state: GrouperState,
    segmentation: Segmentation,
    boxes: Vec<Rect>,
    groups: Vec<Group>,
    classes: Vec<Vec<ClassHypothesis>>,
    spaces: Vec<Option<SpaceCost>>,
}

impl Default for Grouper {
    fn default() -> Self {
        Grouper::new(GrouperConfig::default())
    }
}

impl Grouper {
    pub fn new(config: GrouperConfig) -> Grouper {
        Grouper {
            config,
            state: GrouperState::Unset,
            segmentation: Segmentation::new(0, 0),
            boxes: Vec::new(),
            groups: Vec::new(),
            classes: Vec::new(),
            spaces: Vec::new(),
        }
    }

    pub fn state(&self) -> GrouperState {
        self.state
    }

    /// Enumerate all groups of `seg` and forget any previous scores.
    ///
    /// Groups are ordered by first component, then by size.
    pub fn set_segmentation(&mut self, seg: &Segmentation) -> Result<()> {
        let n = max_label(seg);
        if n > 0xffff {
            return Err(Error::TooManySegments(n));
        }
        let boxes = bounding_boxes(seg);
        let maxrange = self.config.maxrange.max(1) as u32;
        let mut groups = Vec::new();
        for start in 1..=n {
            if boxes[start as usize].is_empty() {
                continue;
            }
            let mut bbox = boxes[start as usize];
            let mut end = start;
            loop {
                groups.push(Group { start, end, bbox });
                let next = end + 1;
                if next > n || next - start >= maxrange {
                    break;
                }
                let b = &boxes[next as usize];
                if b.is_empty() || boxes[end as usize].gap_to(b) > self.config.maxdist {
                    break;
                }
                bbox = bbox.union(b);
                end = next;
            }
        }
        debug!("grouper: {} components, {} groups", n, groups.len());
        self.segmentation = seg.clone();
        self.boxes = boxes;
        self.classes = vec![Vec::new(); groups.len()];
        self.spaces = vec![None; groups.len()];
        self.groups = groups;
        self.state = GrouperState::Ready;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, i: usize) -> Result<&Group> {
        self.groups.get(i).ok_or(Error::GroupIndex {
            index: i,
            len: self.groups.len(),
        })
    }

    /// The atomic ids making up group `i`, ascending.
    pub fn segments(&self, i: usize) -> Result<Vec<u32>> {
        Ok(self.group(i)?.segments())
    }

    pub fn bbox(&self, i: usize) -> Result<Rect> {
        Ok(self.group(i)?.bbox)
    }

    /// Bounding box and pixel mask (255 = member pixel) of group `i`.
    ///
    /// With `dilation > 0` the box is padded by that many pixels and the
    /// mask dilated accordingly.
    pub fn mask(&self, i: usize, dilation: u8) -> Result<(Rect, GrayImage)> {
        let group = *self.group(i)?;
        let mut b = group.bbox;
        let pad = dilation as i32;
        b.pad_by(pad, pad);
        let mut mask = GrayImage::new(b.width() as u32, b.height() as u32);
        for y in group.bbox.y0..group.bbox.y1 {
            for x in group.bbox.x0..group.bbox.x1 {
                let id = self.segmentation.get_pixel(x as u32, y as u32)[0];
                if id >= group.start && id <= group.end {
                    mask.put_pixel((x - b.x0) as u32, (y - b.y0) as u32, Luma([255]));
                }
            }
        }
        if dilation > 0 {
            mask = dilate(&mask, Norm::L1, dilation);
        }
        Ok((b, mask))
    }

    /// Pixel gap between group `i` and the component following it, `None`
    /// when the group ends the line.
    pub fn pixel_space(&self, i: usize) -> Result<Option<i32>> {
        let group = self.group(i)?;
        let next = group.end as usize + 1;
        Ok(self
            .boxes
            .get(next)
            .filter(|b| !b.is_empty())
            .map(|b| group.bbox.gap_to(b)))
    }

    fn check_scoring(&mut self, i: usize) -> Result<()> {
        match self.state {
            GrouperState::Ready | GrouperState::Scored => {}
            GrouperState::Unset => return Err(Error::GrouperState("no segmentation set")),
            GrouperState::Finalized => {
                return Err(Error::GrouperState("lattice already exported"))
            }
        }
        self.group(i)?;
        self.state = GrouperState::Scored;
        Ok(())
    }

    /// Add a class hypothesis for group `i`. Costs that are negative or
    /// not finite are ignored.
    pub fn set_class(&mut self, i: usize, class: i32, cost: f32) -> Result<()> {
        self.check_scoring(i)?;
        if !cost.is_finite() || cost < 0.0 {
            trace!("group {}: ignoring class {} with cost {}", i, class, cost);
            return Ok(());
        }
        self.classes[i].push(ClassHypothesis { class, cost });
        Ok(())
    }

    pub fn classes(&self, i: usize) -> Result<&[ClassHypothesis]> {
        self.group(i)?;
        Ok(&self.classes[i])
    }

    /// Record the cost of inserting / not inserting a space after group `i`.
    pub fn set_space_cost(&mut self, i: usize, yes: f32, no: f32) -> Result<()> {
        self.check_scoring(i)?;
        self.spaces[i] = Some(SpaceCost { yes, no });
        Ok(())
    }

    /// Export the lattice.
    ///
    /// State `k` is the boundary after atomic component `k`; the start is
    /// state 0 and the only final state is the last boundary. Groups that
    /// were never scored get the fallback hypothesis, so the lattice always
    /// has a path from start to end.
    pub fn lattice(&mut self) -> Result<Fst> {
        match self.state {
            GrouperState::Ready | GrouperState::Scored => {}
            GrouperState::Unset => return Err(Error::GrouperState("no segmentation set")),
            GrouperState::Finalized => {
                return Err(Error::GrouperState("lattice already exported"))
            }
        }
        let n = self.boxes.len().saturating_sub(1);
        let mut fst = Fst::new();
        for _ in 0..=n {
            fst.add_state();
        }
        fst.set_start(0);
        fst.set_final(n, 0.0);
        let mut fallbacks = 0;
        for (i, group) in self.groups.iter().enumerate() {
            if self.classes[i].is_empty() {
                self.classes[i].push(ClassHypothesis {
                    class: FALLBACK_CLASS,
                    cost: self.config.fallback_cost,
                });
                fallbacks += 1;
            }
            let from = group.start as usize - 1;
            let to = group.end as usize;
            let id = group.id();
            match self.spaces[i] {
                None => {
                    for h in self.classes[i].iter() {
                        fst.add_transition(from, to, id, h.class, h.cost);
                    }
                }
                Some(space) => {
                    let mid = fst.add_state();
                    fst.add_transition(mid, to, EPSILON, ' ' as i32, space.yes);
                    for h in self.classes[i].iter() {
                        fst.add_transition(from, mid, id, h.class, h.cost);
                        fst.add_transition(from, to, id, h.class, h.cost + space.no);
                    }
                }
            }
        }
        debug!(
            "lattice: {} states, {} arcs, {} fallback groups",
            fst.n_states(),
            fst.n_arcs(),
            fallbacks
        );
        self.state = GrouperState::Finalized;
        Ok(fst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seg::tests::seg_from_rows;

    #[test]
    fn test_groups_are_contiguous_and_bounded() {
        let seg = seg_from_rows(&["1.2.3.4.5.6.7", "1.2.3.4.5.6.7"]);
        let mut grouper = Grouper::new(GrouperConfig {
            maxrange: 3,
            ..GrouperConfig::default()
        });
        grouper.set_segmentation(&seg).unwrap();
        // 7 singles, 6 pairs, 5 triples
        assert_eq!(grouper.len(), 18);
        for i in 0..grouper.len() {
            let segs = grouper.segments(i).unwrap();
            assert!(!segs.is_empty() && segs.len() <= 3);
            for w in segs.windows(2) {
                assert_eq!(w[1], w[0] + 1);
            }
            assert!(segs.iter().all(|&s| s >= 1 && s <= 7));
        }
        assert_eq!(grouper.segments(0).unwrap(), vec![1]);
        assert_eq!(grouper.segments(1).unwrap(), vec![1, 2]);
        assert_eq!(grouper.segments(2).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_maxdist_limits_groups() {
        let seg = seg_from_rows(&["11.2........3"]);
        let mut grouper = Grouper::new(GrouperConfig {
            maxdist: 3,
            ..GrouperConfig::default()
        });
        grouper.set_segmentation(&seg).unwrap();
        let groups: Vec<Vec<u32>> = (0..grouper.len())
            .map(|i| grouper.segments(i).unwrap())
            .collect();
        assert_eq!(groups, vec![vec![1], vec![1, 2], vec![2], vec![3]]);
        assert_eq!(grouper.pixel_space(0).unwrap(), Some(1));
        assert_eq!(grouper.pixel_space(2).unwrap(), Some(8));
        assert_eq!(grouper.pixel_space(3).unwrap(), None);
    }

    #[test]
    fn test_mask() {
        let seg = seg_from_rows(&["1.2", "1.2", "..2"]);
        let mut grouper = Grouper::default();
        grouper.set_segmentation(&seg).unwrap();
        let (b, mask) = grouper.mask(1, 0).unwrap();
        assert_eq!(b, Rect::new(0, 0, 3, 3));
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.get_pixel(1, 0)[0], 0);
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        let (b, mask) = grouper.mask(0, 1).unwrap();
        assert_eq!(b, Rect::new(-1, -1, 2, 3));
        assert_eq!(mask.dimensions(), (3, 4));
        assert_eq!(mask.get_pixel(0, 1)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_lattice_has_path_without_scores() {
        let seg = seg_from_rows(&["1.2.3"]);
        let mut grouper = Grouper::default();
        grouper.set_segmentation(&seg).unwrap();
        let lattice = grouper.lattice().unwrap();
        let path = lattice.best_path().unwrap();
        assert!(path.total_cost() >= 100.0);
        assert!(path.outputs.iter().all(|&c| c == 0 || c == FALLBACK_CLASS));
        assert!(grouper.lattice().is_err());
        assert!(grouper.set_class(0, 'a' as i32, 1.0).is_err());
    }

    #[test]
    fn test_lattice_classes_and_spaces() {
        let seg = seg_from_rows(&["1.2"]);
        let mut grouper = Grouper::default();
        grouper.set_segmentation(&seg).unwrap();
        // groups: [1], [1,2], [2]
        grouper.set_class(0, 'a' as i32, 1.0).unwrap();
        grouper.set_class(0, 'o' as i32, 2.0).unwrap();
        grouper.set_class(1, 'm' as i32, 3.0).unwrap();
        grouper.set_class(2, 'b' as i32, 1.0).unwrap();
        grouper.set_class(2, 'x' as i32, f32::NAN).unwrap();
        grouper.set_class(2, 'y' as i32, -1.0).unwrap();
        assert_eq!(grouper.classes(2).unwrap().len(), 1);
        grouper.set_space_cost(0, 0.5, 4.0).unwrap();
        assert_eq!(grouper.state(), GrouperState::Scored);
        let lattice = grouper.lattice().unwrap();
        let path = lattice.best_path().unwrap();
        assert_eq!(path.text(), "a b");
        assert!((path.total_cost() - 2.5).abs() < 1e-6);
        assert_eq!(path.inputs, vec![pack_run(1, 1), 0, pack_run(2, 2), 0]);
    }

    #[test]
    fn test_state_errors() {
        let mut grouper = Grouper::default();
        assert!(matches!(
            grouper.set_class(0, 'a' as i32, 1.0),
            Err(Error::GrouperState(_))
        ));
        grouper.set_segmentation(&seg_from_rows(&["1"])).unwrap();
        assert!(matches!(
            grouper.set_class(5, 'a' as i32, 1.0),
            Err(Error::GroupIndex { index: 5, len: 1 })
        ));
    }
}
