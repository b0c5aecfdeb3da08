//! Declarative transfer schedules.
//!
//! A [`Schedule`] is an ordered list of [`Step`]s, each a set of
//! neighbour [`Transfer`]s. Every rank builds the same schedule from the
//! same inputs (algorithm, shape, failures, block length) and replays the
//! subset that involves it, so no coordination is needed to agree on who
//! sends what. Step counts depend only on the shape and the failures,
//! never on the payload size.

mod pieces;
mod segment;
mod step;

pub(crate) use pieces::PieceMap;
pub use segment::{split_even, split_weighted, Segment};
pub use step::{PeerBatch, Source, Step, Transfer};

use std::ops::Range;

use crate::error::{Result, TorexError};
use crate::topology::{Link, LinkFailures, TorusShape};
use crate::types::{Algorithm, Rank};

/// How segments map onto the caller's input and output buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    /// Every rank holds `world` blocks of `block_len` bytes; block `d` of the
    /// input goes to rank `d`, block `s` of the output came from rank `s`.
    AllToAll { block_len: usize },
    /// A single payload of `len` bytes moving from `src` to `dst`.
    PointToPoint { src: Rank, dst: Rank, len: usize },
}

impl Layout {
    pub fn input_offset(&self, seg: &Segment) -> usize {
        match *self {
            Layout::AllToAll { block_len } => seg.dst as usize * block_len + seg.range.start,
            Layout::PointToPoint { .. } => seg.range.start,
        }
    }

    pub fn output_offset(&self, seg: &Segment) -> usize {
        match *self {
            Layout::AllToAll { block_len } => seg.src as usize * block_len + seg.range.start,
            Layout::PointToPoint { .. } => seg.range.start,
        }
    }

    pub fn input_len(&self, rank: Rank, world: u32) -> usize {
        match *self {
            Layout::AllToAll { block_len } => world as usize * block_len,
            Layout::PointToPoint { src, len, .. } => {
                if rank == src {
                    len
                } else {
                    0
                }
            }
        }
    }

    pub fn output_len(&self, rank: Rank, world: u32) -> usize {
        match *self {
            Layout::AllToAll { block_len } => world as usize * block_len,
            Layout::PointToPoint { dst, len, .. } => {
                if rank == dst {
                    len
                } else {
                    0
                }
            }
        }
    }

    /// Every segment that must leave its source rank.
    pub fn segments(&self, world: u32) -> Vec<Segment> {
        match *self {
            Layout::AllToAll { block_len } => (0..world)
                .flat_map(|src| {
                    (0..world)
                        .filter(move |&dst| dst != src)
                        .map(move |dst| Segment::new(src, dst, 0..block_len))
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Layout::PointToPoint { src, dst, len } if len > 0 => {
                vec![Segment::new(src, dst, 0..len)]
            }
            Layout::PointToPoint { .. } => Vec::new(),
        }
    }

    /// Bytes `rank` must receive from other ranks.
    pub fn expected_delivery(&self, rank: Rank, world: u32) -> usize {
        match *self {
            Layout::AllToAll { block_len } => (world as usize - 1) * block_len,
            Layout::PointToPoint { src, dst, len } => {
                if rank == dst && rank != src {
                    len
                } else {
                    0
                }
            }
        }
    }
}

/// What a group of consecutive steps is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Ring rotations along one or more dimensions.
    Sweep,
    /// Bypass and relay lanes around failed links.
    Mate,
    /// A standalone pipelined relay.
    Relay,
}

/// A labelled run of steps, e.g. `"XY"` or `"MATE-X"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub label: String,
    pub kind: PhaseKind,
    pub steps: Range<usize>,
}

impl Phase {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A complete, replayable transfer plan.
#[derive(Debug, Clone)]
pub struct Schedule {
    algorithm: Option<Algorithm>,
    shape: TorusShape,
    layout: Layout,
    steps: Vec<Step>,
    phases: Vec<Phase>,
}

impl Schedule {
    /// The All-to-All variant this plan implements, or `None` for a relay.
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn shape(&self) -> &TorusShape {
        &self.shape
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase_labels(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.label.as_str()).collect()
    }

    /// Bytes put on the wire by all ranks over the whole schedule.
    pub fn wire_bytes(&self) -> usize {
        self.steps.iter().map(Step::total_bytes).sum()
    }

    /// First transfer that crosses a failed link, as `(step, link)`.
    pub fn first_failed_link_use(&self, failures: &LinkFailures) -> Option<(usize, Link)> {
        if failures.is_empty() {
            return None;
        }
        self.steps.iter().enumerate().find_map(|(idx, step)| {
            step.transfers()
                .iter()
                .find(|t| failures.is_failed(t.from, t.to))
                .map(|t| (idx, Link::new(t.from, t.to)))
        })
    }

    /// Replay the schedule on every rank without data and check that it is
    /// executable and complete.
    ///
    /// Checks that each transfer joins neighbours along a dimension the step
    /// allows and avoids failed links, that every sender holds what it sends
    /// (bytes received in a step can only be forwarded in a later step), and
    /// that each rank ends up holding exactly the segments addressed to it.
    pub fn verify(&self, failures: &LinkFailures) -> Result<()> {
        let world = self.shape.world_size();
        let mut unsent: Vec<PieceMap<()>> = (0..world).map(|_| PieceMap::new()).collect();
        let mut staged: Vec<PieceMap<()>> = (0..world).map(|_| PieceMap::new()).collect();
        for seg in self.layout.segments(world) {
            unsent[seg.src as usize].insert(&seg, ())?;
        }

        for (idx, step) in self.steps.iter().enumerate() {
            for t in step.transfers() {
                let dim = self.shape.adjacency(t.from, t.to).ok_or_else(|| {
                    TorexError::schedule(format!(
                        "step {idx}: {} -> {} is not a torus link",
                        t.from, t.to
                    ))
                })?;
                if !step.allows(dim) {
                    return Err(TorexError::schedule(format!(
                        "step {idx}: {} -> {} uses dimension {dim}, step allows {:?}",
                        t.from,
                        t.to,
                        step.dims()
                    )));
                }
                if failures.is_failed(t.from, t.to) {
                    return Err(TorexError::schedule(format!(
                        "step {idx}: transfer {} crosses failed link {}",
                        t.segment,
                        Link::new(t.from, t.to)
                    )));
                }
                let pool = match t.source {
                    Source::Input => &mut unsent[t.from as usize],
                    Source::Staged => &mut staged[t.from as usize],
                };
                pool.take(&t.segment).map_err(|_| {
                    TorexError::schedule(format!(
                        "step {idx}: rank {} sends {} ({:?}) it does not hold",
                        t.from, t.segment, t.source
                    ))
                })?;
            }
            for t in step.transfers() {
                staged[t.to as usize].insert(&t.segment, ())?;
            }
        }

        for rank in 0..world {
            let pending = &unsent[rank as usize];
            if !pending.is_empty() {
                return Err(TorexError::schedule(format!(
                    "rank {rank} never sent {} bytes",
                    pending.held_bytes()
                )));
            }
            let mut delivered = 0;
            for (seg, ()) in staged[rank as usize].drain() {
                if seg.dst != rank {
                    return Err(TorexError::schedule(format!(
                        "segment {seg} stranded at rank {rank}"
                    )));
                }
                delivered += seg.len();
            }
            let expected = self.layout.expected_delivery(rank, world);
            if delivered != expected {
                return Err(TorexError::schedule(format!(
                    "rank {rank} receives {delivered} bytes, expected {expected}"
                )));
            }
        }
        Ok(())
    }
}

/// Incremental construction of a [`Schedule`], one phase at a time.
pub(crate) struct ScheduleBuilder<'a> {
    shape: &'a TorusShape,
    steps: Vec<Step>,
    phases: Vec<Phase>,
}

impl<'a> ScheduleBuilder<'a> {
    pub fn new(shape: &'a TorusShape) -> Self {
        Self {
            shape,
            steps: Vec::new(),
            phases: Vec::new(),
        }
    }

    pub fn shape(&self) -> &'a TorusShape {
        self.shape
    }

    /// Append `len` steps along `dims` and return the index of the first.
    pub fn open_phase(
        &mut self,
        label: impl Into<String>,
        kind: PhaseKind,
        dims: &[usize],
        len: usize,
    ) -> usize {
        let start = self.steps.len();
        self.steps
            .extend((0..len).map(|_| Step::along(dims.iter().copied())));
        self.phases.push(Phase {
            label: label.into(),
            kind,
            steps: start..start + len,
        });
        start
    }

    /// Record a transfer. Empty segments are dropped.
    pub fn emit(&mut self, step: usize, from: Rank, to: Rank, segment: Segment, source: Source) {
        if segment.is_empty() {
            return;
        }
        debug_assert!(step < self.steps.len(), "step {step} outside any phase");
        self.steps[step].push(Transfer {
            from,
            to,
            segment,
            source,
        });
    }

    pub fn finish(self, algorithm: Option<Algorithm>, layout: Layout) -> Schedule {
        Schedule {
            algorithm,
            shape: self.shape.clone(),
            layout,
            steps: self.steps,
            phases: self.phases,
        }
    }
}

/// A segment in flight during planning: where it currently sits and
/// whether it is still in its source's input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Parcel {
    pub seg: Segment,
    pub at: Rank,
    pub fresh: bool,
}

impl Parcel {
    pub fn origin(seg: Segment) -> Self {
        let at = seg.src;
        Self {
            seg,
            at,
            fresh: true,
        }
    }

    /// Move one hop to `to` during `step`.
    pub fn hop(&mut self, b: &mut ScheduleBuilder<'_>, step: usize, to: Rank) {
        let source = if self.fresh {
            Source::Input
        } else {
            Source::Staged
        };
        b.emit(step, self.at, to, self.seg.clone(), source);
        self.at = to;
        self.fresh = false;
    }

    pub fn is_empty(&self) -> bool {
        self.seg.is_empty()
    }

    fn with_seg(&self, seg: Segment) -> Self {
        Self {
            seg,
            at: self.at,
            fresh: self.fresh,
        }
    }

    /// Positional split; some pieces may be empty.
    pub fn split_even(&self, parts: usize) -> Vec<Parcel> {
        self.seg
            .split_even(parts)
            .into_iter()
            .map(|s| self.with_seg(s))
            .collect()
    }

    /// Positional weighted split; some pieces may be empty.
    pub fn split_weighted(&self, weights: &[usize]) -> Vec<Parcel> {
        self.seg
            .split_weighted(weights)
            .into_iter()
            .map(|s| self.with_seg(s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize) -> TorusShape {
        TorusShape::new([n]).unwrap()
    }

    /// Every rank hands its block to the successor, which forwards it on.
    fn forward_ring(shape: &TorusShape, block_len: usize) -> Schedule {
        let n = shape.world_size();
        let mut b = ScheduleBuilder::new(shape);
        let start = b.open_phase("X", PhaseKind::Sweep, &[0], n as usize - 1);
        for seg in (Layout::AllToAll { block_len }).segments(n) {
            let mut p = Parcel::origin(seg);
            let hops = shape.forward_distance(p.at, p.seg.dst as usize, 0);
            for h in 0..hops {
                let next = shape.shift(p.at, 0, 1);
                p.hop(&mut b, start + h, next);
            }
        }
        b.finish(None, Layout::AllToAll { block_len })
    }

    #[test]
    fn test_forward_ring_verifies() {
        let shape = line(5);
        let schedule = forward_ring(&shape, 3);
        assert_eq!(schedule.step_count(), 4);
        assert_eq!(schedule.phase_labels(), vec!["X"]);
        schedule.verify(&LinkFailures::none()).unwrap();
        // 5 ranks, 4 remote blocks each, average distance 2.5 hops.
        assert_eq!(schedule.wire_bytes(), 5 * 3 * (1 + 2 + 3 + 4));
    }

    #[test]
    fn test_verify_reports_failed_link() {
        let shape = line(4);
        let schedule = forward_ring(&shape, 2);
        let failures: LinkFailures = "1-2".parse().unwrap();
        assert_eq!(
            schedule.first_failed_link_use(&failures).map(|(_, l)| l),
            Some(Link::new(1, 2))
        );
        assert!(schedule.verify(&failures).is_err());
    }

    #[test]
    fn test_verify_rejects_same_step_forwarding() {
        let shape = line(3);
        let mut b = ScheduleBuilder::new(&shape);
        let start = b.open_phase("X", PhaseKind::Sweep, &[0], 1);
        let mut p = Parcel::origin(Segment::new(0, 2, 0..4));
        p.hop(&mut b, start, 1);
        p.hop(&mut b, start, 2);
        let schedule = b.finish(None, Layout::PointToPoint { src: 0, dst: 2, len: 4 });
        let err = schedule.verify(&LinkFailures::none()).unwrap_err();
        assert!(err.to_string().contains("does not hold"), "{err}");
    }

    #[test]
    fn test_verify_rejects_disallowed_dim() {
        let shape = TorusShape::new([2, 2]).unwrap();
        let mut b = ScheduleBuilder::new(&shape);
        let start = b.open_phase("X", PhaseKind::Sweep, &[0], 1);
        let mut p = Parcel::origin(Segment::new(0, 2, 0..1));
        p.hop(&mut b, start, 2);
        let schedule = b.finish(None, Layout::PointToPoint { src: 0, dst: 2, len: 1 });
        assert!(schedule.verify(&LinkFailures::none()).is_err());
    }

    #[test]
    fn test_verify_rejects_incomplete() {
        let shape = line(3);
        let mut b = ScheduleBuilder::new(&shape);
        b.open_phase("X", PhaseKind::Sweep, &[0], 2);
        let schedule = b.finish(None, Layout::AllToAll { block_len: 1 });
        let err = schedule.verify(&LinkFailures::none()).unwrap_err();
        assert!(err.to_string().contains("rank 0 never sent 2 bytes"), "{err}");
    }

    #[test]
    fn test_parcel_split_keeps_position() {
        let shape = line(4);
        let mut b = ScheduleBuilder::new(&shape);
        let start = b.open_phase("X", PhaseKind::Sweep, &[0], 1);
        let mut p = Parcel::origin(Segment::new(0, 3, 0..10));
        p.hop(&mut b, start, 1);
        let halves = p.split_even(2);
        assert!(halves.iter().all(|h| h.at == 1 && !h.fresh));
        assert_eq!(halves[1].seg.range, 5..10);
        let lanes = p.split_weighted(&[2, 3, 3]);
        assert_eq!(lanes[0].seg.range, 0..2);
        assert_eq!(lanes[2].seg.range, 6..10);
    }

    #[test]
    fn test_empty_emits_are_dropped() {
        let shape = line(2);
        let mut b = ScheduleBuilder::new(&shape);
        let start = b.open_phase("X", PhaseKind::Sweep, &[0], 1);
        b.emit(start, 0, 1, Segment::new(0, 1, 3..3), Source::Input);
        let schedule = b.finish(None, Layout::AllToAll { block_len: 0 });
        assert!(schedule.steps()[0].is_idle());
        assert_eq!(schedule.step_count(), 1);
    }

    #[test]
    fn test_layout_offsets() {
        let layout = Layout::AllToAll { block_len: 8 };
        let seg = Segment::new(2, 5, 3..6);
        assert_eq!(layout.input_offset(&seg), 5 * 8 + 3);
        assert_eq!(layout.output_offset(&seg), 2 * 8 + 3);
        assert_eq!(layout.segments(4).len(), 12);
        assert_eq!(layout.expected_delivery(1, 4), 24);

        let p2p = Layout::PointToPoint { src: 1, dst: 3, len: 9 };
        assert_eq!(p2p.input_len(1, 4), 9);
        assert_eq!(p2p.input_len(3, 4), 0);
        assert_eq!(p2p.output_len(3, 4), 9);
        assert_eq!(p2p.expected_delivery(3, 4), 9);
        assert_eq!(p2p.expected_delivery(0, 4), 0);
    }
}
