use std::ops::Range;

use crate::types::Rank;

/// A byte range of the block that rank `src` prepared for rank `dst`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub src: Rank,
    pub dst: Rank,
    pub range: Range<usize>,
}

impl Segment {
    pub fn new(src: Rank, dst: Rank, range: Range<usize>) -> Self {
        Self { src, dst, range }
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Split into `parts` contiguous pieces, positions preserved (some may be empty).
    pub fn split_even(&self, parts: usize) -> Vec<Segment> {
        split_even(self.range.clone(), parts)
            .into_iter()
            .map(|r| Segment::new(self.src, self.dst, r))
            .collect()
    }

    /// Split by fixed integer weights, positions preserved (some may be empty).
    pub fn split_weighted(&self, weights: &[usize]) -> Vec<Segment> {
        split_weighted(self.range.clone(), weights)
            .into_iter()
            .map(|r| Segment::new(self.src, self.dst, r))
            .collect()
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}->{}[{}..{}]",
            self.src, self.dst, self.range.start, self.range.end
        )
    }
}

/// Split `range` into `parts` contiguous ranges whose lengths differ by at
/// most one. The first `len % parts` ranges carry the extra byte.
pub fn split_even(range: Range<usize>, parts: usize) -> Vec<Range<usize>> {
    debug_assert!(parts > 0, "parts must be > 0");
    let len = range.len();
    let base = len / parts;
    let rem = len % parts;
    (0..parts)
        .map(|i| {
            let off = range.start + base * i + i.min(rem);
            let n = base + usize::from(i < rem);
            off..off + n
        })
        .collect()
}

/// Split `range` by integer `weights`. Boundary `i` sits at
/// `floor(len * (w_0 + .. + w_i) / total)`, so the pieces tile the range.
pub fn split_weighted(range: Range<usize>, weights: &[usize]) -> Vec<Range<usize>> {
    let total: usize = weights.iter().sum();
    debug_assert!(total > 0, "weights must not all be zero");
    let len = range.len() as u128;
    let mut cum = 0usize;
    let mut start = range.start;
    weights
        .iter()
        .map(|&w| {
            cum += w;
            let end = range.start + (len * cum as u128 / total as u128) as usize;
            let piece = start..end;
            start = end;
            piece
        })
        .collect()
}
