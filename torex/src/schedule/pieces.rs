use std::collections::BTreeMap;

use super::Segment;
use crate::error::{Result, TorexError};
use crate::types::Rank;

/// A payload that can be cut at a byte offset.
pub(crate) trait Piece: Sized {
    /// Keep `[0, at)` in `self` and return `[at, len)`.
    fn split_off(&mut self, at: usize) -> Self;
}

impl Piece for Vec<u8> {
    fn split_off(&mut self, at: usize) -> Self {
        Vec::split_off(self, at)
    }
}

/// Ranges only, used when replaying a schedule without data.
impl Piece for () {
    fn split_off(&mut self, _at: usize) -> Self {}
}

/// Disjoint pieces of blocks held at one rank, keyed by `(src, dst)` and
/// then by start offset.
///
/// A piece can be taken whole or in part; the untaken remainder stays
/// behind under its own start offset.
#[derive(Debug)]
pub(crate) struct PieceMap<T> {
    blocks: BTreeMap<(Rank, Rank), BTreeMap<usize, (usize, T)>>,
}

impl<T> Default for PieceMap<T> {
    fn default() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }
}

impl<T: Piece> PieceMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a piece. Overlap with a held piece of the same block is an error.
    pub fn insert(&mut self, seg: &Segment, payload: T) -> Result<()> {
        if seg.is_empty() {
            return Ok(());
        }
        let block = self.blocks.entry((seg.src, seg.dst)).or_default();
        let below = block
            .range(..=seg.range.start)
            .next_back()
            .is_some_and(|(_, (end, _))| *end > seg.range.start);
        let above = block
            .range(seg.range.start..)
            .next()
            .is_some_and(|(&start, _)| start < seg.range.end);
        if below || above {
            return Err(TorexError::schedule(format!(
                "segment {seg} overlaps a piece already held"
            )));
        }
        block.insert(seg.range.start, (seg.range.end, payload));
        Ok(())
    }

    /// Remove exactly `seg`, which must lie inside one held piece.
    pub fn take(&mut self, seg: &Segment) -> Result<T> {
        debug_assert!(!seg.is_empty(), "empty segments are never scheduled");
        let missing = || TorexError::schedule(format!("segment {seg} is not held"));
        let block = self
            .blocks
            .get_mut(&(seg.src, seg.dst))
            .ok_or_else(missing)?;
        let start = match block.range(..=seg.range.start).next_back() {
            Some((&start, (end, _))) if *end >= seg.range.end => start,
            _ => return Err(missing()),
        };
        let (end, mut head) = block.remove(&start).ok_or_else(missing)?;

        let mut wanted = head.split_off(seg.range.start - start);
        let tail = wanted.split_off(seg.len());
        if seg.range.start > start {
            block.insert(start, (seg.range.start, head));
        }
        if end > seg.range.end {
            block.insert(seg.range.end, (end, tail));
        }
        if block.is_empty() {
            self.blocks.remove(&(seg.src, seg.dst));
        }
        Ok(wanted)
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Bytes covered by all held pieces.
    pub fn held_bytes(&self) -> usize {
        self.blocks
            .values()
            .flat_map(|b| b.iter().map(|(start, (end, _))| end - start))
            .sum()
    }

    /// Remove and yield every held piece.
    pub fn drain(&mut self) -> impl Iterator<Item = (Segment, T)> + use<T> {
        std::mem::take(&mut self.blocks)
            .into_iter()
            .flat_map(|((src, dst), block)| {
                block
                    .into_iter()
                    .map(move |(start, (end, p))| (Segment::new(src, dst, start..end), p))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(range: std::ops::Range<usize>) -> Segment {
        Segment::new(1, 2, range)
    }

    #[test]
    fn test_take_middle_leaves_both_ends() {
        let mut map = PieceMap::new();
        map.insert(&seg(0..10), (0u8..10).collect::<Vec<u8>>()).unwrap();
        assert_eq!(map.take(&seg(3..6)).unwrap(), vec![3, 4, 5]);
        assert_eq!(map.held_bytes(), 7);
        assert_eq!(map.take(&seg(0..3)).unwrap(), vec![0, 1, 2]);
        assert_eq!(map.take(&seg(6..10)).unwrap(), vec![6, 7, 8, 9]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_take_across_pieces_fails() {
        let mut map = PieceMap::new();
        map.insert(&seg(0..4), vec![0; 4]).unwrap();
        map.insert(&seg(4..8), vec![0; 4]).unwrap();
        assert!(map.take(&seg(2..6)).is_err());
        assert_eq!(map.held_bytes(), 8);
    }

    #[test]
    fn test_take_unknown_block() {
        let mut map: PieceMap<()> = PieceMap::new();
        map.insert(&seg(0..4), ()).unwrap();
        assert!(map.take(&Segment::new(2, 1, 0..4)).is_err());
        assert!(map.take(&seg(3..5)).is_err());
    }

    #[test]
    fn test_insert_rejects_overlap() {
        let mut map: PieceMap<()> = PieceMap::new();
        map.insert(&seg(4..8), ()).unwrap();
        assert!(map.insert(&seg(6..10), ()).is_err());
        assert!(map.insert(&seg(0..5), ()).is_err());
        assert!(map.insert(&seg(4..5), ()).is_err());
        map.insert(&seg(0..4), ()).unwrap();
        map.insert(&seg(8..9), ()).unwrap();
        assert_eq!(map.held_bytes(), 9);
    }

    #[test]
    fn test_drain_yields_pieces() {
        let mut map = PieceMap::new();
        map.insert(&Segment::new(0, 3, 2..4), vec![7, 8]).unwrap();
        map.insert(&Segment::new(5, 3, 0..1), vec![9]).unwrap();
        let drained: Vec<_> = map.drain().collect();
        assert_eq!(
            drained,
            vec![
                (Segment::new(0, 3, 2..4), vec![7, 8]),
                (Segment::new(5, 3, 0..1), vec![9]),
            ]
        );
        assert!(map.is_empty());
    }
}
