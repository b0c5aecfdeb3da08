//! Pipelined multi-hop relay.
//!
//! A payload crossing `H` hops is cut into `S` sub-chunks. Sub-chunk `k`
//! crosses hop `h` in round `h + k`, so after a fill of `S - 1` rounds every
//! hop of the chain is busy with a different sub-chunk and the whole trip
//! takes `H + S - 1` rounds instead of `H · S`.

use std::collections::BTreeSet;

use crate::error::{Result, TorexError};
use crate::schedule::{Layout, Parcel, PhaseKind, Schedule, ScheduleBuilder, Segment};
use crate::topology::TorusShape;
use crate::types::Rank;

/// Sub-chunks per relayed payload.
pub const RELAY_SPLITS: usize = 3;

/// Round table of a pipelined relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySchedule {
    hops: usize,
    splits: usize,
    rounds: Vec<Vec<(usize, usize)>>,
}

impl RelaySchedule {
    /// Table for `hops` hops and `splits` sub-chunks. Round `r` lists the
    /// `(sub_chunk, hop)` pairs with `sub_chunk + hop == r`.
    pub fn new(hops: usize, splits: usize) -> Self {
        let count = if hops == 0 || splits == 0 {
            0
        } else {
            hops + splits - 1
        };
        let rounds = (0..count)
            .map(|r| {
                (0..splits)
                    .filter(|&k| k <= r && r - k < hops)
                    .map(|k| (k, r - k))
                    .collect()
            })
            .collect();
        Self {
            hops,
            splits,
            rounds,
        }
    }

    pub fn hops(&self) -> usize {
        self.hops
    }

    pub fn splits(&self) -> usize {
        self.splits
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn rounds(&self) -> &[Vec<(usize, usize)>] {
        &self.rounds
    }

    /// Round in which sub-chunk `sub` crosses `hop`.
    pub fn slot(sub: usize, hop: usize) -> usize {
        sub + hop
    }

    /// Roles of the rank at `position` in the chain during `round`: the
    /// sub-chunk it sends onward and the one it receives, if any.
    pub fn roles(&self, position: usize, round: usize) -> (Option<usize>, Option<usize>) {
        let Some(active) = self.rounds.get(round) else {
            return (None, None);
        };
        let send = active.iter().find(|&&(_, h)| h == position).map(|&(k, _)| k);
        let recv = position
            .checked_sub(1)
            .and_then(|prev| active.iter().find(|&&(_, h)| h == prev))
            .map(|&(k, _)| k);
        (send, recv)
    }
}

/// Plan `parcel` along `chain` (which starts where the parcel sits) as a
/// pipelined relay beginning at `first_step`. Returns the delivered pieces.
pub(crate) fn pipeline(
    b: &mut ScheduleBuilder<'_>,
    parcel: Parcel,
    chain: &[Rank],
    splits: usize,
    first_step: usize,
) -> Vec<Parcel> {
    debug_assert_eq!(chain.first(), Some(&parcel.at));
    let table = RelaySchedule::new(chain.len().saturating_sub(1), splits);
    let mut subs = parcel.split_even(splits);
    for (r, active) in table.rounds().iter().enumerate() {
        for &(k, h) in active {
            subs[k].hop(b, first_step + r, chain[h + 1]);
        }
    }
    subs.retain(|p| !p.is_empty());
    subs
}

/// Standalone relay of `len` bytes along `chain`.
pub(crate) fn relay_plan(shape: &TorusShape, chain: &[Rank], len: usize) -> Result<Schedule> {
    let (&src, &dst) = match (chain.first(), chain.last()) {
        (Some(s), Some(d)) if chain.len() >= 2 => (s, d),
        _ => {
            return Err(TorexError::InvalidConfig(
                "a relay chain needs at least two ranks".into(),
            ));
        }
    };
    if src == dst {
        return Err(TorexError::InvalidConfig(format!(
            "relay chain starts and ends at rank {src}"
        )));
    }
    let mut dims = BTreeSet::new();
    for w in chain.windows(2) {
        shape.check_rank(w[0])?;
        shape.check_rank(w[1])?;
        let dim = shape
            .adjacency(w[0], w[1])
            .ok_or(TorexError::NotAdjacent { a: w[0], b: w[1] })?;
        dims.insert(dim);
    }
    let dims: Vec<usize> = dims.into_iter().collect();

    let rounds = RelaySchedule::new(chain.len() - 1, RELAY_SPLITS).round_count();
    let mut b = ScheduleBuilder::new(shape);
    let start = b.open_phase("relay", PhaseKind::Relay, &dims, rounds);
    let parcel = Parcel::origin(Segment::new(src, dst, 0..len));
    pipeline(&mut b, parcel, chain, RELAY_SPLITS, start);
    Ok(b.finish(None, Layout::PointToPoint { src, dst, len }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LinkFailures;

    #[test]
    fn test_three_hops_three_splits() {
        let t = RelaySchedule::new(3, 3);
        assert_eq!(t.round_count(), 5);
        assert_eq!(t.rounds()[0], vec![(0, 0)]);
        assert_eq!(t.rounds()[1], vec![(0, 1), (1, 0)]);
        assert_eq!(t.rounds()[2], vec![(0, 2), (1, 1), (2, 0)]);
        assert_eq!(t.rounds()[3], vec![(1, 2), (2, 1)]);
        assert_eq!(t.rounds()[4], vec![(2, 2)]);
    }

    #[test]
    fn test_every_pair_scheduled_once() {
        for hops in 1..6 {
            for splits in 1..5 {
                let t = RelaySchedule::new(hops, splits);
                assert_eq!(t.round_count(), hops + splits - 1);
                let mut seen = BTreeSet::new();
                for (r, active) in t.rounds().iter().enumerate() {
                    let hop_set: BTreeSet<_> = active.iter().map(|&(_, h)| h).collect();
                    assert_eq!(hop_set.len(), active.len(), "two sub-chunks on one hop");
                    for &(k, h) in active {
                        assert_eq!(RelaySchedule::slot(k, h), r);
                        assert!(seen.insert((k, h)));
                    }
                }
                assert_eq!(seen.len(), hops * splits);
            }
        }
    }

    #[test]
    fn test_degenerate_tables() {
        assert_eq!(RelaySchedule::new(0, 3).round_count(), 0);
        assert_eq!(RelaySchedule::new(4, 0).round_count(), 0);
    }

    #[test]
    fn test_roles_middle_rank() {
        let t = RelaySchedule::new(3, 3);
        // Position 1 receives sub-chunk 0 in round 0 and forwards it in round 1.
        assert_eq!(t.roles(1, 0), (None, Some(0)));
        assert_eq!(t.roles(1, 1), (Some(0), Some(1)));
        assert_eq!(t.roles(1, 3), (Some(2), None));
        assert_eq!(t.roles(0, 2), (Some(2), None));
        assert_eq!(t.roles(3, 4), (None, Some(2)));
        assert_eq!(t.roles(0, 9), (None, None));
    }

    #[test]
    fn test_relay_plan_verifies() {
        let shape = TorusShape::new([4, 4]).unwrap();
        let s = relay_plan(&shape, &[0, 4, 5, 1], 10).unwrap();
        assert_eq!(s.step_count(), 5);
        assert_eq!(s.phase_labels(), vec!["relay"]);
        s.verify(&LinkFailures::none()).unwrap();
        let round2 = &s.steps()[2];
        assert_eq!(round2.transfers().len(), 3);
    }

    #[test]
    fn test_relay_plan_rejects_bad_chains() {
        let shape = TorusShape::new([4, 4]).unwrap();
        assert!(matches!(
            relay_plan(&shape, &[0, 5], 4),
            Err(TorexError::NotAdjacent { a: 0, b: 5 })
        ));
        assert!(relay_plan(&shape, &[0], 4).is_err());
        assert!(relay_plan(&shape, &[0, 1, 0], 4).is_err());
        assert!(relay_plan(&shape, &[0, 16], 4).is_err());
    }
}
