//! Store-and-forward moves around a single dimension ring.

use crate::schedule::{Parcel, ScheduleBuilder};
use crate::topology::{Link, LinkFailures, TorusShape};
use crate::types::Sign;

/// How a sweep picks directions around a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RingMode {
    /// Half of every parcel goes each way, the full distance in that direction.
    Full,
    /// Shortest direction; a tie at `extent / 2` is split in halves.
    Half,
}

impl RingMode {
    /// Steps a sweep of a ring of `extent` takes in this mode.
    pub fn rotation_len(self, extent: usize) -> usize {
        match self {
            RingMode::Full => extent.saturating_sub(1),
            RingMode::Half => extent / 2,
        }
    }
}

/// `hops` moves in direction `sign` along `dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Leg {
    pub dim: usize,
    pub sign: Sign,
    pub hops: usize,
}

impl Leg {
    /// The same trip taken the other way round a ring of `extent`.
    pub fn reversed(self, extent: usize) -> Leg {
        Leg {
            dim: self.dim,
            sign: self.sign.flip(),
            hops: (extent - self.hops) % extent,
        }
    }

    /// First failed link this leg would cross starting from `parcel.at`.
    pub fn crossing(
        self,
        shape: &TorusShape,
        parcel: &Parcel,
        failures: &LinkFailures,
    ) -> Option<Link> {
        if failures.is_empty() {
            return None;
        }
        shape
            .walk(parcel.at, self.dim, self.sign, self.hops)
            .find(|&(a, b)| failures.is_failed(a, b))
            .map(|(a, b)| Link::new(a, b))
    }
}

/// Split `parcel` into the pieces and legs that bring it to its destination
/// coordinate along `dim`. Parcels already aligned get a zero-hop leg.
pub(crate) fn legs(
    shape: &TorusShape,
    parcel: Parcel,
    dim: usize,
    mode: RingMode,
) -> Vec<(Parcel, Leg)> {
    let n = shape.extent(dim);
    let target = shape.coord_in(parcel.seg.dst, dim);
    let fwd = shape.forward_distance(parcel.at, target, dim);
    let back = (n - fwd) % n;
    let leg = |sign, hops| Leg { dim, sign, hops };

    if fwd == 0 {
        return vec![(parcel, leg(Sign::Plus, 0))];
    }
    let split = |p: &Parcel, plus: usize, minus: usize| {
        let halves = p.split_even(2);
        let mut out = Vec::with_capacity(2);
        for (half, l) in halves
            .into_iter()
            .zip([leg(Sign::Plus, plus), leg(Sign::Minus, minus)])
        {
            if !half.is_empty() {
                out.push((half, l));
            }
        }
        out
    };
    match mode {
        RingMode::Full => split(&parcel, fwd, back),
        RingMode::Half if fwd < back => vec![(parcel, leg(Sign::Plus, fwd))],
        RingMode::Half if fwd > back => vec![(parcel, leg(Sign::Minus, back))],
        RingMode::Half => split(&parcel, fwd, back),
    }
}

/// Walk `parcel` along `leg`, one hop per step starting at `first_step`.
pub(crate) fn travel(b: &mut ScheduleBuilder<'_>, parcel: &mut Parcel, leg: Leg, first_step: usize) {
    for h in 0..leg.hops {
        let next = b.shape().shift(parcel.at, leg.dim, leg.sign.as_offset());
        parcel.hop(b, first_step + h, next);
    }
}
