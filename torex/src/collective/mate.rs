//! Fault-tolerant HalfRing with MATE stages.
//!
//! Each HalfRing phase runs unchanged except in rings holding a failed
//! link, where parcels whose short route crosses the failure are held back.
//! After every phase a MATE stage moves the held-back parcels over three
//! lanes: a bypass rotation the long way round the broken ring, and two
//! relay chains that step off into the parallel rings at `±1` along an
//! orthogonal dimension, travel alongside, and step back.

use std::collections::BTreeMap;

use tracing::debug;

use super::relay::{pipeline, RELAY_SPLITS};
use super::ring::{legs, travel, Leg, RingMode};
use super::sequencer::{phase_label, split_parts};
use crate::error::{Result, TorexError};
use crate::schedule::{Layout, Parcel, PhaseKind, Schedule, ScheduleBuilder};
use crate::topology::{Link, LinkFailures, TorusShape};
use crate::types::{dim_name, Algorithm, Rank, Sign};

/// Lane shares in eighths: bypass rotation, relay via `+g`, relay via `-g`.
pub const LANE_WEIGHTS: [usize; 3] = [2, 3, 3];

/// A ring with one failed link and how traffic is steered around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Detour {
    pub link: Link,
    pub dim: usize,
    /// Orthogonal dimension the relay chains step into, if any.
    pub relay_dim: Option<usize>,
}

/// Next dimension after `dim`, cyclically, with at least two positions.
fn orthogonal(shape: &TorusShape, dim: usize) -> Option<usize> {
    let d = shape.ndims();
    (1..d)
        .map(|k| (dim + k) % d)
        .find(|&g| shape.extent(g) >= 2)
}

/// Steps one MATE stage needs for a broken ring of `extent`.
pub(crate) fn stage_len(extent: usize, relays: bool) -> usize {
    let bypass = extent.saturating_sub(1);
    if relays {
        // Longest chain: off-ring hop, extent/2 hops alongside, hop back.
        let chain_hops = extent / 2 + 2;
        bypass.max(chain_hops + RELAY_SPLITS - 1)
    } else {
        bypass
    }
}

/// Map each declared failure to its ring, rejecting rings with two failures.
pub(crate) fn detours(shape: &TorusShape, failures: &LinkFailures) -> Result<Vec<Detour>> {
    let mut rings: BTreeMap<(usize, Rank), Link> = BTreeMap::new();
    let mut out = Vec::with_capacity(failures.len());
    for link in failures.iter() {
        let (a, b) = link.endpoints();
        let dim = shape
            .adjacency(a, b)
            .ok_or(TorexError::NotAdjacent { a, b })?;
        let ring = (dim, shape.with_coord(a, dim, 0));
        if let Some(prev) = rings.insert(ring, link) {
            return Err(TorexError::UncoveredFailure {
                algorithm: Algorithm::Mate,
                reason: format!(
                    "links {prev} and {link} both cut the {} ring through rank {}",
                    dim_name(dim),
                    ring.1
                ),
            });
        }
        out.push(Detour {
            link,
            dim,
            relay_dim: orthogonal(shape, dim),
        });
    }
    Ok(out)
}

/// `[u, u±g, ... alongside ..., v±g, v]` for a leg from `at`.
fn detour_chain(shape: &TorusShape, at: Rank, leg: Leg, g: usize, side: Sign) -> Vec<Rank> {
    let mut chain = Vec::with_capacity(leg.hops + 3);
    chain.push(at);
    let mut cur = shape.shift(at, g, side.as_offset());
    chain.push(cur);
    for _ in 0..leg.hops {
        cur = shape.shift(cur, leg.dim, leg.sign.as_offset());
        chain.push(cur);
    }
    chain.push(shape.shift(cur, g, side.flip().as_offset()));
    chain
}

/// Plan the three lanes for one held-back parcel. Returns the delivered pieces.
fn lanes(
    b: &mut ScheduleBuilder<'_>,
    parcel: Parcel,
    leg: Leg,
    relay_dim: Option<usize>,
    start: usize,
) -> Vec<Parcel> {
    let shape = b.shape();
    let extent = shape.extent(leg.dim);
    let Some(g) = relay_dim else {
        let mut whole = parcel;
        travel(b, &mut whole, leg.reversed(extent), start);
        return vec![whole];
    };

    let mut arrived = Vec::new();
    let mut split = parcel.split_weighted(&LANE_WEIGHTS).into_iter();
    if let Some(mut bypass) = split.next().filter(|p| !p.is_empty()) {
        travel(b, &mut bypass, leg.reversed(extent), start);
        arrived.push(bypass);
    }
    for side in [Sign::Plus, Sign::Minus] {
        let Some(lane) = split.next().filter(|p| !p.is_empty()) else {
            continue;
        };
        let chain = detour_chain(shape, lane.at, leg, g, side);
        arrived.extend(pipeline(b, lane, &chain, RELAY_SPLITS, start));
    }
    arrived
}

/// Build the MATE schedule.
///
/// Fails with `UncoveredFailure` when two failures share a ring or when a
/// generated route still crosses a failed link (for instance a relay chain
/// running through another broken ring).
pub(crate) fn plan(
    shape: &TorusShape,
    failures: &LinkFailures,
    block_len: usize,
) -> Result<Schedule> {
    let detours = detours(shape, failures)?;
    let d = shape.ndims();
    let layout = Layout::AllToAll { block_len };
    let mut parts = split_parts(layout.segments(shape.world_size()), d);
    let all: Vec<usize> = (0..d).collect();
    let label = phase_label(&all);
    let sweep_len = (0..d)
        .map(|dim| RingMode::Half.rotation_len(shape.extent(dim)))
        .max()
        .unwrap_or(0);
    let mate_len = detours
        .iter()
        .map(|det| stage_len(shape.extent(det.dim), det.relay_dim.is_some()))
        .max()
        .unwrap_or(0);
    let relay_dims: BTreeMap<usize, Option<usize>> =
        detours.iter().map(|det| (det.dim, det.relay_dim)).collect();

    let mut b = ScheduleBuilder::new(shape);
    for phase in 0..d {
        let start = b.open_phase(label.clone(), PhaseKind::Sweep, &all, sweep_len);
        let mut held: Vec<(usize, Parcel, Leg)> = Vec::new();
        for (i, part) in parts.iter_mut().enumerate() {
            let dim = (i + phase) % d;
            let mut moved = Vec::with_capacity(part.len());
            for parcel in std::mem::take(part) {
                for (mut piece, leg) in legs(shape, parcel, dim, RingMode::Half) {
                    if leg.crossing(shape, &piece, failures).is_some() {
                        held.push((i, piece, leg));
                        continue;
                    }
                    travel(&mut b, &mut piece, leg, start);
                    moved.push(piece);
                }
            }
            *part = moved;
        }

        if detours.is_empty() {
            continue;
        }
        debug!(phase, held = held.len(), "planning MATE stage");
        let stage = b.open_phase(format!("MATE-{label}"), PhaseKind::Mate, &all, mate_len);
        for (i, piece, leg) in held {
            let relay_dim = relay_dims.get(&leg.dim).copied().flatten();
            let delivered = lanes(&mut b, piece, leg, relay_dim, stage);
            parts[i].extend(delivered);
        }
    }

    let schedule = b.finish(Some(Algorithm::Mate), layout);
    if let Some((step, link)) = schedule.first_failed_link_use(failures) {
        return Err(TorexError::UncoveredFailure {
            algorithm: Algorithm::Mate,
            reason: format!("a detour planned for step {step} crosses failed link {link}"),
        });
    }
    Ok(schedule)
}
