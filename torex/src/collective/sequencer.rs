//! Phase sequencing for the rotation-based variants.
//!
//! Blocks are cut into parts by a fixed ratio and each part walks the
//! dimensions in its own order, so that within a phase several
//! dimensions carry traffic at once.

use super::ring::{legs, travel, RingMode};
use crate::error::{Result, TorexError};
use crate::schedule::{Layout, Parcel, PhaseKind, Schedule, ScheduleBuilder, Segment};
use crate::topology::{LinkFailures, TorusShape};
use crate::types::{dim_name, Algorithm};

/// Baseline cuts every block in thirds.
pub const BASELINE_PARTS: usize = 3;

/// `"XY"` for dimensions `[0, 1]`.
pub(crate) fn phase_label(dims: &[usize]) -> String {
    let mut dims = dims.to_vec();
    dims.sort_unstable();
    dims.dedup();
    dims.into_iter().map(dim_name).collect()
}

/// Cut every segment into `parts` and collect piece `i` of each into part `i`.
pub(crate) fn split_parts(segments: Vec<Segment>, parts: usize) -> Vec<Vec<Parcel>> {
    let mut out: Vec<Vec<Parcel>> = vec![Vec::new(); parts];
    for seg in segments {
        for (i, piece) in seg.split_even(parts).into_iter().enumerate() {
            if !piece.is_empty() {
                out[i].push(Parcel::origin(piece));
            }
        }
    }
    out
}

/// Dimensions whose rings contain at least one declared failure.
pub(crate) fn failed_dims(shape: &TorusShape, failures: &LinkFailures) -> Vec<bool> {
    let mut dims = vec![false; shape.ndims()];
    for link in failures.iter() {
        let (a, b) = link.endpoints();
        if let Some(d) = shape.adjacency(a, b) {
            dims[d] = true;
        }
    }
    dims
}

/// Move every parcel to its destination coordinate along `dim`, starting at `start`.
pub(crate) fn sweep(
    b: &mut ScheduleBuilder<'_>,
    parcels: Vec<Parcel>,
    dim: usize,
    mode: RingMode,
    start: usize,
) -> Vec<Parcel> {
    let shape = b.shape();
    let mut out = Vec::with_capacity(parcels.len());
    for parcel in parcels {
        for (mut piece, leg) in legs(shape, parcel, dim, mode) {
            travel(b, &mut piece, leg, start);
            out.push(piece);
        }
    }
    out
}

/// Pipelined full-ring rotations. Part `i` sweeps dimension `p - i` in
/// phase `p`, giving phases `X, XY, XY, Y` on a 2D torus.
pub(crate) fn baseline(shape: &TorusShape, block_len: usize) -> Schedule {
    let d = shape.ndims();
    let layout = Layout::AllToAll { block_len };
    let mut parts = split_parts(layout.segments(shape.world_size()), BASELINE_PARTS);
    let mut b = ScheduleBuilder::new(shape);

    for phase in 0..BASELINE_PARTS + d - 1 {
        let active: Vec<(usize, usize)> = (0..BASELINE_PARTS)
            .filter_map(|i| {
                phase
                    .checked_sub(i)
                    .filter(|&dim| dim < d)
                    .map(|dim| (i, dim))
            })
            .collect();
        let dims: Vec<usize> = active.iter().map(|&(_, dim)| dim).collect();
        let len = dims
            .iter()
            .map(|&dim| RingMode::Full.rotation_len(shape.extent(dim)))
            .max()
            .unwrap_or(0);
        let start = b.open_phase(phase_label(&dims), PhaseKind::Sweep, &dims, len);
        for (i, dim) in active {
            let parcels = std::mem::take(&mut parts[i]);
            parts[i] = sweep(&mut b, parcels, dim, RingMode::Full, start);
        }
    }
    b.finish(Some(Algorithm::Baseline), layout)
}

/// Bidirectional half-ring rotations over all dimensions at once. Part `i`
/// sweeps dimension `(i + p) mod D` in phase `p`.
pub(crate) fn half_ring(shape: &TorusShape, block_len: usize) -> Schedule {
    rotated(shape, block_len, None)
}

/// HalfRing that sends parcels whose short route crosses a failed link the
/// long way round inside the same phase.
pub(crate) fn folded_ring(
    shape: &TorusShape,
    failures: &LinkFailures,
    block_len: usize,
) -> Result<Schedule> {
    let schedule = rotated(shape, block_len, Some(failures));
    if let Some((step, link)) = schedule.first_failed_link_use(failures) {
        return Err(TorexError::UncoveredFailure {
            algorithm: Algorithm::FoldedRing,
            reason: format!(
                "step {step} still crosses failed link {link}; both ways round its ring are cut"
            ),
        });
    }
    Ok(schedule)
}

fn rotated(shape: &TorusShape, block_len: usize, fold: Option<&LinkFailures>) -> Schedule {
    let d = shape.ndims();
    let layout = Layout::AllToAll { block_len };
    let mut parts = split_parts(layout.segments(shape.world_size()), d);
    let all: Vec<usize> = (0..d).collect();
    let label = phase_label(&all);
    let folded_dims = fold
        .map(|f| failed_dims(shape, f))
        .unwrap_or_else(|| vec![false; d]);
    let len = (0..d)
        .map(|dim| {
            let mode = if folded_dims[dim] {
                RingMode::Full
            } else {
                RingMode::Half
            };
            mode.rotation_len(shape.extent(dim))
        })
        .max()
        .unwrap_or(0);

    let mut b = ScheduleBuilder::new(shape);
    for phase in 0..d {
        let start = b.open_phase(label.clone(), PhaseKind::Sweep, &all, len);
        for (i, part) in parts.iter_mut().enumerate() {
            let dim = (i + phase) % d;
            let mut moved = Vec::with_capacity(part.len());
            for parcel in std::mem::take(part) {
                for (mut piece, mut leg) in legs(shape, parcel, dim, RingMode::Half) {
                    if let Some(f) = fold
                        && leg.crossing(shape, &piece, f).is_some()
                    {
                        leg = leg.reversed(shape.extent(dim));
                    }
                    travel(&mut b, &mut piece, leg, start);
                    moved.push(piece);
                }
            }
            *part = moved;
        }
    }
    let algorithm = if fold.is_some() {
        Algorithm::FoldedRing
    } else {
        Algorithm::HalfRing
    };
    b.finish(Some(algorithm), layout)
}
