//! All-to-All planners for the torus, plus the executor that replays them.

pub(crate) mod executor;
mod mate;
mod relay;
mod ring;
mod sequencer;

pub use executor::TransferStep;
pub use mate::LANE_WEIGHTS;
pub use relay::{RelaySchedule, RELAY_SPLITS};
pub use sequencer::BASELINE_PARTS;

use crate::error::{Result, TorexError};
use crate::schedule::Schedule;
use crate::topology::{LinkFailures, TorusShape};
use crate::types::{Algorithm, Rank};

/// Build the All-to-All schedule for `algorithm` with blocks of `block_len` bytes.
///
/// Variants that need a healthy torus fail fast with `FaultyTopology` when
/// any link is declared failed; fault-tolerant variants fail with
/// `UncoveredFailure` when they cannot avoid every failed link.
pub fn plan(
    algorithm: Algorithm,
    shape: &TorusShape,
    failures: &LinkFailures,
    block_len: usize,
) -> Result<Schedule> {
    if !algorithm.tolerates_failures() {
        if let Some(link) = failures.iter().next() {
            return Err(TorexError::FaultyTopology { algorithm, link });
        }
    }
    match algorithm {
        Algorithm::Baseline => Ok(sequencer::baseline(shape, block_len)),
        Algorithm::HalfRing => Ok(sequencer::half_ring(shape, block_len)),
        Algorithm::FoldedRing => sequencer::folded_ring(shape, failures, block_len),
        Algorithm::Mate => mate::plan(shape, failures, block_len),
    }
}

/// Build a standalone pipelined relay of `len` bytes along `chain`.
pub fn plan_relay(shape: &TorusShape, chain: &[Rank], len: usize) -> Result<Schedule> {
    relay::relay_plan(shape, chain, len)
}
