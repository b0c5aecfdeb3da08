use std::collections::BTreeMap;

use super::Segment;
use crate::types::Rank;

/// Where the sender finds the bytes of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// The sender's own input buffer; the segment has not moved yet.
    Input,
    /// Bytes the sender received in an earlier step.
    Staged,
}

/// One segment crossing one link in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub from: Rank,
    pub to: Rank,
    pub segment: Segment,
    pub source: Source,
}

/// Transfers exchanged with one peer in one step, in schedule order.
///
/// The sender concatenates the segments in this order and the receiver
/// cuts the message apart in the same order.
#[derive(Debug)]
pub struct PeerBatch<'a> {
    pub peer: Rank,
    pub transfers: Vec<&'a Transfer>,
}

impl PeerBatch<'_> {
    pub fn bytes(&self) -> usize {
        self.transfers.iter().map(|t| t.segment.len()).sum()
    }
}

/// A synchronous round of neighbour exchanges restricted to a set of dimensions.
#[derive(Debug, Clone, Default)]
pub struct Step {
    dims: Vec<usize>,
    transfers: Vec<Transfer>,
}

impl Step {
    /// A step that only uses links along `dim`.
    pub fn along_dim(dim: usize) -> Self {
        Self::along([dim])
    }

    /// A step that may use links along any of `dims`.
    pub fn along(dims: impl IntoIterator<Item = usize>) -> Self {
        let mut dims: Vec<usize> = dims.into_iter().collect();
        dims.sort_unstable();
        dims.dedup();
        Self {
            dims,
            transfers: Vec::new(),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn allows(&self, dim: usize) -> bool {
        self.dims.binary_search(&dim).is_ok()
    }

    pub fn transfers(&self) -> &[Transfer] {
        &self.transfers
    }

    pub fn is_idle(&self) -> bool {
        self.transfers.is_empty()
    }

    pub(crate) fn push(&mut self, transfer: Transfer) {
        self.transfers.push(transfer);
    }

    /// Messages `rank` sends in this step, one per peer.
    pub fn outgoing(&self, rank: Rank) -> Vec<PeerBatch<'_>> {
        group(
            self.transfers
                .iter()
                .filter(|t| t.from == rank)
                .map(|t| (t.to, t)),
        )
    }

    /// Messages `rank` receives in this step, one per peer.
    pub fn incoming(&self, rank: Rank) -> Vec<PeerBatch<'_>> {
        group(
            self.transfers
                .iter()
                .filter(|t| t.to == rank)
                .map(|t| (t.from, t)),
        )
    }

    /// Bytes crossing the directed link `from -> to` in this step.
    pub fn link_bytes(&self, from: Rank, to: Rank) -> usize {
        self.transfers
            .iter()
            .filter(|t| t.from == from && t.to == to)
            .map(|t| t.segment.len())
            .sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.transfers.iter().map(|t| t.segment.len()).sum()
    }
}

fn group<'a>(pairs: impl Iterator<Item = (Rank, &'a Transfer)>) -> Vec<PeerBatch<'a>> {
    let mut by_peer: BTreeMap<Rank, Vec<&'a Transfer>> = BTreeMap::new();
    for (peer, t) in pairs {
        by_peer.entry(peer).or_default().push(t);
    }
    by_peer
        .into_iter()
        .map(|(peer, transfers)| PeerBatch { peer, transfers })
        .collect()
}
