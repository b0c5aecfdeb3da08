//! Replays a [`Schedule`] on one rank over a [`Transport`].

use std::future::Future;
use std::time::Duration;

use futures::future::{try_join, try_join_all};
use tracing::trace;

use crate::error::{Result, TorexError};
use crate::schedule::{Layout, PeerBatch, PieceMap, Schedule, Source, Step};
use crate::transport::{Transport, CONTROL_TAG_BIT};
use crate::types::Rank;

/// Pack `(epoch, step)` into a message tag. The control bit stays clear.
pub(crate) fn step_tag(epoch: u64, step: usize) -> u64 {
    ((epoch << 32) | (step as u64 & 0xFFFF_FFFF)) & !CONTROL_TAG_BIT
}

async fn bounded<T>(
    fut: impl Future<Output = Result<T>>,
    timeout: Option<Duration>,
    operation: &'static str,
) -> Result<T> {
    match timeout {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TorexError::Timeout {
                operation,
                timeout_ms: limit.as_millis() as u64,
            })?,
    }
}

fn step_failed(step: usize, peer: Rank) -> impl FnOnce(TorexError) -> TorexError {
    move |e| match e {
        e @ (TorexError::Timeout { .. }
        | TorexError::BufferSizeMismatch { .. }
        | TorexError::LinkDown { .. }) => e,
        other => TorexError::StepFailed {
            step,
            peer,
            reason: other.to_string(),
        },
    }
}

/// Run every step of `schedule` for this rank, reading from `input` and
/// writing the delivered blocks to `output`.
pub(crate) async fn execute(
    transport: &dyn Transport,
    schedule: &Schedule,
    epoch: u64,
    input: &[u8],
    output: &mut [u8],
    step_timeout: Option<Duration>,
) -> Result<()> {
    let rank = transport.rank();
    let world = transport.world_size();
    let layout = schedule.layout();
    let (want_in, want_out) = (layout.input_len(rank, world), layout.output_len(rank, world));
    if input.len() != want_in {
        return Err(TorexError::BufferSizeMismatch {
            expected: want_in,
            actual: input.len(),
        });
    }
    if output.len() != want_out {
        return Err(TorexError::BufferSizeMismatch {
            expected: want_out,
            actual: output.len(),
        });
    }

    let mut staging: PieceMap<Vec<u8>> = PieceMap::new();
    for (idx, step) in schedule.steps().iter().enumerate() {
        run_step(
            transport,
            layout,
            step,
            idx,
            step_tag(epoch, idx),
            input,
            &mut staging,
            step_timeout,
        )
        .await?;
    }

    if let Layout::AllToAll { block_len } = layout {
        let own = rank as usize * block_len..(rank as usize + 1) * block_len;
        output[own.clone()].copy_from_slice(&input[own]);
    }

    let mut delivered = 0;
    for (seg, bytes) in staging.drain() {
        if seg.dst != rank {
            return Err(TorexError::schedule(format!(
                "segment {seg} stranded at rank {rank}"
            )));
        }
        let off = layout.output_offset(&seg);
        output[off..off + bytes.len()].copy_from_slice(&bytes);
        delivered += bytes.len();
    }
    let expected = layout.expected_delivery(rank, world);
    if delivered != expected {
        return Err(TorexError::schedule(format!(
            "rank {rank} received {delivered} bytes, expected {expected}"
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_step(
    transport: &dyn Transport,
    layout: Layout,
    step: &Step,
    idx: usize,
    tag: u64,
    input: &[u8],
    staging: &mut PieceMap<Vec<u8>>,
    timeout: Option<Duration>,
) -> Result<()> {
    let rank = transport.rank();
    let outgoing = step.outgoing(rank);
    let incoming = step.incoming(rank);
    if outgoing.is_empty() && incoming.is_empty() {
        return Ok(());
    }

    // Assemble every outgoing message before anything from this step lands,
    // so bytes received now are only forwarded in a later step.
    let mut messages = Vec::with_capacity(outgoing.len());
    for batch in &outgoing {
        let mut buf = Vec::with_capacity(batch.bytes());
        for t in &batch.transfers {
            match t.source {
                Source::Input => {
                    let off = layout.input_offset(&t.segment);
                    buf.extend_from_slice(&input[off..off + t.segment.len()]);
                }
                Source::Staged => buf.extend_from_slice(&staging.take(&t.segment)?),
            }
        }
        messages.push((batch.peer, buf));
    }
    trace!(
        rank,
        step = idx,
        sends = messages.len(),
        recvs = incoming.len(),
        "transfer step"
    );

    let mut inbound: Vec<Vec<u8>> = incoming.iter().map(|b| vec![0u8; b.bytes()]).collect();
    TransferStep {
        index: idx,
        tag,
        sends: messages.iter().map(|(peer, data)| (*peer, data.as_slice())).collect(),
        recvs: incoming
            .iter()
            .zip(inbound.iter_mut())
            .map(|(batch, buf)| (batch.peer, buf.as_mut_slice()))
            .collect(),
    }
    .run(transport, timeout)
    .await?;

    for (batch, data) in incoming.iter().zip(inbound) {
        scatter(batch, data, staging)?;
    }
    Ok(())
}

/// One synchronous round of point-to-point exchanges.
///
/// Every send and every receive is issued before any of them is awaited,
/// so two ranks exchanging in both directions cannot deadlock. On success
/// every receive slice is fully written; on failure the caller must treat
/// the whole step as lost.
pub struct TransferStep<'a> {
    pub index: usize,
    pub tag: u64,
    pub sends: Vec<(Rank, &'a [u8])>,
    /// Each received message must fill its slice exactly.
    pub recvs: Vec<(Rank, &'a mut [u8])>,
}

impl TransferStep<'_> {
    pub async fn run(self, transport: &dyn Transport, timeout: Option<Duration>) -> Result<()> {
        let (index, tag) = (self.index, self.tag);
        let sends = self.sends.into_iter().map(|(peer, data)| async move {
            bounded(transport.send(peer, tag, data), timeout, "step send")
                .await
                .map_err(step_failed(index, peer))
        });
        let recvs = self.recvs.into_iter().map(|(peer, buf)| async move {
            let data = bounded(transport.recv(peer, tag), timeout, "step recv")
                .await
                .map_err(step_failed(index, peer))?;
            if data.len() != buf.len() {
                return Err(TorexError::BufferSizeMismatch {
                    expected: buf.len(),
                    actual: data.len(),
                });
            }
            buf.copy_from_slice(&data);
            Ok(())
        });
        try_join(try_join_all(sends), try_join_all(recvs)).await?;
        Ok(())
    }
}

/// Cut a received message back into its segments and stage them.
fn scatter(batch: &PeerBatch<'_>, mut data: Vec<u8>, staging: &mut PieceMap<Vec<u8>>) -> Result<()> {
    for t in &batch.transfers {
        let rest = data.split_off(t.segment.len());
        staging.insert(&t.segment, data)?;
        data = rest;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_tag_layout() {
        assert_eq!(step_tag(0, 0), 0);
        assert_eq!(step_tag(1, 5), (1 << 32) | 5);
        assert_eq!(step_tag(u64::MAX, 0) & CONTROL_TAG_BIT, 0);
        assert_ne!(step_tag(2, 0), step_tag(1, 0));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let never = std::future::pending::<Result<()>>();
        let err = bounded(never, Some(Duration::from_millis(5)), "step recv")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TorexError::Timeout {
                operation: "step recv",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_transfer_step_both_directions() {
        let mesh = crate::transport::LocalMesh::new(2);
        let (a, b) = (&mesh[0], &mesh[1]);
        let (mut got_a, mut got_b) = ([0u8; 3], [0u8; 2]);
        let step_a = TransferStep {
            index: 0,
            tag: 9,
            sends: vec![(1, &[1u8, 2][..])],
            recvs: vec![(1, &mut got_a[..])],
        };
        let step_b = TransferStep {
            index: 0,
            tag: 9,
            sends: vec![(0, &[7u8, 8, 9][..])],
            recvs: vec![(0, &mut got_b[..])],
        };
        try_join(step_a.run(a, None), step_b.run(b, None))
            .await
            .unwrap();
        assert_eq!(got_a, [7, 8, 9]);
        assert_eq!(got_b, [1, 2]);
    }

    #[tokio::test]
    async fn test_transfer_step_size_mismatch() {
        let mesh = crate::transport::LocalMesh::new(2);
        mesh[1].send(0, 4, &[1, 2, 3]).await.unwrap();
        let mut buf = [0u8; 2];
        let step = TransferStep {
            index: 0,
            tag: 4,
            sends: Vec::new(),
            recvs: vec![(1, &mut buf[..])],
        };
        assert!(matches!(
            step.run(&mesh[0], None).await,
            Err(TorexError::BufferSizeMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_step_failed_keeps_timeouts() {
        let wrap = step_failed(3, 1);
        let e = wrap(TorexError::Timeout {
            operation: "step send",
            timeout_ms: 5,
        });
        assert!(matches!(e, TorexError::Timeout { .. }));
        let e = step_failed(3, 1)(TorexError::PeerDisconnected { rank: 1 });
        assert!(matches!(e, TorexError::StepFailed { step: 3, peer: 1, .. }));
    }
}
