//! Point-to-point messaging between ranks.

mod inbox;
mod local;
mod tcp;

pub use local::{LocalMesh, LocalTransport};
pub use tcp::TcpTransport;

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::Rank;

/// Tag bit reserved for transport-internal traffic such as barriers.
/// Collective tags never set it.
pub const CONTROL_TAG_BIT: u64 = 1 << 63;

/// Tagged point-to-point messaging between the ranks of one job.
///
/// `send` and `recv` return futures; creating several and awaiting them
/// together is the non-blocking send/receive/wait-all pattern the transfer
/// executor relies on. Messages with the same `(source, tag)` arrive in the
/// order they were sent.
pub trait Transport: Send + Sync {
    fn rank(&self) -> Rank;

    fn world_size(&self) -> u32;

    /// Send `data` to `dest` under `tag`.
    fn send<'a>(&'a self, dest: Rank, tag: u64, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Receive the next message from `src` under `tag`.
    fn recv(&self, src: Rank, tag: u64) -> BoxFuture<'_, Result<Vec<u8>>>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> BoxFuture<'_, Result<()>>;
}
