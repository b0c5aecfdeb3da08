use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Barrier;

use super::inbox::Inbox;
use super::Transport;
use crate::error::{Result, TorexError};
use crate::topology::{Link, LinkFailures, TorusShape};
use crate::types::Rank;

/// Link policy enforced by a guarded mesh.
struct LinkGuard {
    shape: TorusShape,
    failures: LinkFailures,
}

struct Shared {
    world_size: u32,
    inboxes: Vec<Inbox>,
    barrier: Barrier,
    guard: Option<LinkGuard>,
}

/// Builder for in-process meshes: one [`LocalTransport`] per rank, all
/// sharing tokio-backed mailboxes. Used by tests and the benchmark driver.
pub struct LocalMesh;

impl LocalMesh {
    /// Fully connected mesh: any rank may message any other.
    pub fn new(world_size: u32) -> Vec<LocalTransport> {
        Self::build(world_size, None)
    }

    /// Mesh that only carries messages between torus neighbours and refuses
    /// to use the declared failed links.
    pub fn torus(shape: &TorusShape, failures: &LinkFailures) -> Vec<LocalTransport> {
        Self::build(
            shape.world_size(),
            Some(LinkGuard {
                shape: shape.clone(),
                failures: failures.clone(),
            }),
        )
    }

    fn build(world_size: u32, guard: Option<LinkGuard>) -> Vec<LocalTransport> {
        let shared = Arc::new(Shared {
            world_size,
            inboxes: (0..world_size).map(|_| Inbox::default()).collect(),
            barrier: Barrier::new(world_size as usize),
            guard,
        });
        (0..world_size)
            .map(|rank| LocalTransport {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One rank's handle on a [`LocalMesh`].
pub struct LocalTransport {
    rank: Rank,
    shared: Arc<Shared>,
}

impl LocalTransport {
    fn check_send(&self, dest: Rank) -> Result<()> {
        if dest >= self.shared.world_size {
            return Err(TorexError::InvalidRank {
                rank: dest,
                world_size: self.shared.world_size,
            });
        }
        if let Some(guard) = &self.shared.guard {
            if guard.shape.adjacency(self.rank, dest).is_none() {
                return Err(TorexError::NotAdjacent {
                    a: self.rank,
                    b: dest,
                });
            }
            if guard.failures.is_failed(self.rank, dest) {
                return Err(TorexError::LinkDown {
                    link: Link::new(self.rank, dest),
                });
            }
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.shared.world_size
    }

    fn send<'a>(&'a self, dest: Rank, tag: u64, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_send(dest)?;
            self.shared.inboxes[dest as usize].deliver(self.rank, tag, data.to_vec())
        })
    }

    fn recv(&self, src: Rank, tag: u64) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            if src >= self.shared.world_size {
                return Err(TorexError::InvalidRank {
                    rank: src,
                    world_size: self.shared.world_size,
                });
            }
            self.shared.inboxes[self.rank as usize].take(src, tag).await
        })
    }

    fn barrier(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.shared.barrier.wait().await;
            Ok(())
        })
    }
}
