use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{try_join_all, BoxFuture};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::inbox::Inbox;
use super::{Transport, CONTROL_TAG_BIT};
use crate::config::TorexConfig;
use crate::error::{Result, TorexError};
use crate::types::Rank;

/// Pause between attempts to reach a peer that is not listening yet.
const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// One direction-agnostic TCP connection to a peer.
struct PeerLink {
    writer: Mutex<WriteHalf<TcpStream>>,
    /// Background recv task handle.
    recv_handle: JoinHandle<()>,
}

impl PeerLink {
    fn spawn(peer: Rank, stream: TcpStream, inbox: Arc<Inbox>, max_frame: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let recv_handle = tokio::spawn(async move {
            recv_loop(peer, reader, &inbox, max_frame).await;
            inbox.close_peer(peer);
        });
        Self {
            writer: Mutex::new(writer),
            recv_handle,
        }
    }

    /// Write a tagged frame: `[tag: u64 LE][len: u64 LE][payload]`.
    async fn write_frame(&self, tag: u64, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&tag.to_le_bytes())
            .await
            .map_err(|e| TorexError::transport(format!("tcp write tag: {e}")))?;
        writer
            .write_all(&(data.len() as u64).to_le_bytes())
            .await
            .map_err(|e| TorexError::transport(format!("tcp write len: {e}")))?;
        writer
            .write_all(data)
            .await
            .map_err(|e| TorexError::transport(format!("tcp write payload: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| TorexError::transport(format!("tcp flush: {e}")))?;
        Ok(())
    }
}

/// Background loop: read frames from one peer and hand them to the inbox.
async fn recv_loop(peer: Rank, mut reader: ReadHalf<TcpStream>, inbox: &Inbox, max_frame: usize) {
    let mut tag_buf = [0u8; 8];
    let mut len_buf = [0u8; 8];
    loop {
        if let Err(e) = reader.read_exact(&mut tag_buf).await {
            tracing::debug!(peer, "tcp recv loop ended: {e}");
            return;
        }
        if let Err(e) = reader.read_exact(&mut len_buf).await {
            tracing::debug!(peer, "tcp recv loop ended reading len: {e}");
            return;
        }
        let tag = u64::from_le_bytes(tag_buf);
        let len = u64::from_le_bytes(len_buf) as usize;

        if len > max_frame {
            tracing::warn!(peer, len, max_frame, "tcp: frame too large, closing connection");
            return;
        }

        let mut payload = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut payload).await {
            tracing::debug!(peer, "tcp recv loop ended reading payload: {e}");
            return;
        }
        if let Err(e) = inbox.deliver(peer, tag, payload) {
            tracing::warn!(peer, tag, "tcp: dropping frame: {e}");
            return;
        }
    }
}

/// Full TCP mesh between the ranks of one job.
///
/// Every pair of ranks shares one connection: the higher rank dials the
/// lower one and introduces itself with its rank as a `u32 LE` hello.
pub struct TcpTransport {
    rank: Rank,
    world_size: u32,
    links: HashMap<Rank, PeerLink>,
    inbox: Arc<Inbox>,
    barrier_epoch: AtomicU64,
    barrier_timeout: Duration,
}

impl TcpTransport {
    /// Bind `addrs[rank]` and connect to every other address in the list.
    pub async fn connect(rank: Rank, addrs: &[SocketAddr], config: &TorexConfig) -> Result<Self> {
        let addr = addrs.get(rank as usize).ok_or(TorexError::InvalidRank {
            rank,
            world_size: addrs.len() as u32,
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TorexError::transport_with_source(format!("tcp bind {addr}"), e))?;
        Self::from_listener(rank, listener, addrs, config).await
    }

    /// Form the mesh using an already-bound listener for this rank.
    ///
    /// `addrs[rank]` is not dialled; the listener must be reachable at it.
    pub async fn from_listener(
        rank: Rank,
        listener: TcpListener,
        addrs: &[SocketAddr],
        config: &TorexConfig,
    ) -> Result<Self> {
        let world_size = u32::try_from(addrs.len())
            .map_err(|_| TorexError::InvalidConfig("too many peer addresses".into()))?;
        if rank >= world_size {
            return Err(TorexError::InvalidRank { rank, world_size });
        }

        let dials = try_join_all(
            (0..rank).map(|peer| dial(peer, addrs[peer as usize], rank, config.connect_timeout)),
        );
        let accepts = accept_higher(&listener, rank, world_size, config.connect_timeout);
        let (dialed, accepted) = tokio::try_join!(dials, accepts)?;

        let inbox = Arc::new(Inbox::default());
        let links = dialed
            .into_iter()
            .chain(accepted)
            .map(|(peer, stream)| {
                let link = PeerLink::spawn(peer, stream, Arc::clone(&inbox), config.max_frame_bytes);
                (peer, link)
            })
            .collect();
        tracing::info!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            links,
            inbox,
            barrier_epoch: AtomicU64::new(0),
            barrier_timeout: config.barrier_timeout,
        })
    }

    fn link(&self, peer: Rank) -> Result<&PeerLink> {
        self.links.get(&peer).ok_or(TorexError::InvalidRank {
            rank: peer,
            world_size: self.world_size,
        })
    }

    /// Rank 0 collects one arrival per rank, then releases everyone.
    async fn two_phase_barrier(&self) -> Result<()> {
        let epoch = self.barrier_epoch.fetch_add(1, Ordering::Relaxed);
        let tag = CONTROL_TAG_BIT | epoch;
        if self.rank == 0 {
            try_join_all((1..self.world_size).map(|r| self.recv(r, tag))).await?;
            try_join_all((1..self.world_size).map(|r| self.send(r, tag, &[]))).await?;
        } else {
            self.send(0, tag, &[]).await?;
            self.recv(0, tag).await?;
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for link in self.links.values() {
            link.recv_handle.abort();
        }
    }
}

async fn dial(peer: Rank, addr: SocketAddr, me: Rank, timeout: Duration) -> Result<(Rank, TcpStream)> {
    let deadline = Instant::now() + timeout;
    loop {
        match TcpStream::connect(addr).await {
            Ok(mut stream) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| TorexError::transport(format!("tcp set_nodelay: {e}")))?;
                stream
                    .write_all(&me.to_le_bytes())
                    .await
                    .map_err(|e| TorexError::transport(format!("tcp hello to rank {peer}: {e}")))?;
                return Ok((peer, stream));
            }
            Err(e) if Instant::now() < deadline => {
                tracing::trace!(peer, %addr, "tcp connect retry: {e}");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            Err(e) => {
                return Err(TorexError::transport_with_source(
                    format!("tcp connect to rank {peer} at {addr}"),
                    e,
                ));
            }
        }
    }
}

async fn accept_higher(
    listener: &TcpListener,
    me: Rank,
    world_size: u32,
    timeout: Duration,
) -> Result<Vec<(Rank, TcpStream)>> {
    let expected = (world_size - me - 1) as usize;
    let accept_all = async {
        let mut out: Vec<(Rank, TcpStream)> = Vec::with_capacity(expected);
        while out.len() < expected {
            let (mut stream, addr) = listener
                .accept()
                .await
                .map_err(|e| TorexError::transport(format!("tcp accept: {e}")))?;
            stream
                .set_nodelay(true)
                .map_err(|e| TorexError::transport(format!("tcp set_nodelay: {e}")))?;
            let mut hello = [0u8; 4];
            stream
                .read_exact(&mut hello)
                .await
                .map_err(|e| TorexError::transport(format!("tcp hello from {addr}: {e}")))?;
            let peer = Rank::from_le_bytes(hello);
            if peer <= me || peer >= world_size || out.iter().any(|(p, _)| *p == peer) {
                return Err(TorexError::transport(format!(
                    "unexpected hello from rank {peer} at {addr}"
                )));
            }
            out.push((peer, stream));
        }
        Ok::<_, TorexError>(out)
    };
    tokio::time::timeout(timeout, accept_all)
        .await
        .map_err(|_| TorexError::Timeout {
            operation: "tcp accept",
            timeout_ms: timeout.as_millis() as u64,
        })?
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(&'a self, dest: Rank, tag: u64, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if dest == self.rank {
                return self.inbox.deliver(dest, tag, data.to_vec());
            }
            self.link(dest)?.write_frame(tag, data).await
        })
    }

    fn recv(&self, src: Rank, tag: u64) -> BoxFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            if src != self.rank {
                self.link(src)?;
            }
            self.inbox.take(src, tag).await
        })
    }

    fn barrier(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::time::timeout(self.barrier_timeout, self.two_phase_barrier())
                .await
                .map_err(|_| TorexError::Timeout {
                    operation: "barrier",
                    timeout_ms: self.barrier_timeout.as_millis() as u64,
                })?
        })
    }
}
