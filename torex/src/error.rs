use crate::topology::Link;
use crate::types::{Algorithm, Rank};

pub type Result<T> = std::result::Result<T, TorexError>;

#[derive(Debug, thiserror::Error)]
pub enum TorexError {
    #[error("invalid torus shape: {0}")]
    InvalidShape(String),

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("ranks {a} and {b} are not torus neighbours")]
    NotAdjacent { a: Rank, b: Rank },

    #[error("invalid link declaration: {0}")]
    InvalidLink(String),

    #[error("transport world size {transport} does not match torus size {torus}")]
    WorldSizeMismatch { transport: u32, torus: u32 },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("link {link} is down")]
    LinkDown { link: Link },

    #[error("transfer step {step} failed with peer {peer}: {reason}")]
    StepFailed {
        step: usize,
        peer: Rank,
        reason: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    #[error("{algorithm} requires a fault-free torus, but link {link} is declared failed")]
    FaultyTopology { algorithm: Algorithm, link: Link },

    #[error("{algorithm} cannot route around the declared failures: {reason}")]
    UncoveredFailure {
        algorithm: Algorithm,
        reason: String,
    },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("buffer of {len} bytes is not divisible into {parts} equal blocks")]
    IndivisibleBuffer { len: usize, parts: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("schedule invariant violated: {0}")]
    Schedule(String),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),
}

impl TorexError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Shorthand for a broken planner/executor invariant.
    pub(crate) fn schedule(msg: impl Into<String>) -> Self {
        Self::Schedule(msg.into())
    }
}
