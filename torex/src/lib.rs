pub mod collective;
mod comm;
pub mod config;
pub mod error;
pub mod schedule;
pub mod topology;
pub mod transport;
pub mod types;

pub use collective::{plan, plan_relay, RelaySchedule, TransferStep};
pub use comm::TorusComm;
pub use config::TorexConfig;
pub use error::{Result, TorexError};
pub use schedule::{Layout, Phase, PhaseKind, Schedule, Segment, Source, Step, Transfer};
pub use topology::{Link, LinkFailures, TorusShape};
pub use transport::{LocalMesh, LocalTransport, TcpTransport, Transport};
pub use types::{dim_name, Algorithm, Direction, Rank, Sign};
