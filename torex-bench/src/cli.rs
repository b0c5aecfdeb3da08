use std::path::PathBuf;

use clap::Parser;
use torex::{Algorithm, LinkFailures, TorusShape};

#[derive(Parser, Debug)]
#[command(name = "torex-bench")]
#[command(about = "Time All-to-All variants on an in-process torus", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Torus shape, e.g. 4x4 or 4x4x2 (falls back to TOREX_SHAPE, then 4x4)
    #[arg(short, long)]
    pub shape: Option<TorusShape>,

    /// Links declared failed, e.g. 0-1,5-6 (falls back to TOREX_FAILED_LINKS)
    #[arg(short, long)]
    pub failed_links: Option<LinkFailures>,

    /// Algorithms to time
    #[arg(short, long, value_delimiter = ',', default_value = "baseline,halfring,mate")]
    pub algorithms: Vec<Algorithm>,

    /// Bytes each rank sends to each destination
    #[arg(short, long, value_delimiter = ',', default_value = "1024,65536")]
    pub block_bytes: Vec<usize>,

    /// Timed iterations per (algorithm, block size)
    #[arg(short, long, default_value = "10")]
    pub repeat: usize,

    /// Untimed iterations before measuring
    #[arg(long, default_value = "1")]
    pub warmup: usize,

    /// Append per-iteration timings to this CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Skip algorithms that cannot run with the declared failures instead of failing
    #[arg(long)]
    pub skip_unsupported: bool,
}
