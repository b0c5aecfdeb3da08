//! Benchmark driver: times each All-to-All variant on an in-process torus
//! and optionally appends per-iteration timings to a CSV file.

mod cli;
mod csv_writer;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use csv_writer::Sample;
use torex::{
    Algorithm, LinkFailures, LocalMesh, TorexConfig, TorexError, TorusComm, TorusShape,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let (shape, failures) = resolve_topology(&cli)?;
    let config = TorexConfig::from_env();
    let comms = build_comms(&shape, &failures, &config)?;
    info!(%shape, %failures, ranks = shape.world_size(), "benchmark torus ready");

    let mut samples = Vec::new();
    for &algorithm in &cli.algorithms {
        for &block_bytes in &cli.block_bytes {
            let times = match time_variant(&comms, algorithm, block_bytes, cli.warmup, cli.repeat)
                .await
            {
                Ok(times) => times,
                Err(e) if cli.skip_unsupported && is_precondition(&e) => {
                    warn!(%algorithm, "skipping: {e}");
                    break;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("{algorithm} with {block_bytes}-byte blocks on {shape}")
                    });
                }
            };

            for (iteration, seconds) in times.iter().enumerate() {
                info!(%algorithm, block_bytes, iteration, seconds, "iteration");
                samples.push(Sample {
                    algorithm: algorithm.to_string(),
                    shape: shape.to_string(),
                    failed_links: failures.to_string(),
                    block_bytes,
                    iteration,
                    seconds: *seconds,
                });
            }
            let avg = times.iter().sum::<f64>() / times.len().max(1) as f64;
            info!(%algorithm, block_bytes, avg_seconds = avg, "average");
        }
    }

    if let Some(path) = &cli.csv {
        csv_writer::append_samples(path, &samples)?;
        info!(path = %path.display(), rows = samples.len(), "wrote timings");
    }
    Ok(())
}

/// Command-line values win, then `TOREX_SHAPE`/`TOREX_FAILED_LINKS`, then a 4x4 torus.
fn resolve_topology(cli: &Cli) -> Result<(TorusShape, LinkFailures)> {
    let from_env = torex::config::topology_from_env().context("reading topology from env")?;
    let (env_shape, env_failures) = match from_env {
        Some((s, f)) => (Some(s), Some(f)),
        None => (None, None),
    };
    let shape = match cli.shape.clone().or(env_shape) {
        Some(s) => s,
        None => TorusShape::new([4, 4])?,
    };
    let failures = cli
        .failed_links
        .clone()
        .or(env_failures)
        .unwrap_or_default();
    Ok((shape, failures))
}

fn build_comms(
    shape: &TorusShape,
    failures: &LinkFailures,
    config: &TorexConfig,
) -> Result<Vec<Arc<TorusComm>>> {
    LocalMesh::torus(shape, failures)
        .into_iter()
        .map(|t| {
            TorusComm::with_config(Arc::new(t), shape.clone(), failures.clone(), config.clone())
                .map(Arc::new)
                .context("building communicator")
        })
        .collect()
}

fn is_precondition(e: &TorexError) -> bool {
    matches!(
        e,
        TorexError::FaultyTopology { .. } | TorexError::UncoveredFailure { .. }
    )
}

/// One warm-up phase, then `repeat` calls bracketed by barriers. Returns
/// rank 0's wall-clock time per call.
async fn time_variant(
    comms: &[Arc<TorusComm>],
    algorithm: Algorithm,
    block_bytes: usize,
    warmup: usize,
    repeat: usize,
) -> torex::Result<Vec<f64>> {
    let mut handles = Vec::with_capacity(comms.len());
    for comm in comms {
        let comm = Arc::clone(comm);
        handles.push(tokio::spawn(async move {
            let world = comm.world_size() as usize;
            let input = vec![comm.rank() as u8; block_bytes * world];
            let mut output = vec![0u8; input.len()];
            for _ in 0..warmup {
                comm.run_into(algorithm, &input, &mut output).await?;
            }
            let mut times = Vec::with_capacity(repeat);
            for _ in 0..repeat {
                comm.barrier().await?;
                let start = Instant::now();
                comm.run_into(algorithm, &input, &mut output).await?;
                comm.barrier().await?;
                times.push(start.elapsed().as_secs_f64());
            }
            torex::Result::Ok(times)
        }));
    }

    let mut rank0 = Vec::new();
    let mut first_err = None;
    for (rank, h) in handles.into_iter().enumerate() {
        match h.await {
            Ok(Ok(times)) if rank == 0 => rank0 = times,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(join) => {
                first_err.get_or_insert(TorexError::transport(format!("rank {rank} task failed: {join}")));
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(rank0),
    }
}
