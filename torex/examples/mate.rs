//! MATE All-to-All on a 4×4 torus with the link between ranks 0 and 1 down.
//!
//! Every rank fills block `d` of its buffer with `rank * 16 + d`. After the
//! exchange, rank `r` holds `s * 16 + r` in block `s`: the same permutation a
//! healthy torus would produce, though no byte crossed link 0-1.
//!
//! ```bash
//! RUST_LOG=torex=debug cargo run --example mate
//! ```

use std::sync::Arc;

use torex::{Algorithm, LinkFailures, LocalMesh, TorusComm, TorusShape};

#[tokio::main]
async fn main() -> torex::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let shape: TorusShape = "4x4".parse()?;
    let failures: LinkFailures = "0-1".parse()?;
    let block_len = 4usize;

    let mut handles = Vec::new();
    for transport in LocalMesh::torus(&shape, &failures) {
        let comm = TorusComm::new(Arc::new(transport), shape.clone(), failures.clone())?;
        handles.push(tokio::spawn(async move {
            let rank = comm.rank();
            let world = comm.world_size();
            let input: Vec<u8> = (0..world)
                .flat_map(|d| std::iter::repeat_n((rank * world + d) as u8, block_len))
                .collect();
            let output = comm.run(Algorithm::Mate, &input).await?;
            let steps = comm.schedule(Algorithm::Mate, block_len)?.step_count();
            torex::Result::Ok((rank, steps, output))
        }));
    }

    for h in handles {
        let (rank, steps, output) = h.await.expect("rank task panicked")?;
        let firsts: Vec<u8> = output.chunks(block_len).map(|c| c[0]).collect();
        println!("rank {rank:2} ({steps} steps): {firsts:?}");
    }
    // rank  0 (16 steps): [0, 16, 32, 48, ...]
    // rank  1 (16 steps): [1, 17, 33, 49, ...]

    Ok(())
}
