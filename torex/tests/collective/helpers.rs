// Shared by several test binaries; each uses a subset.
#![allow(dead_code)]

use std::sync::Arc;

use torex::{LinkFailures, LocalMesh, Rank, TorexConfig, TorusComm, TorusShape};

/// Helper: run a collective across every rank of `shape` concurrently, over
/// a link-guarded in-process mesh, and return the per-rank results in rank
/// order. Keeps all communicators alive until every task completes.
pub async fn run_collective<F, Fut, T>(shape: &str, failures: &str, f: F) -> Vec<T>
where
    F: Fn(Arc<TorusComm>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    run_collective_with_config(shape, failures, TorexConfig::default(), f).await
}

pub async fn run_collective_with_config<F, Fut, T>(
    shape: &str,
    failures: &str,
    config: TorexConfig,
    f: F,
) -> Vec<T>
where
    F: Fn(Arc<TorusComm>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let shape: TorusShape = shape.parse().unwrap();
    let failures: LinkFailures = failures.parse().unwrap();
    let comms: Vec<Arc<TorusComm>> = LocalMesh::torus(&shape, &failures)
        .into_iter()
        .map(|t| {
            Arc::new(
                TorusComm::with_config(Arc::new(t), shape.clone(), failures.clone(), config.clone())
                    .unwrap(),
            )
        })
        .collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for c in &comms {
        let c = Arc::clone(c);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(c).await }));
    }
    let mut out = Vec::with_capacity(handles.len());
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

/// Byte `i` of the block `src` prepares for `dst`.
pub fn pattern_byte(src: Rank, dst: Rank, i: usize) -> u8 {
    let h = (src as usize)
        .wrapping_mul(131)
        .wrapping_add((dst as usize).wrapping_mul(31))
        .wrapping_add(i.wrapping_mul(7))
        .wrapping_add(i / 256);
    (h % 251) as u8
}

/// Input buffer of `rank`: block `d` holds the pattern for `(rank, d)`.
pub fn pattern_input(rank: Rank, world: u32, block_len: usize) -> Vec<u8> {
    (0..world)
        .flat_map(|dst| (0..block_len).map(move |i| pattern_byte(rank, dst, i)))
        .collect()
}

/// Output buffer `rank` must end up with: block `s` holds `(s, rank)`.
pub fn expected_output(rank: Rank, world: u32, block_len: usize) -> Vec<u8> {
    (0..world)
        .flat_map(|src| (0..block_len).map(move |i| pattern_byte(src, rank, i)))
        .collect()
}
