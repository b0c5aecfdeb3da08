use torex::collective::BASELINE_PARTS;
use torex::{Algorithm, LinkFailures, TorexError, TorusShape};

use super::helpers::{expected_output, pattern_input, run_collective};

async fn check_permutation(shape: &'static str, algorithm: Algorithm, block_len: usize) {
    run_collective(shape, "", move |comm| async move {
        let rank = comm.rank();
        let world = comm.world_size();
        let input = pattern_input(rank, world, block_len);
        let output = comm.run(algorithm, &input).await.unwrap();
        assert_eq!(
            output,
            expected_output(rank, world, block_len),
            "rank {rank}: {algorithm} on {shape} with {block_len}-byte blocks"
        );
    })
    .await;
}

// ============================================================================
// Baseline
// ============================================================================

#[test]
fn test_baseline_phase_count_follows_parts() {
    for (shape, dims) in [("4x4", 2), ("3x3x3", 3), ("6", 1)] {
        let shape: TorusShape = shape.parse().unwrap();
        let schedule = torex::plan(Algorithm::Baseline, &shape, &LinkFailures::none(), 6).unwrap();
        assert_eq!(schedule.phases().len(), BASELINE_PARTS + dims - 1, "{shape}");
    }
}

#[tokio::test]
async fn test_baseline_4x4() {
    check_permutation("4x4", Algorithm::Baseline, 48).await;
}

#[tokio::test]
async fn test_baseline_odd_block_len() {
    check_permutation("4x4", Algorithm::Baseline, 7).await;
}

#[tokio::test]
async fn test_baseline_3x3() {
    check_permutation("3x3", Algorithm::Baseline, 12).await;
}

#[tokio::test]
async fn test_baseline_ring() {
    check_permutation("6", Algorithm::Baseline, 5).await;
}

// ============================================================================
// HalfRing
// ============================================================================

#[tokio::test]
async fn test_halfring_4x4() {
    check_permutation("4x4", Algorithm::HalfRing, 64).await;
}

#[tokio::test]
async fn test_halfring_2x4() {
    check_permutation("2x4", Algorithm::HalfRing, 9).await;
}

#[tokio::test]
async fn test_halfring_3d() {
    check_permutation("4x4x2", Algorithm::HalfRing, 6).await;
}

#[tokio::test]
async fn test_halfring_tiny_blocks() {
    // Fewer bytes than parts: most pieces are empty.
    check_permutation("4x4", Algorithm::HalfRing, 1).await;
}

// ============================================================================
// Edge cases
// ============================================================================

#[tokio::test]
async fn test_empty_blocks() {
    for alg in [Algorithm::Baseline, Algorithm::HalfRing, Algorithm::Mate] {
        check_permutation("4x4", alg, 0).await;
    }
}

#[tokio::test]
async fn test_single_rank() {
    run_collective("1", "", |comm| async move {
        let out = comm.run(Algorithm::HalfRing, &[1, 2, 3]).await.unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    })
    .await;
}

#[tokio::test]
async fn test_repeated_calls_reuse_schedule() {
    run_collective("3x3", "", |comm| async move {
        let rank = comm.rank();
        let world = comm.world_size();
        for round in 0..3 {
            for alg in [Algorithm::HalfRing, Algorithm::Baseline] {
                let input = pattern_input(rank, world, 4 + round);
                let out = comm.run(alg, &input).await.unwrap();
                assert_eq!(out, expected_output(rank, world, 4 + round), "round {round}");
            }
        }
        let a = comm.schedule(Algorithm::HalfRing, 4).unwrap();
        let b = comm.schedule(Algorithm::HalfRing, 4).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    })
    .await;
}

#[tokio::test]
async fn test_run_into_caller_buffer() {
    run_collective("2x2", "", |comm| async move {
        let rank = comm.rank();
        let input = pattern_input(rank, 4, 3);
        let mut output = vec![0xAA; 12];
        comm.run_into(Algorithm::Baseline, &input, &mut output)
            .await
            .unwrap();
        assert_eq!(output, expected_output(rank, 4, 3));
    })
    .await;
}

#[tokio::test]
async fn test_indivisible_input_rejected() {
    run_collective("2x2", "", |comm| async move {
        let err = comm.run(Algorithm::HalfRing, &[0u8; 6]).await.unwrap_err();
        assert!(matches!(err, TorexError::IndivisibleBuffer { len: 6, parts: 4 }));
    })
    .await;
}

#[tokio::test]
async fn test_output_length_mismatch() {
    run_collective("2x2", "", |comm| async move {
        let mut out = vec![0u8; 4];
        let err = comm
            .run_into(Algorithm::HalfRing, &[0u8; 8], &mut out)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TorexError::BufferSizeMismatch {
                expected: 8,
                actual: 4
            }
        ));
    })
    .await;
}

#[tokio::test]
async fn test_neighbors_through_comm() {
    let neighbours = run_collective("4x4", "", |comm| async move { comm.neighbors().unwrap() }).await;
    assert_eq!(neighbours[0], vec![3, 1, 12, 4]);
    assert_eq!(neighbours[5], vec![4, 6, 1, 9]);
    let grouped =
        run_collective("4x4", "", |comm| async move { comm.neighbors_grouped().unwrap() }).await;
    assert_eq!(grouped[0], vec![3, 12, 1, 4]);
}
