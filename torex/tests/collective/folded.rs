use torex::{Algorithm, TorexError};

use super::helpers::{expected_output, pattern_input, run_collective};

#[tokio::test]
async fn test_folded_ring_routes_around_failure() {
    run_collective("4x4", "0-1", |comm| async move {
        let rank = comm.rank();
        let input = pattern_input(rank, 16, 21);
        let output = comm.run(Algorithm::FoldedRing, &input).await.unwrap();
        assert_eq!(output, expected_output(rank, 16, 21), "rank {rank}");
    })
    .await;
}

#[tokio::test]
async fn test_folded_ring_fault_free_is_half_ring() {
    run_collective("3x3", "", |comm| async move {
        let folded = comm.schedule(Algorithm::FoldedRing, 6).unwrap();
        let half = comm.schedule(Algorithm::HalfRing, 6).unwrap();
        assert_eq!(folded.step_count(), half.step_count());
        assert_eq!(folded.wire_bytes(), half.wire_bytes());
    })
    .await;
}

#[tokio::test]
async fn test_folded_ring_costs_more_steps_than_half_ring() {
    run_collective("4x4", "5-6", |comm| async move {
        let folded = comm.schedule(Algorithm::FoldedRing, 8).unwrap();
        assert_eq!(folded.step_count(), 6);
        assert!(matches!(
            comm.schedule(Algorithm::HalfRing, 8),
            Err(TorexError::FaultyTopology { .. })
        ));
    })
    .await;
}
