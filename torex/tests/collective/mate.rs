use torex::{Algorithm, PhaseKind, TorexError};

use super::helpers::{expected_output, pattern_input, run_collective};

async fn check_mate(shape: &'static str, failures: &'static str, block_len: usize) {
    run_collective(shape, failures, move |comm| async move {
        let rank = comm.rank();
        let world = comm.world_size();
        let input = pattern_input(rank, world, block_len);
        let output = comm.run(Algorithm::Mate, &input).await.unwrap();
        assert_eq!(
            output,
            expected_output(rank, world, block_len),
            "rank {rank}: mate on {shape} with failed links {failures}"
        );
    })
    .await;
}

#[tokio::test]
async fn test_mate_4x4_failed_link_0_1() {
    // The guarded mesh refuses any send over 0-1, so success means every
    // byte took a detour.
    check_mate("4x4", "0-1", 64).await;
}

#[tokio::test]
async fn test_mate_4x4_failed_link_odd_blocks() {
    check_mate("4x4", "0-1", 13).await;
}

#[tokio::test]
async fn test_mate_failed_y_link() {
    check_mate("4x4", "6-10", 24).await;
}

#[tokio::test]
async fn test_mate_wraparound_link() {
    check_mate("4x4", "3-0", 16).await;
}

#[tokio::test]
async fn test_mate_two_failures_distinct_rings() {
    check_mate("4x4", "0-1,10-11", 32).await;
}

#[tokio::test]
async fn test_mate_non_square() {
    check_mate("5x3", "1-2", 10).await;
}

#[tokio::test]
async fn test_mate_ring_bypass_only() {
    check_mate("6", "2-3", 11).await;
}

#[tokio::test]
async fn test_mate_without_failures() {
    check_mate("4x4", "", 20).await;
}

#[tokio::test]
async fn test_mate_schedule_layout() {
    let labels = run_collective("4x4", "0-1", |comm| async move {
        let plan = comm.schedule(Algorithm::Mate, 16).unwrap();
        assert_eq!(plan.step_count(), 16);
        let kinds: Vec<PhaseKind> = plan.phases().iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![PhaseKind::Sweep, PhaseKind::Mate, PhaseKind::Sweep, PhaseKind::Mate]
        );
        plan.phase_labels()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    })
    .await;
    assert_eq!(labels[0], vec!["XY", "MATE-XY", "XY", "MATE-XY"]);
}

#[tokio::test]
async fn test_mate_uncovered_failures_fail_before_transfer() {
    let results = run_collective("4x4", "0-1,2-3", |comm| async move {
        comm.run(Algorithm::Mate, &[0u8; 64]).await
    })
    .await;
    for r in results {
        assert!(matches!(
            r,
            Err(TorexError::UncoveredFailure {
                algorithm: Algorithm::Mate,
                ..
            })
        ));
    }
}
