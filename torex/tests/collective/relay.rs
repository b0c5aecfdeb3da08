use torex::{RelaySchedule, TorexError};

use super::helpers::run_collective;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 17 % 256) as u8).collect()
}

#[tokio::test]
async fn test_relay_four_rank_chain() {
    // 0 -> 4 -> 5 -> 1 detours around the X link 0-1 through row 1.
    let results = run_collective("4x4", "0-1", |comm| async move {
        let data = if comm.rank() == 0 { payload(100) } else { Vec::new() };
        comm.relay(&[0, 4, 5, 1], 100, &data).await.unwrap()
    })
    .await;
    for (rank, got) in results.into_iter().enumerate() {
        if rank == 1 {
            assert_eq!(got, Some(payload(100)));
        } else {
            assert_eq!(got, None, "rank {rank} should not receive");
        }
    }
}

#[tokio::test]
async fn test_relay_long_chain_and_short_payload() {
    // Two bytes over five hops: the third sub-chunk is empty.
    let chain = [0u32, 1, 2, 3, 7, 11];
    let results = run_collective("4x4", "", move |comm| async move {
        let data = if comm.rank() == 0 { vec![9, 8] } else { Vec::new() };
        comm.relay(&chain, 2, &data).await.unwrap()
    })
    .await;
    assert_eq!(results[11], Some(vec![9, 8]));
}

#[tokio::test]
async fn test_relay_over_failed_link_rejected() {
    let results = run_collective("4x4", "0-1", |comm| async move {
        comm.relay(&[4, 0, 1], 8, &[0u8; 8]).await
    })
    .await;
    for r in results {
        assert!(matches!(r, Err(TorexError::LinkDown { .. })));
    }
}

#[tokio::test]
async fn test_relay_non_adjacent_chain_rejected() {
    let results = run_collective("4x4", "", |comm| async move {
        comm.relay(&[0, 5], 4, &[0u8; 4]).await
    })
    .await;
    for r in results {
        assert!(matches!(r, Err(TorexError::NotAdjacent { a: 0, b: 5 })));
    }
}

#[test]
fn test_relay_table_never_doubles_up_a_hop() {
    let table = RelaySchedule::new(3, 3);
    assert_eq!(table.round_count(), 5);
    for round in table.rounds() {
        let mut hops: Vec<usize> = round.iter().map(|&(_, hop)| hop).collect();
        hops.sort_unstable();
        hops.dedup();
        assert_eq!(hops.len(), round.len());
    }
}
