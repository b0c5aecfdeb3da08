//! Pipelined relay around a failed link.
//!
//! Rank 0 cannot reach rank 1 directly, so the payload goes 0 → 4 → 5 → 1,
//! cut into three sub-chunks that occupy different hops in the same round.
//!
//! ```bash
//! cargo run --example relay
//! ```

use std::sync::Arc;

use torex::{LinkFailures, LocalMesh, RelaySchedule, TorusComm, TorusShape};

#[tokio::main]
async fn main() -> torex::Result<()> {
    let shape: TorusShape = "4x4".parse()?;
    let failures: LinkFailures = "0-1".parse()?;
    let chain = [0u32, 4, 5, 1];
    let payload: Vec<u8> = (0..30).collect();

    let table = RelaySchedule::new(chain.len() - 1, 3);
    for (round, active) in table.rounds().iter().enumerate() {
        println!("round {round}: (sub-chunk, hop) = {active:?}");
    }

    let mut handles = Vec::new();
    for transport in LocalMesh::torus(&shape, &failures) {
        let comm = TorusComm::new(Arc::new(transport), shape.clone(), failures.clone())?;
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            let data = if comm.rank() == chain[0] { payload } else { Vec::new() };
            comm.relay(&chain, 30, &data).await
        }));
    }
    for h in handles {
        if let Some(bytes) = h.await.expect("rank task panicked")? {
            println!("rank {} received {} bytes", chain[3], bytes.len());
        }
    }
    Ok(())
}
