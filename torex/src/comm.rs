use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::collective::{self, executor};
use crate::config::TorexConfig;
use crate::error::{Result, TorexError};
use crate::schedule::Schedule;
use crate::topology::{Link, LinkFailures, TorusShape};
use crate::transport::Transport;
use crate::types::{Algorithm, Rank};

type PlanCache = Mutex<HashMap<(Algorithm, usize), Arc<Schedule>>>;

/// A rank's view of the torus: its transport, the topology, and the links
/// declared failed for the communicator's lifetime.
///
/// Every collective call on a communicator is collective: all ranks must
/// make the same calls in the same order with the same arguments.
pub struct TorusComm {
    transport: Arc<dyn Transport>,
    shape: TorusShape,
    failures: LinkFailures,
    config: TorexConfig,
    /// Per-call counter mixed into message tags.
    epoch: AtomicU64,
    plans: PlanCache,
}

impl TorusComm {
    pub fn new(
        transport: Arc<dyn Transport>,
        shape: TorusShape,
        failures: LinkFailures,
    ) -> Result<Self> {
        Self::with_config(transport, shape, failures, TorexConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        shape: TorusShape,
        failures: LinkFailures,
        config: TorexConfig,
    ) -> Result<Self> {
        if transport.world_size() != shape.world_size() {
            return Err(TorexError::WorldSizeMismatch {
                transport: transport.world_size(),
                torus: shape.world_size(),
            });
        }
        shape.check_rank(transport.rank())?;
        failures.validate(&shape)?;
        info!(
            rank = transport.rank(),
            %shape,
            %failures,
            "torus communicator ready"
        );
        Ok(Self {
            transport,
            shape,
            failures,
            config,
            epoch: AtomicU64::new(0),
            plans: Mutex::new(HashMap::new()),
        })
    }

    pub fn rank(&self) -> Rank {
        self.transport.rank()
    }

    pub fn world_size(&self) -> u32 {
        self.shape.world_size()
    }

    pub fn shape(&self) -> &TorusShape {
        &self.shape
    }

    pub fn failures(&self) -> &LinkFailures {
        &self.failures
    }

    pub fn config(&self) -> &TorexConfig {
        &self.config
    }

    /// This rank's neighbours, `[pred_0, succ_0, pred_1, succ_1, ...]`.
    pub fn neighbors(&self) -> Result<Vec<Rank>> {
        self.shape.neighbors(self.rank())
    }

    /// This rank's neighbours, predecessors first: `[left, up, right, down]` in 2D.
    pub fn neighbors_grouped(&self) -> Result<Vec<Rank>> {
        self.shape.neighbors_grouped(self.rank())
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// The schedule `algorithm` follows for blocks of `block_len` bytes.
    /// Built on first use and cached.
    pub fn schedule(&self, algorithm: Algorithm, block_len: usize) -> Result<Arc<Schedule>> {
        let key = (algorithm, block_len);
        if let Some(plan) = self
            .plans
            .lock()
            .map_err(|_| TorexError::LockPoisoned("plan cache"))?
            .get(&key)
        {
            return Ok(Arc::clone(plan));
        }

        let plan = collective::plan(algorithm, &self.shape, &self.failures, block_len)?;
        if self.config.verify_schedules {
            plan.verify(&self.failures)?;
        }
        debug!(
            %algorithm,
            block_len,
            steps = plan.step_count(),
            phases = ?plan.phase_labels(),
            "built schedule"
        );
        let plan = Arc::new(plan);
        self.plans
            .lock()
            .map_err(|_| TorexError::LockPoisoned("plan cache"))?
            .insert(key, Arc::clone(&plan));
        Ok(plan)
    }

    /// All-to-All: block `d` of `input` goes to rank `d`; the returned buffer
    /// holds the block from rank `s` at position `s`.
    pub async fn run(&self, algorithm: Algorithm, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = vec![0u8; input.len()];
        self.run_into(algorithm, input, &mut output).await?;
        Ok(output)
    }

    /// All-to-All into a caller-provided buffer of the same length as `input`.
    pub async fn run_into(
        &self,
        algorithm: Algorithm,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<()> {
        let world = self.world_size() as usize;
        if input.len() % world != 0 {
            return Err(TorexError::IndivisibleBuffer {
                len: input.len(),
                parts: world,
            });
        }
        if output.len() != input.len() {
            return Err(TorexError::BufferSizeMismatch {
                expected: input.len(),
                actual: output.len(),
            });
        }
        let block_len = input.len() / world;
        let plan = self.schedule(algorithm, block_len)?;
        let epoch = self.next_epoch();
        debug!(rank = self.rank(), %algorithm, block_len, epoch, "all-to-all");
        executor::execute(
            &*self.transport,
            &plan,
            epoch,
            input,
            output,
            self.config.step_timeout,
        )
        .await
    }

    /// Pipelined relay of `len` bytes from `chain[0]` to the last rank of
    /// `chain`, hop by hop between neighbours.
    ///
    /// Every rank calls this with the same `chain` and `len`; only the first
    /// rank's `payload` is read (others pass an empty slice). The last rank
    /// gets `Some(bytes)`, every other rank `None`.
    pub async fn relay(&self, chain: &[Rank], len: usize, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(link) = chain
            .windows(2)
            .map(|w| Link::new(w[0], w[1]))
            .find(|&l| self.failures.contains(l))
        {
            return Err(TorexError::LinkDown { link });
        }
        let plan = collective::plan_relay(&self.shape, chain, len)?;
        let rank = self.rank();
        let world = self.world_size();
        let input: &[u8] = if chain.first() == Some(&rank) { payload } else { &[] };
        let mut output = vec![0u8; plan.layout().output_len(rank, world)];
        let epoch = self.next_epoch();
        debug!(rank, ?chain, len, epoch, "relay");
        executor::execute(
            &*self.transport,
            &plan,
            epoch,
            input,
            &mut output,
            self.config.step_timeout,
        )
        .await?;
        Ok((chain.last() == Some(&rank)).then_some(output))
    }

    pub async fn barrier(&self) -> Result<()> {
        self.transport.barrier().await
    }
}
