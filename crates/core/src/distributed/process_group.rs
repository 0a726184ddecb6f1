//! Process group and per-worker environment discovery.
//!
//! One OS process per worker; the launcher (or an external orchestrator)
//! tells each process who it is through the standard distributed
//! environment variables:
//! - `RANK`: global rank of this process (0..WORLD_SIZE)
//! - `WORLD_SIZE`: total number of worker processes
//! - `LOCAL_RANK`: rank within this host, used for device binding
//! - `MASTER_ADDR` / `MASTER_PORT`: rendezvous address of rank 0

use std::env;

use super::error::{DistributedError, Result};

/// Trait for process group operations.
///
/// The foundation for rank bookkeeping beneath the communicator.
pub trait ProcessGroup: Send + Sync {
    /// Global rank of this process (0..world_size).
    fn rank(&self) -> usize;

    /// Total number of processes in the group.
    fn world_size(&self) -> usize;

    /// Local rank on this host.
    fn local_rank(&self) -> usize;

    /// Whether this is the coordinator (rank 0).
    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }

    /// Whether this is a single-process group.
    fn is_single(&self) -> bool {
        self.world_size() == 1
    }
}

/// In-process group for single-worker execution and tests.
#[derive(Debug, Clone)]
pub struct LocalProcessGroup {
    rank: usize,
    world_size: usize,
}

impl LocalProcessGroup {
    /// Single-worker group.
    pub fn new() -> Self {
        Self {
            rank: 0,
            world_size: 1,
        }
    }

    /// Group with a specific rank/size, for exercising multi-rank logic
    /// inside one process.
    ///
    /// # Panics
    /// Panics if `rank >= world_size`.
    pub fn with_rank(rank: usize, world_size: usize) -> Self {
        assert!(rank < world_size, "rank must be < world_size");
        Self { rank, world_size }
    }
}

impl Default for LocalProcessGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessGroup for LocalProcessGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn local_rank(&self) -> usize {
        self.rank
    }
}

/// Worker identity read from the environment at process start.
#[derive(Debug, Clone)]
pub struct WorkerEnv {
    /// Global rank of this process.
    pub rank: usize,
    /// Total number of processes.
    pub world_size: usize,
    /// Local rank on this host.
    pub local_rank: usize,
    /// Rendezvous address of rank 0.
    pub master_addr: String,
    /// Rendezvous port.
    pub master_port: u16,
}

impl WorkerEnv {
    /// Read the standard distributed environment variables.
    ///
    /// An unset variable falls back to its single-process default; a
    /// variable that is set but unparsable is a configuration error. A
    /// malformed `RANK` silently mapped to 0 would put two workers at the
    /// same mesh coordinate and corrupt group membership, so the run fails
    /// here, before any collective.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let rank = parse_or(&lookup, "RANK", 0)?;
        let world_size = parse_or(&lookup, "WORLD_SIZE", 1)?;
        let local_rank = parse_or(&lookup, "LOCAL_RANK", rank)?;
        let master_addr = lookup("MASTER_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let master_port = parse_or(&lookup, "MASTER_PORT", 29500)?;

        Ok(Self {
            rank,
            world_size,
            local_rank,
            master_addr,
            master_port,
        })
    }

    /// Identity for a single-process run.
    pub fn single_process() -> Self {
        Self {
            rank: 0,
            world_size: 1,
            local_rank: 0,
            master_addr: "127.0.0.1".to_string(),
            master_port: 29500,
        }
    }

    /// Whether this run spans more than one process.
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| DistributedError::InvalidEnvVar { name, value }),
    }
}
