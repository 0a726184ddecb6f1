//! Communication group formation for the ring × Ulysses mesh.
//!
//! Groups are derived arithmetically from the topology: every rank computes
//! the exact same membership from `(global_rank, R, U)` with no handshake,
//! so there is no startup race to discover peers. There are exactly `U`
//! ring groups (one per Ulysses coordinate, spanning the ring axis) and `R`
//! Ulysses groups (one per ring coordinate, spanning the Ulysses axis);
//! each rank belongs to exactly one of each.
//!
//! Member order is load-bearing. The ring axis performs a directional
//! hand-off of key/value shards between neighbors, so ring-group order must
//! equal ring position; the Ulysses axis performs an all-to-all exchange of
//! query/key/value shards, ordered by Ulysses position.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::communicator::DeviceCommunicator;
use super::error::{DistributedError, Result};
use super::topology::ParallelTopology;

/// Which mesh axis a group spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAxis {
    /// Spans the ring-attention axis; members hand K/V shards to the next
    /// ring neighbor each rotation step.
    Ring,
    /// Spans the Ulysses sequence-parallel axis; members exchange Q/K/V
    /// shards via all-to-all so each worker attends over the full sequence.
    Ulysses,
}

/// An ordered set of global ranks that communicate collectively.
///
/// Identified by its axis and the fixed coordinate on the other axis.
/// Created once at startup and immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommGroup {
    axis: GroupAxis,
    fixed_coord: usize,
    ranks: Vec<usize>,
}

impl CommGroup {
    pub fn axis(&self) -> GroupAxis {
        self.axis
    }

    /// The coordinate on the orthogonal axis shared by all members.
    pub fn fixed_coord(&self) -> usize {
        self.fixed_coord
    }

    /// Member ranks ordered by their position on the group's axis.
    pub fn ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn size(&self) -> usize {
        self.ranks.len()
    }

    pub fn contains(&self, global_rank: usize) -> bool {
        self.ranks.contains(&global_rank)
    }

    /// Axis position of a member, or `None` for non-members.
    pub fn position(&self, global_rank: usize) -> Option<usize> {
        self.ranks.iter().position(|&r| r == global_rank)
    }

    /// Previous and next ranks on the directed cycle through the group.
    ///
    /// Only meaningful for ring groups, where the hand-off rotates
    /// `position -> position + 1 (mod size)`. Returns `None` for
    /// non-members. A singleton group is its own neighbor (no-op ring).
    pub fn neighbors(&self, global_rank: usize) -> Option<(usize, usize)> {
        let pos = self.position(global_rank)?;
        let n = self.ranks.len();
        let prev = self.ranks[(pos + n - 1) % n];
        let next = self.ranks[(pos + 1) % n];
        Some((prev, next))
    }
}

/// Which K/V shard a ring member holds at a given rotation step.
///
/// Shard `s` starts on ring position `s` and moves one position forward per
/// step, so after `step` rotations position `p` holds shard
/// `(p + R - step mod R) % R`. Every member must advance through the same
/// schedule in lock-step; a skewed rotation produces silently wrong
/// attention output, not a crash.
pub fn ring_shard_at_step(ring_rank: usize, ring_degree: usize, step: usize) -> usize {
    debug_assert!(ring_degree > 0);
    debug_assert!(ring_rank < ring_degree);
    (ring_rank + ring_degree - step % ring_degree) % ring_degree
}

/// All communication groups for one mesh, derived once at startup.
#[derive(Debug, Clone)]
pub struct CommGroupRegistry {
    topology: ParallelTopology,
    /// Indexed by Ulysses coordinate.
    ring_groups: Vec<CommGroup>,
    /// Indexed by ring coordinate.
    ulysses_groups: Vec<CommGroup>,
}

impl CommGroupRegistry {
    /// Derive every group from the validated topology.
    ///
    /// Infallible: divisibility was already enforced when the topology was
    /// constructed, and membership is pure rank arithmetic.
    pub fn build(topology: &ParallelTopology) -> Self {
        let r = topology.ring_degree();
        let u = topology.ulysses_degree();

        let ring_groups = (0..u)
            .map(|ulysses_rank| CommGroup {
                axis: GroupAxis::Ring,
                fixed_coord: ulysses_rank,
                ranks: (0..r)
                    .map(|ring_rank| topology.global_rank(ring_rank, ulysses_rank))
                    .collect(),
            })
            .collect();

        let ulysses_groups = (0..r)
            .map(|ring_rank| CommGroup {
                axis: GroupAxis::Ulysses,
                fixed_coord: ring_rank,
                ranks: (0..u)
                    .map(|ulysses_rank| topology.global_rank(ring_rank, ulysses_rank))
                    .collect(),
            })
            .collect();

        tracing::debug!(
            world_size = topology.world_size(),
            ring_degree = r,
            ulysses_degree = u,
            "derived communication groups"
        );

        Self {
            topology: *topology,
            ring_groups,
            ulysses_groups,
        }
    }

    pub fn topology(&self) -> &ParallelTopology {
        &self.topology
    }

    /// The ring group this rank belongs to.
    pub fn ring_group(&self, global_rank: usize) -> Result<&CommGroup> {
        let coord = self.topology.coordinate(global_rank, 0)?;
        Ok(&self.ring_groups[coord.ulysses_rank])
    }

    /// The Ulysses group this rank belongs to.
    pub fn ulysses_group(&self, global_rank: usize) -> Result<&CommGroup> {
        let coord = self.topology.coordinate(global_rank, 0)?;
        Ok(&self.ulysses_groups[coord.ring_rank])
    }

    /// All ring groups, indexed by Ulysses coordinate.
    pub fn ring_groups(&self) -> &[CommGroup] {
        &self.ring_groups
    }

    /// All Ulysses groups, indexed by ring coordinate.
    pub fn ulysses_groups(&self) -> &[CommGroup] {
        &self.ulysses_groups
    }

    /// Collective join: rendezvous with every peer before the groups are used.
    ///
    /// All `world_size` processes must call this before any group collective;
    /// a missing peer would otherwise block its partners forever. The barrier
    /// runs on a helper thread so the bounded wait turns a hang into a
    /// diagnosable [`DistributedError::CollectiveTimeout`]. The run cannot be
    /// salvaged locally after a timeout; the operator restarts all workers.
    pub fn join(&self, comm: Arc<dyn DeviceCommunicator>, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(comm.barrier());
        });

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(_) => Err(DistributedError::CollectiveTimeout {
                waited_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }
}
