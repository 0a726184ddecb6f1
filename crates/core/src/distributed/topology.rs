//! Rank topology for the ring × Ulysses parallel mesh.
//!
//! The flat set of worker ranks is decomposed into a 2-D coordinate space:
//! the ring-attention axis (slower-varying) and the Ulysses sequence-parallel
//! axis (faster-varying). Every worker derives its own coordinates and the
//! membership of every communication group from `(global_rank, R, U)` alone,
//! with no coordination step, so all ranks agree on the mesh without a
//! discovery protocol.

use serde::{Deserialize, Serialize};

use super::error::{DistributedError, Result};

/// Immutable description of the parallel mesh, validated at construction.
///
/// The primary mesh is `ring_degree × ulysses_degree` and must cover the
/// world exactly. Tensor parallelism is an orthogonal axis replicated per
/// mesh cell; it shards weights, not the rank space, and does not multiply
/// into `world_size` in this design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelTopology {
    world_size: usize,
    ring_degree: usize,
    ulysses_degree: usize,
    tensor_parallel_degree: usize,
}

impl ParallelTopology {
    /// Build a topology, failing fast on an invalid degree combination.
    ///
    /// This is the divisibility gate: `ring_degree * ulysses_degree` must
    /// equal `world_size`, and every degree must be at least 1. Violations
    /// are configuration errors surfaced before any collective call.
    pub fn new(world_size: usize, ring_degree: usize, ulysses_degree: usize) -> Result<Self> {
        Self::with_tensor_parallel(world_size, ring_degree, ulysses_degree, 1)
    }

    /// Build a topology with an explicit tensor-parallel degree.
    pub fn with_tensor_parallel(
        world_size: usize,
        ring_degree: usize,
        ulysses_degree: usize,
        tensor_parallel_degree: usize,
    ) -> Result<Self> {
        if world_size == 0
            || ring_degree == 0
            || ulysses_degree == 0
            || tensor_parallel_degree == 0
            || ring_degree * ulysses_degree != world_size
        {
            return Err(DistributedError::InvalidDegrees {
                world_size,
                ring_degree,
                ulysses_degree,
            });
        }
        Ok(Self {
            world_size,
            ring_degree,
            ulysses_degree,
            tensor_parallel_degree,
        })
    }

    /// Single-process mesh (1 × 1).
    pub fn single_process() -> Self {
        Self {
            world_size: 1,
            ring_degree: 1,
            ulysses_degree: 1,
            tensor_parallel_degree: 1,
        }
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn ring_degree(&self) -> usize {
        self.ring_degree
    }

    pub fn ulysses_degree(&self) -> usize {
        self.ulysses_degree
    }

    pub fn tensor_parallel_degree(&self) -> usize {
        self.tensor_parallel_degree
    }

    /// Whether this is effectively single-process execution.
    pub fn is_single(&self) -> bool {
        self.world_size == 1
    }

    /// Map a global rank to its mesh coordinates.
    ///
    /// Pure and total on `[0, world_size)`; an out-of-range rank is a
    /// configuration error, not a runtime fault. Row-major contract:
    /// `global_rank = ring_rank * U + ulysses_rank`.
    pub fn coordinate(&self, global_rank: usize, local_rank: usize) -> Result<RankCoordinate> {
        if global_rank >= self.world_size {
            return Err(DistributedError::RankOutOfRange {
                rank: global_rank,
                world_size: self.world_size,
            });
        }
        Ok(RankCoordinate {
            global_rank,
            ring_rank: global_rank / self.ulysses_degree,
            ulysses_rank: global_rank % self.ulysses_degree,
            local_rank,
        })
    }

    /// Exact left inverse of [`coordinate`](Self::coordinate).
    ///
    /// # Panics
    /// Panics if either coordinate exceeds its degree; callers only pass
    /// coordinates produced by iterating the mesh.
    pub fn global_rank(&self, ring_rank: usize, ulysses_rank: usize) -> usize {
        assert!(ring_rank < self.ring_degree, "ring_rank out of range");
        assert!(
            ulysses_rank < self.ulysses_degree,
            "ulysses_rank out of range"
        );
        ring_rank * self.ulysses_degree + ulysses_rank
    }
}

/// A worker's position in the mesh, immutable after computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankCoordinate {
    /// Flat rank in `[0, world_size)`.
    pub global_rank: usize,
    /// Position on the ring-attention axis, `[0, R)`.
    pub ring_rank: usize,
    /// Position on the Ulysses sequence-parallel axis, `[0, U)`.
    pub ulysses_rank: usize,
    /// Position within the physical host, used for device binding.
    pub local_rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_divisible_world() {
        assert!(ParallelTopology::new(8, 3, 2).is_err());
        assert!(ParallelTopology::new(8, 2, 2).is_err());
        assert!(ParallelTopology::new(0, 1, 1).is_err());
        assert!(ParallelTopology::new(4, 0, 4).is_err());
    }

    #[test]
    fn accepts_exact_mesh() {
        let topo = ParallelTopology::new(8, 2, 4).unwrap();
        assert_eq!(topo.world_size(), 8);
        assert_eq!(topo.ring_degree(), 2);
        assert_eq!(topo.ulysses_degree(), 4);
        assert_eq!(topo.tensor_parallel_degree(), 1);
    }

    #[test]
    fn tensor_parallel_is_orthogonal() {
        // TP does not multiply into the primary mesh.
        let topo = ParallelTopology::with_tensor_parallel(8, 2, 4, 2).unwrap();
        assert_eq!(topo.world_size(), 8);
        assert_eq!(topo.tensor_parallel_degree(), 2);
    }

    #[test]
    fn worked_example_rank_5() {
        // world=8, R=2, U=4: rank 5 sits at (ring 1, ulysses 1).
        let topo = ParallelTopology::new(8, 2, 4).unwrap();
        let coord = topo.coordinate(5, 5).unwrap();
        assert_eq!(coord.ring_rank, 1);
        assert_eq!(coord.ulysses_rank, 1);
    }

    #[test]
    fn coordinate_rejects_out_of_range_rank() {
        let topo = ParallelTopology::new(4, 2, 2).unwrap();
        assert!(matches!(
            topo.coordinate(4, 0),
            Err(DistributedError::RankOutOfRange { rank: 4, .. })
        ));
    }

    #[test]
    fn round_trip_law_over_whole_meshes() {
        for &(r, u) in &[(1usize, 1usize), (1, 8), (8, 1), (2, 4), (4, 2), (3, 5)] {
            let topo = ParallelTopology::new(r * u, r, u).unwrap();
            for g in 0..r * u {
                let c = topo.coordinate(g, 0).unwrap();
                assert_eq!(topo.global_rank(c.ring_rank, c.ulysses_rank), g);
            }
        }
    }

    #[test]
    fn ring_is_slower_varying_axis() {
        let topo = ParallelTopology::new(6, 2, 3).unwrap();
        // Consecutive global ranks walk the ulysses axis first.
        let c0 = topo.coordinate(0, 0).unwrap();
        let c1 = topo.coordinate(1, 1).unwrap();
        let c3 = topo.coordinate(3, 3).unwrap();
        assert_eq!((c0.ring_rank, c0.ulysses_rank), (0, 0));
        assert_eq!((c1.ring_rank, c1.ulysses_rank), (0, 1));
        assert_eq!((c3.ring_rank, c3.ulysses_rank), (1, 0));
    }

    #[test]
    fn single_process_mesh() {
        let topo = ParallelTopology::single_process();
        assert!(topo.is_single());
        let c = topo.coordinate(0, 0).unwrap();
        assert_eq!(c.global_rank, 0);
        assert_eq!(c.ring_rank, 0);
        assert_eq!(c.ulysses_rank, 0);
    }
}
