//! Hand-off boundary to the transformer execution layer.

use crate::distributed::{CommGroup, CommGroupRegistry, DistributedError, RankCoordinate};
use crate::packing::PackedBatch;

/// Everything the distributed forward pass needs from the substrate:
/// the packed token stream with its boundaries, this worker's mesh
/// position, and its two communication groups.
#[derive(Debug, Clone)]
pub struct PipelineInputs<'a> {
    pub packed: PackedBatch,
    pub coordinate: RankCoordinate,
    pub ring_group: &'a CommGroup,
    pub ulysses_group: &'a CommGroup,
}

impl<'a> PipelineInputs<'a> {
    /// Assemble the hand-off for one worker from the registry.
    pub fn assemble(
        registry: &'a CommGroupRegistry,
        coordinate: RankCoordinate,
        packed: PackedBatch,
    ) -> Result<Self, DistributedError> {
        Ok(Self {
            packed,
            coordinate,
            ring_group: registry.ring_group(coordinate.global_rank)?,
            ulysses_group: registry.ulysses_group(coordinate.global_rank)?,
        })
    }
}
