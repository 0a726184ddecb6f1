//! Device communicator for collective operations on the mesh.
//!
//! The distributed attention layers need three primitives from the
//! substrate: `all_to_all` for the Ulysses Q/K/V exchange, point-to-point
//! `send`/`recv` for the directed ring hand-off of K/V shards, and
//! `all_reduce` for the orthogonal tensor-parallel axis. `barrier` backs
//! the collective group join at startup.

use candle_core::Tensor;

use super::error::{DistributedError, Result};
use super::process_group::ProcessGroup;

/// Reduction operations for collective primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Element-wise sum.
    Sum,
    /// Element-wise maximum.
    Max,
    /// Average (sum / world_size).
    Average,
}

/// Trait for device-to-device communication within one group.
///
/// Implementations back the primitives with a real collective library on
/// multi-device runs, or collapse to identity for a single process.
pub trait DeviceCommunicator: Send + Sync {
    /// The process group this communicator spans.
    fn process_group(&self) -> &dyn ProcessGroup;

    /// All-reduce: apply the reduction across all ranks, result on all ranks.
    fn all_reduce(&self, tensor: &Tensor, op: ReduceOp) -> Result<Tensor>;

    /// All-gather along a dimension.
    ///
    /// Output size along `gather_dim` is `input * group_size`.
    fn all_gather(&self, tensor: &Tensor, gather_dim: usize) -> Result<Tensor>;

    /// All-to-all: the Ulysses exchange.
    ///
    /// The input is split into `group_size` equal chunks along dimension 0;
    /// chunk `i` goes to axis position `i` and chunk `j` arrives from
    /// position `j`. This is how each Ulysses member trades its sequence
    /// slice of all heads for all sequence positions of its head slice.
    fn all_to_all(&self, tensor: &Tensor) -> Result<Tensor>;

    /// Point-to-point send, used for the ring K/V hand-off.
    ///
    /// Ring members must issue sends toward `next` and receives from `prev`
    /// in the same rotation step order, or attention output is silently
    /// wrong rather than failing.
    fn send(&self, tensor: &Tensor, dst_rank: usize) -> Result<()>;

    /// Point-to-point receive.
    fn recv(&self, shape: &[usize], dtype: candle_core::DType, src_rank: usize) -> Result<Tensor>;

    /// Synchronize all ranks in the group.
    fn barrier(&self) -> Result<()>;
}

/// Identity communicator for single-process runs and tests.
///
/// With one rank every collective is the identity; with a simulated larger
/// group it mimics the shape transformations so layout logic can be tested
/// without a device backend.
pub struct MockCommunicator<P: ProcessGroup> {
    process_group: P,
}

impl<P: ProcessGroup> MockCommunicator<P> {
    pub fn new(process_group: P) -> Self {
        Self { process_group }
    }
}

impl<P: ProcessGroup + Send + Sync> DeviceCommunicator for MockCommunicator<P> {
    fn process_group(&self) -> &dyn ProcessGroup {
        &self.process_group
    }

    fn all_reduce(&self, tensor: &Tensor, _op: ReduceOp) -> Result<Tensor> {
        Ok(tensor.clone())
    }

    fn all_gather(&self, tensor: &Tensor, gather_dim: usize) -> Result<Tensor> {
        if self.process_group.is_single() {
            return Ok(tensor.clone());
        }
        // Simulated gather: every rank contributes an identical shard.
        let world_size = self.process_group.world_size();
        let tensors: Vec<Tensor> = (0..world_size).map(|_| tensor.clone()).collect();
        Ok(Tensor::cat(&tensors, gather_dim)?)
    }

    fn all_to_all(&self, tensor: &Tensor) -> Result<Tensor> {
        if self.process_group.is_single() {
            return Ok(tensor.clone());
        }
        let world_size = self.process_group.world_size();
        let dim0 = tensor.dim(0)?;
        if dim0 % world_size != 0 {
            return Err(DistributedError::Backend(format!(
                "all_to_all input dim 0 ({dim0}) not divisible by group size ({world_size})"
            )));
        }
        // Without real peers the exchange of identical shards is identity.
        Ok(tensor.clone())
    }

    fn send(&self, _tensor: &Tensor, _dst_rank: usize) -> Result<()> {
        Ok(())
    }

    fn recv(&self, shape: &[usize], dtype: candle_core::DType, _src_rank: usize) -> Result<Tensor> {
        Ok(Tensor::zeros(shape, dtype, &candle_core::Device::Cpu)?)
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::process_group::LocalProcessGroup;
    use candle_core::{DType, Device};

    fn ones(shape: &[usize]) -> Tensor {
        Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn single_rank_collectives_are_identity() {
        let comm = MockCommunicator::new(LocalProcessGroup::new());
        let input = ones(&[2, 3]);
        assert_eq!(
            comm.all_reduce(&input, ReduceOp::Sum).unwrap().dims(),
            input.dims()
        );
        assert_eq!(comm.all_gather(&input, 0).unwrap().dims(), input.dims());
        assert_eq!(comm.all_to_all(&input).unwrap().dims(), input.dims());
        comm.barrier().unwrap();
    }

    #[test]
    fn simulated_gather_scales_dim() {
        let comm = MockCommunicator::new(LocalProcessGroup::with_rank(0, 4));
        let out = comm.all_gather(&ones(&[2, 3]), 0).unwrap();
        assert_eq!(out.dims(), &[8, 3]);
    }

    #[test]
    fn all_to_all_requires_divisible_chunks() {
        let comm = MockCommunicator::new(LocalProcessGroup::with_rank(0, 4));
        assert!(comm.all_to_all(&ones(&[8, 3])).is_ok());
        let err = comm.all_to_all(&ones(&[7, 3])).unwrap_err();
        assert!(matches!(err, DistributedError::Backend(_)));
    }

    #[test]
    fn send_recv_round_trip_shapes() {
        let comm = MockCommunicator::new(LocalProcessGroup::new());
        comm.send(&ones(&[2, 3]), 0).unwrap();
        let received = comm.recv(&[2, 3], DType::F32, 0).unwrap();
        assert_eq!(received.dims(), &[2, 3]);
    }
}
