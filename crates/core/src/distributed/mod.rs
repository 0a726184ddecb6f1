//! Distributed execution substrate for multi-device video inference.
//!
//! The diffusion transformer is split across accelerators along two axes:
//! a ring-attention axis that rotates K/V shards between neighbors, and a
//! Ulysses sequence-parallel axis that exchanges Q/K/V slices via
//! all-to-all. This module owns the pieces that make that split correct:
//! - [`ParallelTopology`] / [`RankCoordinate`] — coordination-free rank
//!   arithmetic every worker computes identically
//! - [`CommGroupRegistry`] — deterministic group membership per axis
//! - [`DeviceBinder`] — exclusive accelerator ownership per local worker
//! - [`DeviceCommunicator`] — the collective primitives the attention
//!   layers are built on

mod communicator;
mod device;
mod error;
mod groups;
mod process_group;
mod topology;

pub use communicator::{DeviceCommunicator, MockCommunicator, ReduceOp};
pub use device::{DeviceBinder, DeviceHandle};
pub use error::{DistributedError, Result};
pub use groups::{ring_shard_at_step, CommGroup, CommGroupRegistry, GroupAxis};
pub use process_group::{LocalProcessGroup, ProcessGroup, WorkerEnv};
pub use topology::{ParallelTopology, RankCoordinate};
