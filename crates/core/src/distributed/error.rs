//! Error types for distributed setup and collective operations.

use thiserror::Error;

/// Errors that can occur while forming the mesh or running collectives.
#[derive(Error, Debug)]
pub enum DistributedError {
    /// The ring/ulysses degrees do not tile the world exactly.
    #[error(
        "invalid parallel degrees: ring {ring_degree} * ulysses {ulysses_degree} \
         must equal world_size {world_size} (all degrees >= 1)"
    )]
    InvalidDegrees {
        world_size: usize,
        ring_degree: usize,
        ulysses_degree: usize,
    },

    /// Rank is out of valid range for the mesh.
    #[error("invalid rank {rank}: must be < world_size {world_size}")]
    RankOutOfRange { rank: usize, world_size: usize },

    /// Two local workers tried to claim the same accelerator ordinal.
    #[error("device ordinal {ordinal} is already bound by another local worker")]
    DeviceConflict { ordinal: usize },

    /// The host-wide device claim could not be recorded.
    #[error("failed to record claim for device ordinal {ordinal}: {reason}")]
    DeviceClaim { ordinal: usize, reason: String },

    /// A distributed environment variable is set but unparsable.
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnvVar { name: &'static str, value: String },

    /// A peer failed to join a communication group within the startup timeout.
    #[error("collective group formation timed out after {waited_ms}ms waiting for peers")]
    CollectiveTimeout { waited_ms: u64 },

    /// Communication backend failure.
    #[error("communication backend error: {0}")]
    Backend(String),

    /// Underlying tensor operation failed.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, DistributedError>;
