//! Local multi-process launcher.
//!
//! With `--spawn-local-workers`, rank 0 spawns `world_size - 1` sibling
//! processes (ranks 1..world_size) by re-executing the current binary with
//! the same CLI arguments, distinguished only by the standard distributed
//! environment variables:
//!
//! | Variable      | Set by launcher | Consumed by |
//! |---------------|-----------------|-------------|
//! | `RANK`        | 1..N-1          | `WorkerEnv::from_env()` |
//! | `WORLD_SIZE`  | N               | `WorkerEnv::from_env()` |
//! | `LOCAL_RANK`  | 1..N-1          | device binding |
//! | `MASTER_ADDR` | 127.0.0.1       | collective bootstrap |
//! | `MASTER_PORT` | inherited       | collective bootstrap |
//!
//! An external `torchrun`-style orchestrator can drive the same binary by
//! setting these variables itself, in which case no spawning happens here.

use std::process::{Child, Command};

/// Spawn `world_size - 1` worker processes (ranks 1..world_size).
///
/// Assumes a single host: `LOCAL_RANK == RANK` maps each worker to a
/// distinct device ordinal. Returns handles so the coordinator can wait
/// for the siblings on shutdown.
pub fn spawn_local_workers(world_size: usize, master_port: u16) -> anyhow::Result<Vec<Child>> {
    assert!(world_size > 1, "no workers to spawn for world_size=1");

    let current_exe = std::env::current_exe()
        .map_err(|e| anyhow::anyhow!("failed to determine current executable: {e}"))?;

    // Forward the same CLI arguments so every rank parses the same prompt,
    // degrees, and endpoints.
    let args: Vec<std::ffi::OsString> = std::env::args_os().skip(1).collect();

    let mut workers = Vec::with_capacity(world_size - 1);
    for rank in 1..world_size {
        tracing::info!(rank, world_size, master_port, "spawning local worker");

        let child = Command::new(&current_exe)
            .args(&args)
            .env("RANK", rank.to_string())
            .env("WORLD_SIZE", world_size.to_string())
            .env("LOCAL_RANK", rank.to_string())
            .env("MASTER_ADDR", "127.0.0.1")
            .env("MASTER_PORT", master_port.to_string())
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn worker rank {rank}: {e}"))?;

        workers.push(child);
    }

    tracing::info!(count = world_size - 1, "all local workers spawned");
    Ok(workers)
}

/// Wait for all spawned workers to exit and log their statuses.
///
/// Non-zero exits are logged as warnings; the run's failure, if any, has
/// already been reported by the rank that failed.
pub fn wait_for_workers(mut workers: Vec<Child>) {
    for (i, child) in workers.iter_mut().enumerate() {
        match child.wait() {
            Ok(status) if status.success() => {
                tracing::debug!(rank = i + 1, "worker exited cleanly");
            }
            Ok(status) => {
                tracing::warn!(rank = i + 1, ?status, "worker exited with non-zero status");
            }
            Err(e) => {
                tracing::warn!(rank = i + 1, error = %e, "error waiting for worker");
            }
        }
    }
}
