//! Accelerator binding for local workers.
//!
//! Each worker process claims exactly one device ordinal, derived from its
//! local rank, before any tensor placement. Claims are recorded at host
//! scope through per-ordinal lock files so that two separately launched
//! processes colliding on the same `LOCAL_RANK` fail at startup instead of
//! silently sharing a device; an in-process set backs this up for the
//! same-binder case. Ordinal collisions are a configuration error surfaced
//! immediately, never tolerated.

use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use candle_core::Device;

use super::error::{DistributedError, Result};

/// An exclusively owned accelerator, held for the process lifetime.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    ordinal: usize,
    device: Device,
}

impl DeviceHandle {
    /// The device ordinal this worker bound.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The candle device for tensor placement.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Tracks which ordinals have been claimed on this host.
///
/// Claims live as `ordinal-<n>.lock` files (containing the claimant pid)
/// under the claim directory and are released when the binder drops. A
/// claim left behind by a dead process is treated as stale and taken over.
#[derive(Debug)]
pub struct DeviceBinder {
    claim_dir: PathBuf,
    claimed: HashSet<usize>,
    locks: Vec<PathBuf>,
}

impl Default for DeviceBinder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBinder {
    pub fn new() -> Self {
        Self::with_claim_dir(std::env::temp_dir().join("stepvideo-device-claims"))
    }

    /// Binder with an explicit claim directory. All workers on a host must
    /// agree on this directory for cross-process detection to work.
    pub fn with_claim_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            claim_dir: dir.into(),
            claimed: HashSet::new(),
            locks: Vec::new(),
        }
    }

    /// Bind the device for `local_rank`, claiming ordinal `local_rank`.
    ///
    /// Called once per worker at startup. A second claim of the same
    /// ordinal, from this process or any other worker on the host, means
    /// two workers were launched with the same `LOCAL_RANK`, which would
    /// silently corrupt placement; it fails here instead.
    ///
    /// Falls back to CPU when no accelerator is available so that
    /// single-process development runs work unchanged.
    pub fn bind(&mut self, local_rank: usize) -> Result<DeviceHandle> {
        if !self.claimed.insert(local_rank) {
            return Err(DistributedError::DeviceConflict {
                ordinal: local_rank,
            });
        }
        self.claim_ordinal(local_rank)?;

        let device = Device::cuda_if_available(local_rank)?;
        tracing::info!(
            ordinal = local_rank,
            cuda = device.is_cuda(),
            "bound accelerator device"
        );
        Ok(DeviceHandle {
            ordinal: local_rank,
            device,
        })
    }

    fn claim_ordinal(&mut self, ordinal: usize) -> Result<()> {
        fs::create_dir_all(&self.claim_dir).map_err(|e| DistributedError::DeviceClaim {
            ordinal,
            reason: e.to_string(),
        })?;
        let path = self.claim_dir.join(format!("ordinal-{ordinal}.lock"));

        // One retry, for taking over a stale claim.
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    self.locks.push(path);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if claim_is_stale(&path) {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    return Err(DistributedError::DeviceConflict { ordinal });
                }
                Err(e) => {
                    return Err(DistributedError::DeviceClaim {
                        ordinal,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Err(DistributedError::DeviceConflict { ordinal })
    }
}

impl Drop for DeviceBinder {
    fn drop(&mut self) {
        for path in &self.locks {
            let _ = fs::remove_file(path);
        }
    }
}

/// Whether an existing claim belongs to a process that no longer runs.
fn claim_is_stale(path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(path) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return false;
    };
    if pid == std::process::id() {
        return false;
    }
    #[cfg(target_os = "linux")]
    {
        !Path::new("/proc").join(pid.to_string()).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn claim_dir() -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        std::env::temp_dir().join(format!(
            "device-claims-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[test]
    fn binds_distinct_ordinals() {
        let mut binder = DeviceBinder::with_claim_dir(claim_dir());
        let d0 = binder.bind(0).unwrap();
        let d1 = binder.bind(1).unwrap();
        assert_eq!(d0.ordinal(), 0);
        assert_eq!(d1.ordinal(), 1);
    }

    #[test]
    fn double_bind_is_a_configuration_error() {
        let mut binder = DeviceBinder::with_claim_dir(claim_dir());
        binder.bind(0).unwrap();
        let err = binder.bind(0).unwrap_err();
        assert!(matches!(err, DistributedError::DeviceConflict { ordinal: 0 }));
    }

    #[test]
    fn collision_between_separate_workers_is_detected() {
        // Two binders sharing a claim directory model two separately
        // launched processes given the same LOCAL_RANK.
        let dir = claim_dir();
        let mut first = DeviceBinder::with_claim_dir(&dir);
        let mut second = DeviceBinder::with_claim_dir(&dir);
        first.bind(0).unwrap();
        let err = second.bind(0).unwrap_err();
        assert!(matches!(err, DistributedError::DeviceConflict { ordinal: 0 }));
        second.bind(1).unwrap();
    }

    #[test]
    fn dropping_the_binder_releases_host_claims() {
        let dir = claim_dir();
        {
            let mut binder = DeviceBinder::with_claim_dir(&dir);
            binder.bind(0).unwrap();
        }
        let mut binder = DeviceBinder::with_claim_dir(&dir);
        binder.bind(0).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_claim_from_dead_process_is_taken_over() {
        let dir = claim_dir();
        fs::create_dir_all(&dir).unwrap();
        // No live process has this pid.
        fs::write(dir.join("ordinal-0.lock"), format!("{}\n", u32::MAX)).unwrap();

        let mut binder = DeviceBinder::with_claim_dir(&dir);
        binder.bind(0).unwrap();
    }

    #[test]
    fn cpu_fallback_when_no_accelerator() {
        let mut binder = DeviceBinder::with_claim_dir(claim_dir());
        let handle = binder.bind(0).unwrap();
        // On machines without CUDA this is the CPU device; either way the
        // handle must be usable for tensor placement.
        let t = candle_core::Tensor::zeros(&[2], candle_core::DType::F32, handle.device()).unwrap();
        assert_eq!(t.dims(), &[2]);
    }
}
