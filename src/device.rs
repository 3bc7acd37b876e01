//! Compute placement for the training driver.
//!
//! A [`Device`] owns the rayon pool the matrix kernels run in. Selection
//! walks an ordered preference list and never fails: an unavailable device
//! is logged and the next one is tried, ending on a single-threaded CPU.

use std::fmt;
use std::str::FromStr;

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EegError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Multi-threaded pool, one worker per available core unless overridden.
    Parallel,
    /// A single worker thread.
    Cpu,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Parallel => write!(f, "parallel"),
            DeviceKind::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for DeviceKind {
    type Err = EegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(DeviceKind::Parallel),
            "cpu" => Ok(DeviceKind::Cpu),
            other => Err(EegError::Config(format!("unknown device '{other}' (expected parallel or cpu)"))),
        }
    }
}

pub struct Device {
    kind: DeviceKind,
    threads: usize,
    /// `None` only when even a one-thread pool could not be built; work then
    /// runs on the caller's thread.
    pool: Option<ThreadPool>,
}

impl Device {
    /// Picks the first available device from `preferences`.
    ///
    /// `threads` overrides the worker count of the parallel device.
    pub fn select(preferences: &[DeviceKind], threads: Option<usize>) -> Device {
        for &kind in preferences {
            match Device::probe(kind, threads) {
                Some(device) => {
                    info!(device = %device.kind, threads = device.threads, "selected device");
                    return device;
                }
                None => warn!(device = %kind, "device unavailable, trying next preference"),
            }
        }
        warn!("no preferred device available, falling back to cpu");
        Device::cpu()
    }

    fn probe(kind: DeviceKind, threads: Option<usize>) -> Option<Device> {
        match kind {
            DeviceKind::Cpu => Some(Device::cpu()),
            DeviceKind::Parallel => {
                let available = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
                let threads = threads.unwrap_or(available);
                debug!(available, requested = threads, "probing parallel device");
                if threads < 2 {
                    return None;
                }
                match ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("eeg-worker-{i}"))
                    .build()
                {
                    Ok(pool) => Some(Device { kind, threads, pool: Some(pool) }),
                    Err(e) => {
                        warn!(error = %e, "could not build parallel pool");
                        None
                    }
                }
            }
        }
    }

    fn cpu() -> Device {
        let pool = match ThreadPoolBuilder::new().num_threads(1).thread_name(|_| "eeg-cpu".into()).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "could not build cpu pool, running on the caller thread");
                None
            }
        };
        Device { kind: DeviceKind::Cpu, threads: 1, pool }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `f` with this device's pool as the current rayon pool.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} thread{})", self.kind, self.threads, if self.threads == 1 { "" } else { "s" })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device").field("kind", &self.kind).field("threads", &self.threads).finish()
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::cpu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names() {
        assert_eq!("parallel".parse::<DeviceKind>().unwrap(), DeviceKind::Parallel);
        assert_eq!(" CPU ".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert!("cuda".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn parallel_needs_two_threads() {
        let device = Device::select(&[DeviceKind::Parallel, DeviceKind::Cpu], Some(1));
        assert_eq!(device.kind(), DeviceKind::Cpu);
        assert_eq!(device.threads(), 1);
    }

    #[test]
    fn explicit_thread_count_is_used() {
        let device = Device::select(&[DeviceKind::Parallel], Some(3));
        assert_eq!(device.kind(), DeviceKind::Parallel);
        assert_eq!(device.install(rayon::current_num_threads), 3);
    }

    #[test]
    fn empty_preferences_fall_back_to_cpu() {
        let device = Device::select(&[], None);
        assert_eq!(device.kind(), DeviceKind::Cpu);
        assert_eq!(device.install(|| 40 + 2), 42);
        assert_eq!(device.to_string(), "cpu (1 thread)");
    }
}
