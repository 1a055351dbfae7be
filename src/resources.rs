//! Host resource sampling and pre-call validation.
//!
//! The monitor keeps a bounded-age snapshot of free disk and memory and
//! answers, before any provider call is attempted, whether the host has
//! the headroom an operation asks for. Sampling happens on a background
//! task started lazily with [`ResourceMonitor::start`] and stopped by
//! [`ResourceMonitor::shutdown`]; a `validate` call finding the
//! snapshot older than the staleness TTL re-samples synchronously
//! rather than trusting stale numbers.
//!
//! Pressure transitions (memory or disk dipping under the configured
//! thresholds) are published on a watch channel so the registry can
//! react, e.g. by deprioritizing local providers while memory is low.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::providers::{Error, ErrorKind};

const DEFAULT_MIN_DISK_FREE: u64 = 500 * 1024 * 1024;
const DEFAULT_MIN_MEM_FREE: u64 = 200 * 1024 * 1024;
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STALENESS_TTL: Duration = Duration::from_secs(60);

/// Minimum-free floors an operation must leave untouched.
#[derive(Debug, Clone)]
pub struct ResourceThresholds {
    /// Bytes of disk that must remain free after the operation.
    pub min_disk_free: u64,
    /// Bytes of memory that must remain free after the operation.
    pub min_mem_free: u64,
}

impl Default for ResourceThresholds {
    fn default() -> ResourceThresholds {
        ResourceThresholds {
            min_disk_free: DEFAULT_MIN_DISK_FREE,
            min_mem_free: DEFAULT_MIN_MEM_FREE,
        }
    }
}

/// What an operation expects to consume while it runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationEstimate {
    pub disk_bytes: u64,
    pub mem_bytes: u64,
}

/// A point-in-time reading of host headroom.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub disk_free: u64,
    pub mem_free: u64,
    pub sampled_at: Instant,
}

/// Whether the host is under the configured floors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pressure {
    pub low_memory: bool,
    pub low_disk: bool,
}

/// Source of resource readings. The host implementation is the normal
/// one; tests inject fixed samplers.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> (u64, u64);
}

/// Samples the real host: free memory and the free space of the disk
/// holding `path`.
pub struct HostSampler {
    path: PathBuf,
    system: Mutex<System>,
}

impl HostSampler {
    /// `path` selects which mounted disk the free-space reading comes
    /// from (longest matching mount point wins).
    pub fn new<P: Into<PathBuf>>(path: P) -> HostSampler {
        HostSampler {
            path: path.into(),
            system: Mutex::new(System::new()),
        }
    }
}

impl ResourceSampler for HostSampler {
    fn sample(&self) -> (u64, u64) {
        let mem_free = {
            let mut system = match self.system.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            system.refresh_memory();
            system.available_memory()
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_free = disks
            .iter()
            .filter(|disk| self.path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .or_else(|| disks.iter().next())
            .map(|disk| disk.available_space())
            .unwrap_or(0);

        (disk_free, mem_free)
    }
}

struct MonitorShared {
    sampler: Arc<dyn ResourceSampler>,
    thresholds: ResourceThresholds,
    snapshot: Mutex<Snapshot>,
    pressure_tx: watch::Sender<Pressure>,
}

impl MonitorShared {
    fn resample(&self) -> Snapshot {
        let (disk_free, mem_free) = self.sampler.sample();
        let snapshot = Snapshot {
            disk_free,
            mem_free,
            sampled_at: Instant::now(),
        };

        {
            let mut slot = match self.snapshot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = snapshot;
        }

        let pressure = Pressure {
            low_memory: mem_free < self.thresholds.min_mem_free,
            low_disk: disk_free < self.thresholds.min_disk_free,
        };

        self.pressure_tx.send_if_modified(|current| {
            if *current == pressure {
                return false;
            }

            info!(
                low_memory = pressure.low_memory,
                low_disk = pressure.low_disk,
                "resource pressure changed"
            );
            *current = pressure;

            true
        });

        snapshot
    }

    fn current(&self, ttl: Duration) -> Snapshot {
        let snapshot = {
            let slot = match self.snapshot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot
        };

        if snapshot.sampled_at.elapsed() > ttl {
            debug!("resource snapshot stale, re-sampling");
            return self.resample();
        }

        snapshot
    }
}

/// Periodic sampler and pre-call validator for host disk and memory.
pub struct ResourceMonitor {
    shared: Arc<MonitorShared>,
    interval: Duration,
    staleness_ttl: Duration,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceMonitor {
    pub fn new(sampler: Arc<dyn ResourceSampler>, thresholds: ResourceThresholds) -> ResourceMonitor {
        Self::with_intervals(
            sampler,
            thresholds,
            DEFAULT_SAMPLE_INTERVAL,
            DEFAULT_STALENESS_TTL,
        )
    }

    pub fn with_intervals(
        sampler: Arc<dyn ResourceSampler>,
        thresholds: ResourceThresholds,
        interval: Duration,
        staleness_ttl: Duration,
    ) -> ResourceMonitor {
        let (disk_free, mem_free) = sampler.sample();
        let (pressure_tx, _) = watch::channel(Pressure {
            low_memory: mem_free < thresholds.min_mem_free,
            low_disk: disk_free < thresholds.min_disk_free,
        });
        let (stop_tx, _) = watch::channel(false);

        ResourceMonitor {
            shared: Arc::new(MonitorShared {
                sampler,
                thresholds,
                snapshot: Mutex::new(Snapshot {
                    disk_free,
                    mem_free,
                    sampled_at: Instant::now(),
                }),
                pressure_tx,
            }),
            interval,
            staleness_ttl,
            stop_tx,
            task: Mutex::new(None),
        }
    }

    /// Start the background sampling loop. Idempotent; a second call is
    /// a no-op while the first loop is alive.
    pub fn start(&self) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.interval;
        let mut stop_rx = self.stop_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the constructor already
            // sampled.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        shared.resample();
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            debug!("resource sampling loop stopped");
                            return;
                        }
                    }
                }
            }
        }));
    }

    /// Stop the sampling loop. Safe to call without a prior `start`.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// The latest snapshot, re-sampled synchronously if older than the
    /// staleness TTL.
    pub fn snapshot(&self) -> Snapshot {
        self.shared.current(self.staleness_ttl)
    }

    /// The current pressure reading.
    pub fn pressure(&self) -> Pressure {
        *self.shared.pressure_tx.borrow()
    }

    /// Subscribe to pressure transitions.
    pub fn subscribe(&self) -> watch::Receiver<Pressure> {
        self.shared.pressure_tx.subscribe()
    }

    /// Check that the host can absorb `op` without dipping under the
    /// minimum-free floors. Runs before any provider call; a rejection
    /// means the call was never attempted.
    pub fn validate(&self, op: &OperationEstimate) -> Result<(), Error> {
        let snapshot = self.snapshot();
        let thresholds = &self.shared.thresholds;

        let disk_short = snapshot.disk_free < op.disk_bytes.saturating_add(thresholds.min_disk_free);
        let mem_short = snapshot.mem_free < op.mem_bytes.saturating_add(thresholds.min_mem_free);

        if disk_short || mem_short {
            warn!(
                disk_free = snapshot.disk_free,
                mem_free = snapshot.mem_free,
                disk_requested = op.disk_bytes,
                mem_requested = op.mem_bytes,
                "operation rejected for insufficient headroom"
            );

            return Err(Error::from_kind(ErrorKind::ResourceExhausted));
        }

        Ok(())
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
