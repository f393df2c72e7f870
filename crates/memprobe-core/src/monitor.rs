//! Bootstrap and steady polling of the memory ceiling.

use memprobe_cgroups::{read_limit, read_usage, ControlFilePath, LimitPathResolver, ResourceLimit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::arena::{AllocationRecord, MemoryArena};
use crate::config::ProbeConfig;
use crate::error::Error;
use crate::planner::AllocationPlanner;
use crate::runtime::{peak_rss_bytes, RuntimeLimitNotifier};
use crate::Result;

/// What a single poll observed and did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Ceiling identical to the previous tick
    Unchanged,
    /// Ceiling became unlimited or unreadable; nothing allocated or released
    BecameUnlimited,
    /// Ceiling grew and a new block of `allocated` bytes is now held
    Grew { delta: i64, allocated: u64 },
    /// Ceiling grew but the new block could not be allocated
    GrowFailed { delta: i64 },
    /// Ceiling did not grow; the newest block is no longer counted as active
    Released { delta: i64 },
    /// Concrete ceiling is back after an unlimited or unreadable spell but did
    /// not grow past the last known one; nothing is allocated or released
    Restored { delta: i64 },
}

/// Working set of the monitor, mutated once per tick
#[derive(Debug)]
pub struct MonitorState {
    limit: ResourceLimit,
    /// Last concrete ceiling, used as the base for deltas
    baseline: u64,
    target: i64,
    records: Vec<AllocationRecord>,
    active: usize,
}

impl MonitorState {
    pub fn limit(&self) -> ResourceLimit {
        self.limit
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    /// Every block allocated so far, oldest first; never shrinks
    pub fn records(&self) -> &[AllocationRecord] {
        &self.records
    }

    /// Number of blocks still counted toward the target
    pub fn active_records(&self) -> usize {
        self.active
    }

    /// Bytes held by all blocks, released or not
    pub fn resident_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.len() as u64).sum()
    }
}

/// The limit discovery and adaptation loop
pub struct Monitor<N> {
    config: ProbeConfig,
    limit_path: ControlFilePath,
    planner: AllocationPlanner,
    arena: MemoryArena,
    notifier: N,
    state: MonitorState,
}

impl<N: RuntimeLimitNotifier> Monitor<N> {
    /// Resolve the ceiling file, read the ceiling and perform the initial
    /// allocation. Any failure here is fatal for the probe.
    pub fn bootstrap(config: ProbeConfig, notifier: N) -> Result<Self> {
        let limit_path = LimitPathResolver::new(config.cgroup.clone()).resolve()?;
        Self::bootstrap_with_path(config, limit_path, notifier)
    }

    /// Bootstrap against an already resolved ceiling file
    pub fn bootstrap_with_path(
        config: ProbeConfig,
        limit_path: ControlFilePath,
        notifier: N,
    ) -> Result<Self> {
        config.validate()?;
        let limit = match read_limit(&limit_path)? {
            ResourceLimit::Unlimited => return Err(Error::UnlimitedAtBootstrap),
            ResourceLimit::Bytes(0) => return Err(Error::ZeroLimit),
            ResourceLimit::Bytes(n) => n,
        };
        info!(limit, path = %limit_path, "initial memory ceiling");

        let planner = AllocationPlanner::new(config.allocation_percent);
        let target = planner.initial_target(limit);
        if target == 0 {
            return Err(Error::ZeroTarget { limit });
        }

        let arena = MemoryArena::new();
        info!(bytes = target, percent = planner.percent(), "allocating initial block");
        check_heap_ceiling(&notifier, 0, target)?;
        let record = arena.allocate(target)?;
        info!(bytes = record.len(), "initial block resident");

        let monitor = Self {
            config,
            limit_path,
            planner,
            arena,
            notifier,
            state: MonitorState {
                limit: ResourceLimit::Bytes(limit),
                baseline: limit,
                target: target as i64,
                records: vec![record],
                active: 1,
            },
        };
        monitor.log_memory();
        Ok(monitor)
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn limit_path(&self) -> &ControlFilePath {
        &self.limit_path
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Poll until `token` is cancelled
    pub async fn run(mut self, token: CancellationToken) -> Self {
        let interval = self.config.poll_interval();
        info!(interval_ms = self.config.poll_interval_ms, "polling memory ceiling");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("monitor cancelled");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.tick();
                }
            }
        }
        self
    }

    /// Reread the ceiling once and adapt to any change
    pub fn tick(&mut self) -> TickOutcome {
        let observed = match read_limit(&self.limit_path) {
            Ok(limit) => limit,
            Err(e) => {
                warn!("cannot read memory ceiling, treating as unlimited: {}", e);
                ResourceLimit::Unlimited
            }
        };

        if observed == self.state.limit {
            debug!(limit = %observed, "memory ceiling unchanged");
            self.log_memory();
            return TickOutcome::Unchanged;
        }

        info!(from = %self.state.limit, to = %observed, "memory ceiling changed");
        if let Err(e) = self.notifier.notify_limit_changed() {
            warn!("runtime did not refresh its ceiling: {}", e);
        }
        let previous = std::mem::replace(&mut self.state.limit, observed);

        let outcome = match observed {
            ResourceLimit::Unlimited => {
                warn!("memory ceiling became unlimited; keeping current allocations");
                TickOutcome::BecameUnlimited
            }
            ResourceLimit::Bytes(current) => self.adapt(previous, current),
        };
        self.log_memory();
        outcome
    }

    fn adapt(&mut self, previous: ResourceLimit, current: u64) -> TickOutcome {
        let delta = self.planner.delta_target(self.state.baseline, current);
        self.state.baseline = current;
        self.state.target = self.state.target.saturating_add(delta);

        if delta <= 0 && previous.is_unlimited() {
            // A read failure must never cost an allocation.
            info!(delta, "memory ceiling restored; keeping current allocations");
            return TickOutcome::Restored { delta };
        }

        if delta <= 0 {
            // The block stays in `records` so its pages remain resident.
            self.state.active = self.state.active.saturating_sub(1);
            info!(
                delta,
                active = self.state.active,
                "releasing newest block (memory stays resident)"
            );
            return TickOutcome::Released { delta };
        }

        info!(delta, "allocating additional block");
        let bytes = delta as u64;
        let allocation = check_heap_ceiling(&self.notifier, self.state.resident_bytes(), bytes)
            .and_then(|()| self.arena.allocate(bytes));
        match allocation {
            Ok(record) => {
                let allocated = record.len() as u64;
                self.state.records.push(record);
                self.state.active += 1;
                info!(
                    allocated,
                    blocks = self.state.records.len(),
                    "additional block resident"
                );
                TickOutcome::Grew { delta, allocated }
            }
            Err(e) => {
                warn!("reallocation failed, continuing: {}", e);
                TickOutcome::GrowFailed { delta }
            }
        }
    }

    fn log_memory(&self) {
        let usage_path = self.limit_path.sibling(&self.config.cgroup.usage_file);
        let cgroup_usage = read_usage(&usage_path).ok();
        debug!(
            resident = self.state.resident_bytes(),
            target_bytes = self.state.target,
            live_heap = ?self.notifier.live_bytes(),
            heap_hard_limit = ?self.notifier.heap_hard_limit(),
            cgroup_usage = ?cgroup_usage,
            peak_rss = ?peak_rss_bytes(),
            "memory status"
        );
    }
}

/// Refuse an allocation that would push the held blocks past the runtime's
/// heap ceiling
fn check_heap_ceiling<N: RuntimeLimitNotifier>(notifier: &N, held: u64, bytes: u64) -> Result<()> {
    match notifier.heap_hard_limit() {
        Some(ceiling) if held.saturating_add(bytes) > ceiling => Err(Error::AllocationFailure {
            bytes,
            reason: format!("{held} bytes already held, heap ceiling is {ceiling} bytes"),
        }),
        _ => Ok(()),
    }
}
