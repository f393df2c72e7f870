//! The managed-memory side of the probe: heap accounting and the heap ceiling
//! derived from the cgroup limit.

use memprobe_cgroups::{read_limit, ControlFilePath, ResourceLimit};
use std::alloc::{GlobalAlloc, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::error::Error;
use crate::Result;

/// Capability the monitor uses to talk to the memory-managed runtime
pub trait RuntimeLimitNotifier {
    /// Heap bytes currently allocated and not yet freed
    fn live_bytes(&self) -> Option<u64>;

    /// Heap ceiling the runtime is currently budgeting against
    fn heap_hard_limit(&self) -> Option<u64>;

    /// Ask the runtime to re-read the host ceiling and recompute its budgets
    fn notify_limit_changed(&self) -> Result<()>;
}

/// Global allocator wrapper that keeps live and peak heap byte counts.
///
/// Install it with `#[global_allocator]` in the binary; the counters are
/// updated on every allocation and never block.
pub struct CountingAllocator<A> {
    inner: A,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl<A> CountingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn live_bytes(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub fn peak_bytes(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    fn record_alloc(&self, size: usize) {
        let live = self.live.fetch_add(size, Ordering::Relaxed) + size;
        self.peak.fetch_max(live, Ordering::Relaxed);
    }

    fn record_dealloc(&self, size: usize) {
        self.live.fetch_sub(size, Ordering::Relaxed);
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            self.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            self.record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        self.record_dealloc(layout.size());
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            self.record_dealloc(layout.size());
            self.record_alloc(new_size);
        }
        new_ptr
    }
}

/// Heap budget that follows the cgroup ceiling.
///
/// The hard ceiling is `percent` of the cgroup limit, or none while the cgroup
/// is unlimited. A ceiling pinned by configuration never follows the cgroup and
/// refuses refresh requests.
pub struct ManagedHeap {
    limit_path: ControlFilePath,
    percent: u8,
    pinned: Option<u64>,
    hard_limit: Mutex<Option<u64>>,
    allocator: Option<&'static CountingAllocator<std::alloc::System>>,
}

impl ManagedHeap {
    pub fn new(limit_path: ControlFilePath, percent: u8, pinned: Option<u64>) -> Self {
        let hard_limit = match pinned {
            Some(bytes) => Some(bytes),
            None => read_limit(&limit_path)
                .ok()
                .and_then(|limit| heap_ceiling(limit, percent)),
        };
        debug!(?hard_limit, "initial heap ceiling");
        Self {
            limit_path,
            percent,
            pinned,
            hard_limit: Mutex::new(hard_limit),
            allocator: None,
        }
    }

    /// Report live bytes from the process's counting allocator
    pub fn with_allocator(mut self, allocator: &'static CountingAllocator<std::alloc::System>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }
}

impl RuntimeLimitNotifier for ManagedHeap {
    fn live_bytes(&self) -> Option<u64> {
        self.allocator.map(|a| a.live_bytes() as u64)
    }

    fn heap_hard_limit(&self) -> Option<u64> {
        *self.hard_limit.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify_limit_changed(&self) -> Result<()> {
        if let Some(bytes) = self.pinned {
            return Err(Error::RefreshUnsupported(format!(
                "heap ceiling is pinned to {bytes} bytes by configuration"
            )));
        }

        let limit = read_limit(&self.limit_path)?;
        let ceiling = heap_ceiling(limit, self.percent);
        *self.hard_limit.lock().unwrap_or_else(|e| e.into_inner()) = ceiling;
        info!(?ceiling, %limit, "heap ceiling refreshed");
        Ok(())
    }
}

fn heap_ceiling(limit: ResourceLimit, percent: u8) -> Option<u64> {
    limit
        .bytes()
        .map(|n| (u128::from(n) * u128::from(percent) / 100) as u64)
}

/// Peak resident set size of this process, in bytes
#[cfg(unix)]
pub fn peak_rss_bytes() -> Option<u64> {
    use nix::sys::resource::{getrusage, UsageWho};

    let usage = getrusage(UsageWho::RUSAGE_SELF).ok()?;
    let max_rss = u64::try_from(usage.max_rss()).ok()?;
    // Linux reports kilobytes, macOS bytes.
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * 1024)
    }
}

#[cfg(not(unix))]
pub fn peak_rss_bytes() -> Option<u64> {
    None
}
