//! Core of the memory probe: discovers the cgroup memory ceiling, holds a
//! resident allocation sized from it, and adapts when the ceiling is resized.

pub mod arena;
pub mod config;
pub mod error;
pub mod monitor;
pub mod planner;
pub mod runtime;

pub use arena::{AllocationRecord, MemoryArena};
pub use config::ProbeConfig;
pub use monitor::{Monitor, MonitorState, TickOutcome};
pub use planner::AllocationPlanner;
pub use runtime::{CountingAllocator, ManagedHeap, RuntimeLimitNotifier};

pub type Result<T> = std::result::Result<T, error::Error>;
