//! Memory probe binary: runs inside a container, holds an allocation sized from
//! the cgroup memory ceiling and follows live resizes until killed.

use anyhow::Context;
use clap::Parser;
use memprobe_cgroups::LimitPathResolver;
use memprobe_core::{CountingAllocator, ManagedHeap, Monitor, ProbeConfig};
use std::alloc::System;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: CountingAllocator<System> = CountingAllocator::new(System);

/// Command line arguments for memprobe
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Mount point of the unified cgroup hierarchy
    #[arg(long, value_name = "DIR")]
    cgroup_root: Option<PathBuf>,

    /// Process cgroup descriptor to read instead of /proc/self/cgroup
    #[arg(long, value_name = "FILE")]
    proc_cgroup: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Share of the ceiling to allocate, in percent
    #[arg(long, value_name = "PERCENT")]
    percent: Option<u8>,

    /// Pin the heap ceiling to a fixed byte count
    #[arg(long, value_name = "BYTES")]
    heap_hard_limit: Option<u64>,
}

impl Args {
    fn probe_config(&self) -> anyhow::Result<ProbeConfig> {
        let mut config = match &self.config {
            Some(path) => ProbeConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => ProbeConfig::default(),
        };

        if let Some(root) = &self.cgroup_root {
            config.cgroup.mount_root = root.clone();
        }
        if let Some(descriptor) = &self.proc_cgroup {
            config.cgroup.proc_cgroup = descriptor.clone();
        }
        if let Some(interval) = self.interval_ms {
            config.poll_interval_ms = interval;
        }
        if let Some(percent) = self.percent {
            config.allocation_percent = percent;
        }
        if self.heap_hard_limit.is_some() {
            config.heap_hard_limit = self.heap_hard_limit;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting memory probe");

    let config = match args.probe_config() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration failed: {:#}", e);
            std::process::exit(1);
        }
    };

    let limit_path = match LimitPathResolver::new(config.cgroup.clone()).resolve() {
        Ok(path) => path,
        Err(e) => {
            error!("cannot locate memory ceiling: {}", e);
            std::process::exit(1);
        }
    };

    let heap = ManagedHeap::new(
        limit_path.clone(),
        config.heap_limit_percent,
        config.heap_hard_limit,
    )
    .with_allocator(&GLOBAL);

    let monitor = match Monitor::bootstrap_with_path(config, limit_path, heap) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("bootstrap failed: {}", e);
            std::process::exit(1);
        }
    };

    // Never cancelled: the probe runs until the process is killed.
    let token = CancellationToken::new();
    monitor.run(token).await;

    Ok(())
}
