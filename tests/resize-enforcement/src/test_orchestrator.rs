//! Test orchestrator for live resize E2E tests
//! This program launches memprobe against a fake cgroup tree, resizes the
//! memory ceiling underneath it and verifies that the probe reacts.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const INITIAL_LIMIT: &str = "64000000";
const GROWN_LIMIT: &str = "96000000";
const SHRUNK_LIMIT: &str = "32000000";

#[derive(Debug)]
struct Step {
    description: &'static str,
    /// New content for memory.max, or None to only observe
    write_limit: Option<&'static str>,
    /// Log line fragment expected once the step has been applied
    expect: &'static str,
    timeout: Duration,
}

fn steps() -> Vec<Step> {
    vec![
        Step {
            description: "bootstrap allocation",
            write_limit: None,
            expect: "initial block resident",
            timeout: Duration::from_secs(15),
        },
        Step {
            description: "ceiling grows",
            write_limit: Some(GROWN_LIMIT),
            expect: "additional block resident",
            timeout: Duration::from_secs(5),
        },
        Step {
            description: "ceiling shrinks",
            write_limit: Some(SHRUNK_LIMIT),
            expect: "releasing newest block",
            timeout: Duration::from_secs(5),
        },
        Step {
            description: "ceiling becomes unlimited",
            write_limit: Some("max\n"),
            expect: "memory ceiling became unlimited",
            timeout: Duration::from_secs(5),
        },
    ]
}

struct FakeCgroup {
    _temp: TempDir,
    proc_cgroup: PathBuf,
    mount_root: PathBuf,
    limit_file: PathBuf,
}

fn fake_cgroup() -> Result<FakeCgroup, Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let proc_cgroup = temp.path().join("cgroup");
    fs::write(&proc_cgroup, "0::/memprobe.slice/probe\n")?;

    let mount_root = temp.path().join("sys/fs/cgroup");
    let cgroup_dir = mount_root.join("memprobe.slice/probe");
    fs::create_dir_all(&cgroup_dir)?;
    let limit_file = cgroup_dir.join("memory.max");
    fs::write(&limit_file, INITIAL_LIMIT)?;

    Ok(FakeCgroup {
        _temp: temp,
        proc_cgroup,
        mount_root,
        limit_file,
    })
}

/// Forward the probe's log lines so they can be awaited with a timeout
fn spawn_log_reader(child: &mut Child) -> Option<Receiver<String>> {
    let stderr = child.stderr.take()?;
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            println!("   | {}", line);
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    Some(receiver)
}

fn wait_for_line(logs: &Receiver<String>, needle: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        match logs.recv_timeout(remaining) {
            Ok(line) if line.contains(needle) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

fn run_resize_test(memprobe_path: &Path) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let cgroup = fake_cgroup()?;

    let mut cmd = Command::new(memprobe_path);
    cmd.arg("--cgroup-root")
        .arg(&cgroup.mount_root)
        .arg("--proc-cgroup")
        .arg(&cgroup.proc_cgroup)
        .arg("--interval-ms")
        .arg("200")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    println!("   Command: {:?}", cmd);
    let mut child = cmd.spawn()?;
    println!("✅ Probe process started (PID: {})", child.id());

    let logs = spawn_log_reader(&mut child).ok_or("probe stderr was not captured")?;

    let mut passed = 0;
    let mut failed = 0;
    for step in steps() {
        println!("🧪 Step: {}", step.description);
        if let Some(limit) = step.write_limit {
            fs::write(&cgroup.limit_file, limit)?;
            println!("   Wrote {:?} to {}", limit.trim(), cgroup.limit_file.display());
        }

        if wait_for_line(&logs, step.expect, step.timeout) {
            println!("✅ Step PASSED - saw {:?}", step.expect);
            passed += 1;
        } else {
            println!(
                "❌ Step FAILED - no {:?} within {:.1}s",
                step.expect,
                step.timeout.as_secs_f64()
            );
            failed += 1;
            break;
        }
    }

    match child.try_wait()? {
        Some(status) => {
            println!("❌ Probe exited unexpectedly with {}", status);
            failed += 1;
        }
        None => {
            println!("✅ Probe still running after resizes - terminating");
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    Ok((passed, failed))
}

fn run_bootstrap_failure_test(memprobe_path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let cgroup = fake_cgroup()?;
    fs::write(&cgroup.limit_file, "max\n")?;

    let output = Command::new(memprobe_path)
        .arg("--cgroup-root")
        .arg(&cgroup.mount_root)
        .arg("--proc-cgroup")
        .arg(&cgroup.proc_cgroup)
        .output()?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let ok = !output.status.success() && stderr.contains("bootstrap failed");
    if ok {
        println!("✅ Unlimited ceiling at startup is fatal");
    } else {
        println!("❌ Expected a fatal bootstrap error, got {}:\n{}", output.status, stderr);
    }
    Ok(ok)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Memory Ceiling Resize Test Orchestrator");
    println!("==========================================");

    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path.parent().unwrap_or(exe_path.as_path());
    let memprobe_path = exe_dir.join("memprobe");

    if !memprobe_path.exists() {
        println!("❌ memprobe binary not found at: {:?}", memprobe_path);
        println!("   Please build it first:");
        println!("   cargo build --bin memprobe");
        std::process::exit(1);
    }

    println!("✅ Found memprobe at: {:?}", memprobe_path);
    println!();

    let (mut passed, mut failed) = run_resize_test(&memprobe_path)?;
    println!();
    if run_bootstrap_failure_test(&memprobe_path)? {
        passed += 1;
    } else {
        failed += 1;
    }

    println!();
    println!("📊 Test Results:");
    println!("   Passed: {}", passed);
    println!("   Failed: {}", failed);

    if failed == 0 {
        println!("🎉 All tests passed!");
        std::process::exit(0);
    } else {
        println!("💥 Some tests failed!");
        std::process::exit(1);
    }
}
