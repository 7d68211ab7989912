//! Run the workspace tests with snapshot cleanup.
//!
//! Snapshot tests in this workspace use inline insta snapshots. A failing one leaves a
//! `.pending-snap` file next to the source it lives in, and older insta versions leave
//! `.snap.new` files. Stale ones confuse `cargo insta review`, so they are removed before running.
//!
//! ## Commands
//!
//! - `run` - Run all tests with cleanup
//! - `clean` - Remove pending snapshot files
//! - `status` - List pending snapshot files

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Subcommand;

/// Source roots that may hold pending snapshots.
const SOURCE_ROOTS: &[&str] = &["src", "freeform-config/src", "freeform-ipc/src"];

const PENDING_SUFFIXES: &[&str] = &[".pending-snap", ".snap.new"];

#[derive(Subcommand)]
pub enum Action {
    /// Run all tests with cleanup
    Run {
        /// Only run tests matching this filter
        #[arg(long, short)]
        filter: Option<String>,

        /// Don't clean up pending snapshots before running
        #[arg(long)]
        no_pre_clean: bool,

        /// Clean up pending snapshots after test failures
        #[arg(long)]
        post_clean: bool,

        /// Run tests in release mode
        #[arg(long)]
        release: bool,
    },
    /// Remove pending snapshot files
    Clean {
        /// Show what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List pending snapshot files
    Status,
}

pub fn run(action: Action) -> Result<()> {
    match action {
        Action::Run {
            filter,
            no_pre_clean,
            post_clean,
            release,
        } => run_tests(filter, no_pre_clean, post_clean, release),
        Action::Clean { dry_run } => clean(dry_run),
        Action::Status => status(),
    }
}

// =============================================================================
// Test runner
// =============================================================================

fn run_tests(
    filter: Option<String>,
    no_pre_clean: bool,
    post_clean: bool,
    release: bool,
) -> Result<()> {
    if !no_pre_clean {
        let cleaned = remove_all(&find_pending()?)?;
        if cleaned > 0 {
            println!("Removed {cleaned} stale pending snapshots\n");
        }
    }

    let mut cmd = Command::new("cargo");
    cmd.args(["test", "--workspace"]);
    if release {
        cmd.arg("--release");
    }
    if let Some(filter) = &filter {
        cmd.args(["--", filter]);
    }

    println!("Running: {cmd:?}\n");
    let start = Instant::now();
    let status = cmd.status().context("error running cargo test")?;
    let duration = start.elapsed();
    println!();

    if status.success() {
        println!("All tests passed in {:.2}s", duration.as_secs_f64());
        return Ok(());
    }

    let pending = find_pending()?;
    if !pending.is_empty() {
        println!("Found {} pending snapshots", pending.len());
        if post_clean {
            let cleaned = remove_all(&pending)?;
            println!("Removed {cleaned} of them (--post-clean)");
        } else {
            println!("To view diffs: cargo insta review");
            println!("To clean up:   cargo xtask test-all clean");
        }
    }

    bail!("tests failed after {:.2}s", duration.as_secs_f64());
}

// =============================================================================
// Cleanup
// =============================================================================

fn clean(dry_run: bool) -> Result<()> {
    let pending = find_pending()?;
    if pending.is_empty() {
        println!("No pending snapshots");
        return Ok(());
    }

    if dry_run {
        for path in &pending {
            println!("Would remove {}", path.display());
        }
        return Ok(());
    }

    let removed = remove_all(&pending)?;
    println!("Removed {removed} pending snapshots");
    Ok(())
}

fn status() -> Result<()> {
    let pending = find_pending()?;
    println!("Pending snapshots: {}", pending.len());
    for path in &pending {
        println!("  {}", path.display());
    }
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn find_pending() -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in SOURCE_ROOTS {
        collect_pending(Path::new(root), &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_pending(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Ok(());
    };

    for entry in entries {
        let path = entry
            .with_context(|| format!("error reading {}", dir.display()))?
            .path();
        if path.is_dir() {
            collect_pending(&path, files)?;
            continue;
        }

        let name = path.to_string_lossy();
        if PENDING_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            files.push(path);
        }
    }

    Ok(())
}

fn remove_all(files: &[PathBuf]) -> Result<usize> {
    for path in files {
        std::fs::remove_file(path).with_context(|| format!("error removing {}", path.display()))?;
    }
    Ok(files.len())
}
