use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use directories::BaseDirs;
use git_version::git_version;

pub fn version() -> String {
    if let Some(v) = option_env!("FREEFORM_BUILD_VERSION_STRING") {
        return String::from(v);
    }

    const MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");
    const MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");
    const PATCH: &str = env!("CARGO_PKG_VERSION_PATCH");

    let commit =
        option_env!("FREEFORM_BUILD_COMMIT").unwrap_or(git_version!(fallback = "unknown commit"));

    format!("{MAJOR}.{MINOR}.{PATCH} ({commit})")
}

/// Uid of the running process.
pub fn current_uid() -> u32 {
    // SAFETY: getuid() has no preconditions and cannot fail.
    unsafe { libc::getuid() }
}

/// Spawns a named thread.
pub fn spawn_named<T: Send + 'static>(
    name: impl Into<String>,
    f: impl FnOnce() -> T + Send + 'static,
) -> anyhow::Result<JoinHandle<T>> {
    let name = name.into();
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .with_context(|| format!("error spawning thread {name:?}"))
}

/// Directory for the control socket: the user runtime dir, or the temp dir without one.
pub fn runtime_dir() -> PathBuf {
    BaseDirs::new()
        .and_then(|dirs| dirs.runtime_dir().map(|dir| dir.to_owned()))
        .unwrap_or_else(std::env::temp_dir)
}

/// Default config location, `$XDG_CONFIG_HOME/freeform/config.kdl`.
pub fn default_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.config_dir().join("freeform").join("config.kdl"))
}
