// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Resolve state directory: MEOW_STATE_DIR > XDG_STATE_HOME/meow > ~/.local/state/meow
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("MEOW_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("meow"));
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".local/state/meow"))
}

/// Orchestrator tick poll interval override.
pub fn poll_interval_ms() -> Option<Duration> {
    std::env::var("MEOW_POLL_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}
