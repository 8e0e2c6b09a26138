//! Per-cycle state snapshots (`cycles/<n>.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::TranscriptEntry;
use crate::io::atomic::write_json_atomic;

/// Full loop state after a cycle, enough to inspect or resume a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub project: String,
    /// 1-based number of the cycle that produced this snapshot.
    pub cycle: u32,
    pub cycle_limit: u32,
    pub cycles_remaining: u32,
    pub consecutive_unparsable: u32,
    pub started_at: String,
    pub entries: Vec<TranscriptEntry>,
}

/// Load a snapshot from disk.
pub fn load_snapshot(path: &Path) -> Result<RunSnapshot> {
    debug!(path = %path.display(), "loading snapshot");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse snapshot {}", path.display()))
}

/// Atomically write a snapshot (temp file + rename).
pub fn write_snapshot(path: &Path, snapshot: &RunSnapshot) -> Result<()> {
    debug!(
        path = %path.display(),
        cycle = snapshot.cycle,
        cycles_remaining = snapshot.cycles_remaining,
        "writing snapshot"
    );
    write_json_atomic(path, snapshot)
}
