//! `buildfix clean`: drop all local state and buildfix containers.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::io::sandbox::Sandbox;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub removed_state: bool,
    pub removed_containers: usize,
}

/// Remove `state_dir` (results, cache, cloned workspaces) and, when a sandbox
/// is given, every container it labelled.
#[instrument(skip_all, fields(state_dir = %state_dir.display()))]
pub fn clean(state_dir: &Path, sandbox: Option<&dyn Sandbox>) -> Result<CleanSummary> {
    let mut summary = CleanSummary::default();
    if state_dir.exists() {
        fs::remove_dir_all(state_dir)
            .with_context(|| format!("remove {}", state_dir.display()))?;
        summary.removed_state = true;
        info!("state directory removed");
    }
    if let Some(sandbox) = sandbox {
        summary.removed_containers = sandbox
            .remove_labelled()
            .context("remove buildfix containers")?;
        info!(count = summary.removed_containers, "containers removed");
    }
    Ok(summary)
}
