//! Git adapter used to acquire projects.
//!
//! Only clone and refresh are needed, so we keep a small, explicit wrapper
//! around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::run_command_with_timeout;

const GIT_TIMEOUT: Duration = Duration::from_secs(1800);
const GIT_OUTPUT_LIMIT: usize = 200_000;

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// `git clone --recursive <url> <workdir>`.
    #[instrument(skip_all, fields(url = %url, dest = %self.workdir.display()))]
    pub fn clone_recursive(&self, url: &str) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.args(["clone", "--recursive", url]).arg(&self.workdir);
        run_checked("git clone", cmd)?;
        debug!("clone complete");
        Ok(())
    }

    /// Fetch and hard reset an existing clone to its upstream head.
    #[instrument(skip_all, fields(dir = %self.workdir.display()))]
    pub fn refresh(&self) -> Result<()> {
        self.run(&["fetch", "--all", "--prune"])?;
        let head = self.run(&["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"]);
        let target = match head {
            Ok(upstream) if !upstream.trim().is_empty() => upstream.trim().to_string(),
            _ => "HEAD".to_string(),
        };
        self.run(&["reset", "--hard", &target])?;
        self.run(&["submodule", "update", "--init", "--recursive"])?;
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.workdir).args(args);
        run_checked(&format!("git {}", args.first().copied().unwrap_or_default()), cmd)
    }
}

fn run_checked(label: &str, cmd: Command) -> Result<String> {
    let out = run_command_with_timeout(cmd, None, GIT_TIMEOUT, GIT_OUTPUT_LIMIT)?;
    if !out.success() {
        return Err(anyhow!(out.failure_summary(label)));
    }
    Ok(out.stdout_text())
}
