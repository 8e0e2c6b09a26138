//! Canonical on-disk layout under the state directory.

use std::path::{Path, PathBuf};

/// Top-level directories under `state_dir`.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub projects_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub workspace_dir: PathBuf,
}

impl StatePaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let root = state_dir.into();
        Self {
            projects_dir: root.join("projects"),
            cache_dir: root.join("cache"),
            workspace_dir: root.join("workspace"),
            root,
        }
    }

    pub fn project(&self, name: &str) -> ProjectPaths {
        ProjectPaths::new(&self.projects_dir, name)
    }
}

/// All per-project paths (`projects/<name>/...`).
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub dir: PathBuf,
    pub logs_dir: PathBuf,
    pub transcript_log: PathBuf,
    pub transcript_jsonl: PathBuf,
    pub cycles_dir: PathBuf,
    pub output_dir: PathBuf,
    pub success_marker: PathBuf,
    pub failure_note: PathBuf,
    pub error_summary: PathBuf,
    pub unknown_errors: PathBuf,
    pub artifacts_dir: PathBuf,
    pub elapsed_time: PathBuf,
    /// Host copy of text headed for `write_to_file`.
    pub write_staging: PathBuf,
}

impl ProjectPaths {
    pub fn new(projects_dir: &Path, name: &str) -> Self {
        let dir = projects_dir.join(name);
        let logs_dir = dir.join("logs");
        let output_dir = dir.join("output");
        Self {
            transcript_log: logs_dir.join("transcript.log"),
            transcript_jsonl: logs_dir.join("transcript.jsonl"),
            cycles_dir: dir.join("cycles"),
            success_marker: output_dir.join("SUCCESS"),
            failure_note: output_dir.join("FAILURE"),
            error_summary: output_dir.join("error_summary.json"),
            unknown_errors: output_dir.join("unknown_errors.txt"),
            artifacts_dir: output_dir.join("artifacts"),
            elapsed_time: output_dir.join("elapsed_time.txt"),
            write_staging: dir.join("write_staging"),
            logs_dir,
            output_dir,
            dir,
        }
    }

    pub fn cycle_snapshot(&self, cycle: u32) -> PathBuf {
        self.cycles_dir.join(format!("{cycle}.json"))
    }
}
