//! Append-only run transcript (`logs/transcript.log` + `logs/transcript.jsonl`).
//!
//! The text log is what the failure classifier reads; the JSONL file keeps the
//! same entries in machine-readable form.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::types::TranscriptEntry;
use crate::io::paths::ProjectPaths;

#[derive(Debug, Clone)]
pub struct Transcript {
    log_path: PathBuf,
    jsonl_path: PathBuf,
}

impl Transcript {
    pub fn open(paths: &ProjectPaths) -> Result<Self> {
        fs::create_dir_all(&paths.logs_dir)
            .with_context(|| format!("create log dir {}", paths.logs_dir.display()))?;
        Ok(Self {
            log_path: paths.transcript_log.clone(),
            jsonl_path: paths.transcript_jsonl.clone(),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Append a cycle to both logs.
    pub fn append(&self, entry: &TranscriptEntry) -> Result<()> {
        let args = serde_json::to_string(&entry.args).context("serialize command args")?;
        let mut text = format!("=== cycle {} ===\n", entry.cycle);
        if !entry.thoughts.trim().is_empty() {
            text.push_str(&format!("Thoughts: {}\n", entry.thoughts.trim()));
        }
        text.push_str(&format!("Command: {} {args}\n", entry.command));
        text.push_str(&entry.result_header());
        text.push_str(&entry.result);
        text.push_str("\n\n");
        append_to(&self.log_path, &text)?;

        let mut line = serde_json::to_string(entry).context("serialize transcript entry")?;
        line.push('\n');
        append_to(&self.jsonl_path, &line)
    }

    /// Append a free-form note (e.g. a rejected oracle reply) to the text log only.
    pub fn note(&self, note: &str) -> Result<()> {
        append_to(&self.log_path, &format!("[note] {}\n\n", note.trim()))
    }

    /// Full text log, or an empty string if nothing was written.
    pub fn read_text(&self) -> Result<String> {
        if !self.log_path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&self.log_path)
            .with_context(|| format!("read transcript {}", self.log_path.display()))
    }
}

fn append_to(path: &Path, text: &str) -> Result<()> {
    let mut file: File = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}
