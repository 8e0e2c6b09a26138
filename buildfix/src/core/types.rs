//! Shared deterministic types for buildfix core logic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Final status of a project run, as recorded in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

/// One executed cycle: what the oracle decided and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// 1-based cycle number.
    pub cycle: u32,
    pub thoughts: String,
    pub command: String,
    pub args: Map<String, Value>,
    /// Result text after truncation.
    pub result: String,
}

impl TranscriptEntry {
    /// Header line used in the text transcript and recognised by the classifier.
    pub fn result_header(&self) -> String {
        format!("Command {} returned: ", self.command)
    }
}
