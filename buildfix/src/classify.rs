//! Post-run failure classification and remediation note.
//!
//! Rule pass first, then one oracle call for attempts no rule matched. The
//! frequency table lands in `error_summary.json`; the remediation note lands
//! in `FAILURE` and is fed to the next run on the same project.

use std::fs;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::classifier::{
    Category, ErrorSummary, GENERAL_TAG, RuleSet, merge_fallback, parse_fallback_reply,
};
use crate::core::text::truncate_middle;
use crate::io::atomic::{write_atomic, write_json_atomic};
use crate::io::oracle::Oracle;
use crate::io::paths::ProjectPaths;
use crate::io::prompt::PromptEngine;

/// First line of every remediation note.
pub const FEEDBACK_HEADER: &str = "### Feedback from previous installation attempts\n";

const NOTE_TRANSCRIPT_LIMIT: usize = 24_000;
const NOTE_TRANSCRIPT_HEAD: usize = 6_000;
const NOTE_TRANSCRIPT_TAIL: usize = 18_000;

/// Classify a failed run and write its summary and remediation note.
#[instrument(skip_all, fields(project = project, cycles = cycles_used))]
pub fn classify_failure(
    project: &str,
    cycles_used: u32,
    transcript: &str,
    oracle: &dyn Oracle,
    prompts: &PromptEngine,
    paths: &ProjectPaths,
) -> Result<ErrorSummary> {
    fs::create_dir_all(&paths.output_dir)
        .with_context(|| format!("create {}", paths.output_dir.display()))?;

    let report = RuleSet::new()?.classify_transcript(transcript);
    let mut summary = report.summary;
    info!(unmatched = report.unmatched.len(), "rule pass complete");

    if !report.unmatched.is_empty() {
        classify_unmatched(&report.unmatched, &mut summary, oracle, prompts, paths)?;
    }
    write_json_atomic(&paths.error_summary, &summary)?;

    let tags = detected_tags(&summary);
    let note = remediation_note(project, cycles_used, &tags, transcript, oracle, prompts)?;
    write_atomic(&paths.failure_note, &note)?;
    Ok(summary)
}

fn classify_unmatched(
    unmatched: &[String],
    summary: &mut ErrorSummary,
    oracle: &dyn Oracle,
    prompts: &PromptEngine,
    paths: &ProjectPaths,
) -> Result<()> {
    let prompt = prompts.render_classify_fallback(unmatched)?;
    let raw = match oracle.complete(&prompt) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "fallback classification skipped");
            return Ok(());
        }
    };
    write_atomic(&paths.unknown_errors, &raw)?;
    match parse_fallback_reply(&raw) {
        Some(labels) => merge_fallback(summary, &labels),
        None => warn!("fallback classification reply was not a JSON array"),
    }
    Ok(())
}

/// Tags with a non-zero count, `General` entries included as `<category>/General`.
pub fn detected_tags(summary: &ErrorSummary) -> Vec<String> {
    let mut tags = Vec::new();
    for category in Category::ALL {
        let Some(counts) = summary.categories.get(category.as_str()) else {
            continue;
        };
        for (tag, count) in counts {
            if *count == 0 {
                continue;
            }
            if tag == GENERAL_TAG {
                tags.push(format!("{}/{GENERAL_TAG}", category.as_str()));
            } else {
                tags.push(tag.clone());
            }
        }
    }
    if summary.unknown > 0 {
        tags.push("Unknown".to_string());
    }
    tags
}

fn remediation_note(
    project: &str,
    cycles_used: u32,
    tags: &[String],
    transcript: &str,
    oracle: &dyn Oracle,
    prompts: &PromptEngine,
) -> Result<String> {
    let excerpt = truncate_middle(
        transcript,
        NOTE_TRANSCRIPT_LIMIT,
        NOTE_TRANSCRIPT_HEAD,
        NOTE_TRANSCRIPT_TAIL,
    );
    let prompt = prompts.render_remediation(project, cycles_used, tags, &excerpt)?;
    let body = match oracle.complete(&prompt) {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        Ok(_) => fallback_note(cycles_used, tags),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "remediation note falls back to detected tags");
            fallback_note(cycles_used, tags)
        }
    };
    Ok(format!("{FEEDBACK_HEADER}{body}\n"))
}

fn fallback_note(cycles_used: u32, tags: &[String]) -> String {
    if tags.is_empty() {
        return format!(
            "The previous attempt used {cycles_used} cycles without producing an artifact. No known failure cause was detected."
        );
    }
    format!(
        "The previous attempt used {cycles_used} cycles without producing an artifact. Detected failure causes: {}.",
        tags.join(", ")
    )
}
