//! `buildfix report`: aggregate recorded outcomes across projects.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result};

use crate::core::classifier::{ErrorSummary, GENERAL_TAG};
use crate::core::types::RunStatus;
use crate::io::cache::BuildCache;
use crate::io::paths::StatePaths;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRow {
    pub name: String,
    pub status: RunStatus,
    pub cycles: u32,
}

#[derive(Debug, Default, PartialEq)]
pub struct ResultsSummary {
    pub projects: Vec<ProjectRow>,
    pub succeeded: usize,
    pub failed: usize,
    pub avg_cycles: Option<f64>,
    /// Failure tag (or `<category>/General`, `Unknown`) to number of projects.
    pub tag_counts: BTreeMap<String, u32>,
}

/// Read every cache entry and, for failed projects, its error summary.
///
/// Unreadable summaries are reported as warnings, not errors.
pub fn aggregate(paths: &StatePaths) -> Result<(ResultsSummary, Vec<String>)> {
    let mut summary = ResultsSummary::default();
    let mut warnings = Vec::new();
    let mut total_cycles = 0u64;

    for (name, entry) in BuildCache::new(&paths.cache_dir).list()? {
        match entry.status {
            RunStatus::Succeeded => summary.succeeded += 1,
            RunStatus::Failed => summary.failed += 1,
        }
        total_cycles += u64::from(entry.cycle_count);

        let summary_path = paths.project(&name).error_summary;
        if entry.status == RunStatus::Failed && summary_path.exists() {
            let parsed: Result<ErrorSummary> = fs::read_to_string(&summary_path)
                .with_context(|| format!("read {}", summary_path.display()))
                .and_then(|contents| serde_json::from_str(&contents).context("parse error summary"));
            match parsed {
                Ok(errors) => add_tags(&mut summary.tag_counts, &errors),
                Err(err) => warnings.push(format!("skip {}: {err:#}", summary_path.display())),
            }
        }

        summary.projects.push(ProjectRow {
            name,
            status: entry.status,
            cycles: entry.cycle_count,
        });
    }

    if !summary.projects.is_empty() {
        summary.avg_cycles = Some(total_cycles as f64 / summary.projects.len() as f64);
    }
    Ok((summary, warnings))
}

fn add_tags(counts: &mut BTreeMap<String, u32>, errors: &ErrorSummary) {
    for (category, tags) in &errors.categories {
        for (tag, count) in tags {
            if *count == 0 {
                continue;
            }
            let label = if tag == GENERAL_TAG {
                format!("{category}/{GENERAL_TAG}")
            } else {
                tag.clone()
            };
            *counts.entry(label).or_insert(0) += count;
        }
    }
    if errors.unknown > 0 {
        *counts.entry("Unknown".to_string()).or_insert(0) += errors.unknown;
    }
}

/// Plain-text rendering, one `report:` line per fact.
pub fn render(summary: &ResultsSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "report: projects={}", summary.projects.len());
    let _ = writeln!(
        out,
        "report: succeeded={} failed={}",
        summary.succeeded, summary.failed
    );
    if let Some(avg) = summary.avg_cycles {
        let _ = writeln!(out, "report: avg_cycles={avg:.2}");
    }
    for row in &summary.projects {
        let _ = writeln!(
            out,
            "report: project {} {} cycles={}",
            row.name,
            row.status.as_str(),
            row.cycles
        );
    }
    let mut tags: Vec<(&String, &u32)> = summary.tag_counts.iter().collect();
    tags.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    for (tag, count) in tags {
        let _ = writeln!(out, "report: tag {tag} {count}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{Category, Classification};
    use crate::io::atomic::write_json_atomic;
    use crate::io::cache::CacheEntry;

    fn entry(status: RunStatus, cycles: u32) -> CacheEntry {
        CacheEntry {
            hash: "h".to_string(),
            status,
            cycle_count: cycles,
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            ended_at: "2026-01-01T00:10:00+00:00".to_string(),
        }
    }

    #[test]
    fn aggregates_cache_and_error_summaries() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = StatePaths::new(temp.path());
        let cache = BuildCache::new(&paths.cache_dir);
        cache.store("alpha", &entry(RunStatus::Succeeded, 4)).expect("store");
        cache.store("beta", &entry(RunStatus::Failed, 40)).expect("store");
        cache.store("gamma", &entry(RunStatus::Failed, 10)).expect("store");

        let mut errors = ErrorSummary::default();
        errors.record(Classification {
            category: Category::Environment,
            tag: "JDK_VERSION",
        });
        errors.record_general(Category::Project);
        write_json_atomic(&paths.project("beta").error_summary, &errors).expect("write");
        fs::create_dir_all(&paths.project("gamma").output_dir).expect("mkdir");
        fs::write(&paths.project("gamma").error_summary, "not json").expect("write");

        let (summary, warnings) = aggregate(&paths).expect("aggregate");
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.avg_cycles, Some(18.0));
        assert_eq!(summary.tag_counts.get("JDK_VERSION"), Some(&1));
        assert_eq!(summary.tag_counts.get("Project Issue/General"), Some(&1));
        assert_eq!(warnings.len(), 1);

        let text = render(&summary);
        assert!(text.contains("report: succeeded=1 failed=2"));
        assert!(text.contains("report: project beta failed cycles=40"));
        assert!(text.contains("report: tag JDK_VERSION 1"));
    }

    #[test]
    fn empty_state_has_no_average() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&StatePaths::new(temp.path())).expect("aggregate");
        assert!(summary.projects.is_empty());
        assert!(summary.avg_cycles.is_none());
        assert!(warnings.is_empty());
    }
}
