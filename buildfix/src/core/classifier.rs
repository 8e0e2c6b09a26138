//! Rule-based classification of build failures found in a run transcript.
//!
//! Rules are checked in table order and the first matching pattern wins, so the
//! position of a rule in [`RULES`] is its priority.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use anyhow::{Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::text::outermost_fragment;

/// Header written by the loop in front of every shell command result.
pub const TERMINAL_RESULT_HEADER: &str = "Command linux_terminal returned";

pub const GENERAL_TAG: &str = "General";

/// Failure category used in summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Process,
    Environment,
    Project,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Process, Category::Environment, Category::Project];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Process => "Process Issue",
            Category::Environment => "Environment Issue",
            Category::Project => "Project Issue",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(label.trim()))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A static classification rule.
#[derive(Debug)]
pub struct Rule {
    pub category: Category,
    pub tag: &'static str,
    pub patterns: &'static [&'static str],
}

pub static RULES: &[Rule] = &[
    Rule {
        category: Category::Process,
        tag: "MISSING_LOCAL_PROPERTIES",
        patterns: &[
            r"SDK location not found",
            r"assert localPropertiesFile",
            r"local\.properties file not found",
        ],
    },
    Rule {
        category: Category::Process,
        tag: "MISSING_KEYSTORE",
        patterns: &[
            r"Keystore file '.*' not found for signing config",
            r"(keystore|signing)\.properties \(No such file or directory\)",
        ],
    },
    Rule {
        category: Category::Process,
        tag: "MISSING_GRADLE_WRAPPER",
        patterns: &[r"Could not find or load main class org\.gradle\.wrapper\.GradleWrapperMain"],
    },
    Rule {
        category: Category::Process,
        tag: "NON_DEFAULT_BUILD_COMMAND",
        patterns: &[r"Task '.*' not found"],
    },
    Rule {
        category: Category::Environment,
        tag: "GRADLE_BUILD_SYSTEM",
        patterns: &[r"Failed to create Jar file"],
    },
    Rule {
        category: Category::Environment,
        tag: "GRADLE_VERSION",
        patterns: &[r"Failed to notify project evaluation listener"],
    },
    Rule {
        category: Category::Environment,
        tag: "GRADLE_JDK_MISMATCH",
        patterns: &[
            r"Gradle requires JVM (\d+)",
            r"compiler does not export",
            r"Could not initialize class org\.codehaus\.groovy",
        ],
    },
    Rule {
        category: Category::Environment,
        tag: "JAVA_KOTLIN_MISMATCH",
        patterns: &[r"Inconsistent JVM Target Compatibility Between Java and Kotlin Tasks"],
    },
    Rule {
        category: Category::Environment,
        tag: "JDK_VERSION",
        patterns: &[
            r"unrecognized JVM option",
            r"Cannot find a Java installation on your machine",
            r"invalid source release: (\d+)",
            r" Run this build using a Java (\d+) or newer JVM",
            r"Unsupported class file major version (\d+)",
            r"Android Gradle plugin requires Java (\d+)",
            r"compiled by a more recent version of the Java Runtime",
            r"Could not determine java version from",
        ],
    },
    Rule {
        category: Category::Environment,
        tag: "ANDROID_SDK_VERSION",
        patterns: &[r"Failed to find Build Tools revision"],
    },
    Rule {
        category: Category::Environment,
        tag: "MISSING_NDK",
        patterns: &[r"No version of NDK matched"],
    },
    Rule {
        category: Category::Environment,
        tag: "NO_DISK_SPACE",
        patterns: &[r"No space left on device"],
    },
    Rule {
        category: Category::Environment,
        tag: "MISSING_DEPENDENCY",
        patterns: &[
            r"Could not resolve all (?:artifacts|files|task dependencies|dependencies) for configuration",
        ],
    },
    Rule {
        category: Category::Project,
        tag: "CONFIG_VERSION_CONFLICT",
        patterns: &[r"try editing the distributionUrl"],
    },
    Rule {
        category: Category::Project,
        tag: "COMPILATION_ERROR",
        patterns: &[r"Compilation failed"],
    },
];

/// [`RULES`] with their patterns compiled, in priority order.
pub struct RuleSet {
    compiled: Vec<(&'static Rule, Vec<Regex>)>,
}

impl RuleSet {
    pub fn new() -> Result<Self> {
        Self::compile(RULES)
    }

    pub fn compile(rules: &'static [Rule]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regexes = rule
                .patterns
                .iter()
                .map(|pattern| Regex::new(pattern))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| anyhow!("invalid pattern for {}: {err}", rule.tag))?;
            compiled.push((rule, regexes));
        }
        Ok(Self { compiled })
    }

    /// Classify one attempt log; the first matching rule wins.
    pub fn classify_attempt(&self, log: &str) -> Option<Classification> {
        self.compiled.iter().find_map(|(rule, regexes)| {
            regexes
                .iter()
                .any(|re| re.is_match(log))
                .then_some(Classification {
                    category: rule.category,
                    tag: rule.tag,
                })
        })
    }

    /// Rule-table pass over a whole transcript.
    pub fn classify_transcript(&self, transcript: &str) -> ClassifyReport {
        let mut report = ClassifyReport::default();
        for attempt in segment_attempts(transcript) {
            match self.classify_attempt(&attempt) {
                Some(classification) => report.summary.record(classification),
                None => report.unmatched.push(attempt),
            }
        }
        report
    }
}

/// Category and tag assigned to a build attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub tag: &'static str,
}

/// Split a transcript into failed build attempts.
///
/// An attempt starts at a `FAILURE: Build` line or a shell result header and
/// ends at `BUILD FAILED in`. A missing wrapper main class line is an attempt
/// on its own. Attempts that never reach `BUILD FAILED in` are dropped.
pub fn segment_attempts(transcript: &str) -> Vec<String> {
    let mut attempts = Vec::new();
    let mut current = String::new();
    let mut logging = false;
    for line in transcript.lines() {
        if line.contains("Could not find or load main class org.gradle.wrapper.GradleWrapperMain") {
            attempts.push(line.trim().to_string());
        }
        if line.contains("FAILURE: Build") || line.contains(TERMINAL_RESULT_HEADER) {
            current.clear();
            logging = true;
        }
        if logging {
            current.push_str(line);
            current.push('\n');
        }
        if line.contains("BUILD FAILED in") {
            logging = false;
            attempts.push(current.trim().to_string());
            current.clear();
        }
    }
    attempts
}

/// Frequency table persisted as `error_summary.json`.
///
/// Serialized as `{"Unknown": n, "<category>": {"General": n, "<TAG>": n, ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    #[serde(rename = "Unknown")]
    pub unknown: u32,
    #[serde(flatten)]
    pub categories: BTreeMap<String, BTreeMap<String, u32>>,
    #[serde(skip)]
    seen: BTreeSet<&'static str>,
}

impl Default for ErrorSummary {
    fn default() -> Self {
        let mut categories: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        for category in Category::ALL {
            categories
                .entry(category.as_str().to_string())
                .or_default()
                .insert(GENERAL_TAG.to_string(), 0);
        }
        for rule in RULES {
            categories
                .entry(rule.category.as_str().to_string())
                .or_default()
                .insert(rule.tag.to_string(), 0);
        }
        Self {
            unknown: 0,
            categories,
            seen: BTreeSet::new(),
        }
    }
}

impl ErrorSummary {
    /// Count a tagged failure; each tag counts at most once per run.
    pub fn record(&mut self, classification: Classification) {
        if !self.seen.insert(classification.tag) {
            return;
        }
        *self.slot(classification.category, classification.tag) += 1;
    }

    pub fn record_general(&mut self, category: Category) {
        *self.slot(category, GENERAL_TAG) += 1;
    }

    pub fn record_unknown(&mut self) {
        self.unknown += 1;
    }

    pub fn count(&self, category: Category, tag: &str) -> u32 {
        self.categories
            .get(category.as_str())
            .and_then(|tags| tags.get(tag))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of every counter, including `Unknown`.
    pub fn total(&self) -> u32 {
        self.unknown
            + self
                .categories
                .values()
                .flat_map(BTreeMap::values)
                .sum::<u32>()
    }

    fn slot(&mut self, category: Category, tag: &str) -> &mut u32 {
        self.categories
            .entry(category.as_str().to_string())
            .or_default()
            .entry(tag.to_string())
            .or_insert(0)
    }
}

/// Result of [`RuleSet::classify_transcript`].
#[derive(Debug, Clone, Default)]
pub struct ClassifyReport {
    pub summary: ErrorSummary,
    /// Attempts no rule matched, in transcript order.
    pub unmatched: Vec<String>,
}

/// One label returned by the oracle for an unmatched attempt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FallbackLabel {
    #[serde(alias = "taxonomy")]
    pub category: String,
    #[serde(default)]
    pub tag: Option<String>,
}

/// Parse the oracle's JSON array reply, directly or from the outermost `[...]`.
pub fn parse_fallback_reply(raw: &str) -> Option<Vec<FallbackLabel>> {
    if let Ok(labels) = serde_json::from_str::<Vec<FallbackLabel>>(raw.trim()) {
        return Some(labels);
    }
    let fragment = outermost_fragment(raw, '[', ']')?;
    serde_json::from_str(fragment).ok()
}

/// Merge oracle labels into the summary.
///
/// Known category with a known tag counts that tag (deduplicated), a known
/// category alone counts `General`, anything else counts `Unknown`.
pub fn merge_fallback(summary: &mut ErrorSummary, labels: &[FallbackLabel]) {
    for label in labels {
        let Some(category) = Category::from_label(&label.category) else {
            summary.record_unknown();
            continue;
        };
        let rule = label.tag.as_deref().and_then(|tag| {
            RULES
                .iter()
                .find(|rule| rule.category == category && rule.tag.eq_ignore_ascii_case(tag.trim()))
        });
        match rule {
            Some(rule) => summary.record(Classification {
                category: rule.category,
                tag: rule.tag,
            }),
            None => summary.record_general(category),
        }
    }
}
