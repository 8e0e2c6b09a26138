//! Prompt rendering for the cycle loop and the post-run classifier.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::classifier::{Category, RULES};
use crate::core::types::TranscriptEntry;

const CYCLE_TEMPLATE: &str = include_str!("prompts/cycle.md");
const CLASSIFY_FALLBACK_TEMPLATE: &str = include_str!("prompts/classify_fallback.md");
const REMEDIATION_TEMPLATE: &str = include_str!("prompts/remediation.md");

/// Inputs for one THINK prompt.
#[derive(Debug, Clone, Copy)]
pub struct CyclePrompt<'a> {
    pub project: &'a str,
    /// Numbered command listing from the registry.
    pub commands: &'a str,
    pub cycle: u32,
    pub cycle_limit: u32,
    /// Remediation note left by a previous failed run.
    pub past_attempt: Option<&'a str>,
    /// Only the most recent command/result pair is shown.
    pub last: Option<&'a TranscriptEntry>,
    pub format_error: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LastCommand<'a> {
    command: &'a str,
    args: String,
    header: String,
    result: &'a str,
}

#[derive(Debug, Serialize)]
struct CategoryContext {
    name: &'static str,
    tags: Vec<&'static str>,
}

pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("cycle", CYCLE_TEMPLATE)
            .context("cycle template")?;
        env.add_template("classify_fallback", CLASSIFY_FALLBACK_TEMPLATE)
            .context("classify fallback template")?;
        env.add_template("remediation", REMEDIATION_TEMPLATE)
            .context("remediation template")?;
        Ok(Self { env })
    }

    pub fn render_cycle(&self, input: &CyclePrompt<'_>) -> Result<String> {
        let last = input
            .last
            .map(|entry| -> Result<LastCommand<'_>> {
                Ok(LastCommand {
                    command: &entry.command,
                    args: serde_json::to_string(&entry.args).context("serialize args")?,
                    header: entry.result_header(),
                    result: &entry.result,
                })
            })
            .transpose()?;
        let template = self.env.get_template("cycle")?;
        let rendered = template.render(context! {
            project => input.project,
            commands => input.commands.trim_end(),
            cycle => input.cycle,
            cycle_limit => input.cycle_limit,
            past_attempt => input.past_attempt.map(str::trim).filter(|s| !s.is_empty()),
            last => last,
            format_error => input.format_error.map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    /// Ask for `{category, tag}` labels for attempts no rule matched.
    pub fn render_classify_fallback(&self, attempts: &[String]) -> Result<String> {
        let categories: Vec<CategoryContext> = Category::ALL
            .into_iter()
            .map(|category| CategoryContext {
                name: category.as_str(),
                tags: RULES
                    .iter()
                    .filter(|rule| rule.category == category)
                    .map(|rule| rule.tag)
                    .collect(),
            })
            .collect();
        let template = self.env.get_template("classify_fallback")?;
        let rendered = template.render(context! {
            categories => categories,
            attempts => attempts,
        })?;
        Ok(rendered)
    }

    pub fn render_remediation(
        &self,
        project: &str,
        cycles: u32,
        tags: &[String],
        transcript: &str,
    ) -> Result<String> {
        let template = self.env.get_template("remediation")?;
        let rendered = template.render(context! {
            project => project,
            cycles => cycles,
            tags => tags,
            transcript => transcript.trim(),
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn engine() -> PromptEngine {
        PromptEngine::new().expect("templates")
    }

    fn base<'a>(commands: &'a str) -> CyclePrompt<'a> {
        CyclePrompt {
            project: "demo-app",
            commands,
            cycle: 1,
            cycle_limit: 40,
            past_attempt: None,
            last: None,
            format_error: None,
        }
    }

    #[test]
    fn first_cycle_prompt_lists_commands_and_trigger() {
        let out = engine()
            .render_cycle(&base("1. linux_terminal: Run, args: {}\n"))
            .expect("render");
        assert!(out.contains("`demo-app`"));
        assert!(out.contains("1. linux_terminal: Run, args: {}"));
        assert!(out.contains("No command has been run yet."));
        assert!(out.trim_end().ends_with(
            "Determine exactly one command to use based on the given goals and the progress you have made so far, and respond using the JSON schema specified previously:"
        ));
        assert!(!out.contains("## Past attempt"));
        assert!(!out.contains("## Format correction"));
    }

    #[test]
    fn later_cycle_shows_only_last_result_and_corrections() {
        let mut args = Map::new();
        args.insert("command".to_string(), json!("./gradlew build"));
        let last = TranscriptEntry {
            cycle: 3,
            thoughts: "build".to_string(),
            command: "linux_terminal".to_string(),
            args,
            result: "BUILD FAILED in 3s".to_string(),
        };
        let input = CyclePrompt {
            cycle: 4,
            past_attempt: Some("### Feedback from previous installation attempts\nInstall JDK 17."),
            last: Some(&last),
            format_error: Some("response is not a JSON object"),
            ..base("1. x\n")
        };
        let out = engine().render_cycle(&input).expect("render");
        assert!(out.contains("Install JDK 17."));
        assert!(out.contains("cycle 4 of 40"));
        assert!(out.contains("linux_terminal {\"command\":\"./gradlew build\"}"));
        assert!(out.contains("Command linux_terminal returned: BUILD FAILED in 3s"));
        assert!(out.contains("response is not a JSON object"));
    }

    #[test]
    fn fallback_prompt_lists_tags_and_attempts() {
        let out = engine()
            .render_classify_fallback(&["weird failure\nBUILD FAILED in 1s".to_string()])
            .expect("render");
        assert!(out.contains("- Process Issue: MISSING_LOCAL_PROPERTIES"));
        assert!(out.contains("### Attempt 1\nweird failure"));
    }

    #[test]
    fn remediation_prompt_includes_transcript() {
        let out = engine()
            .render_remediation("demo", 40, &["JDK_VERSION".to_string()], "=== cycle 1 ===")
            .expect("render");
        assert!(out.contains("failed after 40 cycles"));
        assert!(out.contains("JDK_VERSION"));
        assert!(out.contains("=== cycle 1 ==="));
    }
}
