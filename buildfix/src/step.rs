//! One cycle of the agent loop: THINK, DISPATCH, RECORD.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::commands::{CommandContext, Outcome, Registry};
use crate::core::budget::CycleBudget;
use crate::core::decision::{Decision, DecisionParser};
use crate::core::text::truncate_middle;
use crate::core::types::TranscriptEntry;
use crate::io::config::AppConfig;
use crate::io::oracle::Oracle;
use crate::io::paths::ProjectPaths;
use crate::io::prompt::{CyclePrompt, PromptEngine};
use crate::io::run_state::{RunSnapshot, write_snapshot};
use crate::io::sandbox::Sandbox;
use crate::io::session::Session;
use crate::io::spinner::Spinner;
use crate::io::transcript::Transcript;

/// Inputs that stay fixed for a whole run.
pub struct StepEnv<'a> {
    pub project: &'a str,
    pub config: &'a AppConfig,
    pub registry: &'a Registry,
    pub decisions: &'a DecisionParser,
    pub oracle: &'a dyn Oracle,
    pub prompts: &'a PromptEngine,
    pub sandbox: &'a dyn Sandbox,
    pub paths: &'a ProjectPaths,
    pub transcript: &'a Transcript,
    /// Remediation note from the previous failed run, if any.
    pub past_attempt: Option<&'a str>,
}

/// Mutable loop state carried between cycles.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub budget: CycleBudget,
    pub consecutive_unparsable: u32,
    /// Why the last reply was rejected; shown once in the next prompt.
    pub format_error: Option<String>,
    pub entries: Vec<TranscriptEntry>,
    pub started_at: String,
}

impl LoopState {
    pub fn new(cycle_limit: u32, started_at: impl Into<String>) -> Self {
        Self {
            budget: CycleBudget::new(cycle_limit),
            consecutive_unparsable: 0,
            format_error: None,
            entries: Vec::new(),
            started_at: started_at.into(),
        }
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A command ran and consumed a cycle.
    Dispatched {
        cycle: u32,
        command: String,
        finished: bool,
    },
    /// The reply was not a usable decision. `charged` is true once the
    /// tolerance for consecutive bad replies is used up.
    Unparsable { reason: String, charged: bool },
    /// The oracle could not produce a reply at all.
    OracleFailed { reason: String },
}

/// Run one THINK/DISPATCH/RECORD cycle.
///
/// The caller must not call this once the budget is exhausted.
#[instrument(skip_all, fields(project = env.project, used = state.budget.used()))]
pub fn run_step(env: &StepEnv<'_>, session: &mut Session, state: &mut LoopState) -> Result<StepOutcome> {
    let commands = env.registry.command_prompt(env.config);
    let prompt = env.prompts.render_cycle(&CyclePrompt {
        project: env.project,
        commands: &commands,
        cycle: state.budget.used() + 1,
        cycle_limit: state.budget.limit(),
        past_attempt: env.past_attempt,
        last: state.entries.last(),
        format_error: state.format_error.as_deref(),
    })?;

    let mut spinner = Spinner::start("Thinking...", env.config.plain_output);
    let reply = env.oracle.complete(&prompt);
    spinner.stop();
    let reply = match reply {
        Ok(reply) => reply,
        Err(err) => {
            let reason = format!("{err:#}");
            warn!(err = %reason, "oracle failed");
            env.transcript.note(&format!("oracle failed: {reason}"))?;
            return Ok(StepOutcome::OracleFailed { reason });
        }
    };

    match env.decisions.parse(&reply) {
        Decision::Unparsable { reason } => record_unparsable(env, state, reason),
        Decision::Command {
            thoughts,
            name,
            args,
        } => {
            state.consecutive_unparsable = 0;
            state.format_error = None;

            let cycle = state.budget.charge()?;
            info!(cycle, command = %name, "dispatching");
            let outcome = {
                let mut ctx = CommandContext {
                    session,
                    sandbox: env.sandbox,
                    config: env.config,
                    paths: env.paths,
                };
                env.registry.dispatch(&name, &args, &mut ctx)
            };
            let finished = matches!(outcome, Outcome::Finished(_));
            let cfg = env.config;
            let result = truncate_middle(
                outcome.text(),
                cfg.result_limit_chars,
                cfg.result_head_chars,
                cfg.result_tail_chars,
            );
            let entry = TranscriptEntry {
                cycle,
                thoughts,
                command: name.clone(),
                args,
                result,
            };
            env.transcript.append(&entry)?;
            state.entries.push(entry);
            snapshot(env, state, cycle)?;
            Ok(StepOutcome::Dispatched {
                cycle,
                command: name,
                finished,
            })
        }
    }
}

fn record_unparsable(env: &StepEnv<'_>, state: &mut LoopState, reason: String) -> Result<StepOutcome> {
    state.consecutive_unparsable += 1;
    warn!(
        consecutive = state.consecutive_unparsable,
        reason = %reason,
        "unparsable oracle reply"
    );
    env.transcript
        .note(&format!("unparsable reply: {reason}"))?;
    state.format_error = Some(reason.clone());

    let charged = state.consecutive_unparsable > env.config.max_consecutive_unparsable;
    if charged {
        let cycle = state.budget.charge()?;
        debug!(cycle, "charged a cycle for repeated unparsable replies");
        snapshot(env, state, cycle)?;
    }
    Ok(StepOutcome::Unparsable { reason, charged })
}

fn snapshot(env: &StepEnv<'_>, state: &LoopState, cycle: u32) -> Result<()> {
    let snapshot = RunSnapshot {
        project: env.project.to_string(),
        cycle,
        cycle_limit: state.budget.limit(),
        cycles_remaining: state.budget.remaining(),
        consecutive_unparsable: state.consecutive_unparsable,
        started_at: state.started_at.clone(),
        entries: state.entries.clone(),
    };
    write_snapshot(&env.paths.cycle_snapshot(cycle), &snapshot)
        .with_context(|| format!("write snapshot for cycle {cycle}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_fixtures::{fast_config, prompt, sandbox_with};
    use crate::io::run_state::load_snapshot;
    use crate::test_support::{ScriptedOracle, ScriptedReply, ScriptedSandbox};

    struct Fixture {
        _temp: tempfile::TempDir,
        config: AppConfig,
        registry: Registry,
        decisions: DecisionParser,
        prompts: PromptEngine,
        paths: ProjectPaths,
        transcript: Transcript,
        host: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let paths = ProjectPaths::new(&temp.path().join("projects"), "demo");
            let transcript = Transcript::open(&paths).expect("transcript");
            let host = temp.path().join("host");
            std::fs::create_dir_all(&host).expect("mkdir");
            Self {
                config: fast_config(),
                registry: Registry::with_builtins().expect("registry"),
                decisions: DecisionParser::new().expect("decisions"),
                prompts: PromptEngine::new().expect("prompts"),
                paths,
                transcript,
                host,
                _temp: temp,
            }
        }

        fn env<'a>(&'a self, oracle: &'a ScriptedOracle, sandbox: &'a ScriptedSandbox) -> StepEnv<'a> {
            StepEnv {
                project: "demo",
                config: &self.config,
                registry: &self.registry,
                decisions: &self.decisions,
                oracle,
                prompts: &self.prompts,
                sandbox,
                paths: &self.paths,
                transcript: &self.transcript,
                past_attempt: None,
            }
        }
    }

    fn decision(name: &str, args: &str) -> String {
        format!("{{\"thoughts\": \"t\", \"command\": {{\"name\": \"{name}\", \"args\": {args}}}}}")
    }

    #[test]
    fn dispatch_records_transcript_and_snapshot() {
        let fx = Fixture::new();
        let sandbox = sandbox_with(vec![ScriptedReply::text(format!(
            "ls\napp gradlew\n{}",
            prompt()
        ))]);
        let oracle = ScriptedOracle::texts([decision("linux_terminal", r#"{"command": "ls"}"#)]);
        let mut session = Session::provision(&sandbox, &fx.config, "demo", &fx.host).expect("session");
        let mut state = LoopState::new(5, "t0");

        let outcome = run_step(&fx.env(&oracle, &sandbox), &mut session, &mut state).expect("step");
        assert_eq!(
            outcome,
            StepOutcome::Dispatched {
                cycle: 1,
                command: "linux_terminal".to_string(),
                finished: false,
            }
        );
        assert_eq!(state.budget.remaining(), 4);
        assert_eq!(state.entries[0].result, "app gradlew");

        let log = fx.transcript.read_text().expect("log");
        assert!(log.contains("Command linux_terminal returned: app gradlew"));
        let snap = load_snapshot(&fx.paths.cycle_snapshot(1)).expect("snapshot");
        assert_eq!(snap.cycles_remaining, 4);
        assert_eq!(snap.entries.len(), 1);
    }

    #[test]
    fn unknown_command_still_consumes_a_cycle() {
        let fx = Fixture::new();
        let sandbox = sandbox_with(Vec::new());
        let oracle = ScriptedOracle::texts([decision("fly", "{}")]);
        let mut session = Session::provision(&sandbox, &fx.config, "demo", &fx.host).expect("session");
        let mut state = LoopState::new(2, "t0");
        run_step(&fx.env(&oracle, &sandbox), &mut session, &mut state).expect("step");
        assert_eq!(state.budget.used(), 1);
        assert!(state.entries[0].result.starts_with("Cannot execute 'fly'"));
    }

    #[test]
    fn unparsable_replies_are_free_until_tolerance_is_used() {
        let fx = Fixture::new();
        let sandbox = sandbox_with(Vec::new());
        let oracle = ScriptedOracle::texts(["nope", "still nope", "no", "never"]);
        let calls = oracle.call_log();
        let mut session = Session::provision(&sandbox, &fx.config, "demo", &fx.host).expect("session");
        let mut state = LoopState::new(5, "t0");
        let env = fx.env(&oracle, &sandbox);

        for _ in 0..3 {
            let outcome = run_step(&env, &mut session, &mut state).expect("step");
            assert!(matches!(outcome, StepOutcome::Unparsable { charged: false, .. }));
        }
        assert_eq!(state.budget.used(), 0);
        let outcome = run_step(&env, &mut session, &mut state).expect("step");
        assert!(matches!(outcome, StepOutcome::Unparsable { charged: true, .. }));
        assert_eq!(state.budget.used(), 1);

        let prompts = calls.prompts();
        assert!(!prompts[0].contains("## Format correction"));
        assert!(prompts[1].contains("## Format correction"));
    }

    #[test]
    fn long_results_are_truncated_in_the_middle() {
        let mut fx = Fixture::new();
        fx.config.result_limit_chars = 20;
        fx.config.result_head_chars = 5;
        fx.config.result_tail_chars = 5;
        let body = format!("HEAD-{}-TAIL", "x".repeat(50));
        let sandbox = sandbox_with(vec![ScriptedReply::text(format!(
            "cat 'big'\n{body}\n{}",
            prompt()
        ))]);
        let oracle = ScriptedOracle::texts([decision("read_file", r#"{"file_path": "big"}"#)]);
        let mut session = Session::provision(&sandbox, &fx.config, "demo", &fx.host).expect("session");
        let mut state = LoopState::new(3, "t0");
        run_step(&fx.env(&oracle, &sandbox), &mut session, &mut state).expect("step");
        assert_eq!(state.entries[0].result, "HEAD-  ...  -TAIL");
    }

    #[test]
    fn oracle_failure_is_reported_without_charging() {
        let fx = Fixture::new();
        let sandbox = sandbox_with(Vec::new());
        let oracle = ScriptedOracle::new(Vec::new());
        let mut session = Session::provision(&sandbox, &fx.config, "demo", &fx.host).expect("session");
        let mut state = LoopState::new(3, "t0");
        let outcome = run_step(&fx.env(&oracle, &sandbox), &mut session, &mut state).expect("step");
        assert!(matches!(outcome, StepOutcome::OracleFailed { .. }));
        assert_eq!(state.budget.used(), 0);
    }
}
