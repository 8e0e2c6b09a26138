//! Project-level lifecycle tests: cache, provisioning, loop, classification.
//!
//! These drive `Runner` end to end with a scripted sandbox and oracle, so no
//! Docker daemon or model is needed.

use std::fs;
use std::path::{Path, PathBuf};

use buildfix::classify::FEEDBACK_HEADER;
use buildfix::core::classifier::{Category, ErrorSummary};
use buildfix::core::types::RunStatus;
use buildfix::exit_codes;
use buildfix::io::cache::{BuildCache, CacheEntry, compute_key};
use buildfix::io::channel::{PROMPT_PREFIX, SENTINEL};
use buildfix::io::config::AppConfig;
use buildfix::io::workspace::ProjectSource;
use buildfix::run::{ProjectOutcome, RunOptions, Runner, exit_code};
use buildfix::test_support::{
    OracleReply, ScriptedOracle, ScriptedReply, ScriptedSandbox, TestProject,
};

const DONE: &str =
    r#"{"thoughts": "apk is there", "command": {"name": "goals_accomplished", "args": {"reason": "assembleDebug passed"}}}"#;
const BUILD: &str = r#"{"thoughts": "try a build", "command": {"name": "linux_terminal", "args": {"command": "./gradlew assembleDebug"}}}"#;

fn prompt() -> String {
    format!("{PROMPT_PREFIX}{SENTINEL} ")
}

/// Shell that answers setup and the provisioning `cd`, then `replies`.
fn sandbox(replies: Vec<ScriptedReply>) -> ScriptedSandbox {
    let mut script = vec![ScriptedReply::text(prompt()), ScriptedReply::text(prompt())];
    script.extend(replies);
    ScriptedSandbox::new(script)
}

struct Fixture {
    _state: tempfile::TempDir,
    config: AppConfig,
    project: TestProject,
}

impl Fixture {
    fn new() -> Self {
        let state = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.state_dir = state.path().join("runs");
        config.plain_output = true;
        config.channel.read_timeout_ms = 10;
        config.channel.init_timeout_secs = 1;
        config.channel.command_timeout_secs = 1;
        config.channel.grace_ms = 20;
        Self {
            _state: state,
            config,
            project: TestProject::new().expect("project"),
        }
    }

    fn output(&self, file: &str) -> PathBuf {
        self.config
            .state_dir
            .join("projects/app/output")
            .join(file)
    }

    fn run(&self, sandbox: &ScriptedSandbox, oracle: &ScriptedOracle, opts: RunOptions) -> ProjectOutcome {
        let runner = Runner::new(&self.config, sandbox, oracle).expect("runner");
        runner
            .run_project("app", self.project.path(), opts)
            .expect("run project")
    }
}

fn budget(cycles: u32) -> RunOptions {
    RunOptions {
        cycle_limit: Some(cycles),
        ..RunOptions::default()
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|err| panic!("read {}: {err}", path.display()))
}

#[test]
fn unchanged_project_is_a_cache_hit_without_sandbox_activity() {
    let fx = Fixture::new();
    let key = compute_key(fx.project.path(), &fx.config.cache).expect("key");
    let entry = CacheEntry {
        hash: key,
        status: RunStatus::Succeeded,
        cycle_count: 6,
        started_at: "2026-01-01T00:00:00+00:00".to_string(),
        ended_at: "2026-01-01T00:05:00+00:00".to_string(),
    };
    BuildCache::new(fx.config.state_dir.join("cache"))
        .store("app", &entry)
        .expect("store");

    let sandbox = ScriptedSandbox::new(Vec::new());
    let oracle = ScriptedOracle::new(Vec::new());
    let calls = oracle.call_log();
    let outcome = fx.run(&sandbox, &oracle, RunOptions::default());

    assert_eq!(outcome, ProjectOutcome::Cached(entry));
    assert!(sandbox.calls().is_empty());
    assert!(calls.is_empty());
}

#[test]
fn successful_run_copies_artifacts_and_is_cached() {
    let fx = Fixture::new();
    let sandbox = sandbox(Vec::new()).with_exec(
        "-name *.apk",
        "/buildfix/project/app/build/outputs/apk/debug/app-debug.apk\n",
    );
    let oracle = ScriptedOracle::texts([DONE]);

    let outcome = fx.run(&sandbox, &oracle, budget(5));
    assert_eq!(
        outcome,
        ProjectOutcome::Completed {
            status: RunStatus::Succeeded,
            cycles_used: 1,
        }
    );
    assert!(read(&fx.output("SUCCESS")).contains("assembleDebug passed"));
    assert!(fx.output("elapsed_time.txt").exists());
    assert!(!fx.output("FAILURE").exists());
    assert_eq!(
        fs::read_dir(fx.output("artifacts")).expect("artifacts").count(),
        1
    );
    assert!(sandbox.calls().contains(&"remove buildfix-app".to_string()));

    // The same tree again: no container, no oracle.
    let again = ScriptedSandbox::new(Vec::new());
    let oracle = ScriptedOracle::new(Vec::new());
    let outcome = fx.run(&again, &oracle, RunOptions::default());
    assert!(matches!(outcome, ProjectOutcome::Cached(ref entry) if entry.status == RunStatus::Succeeded));
    assert!(again.calls().is_empty());
}

#[test]
fn only_tracked_changes_invalidate_the_cache() {
    let fx = Fixture::new();
    let outcome = fx.run(&sandbox_for_success(), &ScriptedOracle::texts([DONE]), budget(3));
    assert!(outcome.succeeded());

    fx.project.write("NOTES.md", "untracked\n").expect("write");
    let idle = ScriptedSandbox::new(Vec::new());
    let outcome = fx.run(&idle, &ScriptedOracle::new(Vec::new()), budget(3));
    assert!(matches!(outcome, ProjectOutcome::Cached(_)));
    assert!(idle.calls().is_empty());

    fx.project
        .write("app/build.gradle", "android { compileSdk 34 }\n")
        .expect("write");
    let rerun = sandbox_for_success();
    let outcome = fx.run(&rerun, &ScriptedOracle::texts([DONE]), budget(3));
    assert!(matches!(outcome, ProjectOutcome::Completed { .. }));
    assert!(!rerun.calls().is_empty());
}

#[test]
fn exhausted_budget_writes_failure_note_and_summary() {
    let fx = Fixture::new();
    let failure = format!(
        "FAILURE: Build failed with an exception.\nKeystore file '/keys/release.jks' not found for signing config 'release'.\nBUILD FAILED in 4s\n{}",
        prompt()
    );
    let sandbox = sandbox(vec![
        ScriptedReply::text(failure.clone()),
        ScriptedReply::text(failure),
    ]);
    let oracle = ScriptedOracle::texts([BUILD, BUILD, "Create a debug keystore first."]);

    let outcome = fx.run(&sandbox, &oracle, budget(2));
    assert_eq!(
        outcome,
        ProjectOutcome::Completed {
            status: RunStatus::Failed,
            cycles_used: 2,
        }
    );

    let note = read(&fx.output("FAILURE"));
    assert!(note.starts_with(FEEDBACK_HEADER));
    assert!(note.contains("Create a debug keystore first."));

    let summary: ErrorSummary =
        serde_json::from_str(&read(&fx.output("error_summary.json"))).expect("summary");
    assert_eq!(summary.count(Category::Process, "MISSING_KEYSTORE"), 1);

    let cached = BuildCache::new(fx.config.state_dir.join("cache"))
        .list()
        .expect("list");
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].1.status, RunStatus::Failed);
    assert_eq!(cached[0].1.cycle_count, 2);

    // A forced re-run sees the note in its first prompt.
    let sandbox = sandbox_for_success();
    let oracle = ScriptedOracle::texts([DONE]);
    let prompts = oracle.call_log();
    let outcome = fx.run(
        &sandbox,
        &oracle,
        RunOptions {
            force: true,
            ..budget(3)
        },
    );
    assert!(outcome.succeeded());
    assert!(prompts.prompts()[0].contains("Create a debug keystore first."));
}

fn sandbox_for_success() -> ScriptedSandbox {
    sandbox(Vec::new()).with_exec("-name *.apk", "/buildfix/project/app.apk\n")
}

#[test]
fn provisioning_failure_is_fatal_and_not_cached() {
    let fx = Fixture::new();
    let sandbox = ScriptedSandbox::new(Vec::new()).failing_start();
    let oracle = ScriptedOracle::new(Vec::new());
    let calls = oracle.call_log();

    let outcome = fx.run(&sandbox, &oracle, budget(3));
    assert!(matches!(outcome, ProjectOutcome::Fatal { ref reason } if reason.contains("start")));
    assert!(calls.is_empty());
    assert!(!fx.config.state_dir.join("cache/app.json").exists());
}

#[test]
fn oracle_outage_stops_the_run_without_caching() {
    let fx = Fixture::new();
    let sandbox = sandbox(Vec::new());
    let oracle = ScriptedOracle::new(vec![OracleReply::Fatal("503 unavailable".to_string())]);

    let outcome = fx.run(&sandbox, &oracle, budget(3));
    assert!(matches!(outcome, ProjectOutcome::Fatal { ref reason } if reason.contains("503")));
    assert!(!fx.config.state_dir.join("cache/app.json").exists());
    assert!(sandbox.calls().contains(&"remove buildfix-app".to_string()));
}

#[test]
fn batch_continues_after_a_bad_source() {
    let fx = Fixture::new();
    let sandbox = sandbox_for_success();
    let oracle = ScriptedOracle::texts([DONE]);
    let runner = Runner::new(&fx.config, &sandbox, &oracle).expect("runner");

    let reports = runner.run_batch(
        &[
            ProjectSource::Local {
                path: fx.project.path().join("does-not-exist"),
            },
            ProjectSource::Local {
                path: fx.project.path().to_path_buf(),
            },
        ],
        budget(3),
    );
    assert_eq!(reports.len(), 2);
    assert!(matches!(reports[0].outcome, ProjectOutcome::Fatal { .. }));
    assert!(!reports[1].name.is_empty());
    assert!(reports[1].outcome.succeeded());
    assert_eq!(exit_code(&reports), exit_codes::PROJECT_FAILED);
}
