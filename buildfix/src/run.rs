//! `buildfix run`: cache check, provisioning, loop, classification, cache write.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::classify::classify_failure;
use crate::commands::Registry;
use crate::core::decision::DecisionParser;
use crate::core::types::RunStatus;
use crate::exit_codes;
use crate::io::cache::{BuildCache, CacheEntry, compute_key};
use crate::io::config::AppConfig;
use crate::io::oracle::Oracle;
use crate::io::paths::{ProjectPaths, StatePaths};
use crate::io::prompt::PromptEngine;
use crate::io::sandbox::Sandbox;
use crate::io::session::{ProvisionError, Session};
use crate::io::transcript::Transcript;
use crate::io::workspace::{ProjectSource, acquire};
use crate::looping::{LoopStop, run_loop};
use crate::step::{LoopState, StepEnv};

/// Per-invocation overrides from the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Overrides `cycle_limit` from the config.
    pub cycle_limit: Option<u32>,
    /// Stop the container at the end instead of removing it.
    pub keep_container: bool,
    /// Ignore a matching cache entry.
    pub force: bool,
}

/// How one project run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// Unchanged since a recorded run; nothing was started.
    Cached(CacheEntry),
    Completed { status: RunStatus, cycles_used: u32 },
    /// The run could not proceed. Not cached.
    Fatal { reason: String },
}

impl ProjectOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            ProjectOutcome::Cached(entry) => entry.status == RunStatus::Succeeded,
            ProjectOutcome::Completed { status, .. } => *status == RunStatus::Succeeded,
            ProjectOutcome::Fatal { .. } => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProjectOutcome::Cached(entry) => format!(
                "cached {} ({} cycles)",
                entry.status.as_str(),
                entry.cycle_count
            ),
            ProjectOutcome::Completed {
                status,
                cycles_used,
            } => format!("{} after {cycles_used} cycles", status.as_str()),
            ProjectOutcome::Fatal { reason } => format!("error: {reason}"),
        }
    }
}

/// Outcome of one project in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectReport {
    pub name: String,
    pub outcome: ProjectOutcome,
}

/// Exit code for a finished batch.
pub fn exit_code(reports: &[ProjectReport]) -> i32 {
    if reports.iter().all(|report| report.outcome.succeeded()) {
        exit_codes::OK
    } else {
        exit_codes::PROJECT_FAILED
    }
}

/// Container name for a project.
pub fn container_name(project: &str) -> String {
    format!("buildfix-{project}")
}

/// Owns everything shared by the projects of one invocation.
pub struct Runner<'a> {
    config: &'a AppConfig,
    sandbox: &'a dyn Sandbox,
    oracle: &'a dyn Oracle,
    registry: Registry,
    decisions: DecisionParser,
    prompts: PromptEngine,
    paths: StatePaths,
    cache: BuildCache,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a AppConfig, sandbox: &'a dyn Sandbox, oracle: &'a dyn Oracle) -> Result<Self> {
        let paths = StatePaths::new(&config.state_dir);
        Ok(Self {
            config,
            sandbox,
            oracle,
            registry: Registry::with_builtins()?,
            decisions: DecisionParser::new()?,
            prompts: PromptEngine::new()?,
            cache: BuildCache::new(&paths.cache_dir),
            paths,
        })
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Run every source in order. A failing project never stops the batch.
    pub fn run_batch(&self, sources: &[ProjectSource], opts: RunOptions) -> Vec<ProjectReport> {
        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            let name = match source.name() {
                Ok(name) => name,
                Err(err) => {
                    error!(err = %format!("{err:#}"), "skipping source");
                    reports.push(ProjectReport {
                        name: format!("{source:?}"),
                        outcome: ProjectOutcome::Fatal {
                            reason: format!("{err:#}"),
                        },
                    });
                    continue;
                }
            };
            let outcome = acquire(source, &name, &self.paths.workspace_dir)
                .and_then(|dir| self.run_project(&name, &dir, opts))
                .unwrap_or_else(|err| {
                    let reason = format!("{err:#}");
                    error!(project = %name, err = %reason, "project run failed");
                    ProjectOutcome::Fatal { reason }
                });
            info!(project = %name, outcome = %outcome.describe(), "project finished");
            reports.push(ProjectReport { name, outcome });
        }
        reports
    }

    /// Run the agent on one project checked out at `host_dir`.
    #[instrument(skip_all, fields(project = %name))]
    pub fn run_project(&self, name: &str, host_dir: &Path, opts: RunOptions) -> Result<ProjectOutcome> {
        let cycle_limit = opts.cycle_limit.unwrap_or(self.config.cycle_limit);
        if cycle_limit == 0 {
            bail!("cycle limit must be > 0");
        }

        let key = compute_key(host_dir, &self.config.cache)?;
        if opts.force {
            debug!("cache bypassed");
        } else if let Some(entry) = self.cache.lookup(name, &key)? {
            info!(status = entry.status.as_str(), "cache hit");
            return Ok(ProjectOutcome::Cached(entry));
        }

        let paths = self.paths.project(name);
        let past_attempt = read_past_attempt(&paths)?;
        reset_project_dir(&paths)?;
        let transcript = Transcript::open(&paths)?;

        let started_at = Utc::now().to_rfc3339();
        let clock = Instant::now();

        let mut session =
            match Session::provision(self.sandbox, self.config, &container_name(name), host_dir) {
                Ok(session) => session,
                Err(err) => {
                    let reason = format!("{err:#}");
                    if let Some(provision) = err.downcast_ref::<ProvisionError>() {
                        error!(stage = provision.stage, err = %reason, "provisioning failed");
                    }
                    transcript.note(&reason)?;
                    return Ok(ProjectOutcome::Fatal { reason });
                }
            };

        let env = StepEnv {
            project: name,
            config: self.config,
            registry: &self.registry,
            decisions: &self.decisions,
            oracle: self.oracle,
            prompts: &self.prompts,
            sandbox: self.sandbox,
            paths: &paths,
            transcript: &transcript,
            past_attempt: past_attempt.as_deref(),
        };
        let mut state = LoopState::new(cycle_limit, started_at.clone());
        let looped = run_loop(&env, &mut session, &mut state, |step| debug!(?step, "step done"));
        if let Err(err) = session.teardown(self.sandbox, opts.keep_container) {
            warn!(err = %format!("{err:#}"), "container teardown failed");
        }
        let outcome = looped?;

        let status = if outcome.stop == LoopStop::Succeeded {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        if status == RunStatus::Failed {
            let text = transcript.read_text()?;
            classify_failure(
                name,
                outcome.cycles_used,
                &text,
                self.oracle,
                &self.prompts,
                &paths,
            )?;
        }

        let elapsed = clock.elapsed().as_secs_f64();
        fs::write(&paths.elapsed_time, format!("{elapsed:.2}\n"))
            .with_context(|| format!("write {}", paths.elapsed_time.display()))?;

        if let LoopStop::Fatal { reason } = outcome.stop {
            return Ok(ProjectOutcome::Fatal { reason });
        }
        self.cache.store(
            name,
            &CacheEntry {
                hash: key,
                status,
                cycle_count: outcome.cycles_used,
                started_at,
                ended_at: Utc::now().to_rfc3339(),
            },
        )?;
        Ok(ProjectOutcome::Completed {
            status,
            cycles_used: outcome.cycles_used,
        })
    }
}

fn read_past_attempt(paths: &ProjectPaths) -> Result<Option<String>> {
    if !paths.failure_note.exists() {
        return Ok(None);
    }
    let note = fs::read_to_string(&paths.failure_note)
        .with_context(|| format!("read {}", paths.failure_note.display()))?;
    Ok(Some(note).filter(|note| !note.trim().is_empty()))
}

fn reset_project_dir(paths: &ProjectPaths) -> Result<()> {
    if paths.dir.exists() {
        fs::remove_dir_all(&paths.dir)
            .with_context(|| format!("clear {}", paths.dir.display()))?;
    }
    fs::create_dir_all(&paths.output_dir)
        .with_context(|| format!("create {}", paths.output_dir.display()))?;
    Ok(())
}
