//! Autonomous build-repair agent.
//!
//! Clones or takes a local Android project, provisions a Docker sandbox and
//! lets a decision oracle drive a shell inside it until the build produces an
//! artifact or the cycle budget runs out.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use buildfix::clean::clean;
use buildfix::exit_codes;
use buildfix::io::config::{AppConfig, DEFAULT_CONFIG_FILE, load_config};
use buildfix::io::oracle::oracle_from_config;
use buildfix::io::paths::StatePaths;
use buildfix::io::sandbox::{DockerSandbox, Sandbox};
use buildfix::io::workspace::resolve_sources;
use buildfix::logging;
use buildfix::report::{aggregate, render};
use buildfix::run::{RunOptions, Runner, exit_code};
use clap::{Parser, Subcommand};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "buildfix",
    version,
    about = "Autonomous build-repair agent for Android projects"
)]
struct Cli {
    /// Config file (defaults to ./buildfix.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress at info level (ignored when RUST_LOG is set).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a project: Git URL, local directory (--local) or a .txt list of URLs.
    Run {
        source: String,
        /// Cycle budget per project (overrides `cycle_limit`).
        #[arg(short = 'n', long = "cycles")]
        cycles: Option<u32>,
        /// Stop the container at the end instead of removing it.
        #[arg(short, long)]
        keep_container: bool,
        /// Treat SOURCE as a local project directory.
        #[arg(long)]
        local: bool,
        /// Run even when the cache says the project is unchanged.
        #[arg(long)]
        force: bool,
        /// Disable the terminal spinner.
        #[arg(long)]
        plain: bool,
    },
    /// Remove results, cache, cloned projects and buildfix containers.
    Clean {
        /// Leave containers alone.
        #[arg(long)]
        no_docker: bool,
    },
    /// Summarize recorded outcomes across projects.
    Report,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let config = load(cli.config.as_deref())?;
    match cli.command {
        Command::Run {
            source,
            cycles,
            keep_container,
            local,
            force,
            plain,
        } => {
            if cycles == Some(0) {
                bail!("--cycles must be > 0");
            }
            let mut config = config;
            config.plain_output |= plain;
            cmd_run(
                &config,
                &source,
                local,
                RunOptions {
                    cycle_limit: cycles,
                    keep_container,
                    force,
                },
            )
        }
        Command::Clean { no_docker } => cmd_clean(&config, no_docker),
        Command::Report => cmd_report(&config),
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    let config = load_config(path).context("load config")?.with_env_api_key();
    debug!(state_dir = %config.state_dir.display(), "config loaded");
    Ok(config)
}

fn cmd_run(config: &AppConfig, source: &str, local: bool, opts: RunOptions) -> Result<i32> {
    let sources = resolve_sources(source, local)?;
    let sandbox = DockerSandbox::new(&config.sandbox);
    let oracle = oracle_from_config(config)?;
    let runner = Runner::new(config, &sandbox, oracle.as_ref())?;

    let reports = runner.run_batch(&sources, opts);
    for report in &reports {
        println!(
            "run: project={} outcome={} results={}",
            report.name,
            report.outcome.describe(),
            runner.paths().project(&report.name).output_dir.display()
        );
    }
    Ok(exit_code(&reports))
}

fn cmd_clean(config: &AppConfig, no_docker: bool) -> Result<i32> {
    let docker = DockerSandbox::new(&config.sandbox);
    let sandbox: Option<&dyn Sandbox> = if no_docker { None } else { Some(&docker) };
    let summary = clean(&config.state_dir, sandbox)?;
    println!(
        "clean: state_dir={} removed={} containers={}",
        config.state_dir.display(),
        summary.removed_state,
        summary.removed_containers
    );
    Ok(exit_codes::OK)
}

fn cmd_report(config: &AppConfig) -> Result<i32> {
    let (summary, warnings) = aggregate(&StatePaths::new(&config.state_dir))?;
    print!("{}", render(&summary));
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from([
            "buildfix",
            "run",
            "https://github.com/owner/app",
            "-n",
            "12",
            "-k",
            "--force",
        ]);
        assert!(matches!(
            cli.command,
            Command::Run {
                cycles: Some(12),
                keep_container: true,
                force: true,
                local: false,
                plain: false,
                ..
            }
        ));
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["buildfix", "clean", "--no-docker", "-v", "--config", "x.toml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Command::Clean { no_docker: true }));
    }

    #[test]
    fn parse_report() {
        let cli = Cli::parse_from(["buildfix", "report"]);
        assert!(matches!(cli.command, Command::Report));
    }
}
