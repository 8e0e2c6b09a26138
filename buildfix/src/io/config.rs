//! Settings loaded from `buildfix.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "buildfix.toml";

/// Environment variables holding the oracle API key, checked in order.
pub const API_KEY_ENVS: [&str; 2] = ["BUILDFIX_API_KEY", "OPENAI_API_KEY"];

/// Top-level configuration (TOML).
///
/// Missing fields default to values that work with the stock Android image.
/// Constructed once at startup and passed down explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Command cycles allowed per project run.
    pub cycle_limit: u32,

    /// Root for per-project state, cache and cloned workspaces.
    pub state_dir: PathBuf,

    /// Unparsable oracle replies tolerated in a row before one cycle is charged.
    pub max_consecutive_unparsable: u32,

    /// Results longer than this many characters are truncated in the middle.
    pub result_limit_chars: usize,
    pub result_head_chars: usize,
    pub result_tail_chars: usize,

    /// Disable the terminal spinner.
    pub plain_output: bool,

    pub oracle: OracleConfig,
    pub sandbox: SandboxConfig,
    pub channel: ChannelConfig,
    pub cache: CacheConfig,
    pub toolchain: ToolchainConfig,

    /// Read from the environment at startup, never from the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OracleBackend {
    /// OpenAI-compatible chat completions endpoint.
    Http,
    /// External CLI reading the prompt on stdin and replying on stdout.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    pub backend: OracleBackend,
    /// argv for the `command` backend.
    pub command: Vec<String>,
    /// Base URL for the `http` backend (`/chat/completions` is appended).
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            backend: OracleBackend::Http,
            command: vec![
                "codex".to_string(),
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "-".to_string(),
            ],
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            timeout_secs: 300,
            output_limit_bytes: 200_000,
            max_attempts: 3,
            initial_backoff_ms: 1_500,
            backoff_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Container CLI (`docker` or a compatible binary).
    pub program: String,
    pub image: String,
    /// Directory holding the Dockerfile used when `image` is missing.
    pub dockerfile_dir: PathBuf,
    /// Keeps the container alive between shell sessions.
    pub keepalive: Vec<String>,
    /// Interactive shell started with `exec -i`.
    pub shell: Vec<String>,
    /// Where the project is copied inside the container.
    pub project_dir: String,
    /// `find -name` pattern for build artifacts that prove success.
    pub artifact_glob: String,
    /// Host copy of the Gradle start script imported when a project has none.
    pub gradle_wrapper: PathBuf,
    /// Timeout for one-shot container CLI calls (cp, exec, stop).
    pub cli_timeout_secs: u64,
    pub image_build_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            image: "buildfix-android:latest".to_string(),
            dockerfile_dir: PathBuf::from("docker"),
            keepalive: vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ],
            shell: vec![
                "script".to_string(),
                "-qfc".to_string(),
                "/bin/sh -i".to_string(),
                "/dev/null".to_string(),
            ],
            project_dir: "/buildfix/project".to_string(),
            artifact_glob: "*.apk".to_string(),
            gradle_wrapper: PathBuf::from("docker/gradlew"),
            cli_timeout_secs: 600,
            image_build_timeout_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// Per-read wait; separates "no data yet" from a closed stream.
    pub read_timeout_ms: u64,
    /// Total wall-clock budget for one command.
    pub command_timeout_secs: u64,
    /// Single read after sending the interrupt byte.
    pub grace_ms: u64,
    /// Wait for the first prompt after attaching.
    pub init_timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 500,
            command_timeout_secs: 600,
            grace_ms: 1_000,
            init_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// File extensions (without dot) included in the content hash.
    pub extensions: Vec<String>,
    /// Exact file names included regardless of extension.
    pub file_names: Vec<String>,
    /// Directory names never descended into.
    pub skip_dirs: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            extensions: strings(&[
                "gradle",
                "kts",
                "properties",
                "toml",
                "java",
                "kt",
                "xml",
                "pro",
                "json",
            ]),
            file_names: strings(&["gradlew", "gradlew.bat"]),
            skip_dirs: strings(&[".git", "build", ".gradle", ".idea", "node_modules"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Offer the Android SDK download commands to the oracle.
    pub android_sdk: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self { android_sdk: true }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cycle_limit: 40,
            state_dir: PathBuf::from("buildfix_runs"),
            max_consecutive_unparsable: 3,
            result_limit_chars: 5_000,
            result_head_chars: 2_000,
            result_tail_chars: 3_000,
            plain_output: false,
            oracle: OracleConfig::default(),
            sandbox: SandboxConfig::default(),
            channel: ChannelConfig::default(),
            cache: CacheConfig::default(),
            toolchain: ToolchainConfig::default(),
            api_key: None,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle_limit == 0 {
            return Err(anyhow!("cycle_limit must be > 0"));
        }
        if self.result_head_chars + self.result_tail_chars > self.result_limit_chars {
            return Err(anyhow!(
                "result_head_chars + result_tail_chars must not exceed result_limit_chars"
            ));
        }
        if self.oracle.max_attempts == 0 {
            return Err(anyhow!("oracle.max_attempts must be > 0"));
        }
        if self.oracle.backoff_multiplier < 1.0 {
            return Err(anyhow!("oracle.backoff_multiplier must be >= 1.0"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.oracle.backend == OracleBackend::Command && is_blank_argv(&self.oracle.command) {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if is_blank_argv(&self.sandbox.shell) {
            return Err(anyhow!("sandbox.shell must be a non-empty array"));
        }
        if self.sandbox.program.trim().is_empty() {
            return Err(anyhow!("sandbox.program must not be empty"));
        }
        if self.channel.read_timeout_ms == 0 {
            return Err(anyhow!("channel.read_timeout_ms must be > 0"));
        }
        if self.channel.command_timeout_secs == 0 {
            return Err(anyhow!("channel.command_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Fill `api_key` from the environment. Called once at startup.
    pub fn with_env_api_key(mut self) -> Self {
        self.api_key = API_KEY_ENVS
            .iter()
            .find_map(|name| std::env::var(name).ok())
            .filter(|key| !key.trim().is_empty());
        self
    }
}

impl ChannelConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }
}

fn is_blank_argv(argv: &[String]) -> bool {
    argv.first().is_none_or(|first| first.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AppConfig::default()`.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config file missing, using defaults");
        let cfg = AppConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AppConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}
