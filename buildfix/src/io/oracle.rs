//! Decision oracle: a text-in/text-out language model boundary.
//!
//! The [`Oracle`] trait decouples the loop from the model backend. Two backends
//! ship here: an OpenAI-compatible HTTP endpoint and an external CLI. Both mark
//! retryable failures with [`TransientOracleError`], which [`RetryingOracle`]
//! recovers from with exponential backoff.

use std::fmt;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{AppConfig, OracleBackend, OracleConfig};
use crate::io::process::run_command_with_timeout;

/// Abstraction over decision backends.
pub trait Oracle {
    fn complete(&self, prompt: &str) -> Result<String>;
}

impl<O: Oracle + ?Sized> Oracle for Box<O> {
    fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt)
    }
}

/// A failure worth retrying (rate limit, timeout, server error).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientOracleError {
    pub message: String,
}

impl fmt::Display for TransientOracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient oracle error: {}", self.message)
    }
}

impl std::error::Error for TransientOracleError {}

fn transient(message: impl Into<String>) -> anyhow::Error {
    anyhow!(TransientOracleError {
        message: message.into(),
    })
}

/// Retries were used up on transient failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleExhaustedError {
    pub attempts: u32,
    pub last: String,
}

impl fmt::Display for OracleExhaustedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "oracle failed after {} attempts: {}",
            self.attempts, self.last
        )
    }
}

impl std::error::Error for OracleExhaustedError {}

/// Exponential backoff: `initial * multiplier^(attempt - 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(cfg: &OracleConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            multiplier: cfg.backoff_multiplier,
        }
    }

    /// Delay after the failed `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial_backoff
            .mul_f64(self.multiplier.powi(exponent))
    }
}

/// Wraps an oracle with retry on [`TransientOracleError`].
pub struct RetryingOracle<O> {
    inner: O,
    policy: RetryPolicy,
}

impl<O: Oracle> RetryingOracle<O> {
    pub fn new(inner: O, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<O: Oracle> Oracle for RetryingOracle<O> {
    fn complete(&self, prompt: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.inner.complete(prompt) {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };
            let Some(transient) = err.downcast_ref::<TransientOracleError>() else {
                return Err(err);
            };
            if attempt >= self.policy.max_attempts {
                warn!(attempt, "oracle retries exhausted");
                return Err(anyhow!(OracleExhaustedError {
                    attempts: attempt,
                    last: transient.message.clone(),
                }));
            }
            let delay = self.policy.backoff(attempt);
            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                err = %transient,
                "oracle call failed, retrying"
            );
            thread::sleep(delay);
        }
    }
}

/// Build the configured backend wrapped with retries.
pub fn oracle_from_config(cfg: &AppConfig) -> Result<Box<dyn Oracle>> {
    let policy = RetryPolicy::from_config(&cfg.oracle);
    let oracle: Box<dyn Oracle> = match cfg.oracle.backend {
        OracleBackend::Http => Box::new(RetryingOracle::new(
            HttpOracle::new(&cfg.oracle, cfg.api_key.clone())?,
            policy,
        )),
        OracleBackend::Command => Box::new(RetryingOracle::new(
            CommandOracle::new(&cfg.oracle),
            policy,
        )),
    };
    Ok(oracle)
}

/// Oracle that pipes the prompt into an external CLI and reads stdout.
pub struct CommandOracle {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(cfg: &OracleConfig) -> Self {
        Self {
            argv: cfg.command.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(prompt_len = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("oracle command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run oracle command")?;

        if output.timed_out {
            return Err(transient(output.failure_summary("oracle command")));
        }
        if !output.status.success() {
            return Err(transient(output.failure_summary("oracle command")));
        }
        let reply = output.stdout_text();
        if reply.trim().is_empty() {
            return Err(transient("oracle command produced no output"));
        }
        debug!(reply_len = reply.len(), "oracle command replied");
        Ok(reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Oracle backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpOracle {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(cfg: &OracleConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("build http client")?;
        let url = format!("{}/chat/completions", cfg.endpoint.trim_end_matches('/'));
        info!(url = %url, model = %cfg.model, "using http oracle");
        Ok(Self {
            client,
            url,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            api_key,
        })
    }
}

impl Oracle for HttpOracle {
    #[instrument(skip_all, fields(prompt_len = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send() {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return Err(transient(err.to_string()));
            }
            Err(err) => return Err(err).context("send oracle request"),
        };
        let status = response.status();
        let text = response.text().context("read oracle response")?;

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(transient(format!("http {status}")));
        }
        if !status.is_success() {
            return Err(anyhow!(
                "oracle request failed with {status}: {}",
                truncate_chars(&text, 200)
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .with_context(|| format!("parse oracle response: {}", truncate_chars(&text, 200)))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(transient("oracle returned an empty message"));
        }
        Ok(content)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
