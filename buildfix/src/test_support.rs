//! Scripted doubles for the transport, oracle and sandbox seams.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::io::oracle::{Oracle, TransientOracleError};
use crate::io::sandbox::{ExecOutput, Sandbox, SandboxHandle};
use crate::io::transport::{Recv, Transport};

const INTERRUPT: &[u8] = &[0x03];

/// What a [`ScriptedTransport`] emits in response to one sent line.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    chunks: Vec<Vec<u8>>,
    close: bool,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::chunks(vec![text.into()])
    }

    /// Emit each string as a separate read.
    pub fn chunks(chunks: Vec<String>) -> Self {
        Self {
            chunks: chunks.into_iter().map(String::into_bytes).collect(),
            close: false,
        }
    }

    /// Emit `text` and then go silent (no prompt ever follows).
    pub fn hang_with(text: &str) -> Self {
        let chunks = if text.is_empty() {
            Vec::new()
        } else {
            vec![text.to_string()]
        };
        Self::chunks(chunks)
    }

    /// Emit `text` and then report the stream as closed.
    pub fn close_after(text: &str) -> Self {
        Self {
            close: true,
            ..Self::hang_with(text)
        }
    }
}

/// Shared record of everything written to a [`ScriptedTransport`].
#[derive(Debug, Clone, Default)]
pub struct SentLog {
    sends: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SentLog {
    /// One entry per `send` call.
    pub fn sends(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// All bytes in send order.
    pub fn raw(&self) -> Vec<u8> {
        self.lock().concat()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<u8>>> {
        self.sends.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory shell: every sent line (other than an interrupt) releases the next
/// scripted reply.
pub struct ScriptedTransport {
    replies: VecDeque<ScriptedReply>,
    pending: VecDeque<Vec<u8>>,
    closed: bool,
    log: SentLog,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: replies.into(),
            pending: VecDeque::new(),
            closed: false,
            log: SentLog::default(),
        }
    }

    pub fn sent_log(&self) -> SentLog {
        self.log.clone()
    }
}

impl Transport for ScriptedTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.log.lock().push(bytes.to_vec());
        if bytes == INTERRUPT {
            return Ok(());
        }
        if let Some(reply) = self.replies.pop_front() {
            self.pending = reply.chunks.into();
            self.closed = reply.close;
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Recv> {
        if let Some(chunk) = self.pending.pop_front() {
            return Ok(Recv::Data(chunk));
        }
        if self.closed {
            return Ok(Recv::Closed);
        }
        if !timeout.is_zero() {
            thread::sleep(timeout);
        }
        Ok(Recv::Idle)
    }
}

/// Scripted oracle reply.
#[derive(Debug, Clone)]
pub enum OracleReply {
    Text(String),
    Transient(String),
    Fatal(String),
}

/// Prompts received by a [`ScriptedOracle`].
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn len(&self) -> usize {
        self.prompts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Oracle that returns scripted replies in order and fails once they run out.
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleReply>>,
    log: CallLog,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<OracleReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            log: CallLog::default(),
        }
    }

    /// Convenience for a sequence of successful replies.
    pub fn texts<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            replies
                .into_iter()
                .map(|reply| OracleReply::Text(reply.into()))
                .collect(),
        )
    }

    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Oracle for ScriptedOracle {
    fn complete(&self, prompt: &str) -> Result<String> {
        self.log
            .prompts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(prompt.to_string());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(OracleReply::Text(text)) => Ok(text),
            Some(OracleReply::Transient(message)) => Err(anyhow!(TransientOracleError { message })),
            Some(OracleReply::Fatal(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted oracle has no replies left")),
        }
    }
}

/// Sandbox double: records calls, serves a scripted shell and canned exec output.
pub struct ScriptedSandbox {
    image_present: bool,
    fail_start: bool,
    shell: Mutex<Option<Vec<ScriptedReply>>>,
    exec_rules: Vec<(String, ExecOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new(shell: Vec<ScriptedReply>) -> Self {
        Self {
            image_present: true,
            fail_start: false,
            shell: Mutex::new(Some(shell)),
            exec_rules: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_image(mut self) -> Self {
        self.image_present = false;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Reply with `stdout` to any exec whose argv (space-joined) contains `needle`.
    pub fn with_exec(mut self, needle: &str, stdout: &str) -> Self {
        self.exec_rules.push((
            needle.to_string(),
            ExecOutput {
                code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl Sandbox for ScriptedSandbox {
    fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(format!("image_exists {image}"));
        Ok(self.image_present)
    }

    fn build_image(&self, _context_dir: &Path, image: &str) -> Result<()> {
        self.record(format!("build_image {image}"));
        Ok(())
    }

    fn start(&self, image: &str, name: &str) -> Result<SandboxHandle> {
        self.record(format!("start {image} {name}"));
        if self.fail_start {
            return Err(anyhow!("scripted start failure"));
        }
        Ok(SandboxHandle {
            id: format!("id-{name}"),
            name: name.to_string(),
        })
    }

    fn open_shell(&self, handle: &SandboxHandle) -> Result<Box<dyn Transport>> {
        self.record(format!("open_shell {}", handle.name));
        let replies = self
            .shell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .context("scripted shell already opened")?;
        Ok(Box::new(ScriptedTransport::new(replies)))
    }

    fn copy_in(&self, handle: &SandboxHandle, host_path: &Path, container_path: &str) -> Result<()> {
        self.record(format!(
            "copy_in {} {} {container_path}",
            handle.name,
            host_path.display()
        ));
        Ok(())
    }

    /// Writes a placeholder file at `host_path`.
    fn copy_out(&self, handle: &SandboxHandle, container_path: &str, host_path: &Path) -> Result<()> {
        self.record(format!("copy_out {} {container_path}", handle.name));
        if let Some(parent) = host_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(host_path, format!("copied from {container_path}"))?;
        Ok(())
    }

    fn exec(&self, handle: &SandboxHandle, argv: &[&str]) -> Result<ExecOutput> {
        let joined = argv.join(" ");
        self.record(format!("exec {} {joined}", handle.name));
        let output = self
            .exec_rules
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(ExecOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            });
        Ok(output)
    }

    fn stop(&self, handle: &SandboxHandle) -> Result<()> {
        self.record(format!("stop {}", handle.name));
        Ok(())
    }

    fn remove(&self, handle: &SandboxHandle) -> Result<()> {
        self.record(format!("remove {}", handle.name));
        Ok(())
    }

    fn remove_labelled(&self) -> Result<usize> {
        self.record("remove_labelled".to_string());
        Ok(0)
    }
}

/// Minimal Gradle project in a temporary directory.
pub struct TestProject {
    dir: tempfile::TempDir,
}

impl TestProject {
    /// Root `build.gradle`, `settings.gradle` and an `app` module.
    pub fn new() -> Result<Self> {
        let project = Self {
            dir: tempfile::tempdir().context("create temp project")?,
        };
        project.write("settings.gradle", "include ':app'\n")?;
        project.write("build.gradle", "plugins {}\n")?;
        project.write("app/build.gradle", "android {}\n")?;
        Ok(project)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }
}
