//! Sandbox abstraction and the Docker CLI implementation.
//!
//! The loop only needs a handful of container operations, so we keep a small,
//! explicit wrapper around `docker` subprocess calls. Tests use a scripted
//! sandbox instead.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::SandboxConfig;
use crate::io::process::{CommandOutput, run_command_with_timeout};
use crate::io::transport::{ProcessTransport, Transport};

/// Label attached to every container started by buildfix.
pub const CONTAINER_LABEL: &str = "buildfix";

const CLI_OUTPUT_LIMIT: usize = 1_000_000;

/// A running sandbox container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

/// Output of a one-shot command run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait Sandbox {
    fn image_exists(&self, image: &str) -> Result<bool>;
    fn build_image(&self, context_dir: &Path, image: &str) -> Result<()>;
    fn start(&self, image: &str, name: &str) -> Result<SandboxHandle>;
    /// Attach an interactive shell to the container.
    fn open_shell(&self, handle: &SandboxHandle) -> Result<Box<dyn Transport>>;
    fn copy_in(&self, handle: &SandboxHandle, host_path: &Path, container_path: &str)
    -> Result<()>;
    fn copy_out(
        &self,
        handle: &SandboxHandle,
        container_path: &str,
        host_path: &Path,
    ) -> Result<()>;
    fn exec(&self, handle: &SandboxHandle, argv: &[&str]) -> Result<ExecOutput>;
    fn stop(&self, handle: &SandboxHandle) -> Result<()>;
    fn remove(&self, handle: &SandboxHandle) -> Result<()>;
    /// Remove every container carrying [`CONTAINER_LABEL`]. Returns how many were removed.
    fn remove_labelled(&self) -> Result<usize>;
}

/// [`Sandbox`] backed by the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    program: String,
    keepalive: Vec<String>,
    shell: Vec<String>,
    cli_timeout: Duration,
    build_timeout: Duration,
}

impl DockerSandbox {
    pub fn new(cfg: &SandboxConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            keepalive: cfg.keepalive.clone(),
            shell: cfg.shell.clone(),
            cli_timeout: Duration::from_secs(cfg.cli_timeout_secs),
            build_timeout: Duration::from_secs(cfg.image_build_timeout_secs),
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd
    }

    fn run(&self, cmd: Command, timeout: Duration) -> Result<CommandOutput> {
        run_command_with_timeout(cmd, None, timeout, CLI_OUTPUT_LIMIT)
    }

    /// Run and require success; returns trimmed stdout.
    fn run_checked(&self, label: &str, cmd: Command, timeout: Duration) -> Result<String> {
        let out = self.run(cmd, timeout)?;
        if !out.success() {
            return Err(anyhow!(out.failure_summary(label)));
        }
        Ok(out.stdout_text().trim().to_string())
    }
}

impl Sandbox for DockerSandbox {
    fn image_exists(&self, image: &str) -> Result<bool> {
        let out = self.run(
            self.command(["image", "inspect", "--format", "{{.Id}}", image]),
            self.cli_timeout,
        )?;
        Ok(out.success())
    }

    #[instrument(skip_all, fields(image = %image))]
    fn build_image(&self, context_dir: &Path, image: &str) -> Result<()> {
        info!(context = %context_dir.display(), "building sandbox image");
        let mut cmd = self.command(["build", "-t", image]);
        cmd.arg(context_dir);
        self.run_checked("docker build", cmd, self.build_timeout)?;
        Ok(())
    }

    /// Starts a fresh container under `name`, replacing any container left
    /// behind under that name (e.g. stopped by `--keep-container`).
    #[instrument(skip_all, fields(image = %image, name = %name))]
    fn start(&self, image: &str, name: &str) -> Result<SandboxHandle> {
        let stale = self.run(self.command(["rm", "-vf", name]), self.cli_timeout)?;
        if stale.success() {
            debug!("removed previous container with the same name");
        } else if !stale.stderr_text().contains("No such container") {
            warn!(err = %stale.failure_summary("docker rm"), "could not remove previous container");
        }

        let project_label = format!("{CONTAINER_LABEL}.project={name}");
        let mut cmd = self.command([
            "run",
            "-d",
            "--name",
            name,
            "--label",
            CONTAINER_LABEL,
            "--label",
            project_label.as_str(),
            image,
        ]);
        cmd.args(&self.keepalive);
        let id = self.run_checked("docker run", cmd, self.cli_timeout)?;
        if id.is_empty() {
            return Err(anyhow!("docker run returned no container id"));
        }
        debug!(id = %id, "container started");
        Ok(SandboxHandle {
            id,
            name: name.to_string(),
        })
    }

    fn open_shell(&self, handle: &SandboxHandle) -> Result<Box<dyn Transport>> {
        let mut cmd = self.command(["exec", "-i", handle.id.as_str()]);
        cmd.args(&self.shell);
        Ok(Box::new(ProcessTransport::spawn(cmd)?))
    }

    fn copy_in(
        &self,
        handle: &SandboxHandle,
        host_path: &Path,
        container_path: &str,
    ) -> Result<()> {
        let mut cmd = self.command(["cp"]);
        cmd.arg(host_path)
            .arg(format!("{}:{container_path}", handle.id));
        self.run_checked("docker cp (in)", cmd, self.cli_timeout)?;
        Ok(())
    }

    fn copy_out(
        &self,
        handle: &SandboxHandle,
        container_path: &str,
        host_path: &Path,
    ) -> Result<()> {
        let mut cmd = self.command(["cp".to_string(), format!("{}:{container_path}", handle.id)]);
        cmd.arg(host_path);
        self.run_checked("docker cp (out)", cmd, self.cli_timeout)?;
        Ok(())
    }

    fn exec(&self, handle: &SandboxHandle, argv: &[&str]) -> Result<ExecOutput> {
        let mut cmd = self.command(["exec", handle.id.as_str()]);
        cmd.args(argv);
        let out = self.run(cmd, self.cli_timeout)?;
        if out.timed_out {
            return Err(anyhow!(out.failure_summary("docker exec")));
        }
        Ok(ExecOutput {
            code: out.status.code(),
            stdout: out.stdout_text(),
            stderr: out.stderr_text(),
        })
    }

    fn stop(&self, handle: &SandboxHandle) -> Result<()> {
        self.run_checked(
            "docker stop",
            self.command(["stop", handle.id.as_str()]),
            self.cli_timeout,
        )?;
        Ok(())
    }

    fn remove(&self, handle: &SandboxHandle) -> Result<()> {
        self.run_checked(
            "docker rm",
            self.command(["rm", "-vf", handle.id.as_str()]),
            self.cli_timeout,
        )?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn remove_labelled(&self) -> Result<usize> {
        let filter = format!("label={CONTAINER_LABEL}");
        let ids = self.run_checked(
            "docker ps",
            self.command(["ps", "-aq", "--filter", filter.as_str()]),
            self.cli_timeout,
        )?;
        let mut removed = 0;
        for id in ids.lines().map(str::trim).filter(|id| !id.is_empty()) {
            match self.run_checked("docker rm", self.command(["rm", "-vf", id]), self.cli_timeout)
            {
                Ok(_) => removed += 1,
                Err(err) => warn!(id, err = %err, "failed to remove container"),
            }
        }
        info!(removed, "removed labelled containers");
        Ok(removed)
    }
}
