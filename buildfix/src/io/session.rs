//! A provisioned sandbox with an initialized shell channel.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::core::text::shell_quote;
use crate::io::channel::{Channel, ChannelTimeouts};
use crate::io::config::AppConfig;
use crate::io::sandbox::{Sandbox, SandboxHandle};

/// Provisioning failed before the first cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionError {
    pub stage: &'static str,
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sandbox provisioning failed at {}", self.stage)
    }
}

impl std::error::Error for ProvisionError {}

pub struct Session {
    pub handle: SandboxHandle,
    pub channel: Channel,
    /// Directory the shell was moved into (the one holding `gradlew`, if any).
    pub workdir: String,
}

impl Session {
    /// Build the image if needed, start a container, copy the project in and
    /// attach a shell positioned next to the Gradle wrapper.
    ///
    /// The container is removed again if any step after `start` fails.
    #[instrument(skip_all, fields(container = %container_name))]
    pub fn provision(
        sandbox: &dyn Sandbox,
        cfg: &AppConfig,
        container_name: &str,
        host_project: &Path,
    ) -> Result<Self> {
        ensure_image(sandbox, cfg).context(ProvisionError { stage: "image" })?;
        let handle = sandbox
            .start(&cfg.sandbox.image, container_name)
            .context(ProvisionError { stage: "start" })?;
        match attach(sandbox, cfg, &handle, host_project) {
            Ok((channel, workdir)) => {
                info!(workdir = %workdir, "session ready");
                Ok(Self {
                    handle,
                    channel,
                    workdir,
                })
            }
            Err(err) => {
                if let Err(cleanup) = sandbox.remove(&handle) {
                    warn!(err = %cleanup, "failed to remove container after provisioning error");
                }
                Err(err)
            }
        }
    }

    /// Close the shell, then stop (`keep`) or remove the container.
    #[instrument(skip_all, fields(container = %self.handle.name, keep))]
    pub fn teardown(mut self, sandbox: &dyn Sandbox, keep: bool) -> Result<()> {
        if let Err(err) = self.channel.close() {
            warn!(err = %err, "failed to close shell");
        }
        if keep {
            sandbox.stop(&self.handle)
        } else {
            sandbox.remove(&self.handle)
        }
    }
}

fn ensure_image(sandbox: &dyn Sandbox, cfg: &AppConfig) -> Result<()> {
    let image = &cfg.sandbox.image;
    if sandbox.image_exists(image)? {
        debug!(image = %image, "image present");
        return Ok(());
    }
    info!(image = %image, "image missing, building");
    sandbox.build_image(Path::new(&cfg.sandbox.dockerfile_dir), image)
}

fn attach(
    sandbox: &dyn Sandbox,
    cfg: &AppConfig,
    handle: &SandboxHandle,
    host_project: &Path,
) -> Result<(Channel, String)> {
    let project_dir = cfg.sandbox.project_dir.as_str();
    sandbox
        .copy_in(handle, host_project, project_dir)
        .context(ProvisionError { stage: "copy" })?;
    let transport = sandbox
        .open_shell(handle)
        .context(ProvisionError { stage: "shell" })?;
    let mut channel = Channel::new(transport, ChannelTimeouts::from(&cfg.channel));
    channel
        .initialize()
        .context(ProvisionError { stage: "shell" })?;

    let located = locate_wrapper_dir(sandbox, handle, project_dir)
        .context(ProvisionError { stage: "locate" })?;
    let workdir = match located {
        Some(dir) => dir,
        None => {
            match import_wrapper(sandbox, handle, cfg) {
                Ok(()) => info!(project_dir, "no gradlew found, imported the bundled one"),
                Err(err) => warn!(err = %format!("{err:#}"), "no gradlew found and import failed"),
            }
            project_dir.to_string()
        }
    };
    channel
        .execute(&format!("cd {}", shell_quote(&workdir)))
        .context(ProvisionError { stage: "cd" })?;
    Ok((channel, workdir))
}

/// Directory of the shallowest `gradlew` under `project_dir`, if any.
fn locate_wrapper_dir(
    sandbox: &dyn Sandbox,
    handle: &SandboxHandle,
    project_dir: &str,
) -> Result<Option<String>> {
    let out = sandbox.exec(handle, &["find", project_dir, "-name", "gradlew", "-type", "f"])?;
    let wrapper = out
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .min_by_key(|line| (line.matches('/').count(), line.len()));
    Ok(wrapper.map(|path| {
        path.rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
            .unwrap_or(project_dir)
            .to_string()
    }))
}

/// Copy the bundled start script to `<project_dir>/gradlew` and make it executable.
fn import_wrapper(sandbox: &dyn Sandbox, handle: &SandboxHandle, cfg: &AppConfig) -> Result<()> {
    let dest = format!("{}/gradlew", cfg.sandbox.project_dir);
    sandbox
        .copy_in(handle, &cfg.sandbox.gradle_wrapper, &dest)
        .context("copy gradlew")?;
    let out = sandbox.exec(handle, &["chmod", "+x", dest.as_str()])?;
    if !out.success() {
        bail!("chmod gradlew failed: {}", out.stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::channel::{PROMPT_PREFIX, SENTINEL};
    use crate::test_support::{ScriptedReply, ScriptedSandbox};

    fn prompt() -> String {
        format!("{PROMPT_PREFIX}{SENTINEL} ")
    }

    fn fast_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.channel.read_timeout_ms = 10;
        cfg.channel.init_timeout_secs = 1;
        cfg.channel.command_timeout_secs = 1;
        cfg.channel.grace_ms = 20;
        cfg
    }

    #[test]
    fn provision_builds_missing_image_and_cds_to_wrapper() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = ScriptedSandbox::new(vec![
            ScriptedReply::text(prompt()),
            ScriptedReply::text(format!("cd '/buildfix/project/app'\n{}", prompt())),
        ])
        .without_image()
        .with_exec(
            "-name gradlew",
            "/buildfix/project/app/nested/gradlew\n/buildfix/project/app/gradlew\n",
        );
        let session = Session::provision(&sandbox, &fast_config(), "buildfix-demo", temp.path())
            .expect("provision");
        assert_eq!(session.workdir, "/buildfix/project/app");

        let calls = sandbox.calls();
        assert_eq!(calls[0], "image_exists buildfix-android:latest");
        assert_eq!(calls[1], "build_image buildfix-android:latest");
        assert!(calls[2].starts_with("start buildfix-android:latest buildfix-demo"));

        session.teardown(&sandbox, false).expect("teardown");
        assert_eq!(sandbox.calls().last().map(String::as_str), Some("remove buildfix-demo"));
    }

    #[test]
    fn missing_wrapper_is_imported_into_project_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = ScriptedSandbox::new(vec![
            ScriptedReply::text(prompt()),
            ScriptedReply::text(format!("cd x\n{}", prompt())),
        ]);
        let session = Session::provision(&sandbox, &fast_config(), "demo", temp.path())
            .expect("provision");
        assert_eq!(session.workdir, "/buildfix/project");
        let calls = sandbox.calls();
        assert!(calls.contains(&"copy_in demo docker/gradlew /buildfix/project/gradlew".to_string()));
        assert!(calls.contains(&"exec demo chmod +x /buildfix/project/gradlew".to_string()));
        session.teardown(&sandbox, true).expect("teardown");
        assert_eq!(sandbox.calls().last().map(String::as_str), Some("stop demo"));
    }

    #[test]
    fn start_failure_is_a_provision_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = ScriptedSandbox::new(Vec::new()).failing_start();
        let err = match Session::provision(&sandbox, &fast_config(), "demo", temp.path()) {
            Ok(_) => panic!("expected provisioning to fail"),
            Err(err) => err,
        };
        let provision = err
            .downcast_ref::<ProvisionError>()
            .expect("provision error");
        assert_eq!(provision.stage, "start");
    }

    #[test]
    fn shell_that_never_prompts_removes_container() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = ScriptedSandbox::new(vec![ScriptedReply::close_after("")]);
        let result = Session::provision(&sandbox, &fast_config(), "demo", temp.path());
        assert!(result.is_err());
        assert_eq!(sandbox.calls().last().map(String::as_str), Some("remove demo"));
    }
}
