//! `goals_accomplished`: the only way a run can end in success.

use std::fs;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use super::{CommandContext, CommandDescriptor, Outcome, ParamSpec, ParamType, always_enabled, str_arg};
use crate::io::atomic::write_atomic;

pub const SUCCESS_RESULT: &str = "goals_accomplished: SUCCESS";

const PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "reason",
    kind: ParamType::String,
    description: "Why the goals are accomplished",
    required: true,
}];

pub fn descriptors() -> Vec<CommandDescriptor> {
    vec![CommandDescriptor {
        name: "goals_accomplished",
        description: "Declare that the project builds and the artifacts exist",
        params: PARAMS,
        aliases: &[],
        handler: goals_accomplished,
        enabled: always_enabled,
    }]
}

/// Host file name for an artifact: its path below the project dir, flattened.
fn artifact_file_name(project_dir: &str, container_path: &str) -> String {
    container_path
        .strip_prefix(project_dir)
        .unwrap_or(container_path)
        .trim_start_matches('/')
        .replace('/', "__")
}

fn goals_accomplished(args: &Map<String, Value>, ctx: &mut CommandContext<'_>) -> Result<Outcome> {
    let reason = str_arg(args, "reason")?;
    let sandbox_cfg = &ctx.config.sandbox;
    let project_dir = sandbox_cfg.project_dir.as_str();
    let found = ctx.sandbox.exec(
        &ctx.session.handle,
        &[
            "find",
            project_dir,
            "-type",
            "f",
            "-name",
            sandbox_cfg.artifact_glob.as_str(),
        ],
    )?;
    let artifacts: Vec<&str> = found
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if artifacts.is_empty() {
        return Ok(Outcome::Continue(format!(
            "Cannot declare success: no file matching '{}' exists under {project_dir}. \
             Build the project until the artifact is produced.",
            sandbox_cfg.artifact_glob
        )));
    }

    let artifacts_dir = &ctx.paths.artifacts_dir;
    fs::create_dir_all(artifacts_dir)
        .with_context(|| format!("create {}", artifacts_dir.display()))?;
    for artifact in &artifacts {
        let host_path = artifacts_dir.join(artifact_file_name(project_dir, artifact));
        ctx.sandbox
            .copy_out(&ctx.session.handle, artifact, &host_path)
            .with_context(|| format!("copy artifact {artifact}"))?;
    }
    info!(count = artifacts.len(), "artifacts collected");

    let mut marker = format!("{}\n\nArtifacts:\n", reason.trim());
    for artifact in &artifacts {
        marker.push_str(&format!("- {artifact}\n"));
    }
    write_atomic(&ctx.paths.success_marker, &marker)?;
    Ok(Outcome::Finished(SUCCESS_RESULT.to_string()))
}
