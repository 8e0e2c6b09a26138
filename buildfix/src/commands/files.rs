//! File commands executed through the sandbox shell.

use std::fs;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::debug;

use super::{CommandContext, CommandDescriptor, Outcome, ParamSpec, ParamType, always_enabled, str_arg};
use crate::core::text::shell_quote;
use crate::io::atomic::write_atomic;

/// Where `write_to_file` drops the text inside the container.
pub const STAGING_PATH: &str = "/tmp/.buildfix_write";

const READ_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "file_path",
    kind: ParamType::String,
    description: "The path of the file to read",
    required: true,
}];

const WRITE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "filename",
        kind: ParamType::String,
        description: "The name of the file to write to",
        required: true,
    },
    ParamSpec {
        name: "text",
        kind: ParamType::String,
        description: "The text to write to the file",
        required: true,
    },
];

pub fn descriptors() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor {
            name: "read_file",
            description: "Read an existing file",
            params: READ_PARAMS,
            aliases: &[],
            handler: read_file,
            enabled: always_enabled,
        },
        CommandDescriptor {
            name: "write_to_file",
            description: "Writes to a file (overwrites all content if already exists)",
            params: WRITE_PARAMS,
            aliases: &["write_file", "create_file"],
            handler: write_to_file,
            enabled: always_enabled,
        },
    ]
}

fn read_file(args: &Map<String, Value>, ctx: &mut CommandContext<'_>) -> Result<Outcome> {
    let path = str_arg(args, "file_path")?;
    let output = ctx
        .session
        .channel
        .execute(&format!("cat {}", shell_quote(path)))?;
    Ok(Outcome::Continue(output))
}

/// Shell line that moves the staged file into place and prints its size.
fn install_command(filename: &str) -> String {
    let target = shell_quote(filename);
    format!("cat {STAGING_PATH} > {target} && wc -c < {target}; rm -f {STAGING_PATH}")
}

/// Compare the size printed by [`install_command`] with what was sent.
fn verify_written(filename: &str, expected: usize, output: &str) -> String {
    let output = output.trim();
    match output.parse::<usize>() {
        Ok(written) if written == expected => "File written successfully.".to_string(),
        Ok(written) => format!("Error: wrote {written} of {expected} bytes to {filename}."),
        Err(_) if output.is_empty() => format!("Error: could not confirm that {filename} was written."),
        Err(_) => output.to_string(),
    }
}

/// The text travels by `docker cp`, not through the terminal, so long lines
/// are not cut at the tty input limit.
fn write_to_file(args: &Map<String, Value>, ctx: &mut CommandContext<'_>) -> Result<Outcome> {
    let filename = str_arg(args, "filename")?;
    let text = str_arg(args, "text")?;
    let content = format!("{}\n", text.trim_end_matches('\n'));

    let staged = &ctx.paths.write_staging;
    write_atomic(staged, &content)?;
    let copied = ctx.sandbox.copy_in(&ctx.session.handle, staged, STAGING_PATH);
    if let Err(err) = fs::remove_file(staged) {
        debug!(err = %err, "failed to remove staged file");
    }
    copied.with_context(|| format!("copy {filename} into the sandbox"))?;

    let output = ctx.session.channel.execute(&install_command(filename))?;
    Ok(Outcome::Continue(verify_written(filename, content.len(), &output)))
}
