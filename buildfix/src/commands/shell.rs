//! `linux_terminal`: run one shell command in the sandbox.

use anyhow::Result;
use serde_json::{Map, Value};

use super::{CommandContext, CommandDescriptor, Outcome, ParamSpec, ParamType, always_enabled, str_arg};

const PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "command",
    kind: ParamType::String,
    description: "The command line to execute",
    required: true,
}];

pub fn descriptors() -> Vec<CommandDescriptor> {
    vec![CommandDescriptor {
        name: "linux_terminal",
        description: "Executes a shell command in the sandbox, non-interactive commands only",
        params: PARAMS,
        aliases: &[],
        handler: linux_terminal,
        enabled: always_enabled,
    }]
}

const INTERACTIVE_EDITORS: &[&str] = &["nano", "vim", "vi"];

/// Reason the command line must not be sent to the shell, if any.
fn refusal(command: &str) -> Option<&'static str> {
    let words: Vec<&str> = command
        .split(|c: char| c.is_whitespace() || matches!(c, ';' | '&' | '|'))
        .filter(|word| !word.is_empty())
        .collect();
    if words.iter().any(|word| INTERACTIVE_EDITORS.contains(word)) {
        return Some(
            "You cannot call an interactive editor. Use write_to_file to change file contents.",
        );
    }
    if words.contains(&"docker") {
        return Some(
            "You cannot execute docker commands. You already have access to a running container; \
             install or change whatever you need from inside it with linux_terminal.",
        );
    }
    if command.contains("ls -R") {
        return Some("This command usually returns too much output, hence, it is not allowed.");
    }
    None
}

fn linux_terminal(args: &Map<String, Value>, ctx: &mut CommandContext<'_>) -> Result<Outcome> {
    let command = str_arg(args, "command")?.trim();
    if let Some(reason) = refusal(command) {
        return Ok(Outcome::Continue(reason.to_string()));
    }
    let command = command.strip_prefix("bash ").unwrap_or(command);
    let output = ctx.session.channel.execute(command)?;
    Ok(Outcome::Continue(output))
}
