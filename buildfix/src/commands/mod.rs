//! Command registry and dispatcher.
//!
//! Commands are plain descriptors registered explicitly from the provider
//! modules below. Dispatch turns every failure (unknown name, disabled command,
//! bad arguments, handler error) into result text for the next cycle.

pub mod files;
pub mod shell;
pub mod system;
pub mod toolchain;

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use jsonschema::Validator;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::io::config::AppConfig;
use crate::io::paths::ProjectPaths;
use crate::io::sandbox::Sandbox;
use crate::io::session::Session;

/// Everything a handler may touch while running.
pub struct CommandContext<'a> {
    pub session: &'a mut Session,
    pub sandbox: &'a dyn Sandbox,
    pub config: &'a AppConfig,
    pub paths: &'a ProjectPaths,
}

/// What the loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue(String),
    /// The command claims the goals are met. The loop still checks the marker.
    Finished(String),
}

impl Outcome {
    pub fn text(&self) -> &str {
        match self {
            Outcome::Continue(text) | Outcome::Finished(text) => text,
        }
    }
}

pub type Handler = fn(&Map<String, Value>, &mut CommandContext<'_>) -> Result<Outcome>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

impl ParamType {
    fn as_json_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub description: &'static str,
    pub required: bool,
}

#[derive(Clone, Copy)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
    pub aliases: &'static [&'static str],
    pub handler: Handler,
    pub enabled: fn(&AppConfig) -> bool,
}

pub fn always_enabled(_: &AppConfig) -> bool {
    true
}

impl CommandDescriptor {
    /// JSON schema for the `args` object.
    pub fn args_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|param| {
                (
                    param.name.to_string(),
                    json!({
                        "type": param.kind.as_json_type(),
                        "description": param.description,
                    }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|param| param.required)
            .map(|param| param.name)
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    /// One-line listing: `name: description, args: {"p": "<type>"}`.
    fn signature(&self) -> String {
        let args = self
            .params
            .iter()
            .map(|param| {
                let optional = if param.required { "" } else { "?" };
                format!("\"{}{optional}\": \"<{}>\"", param.name, param.kind.as_json_type())
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}: {}, args: {{{args}}}", self.name, self.description)
    }
}

struct Entry {
    descriptor: CommandDescriptor,
    validator: Validator,
}

pub struct Registry {
    commands: BTreeMap<&'static str, Entry>,
    aliases: BTreeMap<&'static str, &'static str>,
    /// Registration order, for a stable prompt listing.
    order: Vec<&'static str>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            commands: BTreeMap::new(),
            aliases: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Registry with every built-in provider.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in shell::descriptors()
            .into_iter()
            .chain(files::descriptors())
            .chain(system::descriptors())
            .chain(toolchain::descriptors())
        {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Add a command. Name and alias collisions are logged and the new
    /// registration wins, except that an alias never shadows a primary name.
    pub fn register(&mut self, descriptor: CommandDescriptor) -> Result<()> {
        let validator = jsonschema::validator_for(&descriptor.args_schema())
            .map_err(|err| anyhow!("invalid args schema for {}: {}", descriptor.name, err))?;
        let name = descriptor.name;
        if self.commands.contains_key(name) {
            warn!(name, "command registered twice, replacing");
        } else {
            self.order.push(name);
        }
        if let Some(target) = self.aliases.remove(name) {
            warn!(name, alias_of = target, "command name shadows an existing alias");
        }
        for &alias in descriptor.aliases {
            if self.commands.contains_key(alias) || alias == name {
                warn!(alias, command = name, "alias collides with a command name, ignoring");
                continue;
            }
            if let Some(previous) = self.aliases.insert(alias, name) {
                warn!(alias, previous, command = name, "alias reassigned");
            }
        }
        self.commands.insert(name, Entry { descriptor, validator });
        Ok(())
    }

    /// Primary name first, then aliases.
    pub fn resolve(&self, name: &str) -> Option<&CommandDescriptor> {
        self.entry(name).map(|entry| &entry.descriptor)
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        let primary = self.aliases.get(name).copied();
        self.commands
            .get(name)
            .or_else(|| primary.and_then(|target| self.commands.get(target)))
    }

    /// Run a command by name. Never fails; problems come back as text.
    pub fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
        ctx: &mut CommandContext<'_>,
    ) -> Outcome {
        let Some(entry) = self.entry(name) else {
            warn!(name, "unknown command");
            return Outcome::Continue(format!(
                "Cannot execute '{name}': unknown command. Do not try to use this command again."
            ));
        };
        let descriptor = &entry.descriptor;
        if !(descriptor.enabled)(ctx.config) {
            return Outcome::Continue(format!(
                "Cannot execute '{}': this command is unavailable in the current configuration.",
                descriptor.name
            ));
        }
        let instance = Value::Object(args.clone());
        let problems: Vec<String> = entry
            .validator
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect();
        if !problems.is_empty() {
            return Outcome::Continue(format!(
                "Cannot execute '{}': invalid arguments: {}",
                descriptor.name,
                problems.join("; ")
            ));
        }
        debug!(command = descriptor.name, "dispatching");
        match (descriptor.handler)(args, ctx) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(command = descriptor.name, err = %format!("{err:#}"), "command failed");
                Outcome::Continue(format!("Error: {err:#}"))
            }
        }
    }

    /// Numbered listing of the commands enabled under `cfg`.
    pub fn command_prompt(&self, cfg: &AppConfig) -> String {
        self.order
            .iter()
            .filter_map(|name| self.commands.get(name))
            .map(|entry| &entry.descriptor)
            .filter(|descriptor| (descriptor.enabled)(cfg))
            .enumerate()
            .map(|(idx, descriptor)| format!("{}. {}\n", idx + 1, descriptor.signature()))
            .collect()
    }

    pub fn enabled_names(&self, cfg: &AppConfig) -> Vec<&'static str> {
        self.order
            .iter()
            .filter_map(|name| self.commands.get(name))
            .filter(|entry| (entry.descriptor.enabled)(cfg))
            .map(|entry| entry.descriptor.name)
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch a string argument already checked by the schema.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string argument '{name}'"))
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::{fast_config, paths, session};
    use super::*;

    fn echo_handler(args: &Map<String, Value>, _ctx: &mut CommandContext<'_>) -> Result<Outcome> {
        Ok(Outcome::Continue(format!("echo {}", str_arg(args, "text")?)))
    }

    fn failing_handler(_: &Map<String, Value>, _ctx: &mut CommandContext<'_>) -> Result<Outcome> {
        Err(anyhow!("boom"))
    }

    fn never(_: &AppConfig) -> bool {
        false
    }

    const TEXT_PARAM: &[ParamSpec] = &[ParamSpec {
        name: "text",
        kind: ParamType::String,
        description: "text to echo",
        required: true,
    }];

    fn descriptor(name: &'static str, aliases: &'static [&'static str]) -> CommandDescriptor {
        CommandDescriptor {
            name,
            description: "Echo text",
            params: TEXT_PARAM,
            aliases,
            handler: echo_handler,
            enabled: always_enabled,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn in_context<T>(f: impl FnOnce(&mut CommandContext<'_>) -> T) -> T {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = fast_config();
        let sandbox = super::test_fixtures::sandbox_with(Vec::new());
        let mut session = session(&sandbox, &cfg, temp.path());
        let paths = paths(temp.path());
        let mut ctx = CommandContext {
            session: &mut session,
            sandbox: &sandbox,
            config: &cfg,
            paths: &paths,
        };
        f(&mut ctx)
    }

    #[test]
    fn resolve_prefers_primary_name_then_alias() {
        let mut registry = Registry::new();
        registry
            .register(descriptor("write_to_file", &["write_file", "create_file"]))
            .expect("register");
        assert_eq!(registry.resolve("write_to_file").map(|d| d.name), Some("write_to_file"));
        assert_eq!(registry.resolve("create_file").map(|d| d.name), Some("write_to_file"));
        assert!(registry.resolve("delete_file").is_none());
    }

    #[test]
    fn collisions_are_not_fatal_and_later_wins() {
        let mut registry = Registry::new();
        registry.register(descriptor("a", &["x"])).expect("register");
        registry.register(descriptor("b", &["x", "a"])).expect("register");
        assert_eq!(registry.resolve("x").map(|d| d.name), Some("b"));
        assert_eq!(registry.resolve("a").map(|d| d.name), Some("a"));
    }

    #[test]
    fn unknown_command_returns_text() {
        let registry = Registry::new();
        let outcome = in_context(|ctx| registry.dispatch("fly", &Map::new(), ctx));
        assert_eq!(
            outcome,
            Outcome::Continue(
                "Cannot execute 'fly': unknown command. Do not try to use this command again."
                    .to_string()
            )
        );
    }

    #[test]
    fn invalid_arguments_are_reported_as_text() {
        let mut registry = Registry::new();
        registry.register(descriptor("echo", &[])).expect("register");
        let missing = in_context(|ctx| registry.dispatch("echo", &Map::new(), ctx));
        assert!(missing.text().contains("invalid arguments"));
        assert!(missing.text().contains("text"));

        let wrong_type = in_context(|ctx| registry.dispatch("echo", &args(json!({"text": 5})), ctx));
        assert!(wrong_type.text().contains("invalid arguments"));

        let extra = in_context(|ctx| {
            registry.dispatch("echo", &args(json!({"text": "a", "other": 1})), ctx)
        });
        assert!(extra.text().contains("invalid arguments"));
    }

    #[test]
    fn valid_call_runs_handler_and_errors_become_text() {
        let mut registry = Registry::new();
        registry.register(descriptor("echo", &["say"])).expect("register");
        registry
            .register(CommandDescriptor {
                handler: failing_handler,
                ..descriptor("fail", &[])
            })
            .expect("register");
        let ok = in_context(|ctx| registry.dispatch("say", &args(json!({"text": "hi"})), ctx));
        assert_eq!(ok, Outcome::Continue("echo hi".to_string()));
        let failed = in_context(|ctx| registry.dispatch("fail", &args(json!({"text": "x"})), ctx));
        assert_eq!(failed, Outcome::Continue("Error: boom".to_string()));
    }

    #[test]
    fn disabled_commands_are_hidden_and_refused() {
        let mut registry = Registry::new();
        registry.register(descriptor("echo", &[])).expect("register");
        registry
            .register(CommandDescriptor {
                enabled: never,
                ..descriptor("hidden", &[])
            })
            .expect("register");
        let cfg = AppConfig::default();
        let listing = registry.command_prompt(&cfg);
        assert_eq!(listing, "1. echo: Echo text, args: {\"text\": \"<string>\"}\n");
        let refused = in_context(|ctx| registry.dispatch("hidden", &args(json!({"text": "x"})), ctx));
        assert!(refused.text().contains("unavailable"));
    }

    #[test]
    fn builtins_register_every_provider() {
        let registry = Registry::with_builtins().expect("builtins");
        let mut cfg = AppConfig::default();
        assert_eq!(
            registry.enabled_names(&cfg),
            vec![
                "linux_terminal",
                "read_file",
                "write_to_file",
                "goals_accomplished",
                "download_sdk_platform",
                "download_sdk_build_tools",
            ]
        );
        cfg.toolchain.android_sdk = false;
        assert!(!registry.command_prompt(&cfg).contains("sdk"));
        assert!(registry.resolve("write_file").is_some());
    }
}
