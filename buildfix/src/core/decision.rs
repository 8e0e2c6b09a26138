//! Parsing and validation of oracle decisions.
//!
//! The oracle is asked for `{"thoughts": ..., "command": {"name": ..., "args": {...}}}`.
//! Replies are often wrapped in prose or code fences, so parsing falls back to
//! the outermost `{...}` fragment before validating against the schema.

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use serde_json::{Map, Value};

use crate::core::text::outermost_fragment;

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

/// The oracle's choice for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Command {
        thoughts: String,
        name: String,
        args: Map<String, Value>,
    },
    Unparsable {
        reason: String,
    },
}

impl Decision {
    pub fn is_unparsable(&self) -> bool {
        matches!(self, Decision::Unparsable { .. })
    }
}

/// Checks oracle replies against the compiled decision schema.
pub struct DecisionParser {
    validator: Validator,
}

impl DecisionParser {
    pub fn new() -> Result<Self> {
        let schema: Value =
            serde_json::from_str(DECISION_SCHEMA).context("parse decision schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| anyhow!("compile decision schema: {err}"))?;
        Ok(Self { validator })
    }

    /// Parse a raw oracle reply into a [`Decision`]. Never fails.
    pub fn parse(&self, raw: &str) -> Decision {
        let value = match parse_json_object(raw) {
            Some(value) => value,
            None => {
                return Decision::Unparsable {
                    reason: "response is not a JSON object".to_string(),
                };
            }
        };

        let messages: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Decision::Unparsable {
                reason: format!("response does not match schema: {}", messages.join("; ")),
            };
        }

        let thoughts = match value.get("thoughts") {
            Some(Value::String(text)) => text.clone(),
            Some(other @ Value::Object(_)) => other.to_string(),
            _ => String::new(),
        };
        let command = &value["command"];
        let name = command["name"].as_str().unwrap_or_default().trim().to_string();
        let args = command
            .get("args")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Decision::Command {
            thoughts,
            name,
            args,
        }
    }
}

fn parse_json_object(raw: &str) -> Option<Value> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }
    let fragment = outermost_fragment(raw, '{', '}')?;
    match serde_json::from_str::<Value>(fragment) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parser() -> DecisionParser {
        DecisionParser::new().expect("schema compiles")
    }

    #[test]
    fn parses_plain_json() {
        let raw = r#"{"thoughts": "check sdk", "command": {"name": "linux_terminal", "args": {"command": "ls"}}}"#;
        let decision = parser().parse(raw);
        let Decision::Command {
            thoughts,
            name,
            args,
        } = decision
        else {
            panic!("expected command");
        };
        assert_eq!(thoughts, "check sdk");
        assert_eq!(name, "linux_terminal");
        assert_eq!(args.get("command"), Some(&json!("ls")));
    }

    #[test]
    fn parses_fenced_json_with_prose() {
        let raw = "Here is my answer:\n```json\n{\"command\": {\"name\": \"read_file\", \"args\": {\"file_path\": \"a\"}}}\n```";
        assert!(matches!(
            parser().parse(raw),
            Decision::Command { name, .. } if name == "read_file"
        ));
    }

    #[test]
    fn structured_thoughts_are_kept_as_json_text() {
        let raw = r#"{"thoughts": {"text": "hi"}, "command": {"name": "goals_accomplished"}}"#;
        let Decision::Command { thoughts, args, .. } = parser().parse(raw) else {
            panic!("expected command");
        };
        assert_eq!(thoughts, r#"{"text":"hi"}"#);
        assert!(args.is_empty());
    }

    #[test]
    fn missing_command_is_unparsable() {
        let decision = parser().parse(r#"{"thoughts": "nothing to do"}"#);
        assert!(decision.is_unparsable());
    }

    #[test]
    fn non_json_is_unparsable() {
        let decision = parser().parse("I think we should run gradle");
        assert_eq!(
            decision,
            Decision::Unparsable {
                reason: "response is not a JSON object".to_string()
            }
        );
    }

    #[test]
    fn wrong_arg_container_is_unparsable() {
        let raw = r#"{"command": {"name": "linux_terminal", "args": ["ls"]}}"#;
        assert!(parser().parse(raw).is_unparsable());
    }
}
