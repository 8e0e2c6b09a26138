//! Android SDK installation commands.

use anyhow::{Result, bail};
use serde_json::{Map, Value};

use super::{CommandContext, CommandDescriptor, Outcome, ParamSpec, ParamType, str_arg};
use crate::io::config::AppConfig;

const VERSION_PARAM: &[ParamSpec] = &[ParamSpec {
    name: "version",
    kind: ParamType::String,
    description: "Version to install, e.g. 34 for a platform or 34.0.0 for build tools",
    required: true,
}];

fn sdk_enabled(cfg: &AppConfig) -> bool {
    cfg.toolchain.android_sdk
}

pub fn descriptors() -> Vec<CommandDescriptor> {
    vec![
        CommandDescriptor {
            name: "download_sdk_platform",
            description: "Install an Android SDK platform with sdkmanager",
            params: VERSION_PARAM,
            aliases: &[],
            handler: download_sdk_platform,
            enabled: sdk_enabled,
        },
        CommandDescriptor {
            name: "download_sdk_build_tools",
            description: "Install Android SDK build tools with sdkmanager",
            params: VERSION_PARAM,
            aliases: &[],
            handler: download_sdk_build_tools,
            enabled: sdk_enabled,
        },
    ]
}

/// Versions go inside a double-quoted sdkmanager package name.
fn checked_version(args: &Map<String, Value>) -> Result<&str> {
    let version = str_arg(args, "version")?.trim();
    if version.is_empty()
        || !version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        bail!("invalid version '{version}'");
    }
    Ok(version)
}

fn sdkmanager(ctx: &mut CommandContext<'_>, package: &str) -> Result<Outcome> {
    let output = ctx
        .session
        .channel
        .execute(&format!("yes | sdkmanager \"{package}\""))?;
    Ok(Outcome::Continue(output))
}

fn download_sdk_platform(args: &Map<String, Value>, ctx: &mut CommandContext<'_>) -> Result<Outcome> {
    let version = checked_version(args)?;
    let version = version.strip_prefix("android-").unwrap_or(version);
    sdkmanager(ctx, &format!("platforms;android-{version}"))
}

fn download_sdk_build_tools(
    args: &Map<String, Value>,
    ctx: &mut CommandContext<'_>,
) -> Result<Outcome> {
    let version = checked_version(args)?;
    sdkmanager(ctx, &format!("build-tools;{version}"))
}
