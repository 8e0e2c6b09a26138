//! Resolving the `run` source argument into host project directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, instrument};

use crate::io::git::Git;

/// Where a project comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSource {
    Git { url: String },
    Local { path: PathBuf },
}

impl ProjectSource {
    pub fn name(&self) -> Result<String> {
        match self {
            ProjectSource::Git { url } => project_name(url),
            ProjectSource::Local { path } => {
                let canonical = fs::canonicalize(path)
                    .with_context(|| format!("resolve {}", path.display()))?;
                project_name(&canonical.to_string_lossy())
            }
        }
    }
}

/// Last path segment without a trailing `.git`, restricted to file-name-safe characters.
pub fn project_name(source: &str) -> Result<String> {
    let trimmed = source.trim().trim_end_matches('/');
    let last = trimmed
        .rsplit(['/', ':', '\\'])
        .next()
        .unwrap_or(trimmed);
    let last = last.strip_suffix(".git").unwrap_or(last);
    let name: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        bail!("cannot derive a project name from '{source}'");
    }
    Ok(name)
}

/// Expand the CLI source: a `.txt` list (one URL per line, `#` comments), a
/// local directory with `local`, or a single Git URL.
pub fn resolve_sources(source: &str, local: bool) -> Result<Vec<ProjectSource>> {
    if local {
        let path = PathBuf::from(source);
        if !path.is_dir() {
            bail!("local project {} is not a directory", path.display());
        }
        return Ok(vec![ProjectSource::Local { path }]);
    }
    if source.ends_with(".txt") {
        let contents = fs::read_to_string(source)
            .with_context(|| format!("read project list {source}"))?;
        let sources: Vec<ProjectSource> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|url| ProjectSource::Git {
                url: url.to_string(),
            })
            .collect();
        if sources.is_empty() {
            bail!("project list {source} is empty");
        }
        return Ok(sources);
    }
    Ok(vec![ProjectSource::Git {
        url: source.to_string(),
    }])
}

/// Make the project available on the host and return its directory.
///
/// Git sources live under `workspace_dir/<name>`; an existing clone is
/// refreshed instead of cloned again.
#[instrument(skip_all, fields(name = %name))]
pub fn acquire(source: &ProjectSource, name: &str, workspace_dir: &Path) -> Result<PathBuf> {
    match source {
        ProjectSource::Local { path } => Ok(path.clone()),
        ProjectSource::Git { url } => {
            let dest = workspace_dir.join(name);
            let git = Git::new(&dest);
            if dest.join(".git").exists() {
                info!("refreshing existing clone");
                git.refresh()
                    .with_context(|| format!("refresh {}", dest.display()))?;
            } else {
                fs::create_dir_all(workspace_dir)
                    .with_context(|| format!("create {}", workspace_dir.display()))?;
                info!(url = %url, "cloning");
                git.clone_recursive(url)
                    .with_context(|| format!("clone {url}"))?;
            }
            Ok(dest)
        }
    }
}
