//! Repository selection: a local folder pick or a scan of a remote directory.

use crate::context::prompter::Prompter;
use crate::session::repo_basename;
use crate::target::{display_path, shell_quote};
use crate::transport::{Transport, TransportError};
use git2::{Repository, RepositoryOpenFlags};
use std::path::Path;
use thiserror::Error;

const GIT_MARKER: &str = "git";
const DIR_MARKER: &str = "dir";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} does not exist or is not a directory")]
    NotADirectory(String),
    #[error("No repositories found in {0}")]
    NothingFound(String),
    #[error("No repository directory configured for {0}")]
    NoReposDir(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// A repository the session will mount. Read-only input to the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryReference {
    /// Absolute path on the execution target, `/`-separated
    pub path: String,
    pub name: String,
    pub is_git: bool,
}

impl RepositoryReference {
    /// Reference a folder on this machine.
    pub fn local(path: &Path) -> Result<Self, RepositoryError> {
        if !path.is_dir() {
            return Err(RepositoryError::NotADirectory(path.display().to_string()));
        }
        let path = std::fs::canonicalize(path)?;
        let is_git =
            Repository::open_ext(&path, RepositoryOpenFlags::empty(), &[] as &[&Path]).is_ok();
        let path = display_path(&path);
        Ok(Self {
            name: repo_basename(&path).to_string(),
            path,
            is_git,
        })
    }

    /// Reference a path on a remote target without checking it.
    pub fn remote(path: &str, is_git: bool) -> Self {
        let path = path.trim_end_matches('/').to_string();
        Self {
            name: repo_basename(&path).to_string(),
            path,
            is_git,
        }
    }

    /// Label shown in selection lists.
    pub fn label(&self) -> String {
        if self.is_git {
            self.name.clone()
        } else {
            format!("{} (not a git repository)", self.name)
        }
    }
}

/// Every direct subdirectory of `repos_dir` on the transport's target,
/// git repositories first.
pub async fn scan(
    transport: &Transport,
    repos_dir: &str,
) -> Result<Vec<RepositoryReference>, RepositoryError> {
    let dir = shell_quote(repos_dir.trim_end_matches('/'));
    let script = format!(
        "for d in {dir}/*/; do [ -d \"$d\" ] || continue; \
         if [ -e \"$d.git\" ]; then echo \"{GIT_MARKER} $d\"; else echo \"{DIR_MARKER} $d\"; fi; done"
    );
    let output = transport.run_checked("repository scan", &script).await?;
    let mut repositories = parse_scan(&output.stdout);
    if repositories.is_empty() {
        return Err(RepositoryError::NothingFound(repos_dir.to_string()));
    }
    repositories.sort_by(|a, b| b.is_git.cmp(&a.is_git).then_with(|| a.name.cmp(&b.name)));
    tracing::debug!("Found {} repositories in {}", repositories.len(), repos_dir);
    Ok(repositories)
}

fn parse_scan(output: &str) -> Vec<RepositoryReference> {
    output
        .lines()
        .filter_map(|line| {
            let (marker, path) = line.split_once(' ')?;
            let is_git = match marker {
                GIT_MARKER => true,
                DIR_MARKER => false,
                _ => return None,
            };
            Some(RepositoryReference::remote(path.trim(), is_git))
        })
        .collect()
}

/// Ask the user to pick one of `repositories`. `None` means they backed out.
pub fn select_repository(
    prompter: &dyn Prompter,
    repositories: &[RepositoryReference],
) -> Option<RepositoryReference> {
    let labels: Vec<String> = repositories.iter().map(RepositoryReference::label).collect();
    let index = prompter.select("Select a repository", &labels)?;
    repositories.get(index).cloned()
}
