//! Post-session source control reconciliation.
//!
//! Git runs where the repository lives (through the session's transport), so
//! the same flow serves local and remote repositories.

pub mod push;
pub mod remote;

use crate::context::AppContext;
use crate::context::command_runner::ProcessOutput;
use crate::context::prompter::Prompter;
use crate::target::{shell_join, shell_quote};
use crate::transport::{Transport, TransportError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub use push::{AuthMethod, PushFailure, PushOutcome};

/// Keeps git from blocking on a credential prompt nobody can answer.
const NO_PROMPT: &[(&str, &str)] = &[("GIT_TERMINAL_PROMPT", "0")];

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {operation} failed: {detail}")]
    Command { operation: String, detail: String },
    #[error("{0} is not a git repository")]
    NotARepository(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Repository state at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitState {
    /// HEAD, or `None` before the first commit
    pub commit: Option<String>,
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Output of a failed pre-snapshot pull
    pub pull_failure: Option<String>,
}

impl GitState {
    pub fn is_clean(&self) -> bool {
        self.modified.is_empty() && self.untracked.is_empty()
    }

    /// Short human-readable list of pending changes.
    pub fn change_summary(&self) -> String {
        let mut lines = Vec::new();
        lines.extend(self.modified.iter().map(|path| format!("  modified:  {path}")));
        lines.extend(self.untracked.iter().map(|path| format!("  new:       {path}")));
        lines.join("\n")
    }
}

/// What changed in a repository between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// `--oneline` entries of commits made since the earlier snapshot
    pub new_commits: Vec<String>,
    pub changed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to commit
    Clean,
    /// The user declined to enter a commit message
    Cancelled,
    Committed { commit: String, push: PushOutcome },
}

pub struct GitReconciler {
    transport: Transport,
    prompter: Arc<dyn Prompter>,
    /// Private key path valid where git runs
    key_path: String,
    editor: String,
}

impl GitReconciler {
    pub fn new(ctx: &AppContext, transport: Transport, key_path: &str) -> Self {
        Self {
            transport,
            prompter: ctx.prompter(),
            key_path: key_path.to_string(),
            editor: ctx.launcher_env().editor().to_string(),
        }
    }

    /// Record HEAD, porcelain status and untracked files, optionally pulling
    /// first. A failed pull is reported in the state, not returned as an error.
    pub async fn snapshot(&self, repo: &str, pull: bool) -> Result<GitState, GitError> {
        let pull_failure = if pull {
            let output = self.git(repo, &["pull", "--ff-only"], NO_PROMPT).await?;
            if output.is_success() {
                None
            } else {
                tracing::warn!("git pull in {} failed: {}", repo, output.detail());
                Some(output.detail())
            }
        } else {
            None
        };

        let status = self.git(repo, &["status", "--porcelain"], &[]).await?;
        if !status.is_success() {
            if status.stderr.contains("not a git repository") {
                return Err(GitError::NotARepository(repo.to_string()));
            }
            return Err(command_error("status", &status));
        }

        let head = self.git(repo, &["rev-parse", "HEAD"], &[]).await?;
        let commit = head
            .is_success()
            .then(|| head.stdout.trim().to_string())
            .filter(|commit| !commit.is_empty());

        let untracked = self
            .git(repo, &["ls-files", "--others", "--exclude-standard"], &[])
            .await?;
        let untracked = checked("ls-files", untracked)?;

        Ok(GitState {
            commit,
            modified: parse_porcelain(&status.stdout),
            untracked: untracked
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            timestamp: Utc::now(),
            pull_failure,
        })
    }

    /// Commit everything when the repository is dirty, then push.
    pub async fn detect_and_commit(&self, repo: &str) -> Result<ReconcileOutcome, GitError> {
        let state = self.snapshot(repo, false).await?;
        if state.is_clean() {
            tracing::info!("No changes in {}", repo);
            return Ok(ReconcileOutcome::Clean);
        }

        let Some(message) = self.prompter.commit_message(&state.change_summary()) else {
            return Ok(ReconcileOutcome::Cancelled);
        };

        let output = self.git(repo, &["add", "-A"], &[]).await?;
        checked("add", output)?;
        let output = self.git(repo, &["commit", "-m", &message], &[]).await?;
        checked("commit", output)?;

        let head = self.git(repo, &["rev-parse", "HEAD"], &[]).await?;
        let commit = checked("rev-parse", head)?.trim().to_string();
        tracing::info!("Committed {} in {}", commit, repo);

        let push = self.push(repo).await?;
        Ok(ReconcileOutcome::Committed { commit, push })
    }

    /// Commits and files changed since `before`.
    pub async fn diff_since(&self, repo: &str, before: &GitState) -> Result<DiffSummary, GitError> {
        let Some(base) = before.commit.as_deref() else {
            let log = self.git(repo, &["log", "--oneline"], &[]).await?;
            return Ok(DiffSummary {
                new_commits: non_empty_lines(&log.stdout),
                changed_files: Vec::new(),
            });
        };

        let range = format!("{base}..HEAD");
        let log = self.git(repo, &["log", "--oneline", &range], &[]).await?;
        let log = checked("log", log)?;
        let diff = self
            .git(repo, &["diff", "--name-only", base, "HEAD"], &[])
            .await?;
        let diff = checked("diff", diff)?;

        Ok(DiffSummary {
            new_commits: non_empty_lines(&log),
            changed_files: non_empty_lines(&diff),
        })
    }

    /// Run `git -C repo ARGS` on the target with extra environment assignments.
    async fn git(
        &self,
        repo: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<ProcessOutput, GitError> {
        let words = ["git", "-C", repo].into_iter().chain(args.iter().copied());
        let mut command = shell_join(words);
        if !env.is_empty() {
            let assignments = env
                .iter()
                .map(|(key, value)| format!("{key}={}", shell_quote(value)))
                .collect::<Vec<_>>()
                .join(" ");
            command = format!("{assignments} {command}");
        }
        Ok(self.transport.run(&command).await?)
    }
}

fn command_error(operation: &str, output: &ProcessOutput) -> GitError {
    GitError::Command {
        operation: operation.to_string(),
        detail: output.detail(),
    }
}

fn checked(operation: &str, output: ProcessOutput) -> Result<String, GitError> {
    if output.is_success() {
        Ok(output.stdout)
    } else {
        Err(command_error(operation, &output))
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tracked paths with changes, from `git status --porcelain` (v1).
/// Untracked entries are left to `ls-files`; renames report the new path.
pub fn parse_porcelain(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.len() > 3 && !line.starts_with("??") && !line.starts_with("!!"))
        .map(|line| {
            let path = &line[3..];
            match path.split_once(" -> ") {
                Some((_, renamed)) => renamed.to_string(),
                None => path.to_string(),
            }
        })
        .map(|path| path.trim_matches('"').to_string())
        .collect()
}
