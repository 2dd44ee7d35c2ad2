use super::remote::{RemoteKind, classify, https_to_ssh};
use super::{GitError, GitReconciler, NO_PROMPT};
use crate::context::command_runner::ProcessOutput;
use crate::context::prompter::PushRecovery;
use crate::target::ExecutionTarget;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Agent-backed ssh that fails instead of asking for a passphrase.
const AGENT_SSH_COMMAND: &str = "ssh -o BatchMode=yes -o StrictHostKeyChecking=accept-new";

static HTTP_DENIED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(401|403)\b").expect("valid regex"));

/// Why a push was refused, as far as git's output tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    MissingKey,
    ExpiredToken,
    NonFastForward,
    Network,
    Other,
}

impl PushFailure {
    pub fn classify(stderr: &str) -> Self {
        let text = stderr.to_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|needle| text.contains(needle));

        if any(&[
            "could not resolve hostname",
            "could not resolve host",
            "timed out",
            "network is unreachable",
            "connection refused",
        ]) {
            PushFailure::Network
        } else if any(&["publickey", "no such identity"]) {
            PushFailure::MissingKey
        } else if any(&[
            "authentication failed",
            "could not read username",
            "terminal prompts disabled",
        ]) || HTTP_DENIED.is_match(&text)
        {
            PushFailure::ExpiredToken
        } else if any(&["non-fast-forward", "[rejected]", "fetch first"]) {
            PushFailure::NonFastForward
        } else {
            PushFailure::Other
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            PushFailure::MissingKey => {
                "The remote rejected the SSH key. Add the public key to your account on the git host."
            }
            PushFailure::ExpiredToken => {
                "The stored credentials were rejected. Renew the access token or switch the remote to SSH."
            }
            PushFailure::NonFastForward => {
                "The remote has commits you do not have. Pull and merge them, then push again."
            }
            PushFailure::Network => {
                "The git host could not be reached. Check the network and retry."
            }
            PushFailure::Other => "The push failed. See git's output above.",
        }
    }
}

impl fmt::Display for PushFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PushFailure::MissingKey => "missing key",
            PushFailure::ExpiredToken => "expired token",
            PushFailure::NonFastForward => "non-fast-forward",
            PushFailure::Network => "network",
            PushFailure::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Credentials the successful push used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// The user's ssh agent or default identities
    Agent,
    /// The session keypair
    DirectKey,
    /// No ssh involved (local or file remotes)
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed(AuthMethod),
    Skipped { failure: PushFailure, detail: String },
    NoRemote,
}

type Attempt = Result<AuthMethod, (PushFailure, String)>;

impl GitReconciler {
    /// Push HEAD to `origin`, asking the user how to recover from each failure.
    ///
    /// An HTTPS origin is rewritten to its SSH form before pushing, so token
    /// prompts never block the session.
    pub async fn push(&self, repo: &str) -> Result<PushOutcome, GitError> {
        loop {
            let Some(url) = self.origin_url(repo).await? else {
                tracing::info!("{} has no origin remote, nothing to push", repo);
                return Ok(PushOutcome::NoRemote);
            };
            let url = self.prefer_ssh(repo, url).await?;

            let (failure, detail) = match self.push_once(repo, classify(&url)).await? {
                Ok(method) => {
                    tracing::info!("Pushed {} to {}", repo, url);
                    return Ok(PushOutcome::Pushed(method));
                }
                Err(failed) => failed,
            };

            tracing::warn!("Push from {} failed ({}): {}", repo, failure, detail);
            let message = format!("{detail}\n{}", failure.advice());
            match self.prompter.push_recovery(&message) {
                PushRecovery::Retry => continue,
                PushRecovery::OpenEditor => {
                    self.open_editor(repo).await;
                    continue;
                }
                PushRecovery::Skip => return Ok(PushOutcome::Skipped { failure, detail }),
            }
        }
    }

    async fn origin_url(&self, repo: &str) -> Result<Option<String>, GitError> {
        let output = self.git(repo, &["remote", "get-url", "origin"], &[]).await?;
        let url = output.stdout.trim();
        if output.is_success() && !url.is_empty() {
            Ok(Some(url.to_string()))
        } else {
            Ok(None)
        }
    }

    async fn prefer_ssh(&self, repo: &str, url: String) -> Result<String, GitError> {
        if classify(&url) != RemoteKind::Https {
            return Ok(url);
        }
        let Some(ssh_url) = https_to_ssh(&url) else {
            return Ok(url);
        };
        let output = self
            .git(repo, &["remote", "set-url", "origin", &ssh_url], &[])
            .await?;
        if output.is_success() {
            println!("Switched origin from {url} to {ssh_url}");
            Ok(ssh_url)
        } else {
            tracing::warn!("Could not rewrite origin to SSH: {}", output.detail());
            Ok(url)
        }
    }

    async fn push_once(&self, repo: &str, kind: RemoteKind) -> Result<Attempt, GitError> {
        const PUSH: &[&str] = &["push", "-u", "origin", "HEAD"];

        if kind != RemoteKind::Ssh {
            let output = self.git(repo, PUSH, NO_PROMPT).await?;
            return Ok(attempt(output, AuthMethod::Plain));
        }

        let agent_env = [
            ("GIT_SSH_COMMAND", AGENT_SSH_COMMAND),
            ("GIT_TERMINAL_PROMPT", "0"),
        ];
        let output = self.git(repo, PUSH, &agent_env).await?;
        let agent = attempt(output, AuthMethod::Agent);
        match agent {
            Err((PushFailure::MissingKey, _)) => {
                tracing::debug!("Agent push refused, retrying with {}", self.key_path);
                let direct = ExecutionTarget::git_ssh_command(&self.key_path);
                let direct_env = [
                    ("GIT_SSH_COMMAND", direct.as_str()),
                    ("GIT_TERMINAL_PROMPT", "0"),
                ];
                let output = self.git(repo, PUSH, &direct_env).await?;
                Ok(attempt(output, AuthMethod::DirectKey))
            }
            other => Ok(other),
        }
    }

    /// Open the configured editor on a local checkout and wait for it to exit.
    async fn open_editor(&self, repo: &str) {
        if self.transport.target().is_remote() {
            println!(
                "{} lives on {}. Fix it there, then choose retry.",
                repo,
                self.transport.target().host
            );
            return;
        }

        let mut words = self.editor.split_whitespace();
        let Some(program) = words.next() else {
            return;
        };
        let status = tokio::process::Command::new(program)
            .args(words)
            .arg(repo)
            .status()
            .await;
        match status {
            Ok(status) if !status.success() => {
                tracing::warn!("Editor {} exited with {}", self.editor, status)
            }
            Err(err) => tracing::warn!("Could not start editor {}: {}", self.editor, err),
            Ok(_) => {}
        }
    }
}

fn attempt(output: ProcessOutput, method: AuthMethod) -> Attempt {
    if output.is_success() {
        Ok(method)
    } else {
        let detail = output.detail();
        Err((PushFailure::classify(&detail), detail))
    }
}
