//! Session model: naming, mount mode and the container labels that record it.

use crate::target::ExecutionTarget;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

pub const LABEL_USER: &str = "dockbench.user";
pub const LABEL_REPO: &str = "dockbench.repo";
pub const LABEL_MODE: &str = "dockbench.mode";
pub const LABEL_PORT: &str = "dockbench.port";
pub const LABEL_VOLUMES: &str = "dockbench.volumes";

/// How session data directories reach the container
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Direct bind mounts of the resolved directories
    #[default]
    Bind,
    /// Docker-managed volumes populated before start and synced back after stop
    Volume,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Bind => "bind",
            SessionMode::Volume => "volume",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "bind" => Some(SessionMode::Bind),
            "volume" => Some(SessionMode::Volume),
            _ => None,
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// A managed volume and the directory its contents come from and return to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub volume: String,
    /// Directory on the execution target
    pub source: String,
    pub container_path: String,
}

/// One user's container-backed workspace.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub container_name: String,
    /// Repository directory on the execution target
    pub repo_path: String,
    pub target: ExecutionTarget,
    pub port: u16,
    pub mode: SessionMode,
    pub state: SessionState,
    pub volumes: Vec<VolumeBinding>,
}

impl Session {
    pub fn new(
        user: &str,
        repo_path: &str,
        target: ExecutionTarget,
        port: u16,
        mode: SessionMode,
    ) -> Self {
        Self {
            user: user.to_string(),
            container_name: container_name(repo_path, user),
            repo_path: repo_path.to_string(),
            target,
            port,
            mode,
            state: SessionState::Stopped,
            volumes: Vec::new(),
        }
    }

    /// Address the interactive server is reachable on from the desktop.
    pub fn url(&self) -> String {
        if self.target.is_remote() {
            format!("http://{}:{}", self.target.host, self.port)
        } else {
            format!("http://localhost:{}", self.port)
        }
    }

    pub fn labels(&self) -> Vec<(String, String)> {
        let volumes = serde_json::to_string(&self.volumes).unwrap_or_else(|_| "[]".to_string());
        vec![
            (LABEL_USER.to_string(), self.user.clone()),
            (LABEL_REPO.to_string(), self.repo_path.clone()),
            (LABEL_MODE.to_string(), self.mode.as_str().to_string()),
            (LABEL_PORT.to_string(), self.port.to_string()),
            (LABEL_VOLUMES.to_string(), volumes),
        ]
    }

    /// Rebuild a running session from the labels stamped on its container.
    ///
    /// Returns `None` when the container was not started by this launcher.
    pub fn from_labels(
        container_name: &str,
        labels: &HashMap<String, String>,
        target: ExecutionTarget,
    ) -> Option<Self> {
        let user = labels.get(LABEL_USER)?;
        let repo_path = labels.get(LABEL_REPO)?;
        let mode = labels
            .get(LABEL_MODE)
            .and_then(|mode| SessionMode::parse(mode))
            .unwrap_or_default();
        let port = labels
            .get(LABEL_PORT)
            .and_then(|port| port.parse().ok())
            .unwrap_or(0);
        let volumes = labels
            .get(LABEL_VOLUMES)
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();

        Some(Self {
            user: user.clone(),
            container_name: container_name.to_string(),
            repo_path: repo_path.clone(),
            target,
            port,
            mode,
            state: SessionState::Running,
            volumes,
        })
    }
}

/// Everything the presentation layer supplies to start a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub repo_path: String,
    pub mode: SessionMode,
    pub requested_port: Option<u16>,
    /// Apply the configured CPU and memory ceilings (remote targets only)
    pub high_demand: bool,
    pub pull_before_start: bool,
}

/// Container name for a repository and user: `<repo basename>_<user>`.
pub fn container_name(repo_path: &str, user: &str) -> String {
    let repo = repo_basename(repo_path);
    format!("{}{}", sanitize_name(&repo), user_suffix(user))
}

/// Trailing part of every container name owned by `user`.
pub(crate) fn user_suffix(user: &str) -> String {
    format!("_{}", sanitize_name(user))
}

/// Last path component, accepting either separator.
pub fn repo_basename(repo_path: &str) -> String {
    repo_path
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("workspace")
        .to_string()
}

/// Map a name onto the characters Docker accepts in container names.
///
/// `_` separates repository from user, so it is replaced like any other
/// disallowed character. A name that had to change gets a short digest of
/// the original appended, keeping distinct names distinct.
pub(crate) fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed == name {
        return name.to_string();
    }
    let base = if trimmed.is_empty() { "default" } else { trimmed };
    format!("{base}-{}", name_digest(name))
}

fn name_digest(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    format!("{:x}", hasher.finalize())[..8].to_string()
}
