use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LauncherEnvError {
    #[error("Failed to determine home directory")]
    NoHomeDirectory,
    #[error("Failed to determine the current user name")]
    NoUser,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime environment for the launcher: where configuration lives, where
/// SSH material is kept, and who the desktop user is.
///
/// Path resolution priority (highest to lowest):
/// 1. Builder override (test-only)
/// 2. Launcher-specific env var (`DOCKBENCH_CONFIG_HOME`, `DOCKBENCH_SSH_DIR`)
/// 3. XDG env var (`XDG_CONFIG_HOME`)
/// 4. Default fallback (`~/.config`, `~/.ssh`)
#[derive(Debug, Clone)]
pub struct LauncherEnv {
    config_dir: PathBuf,
    ssh_dir: PathBuf,
    user: String,
    editor: String,
}

impl LauncherEnv {
    pub fn new() -> Result<Self, LauncherEnvError> {
        Ok(Self {
            config_dir: Self::resolve_config_dir(None)?,
            ssh_dir: Self::resolve_ssh_dir(None)?,
            user: Self::resolve_user(None)?,
            editor: Self::resolve_editor(None),
        })
    }

    #[cfg(test)]
    pub fn builder() -> LauncherEnvBuilder {
        LauncherEnvBuilder::new()
    }

    /// Get the config directory path (holds dockbench.toml)
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Directory holding private keys and known_hosts
    pub fn ssh_dir(&self) -> &Path {
        &self.ssh_dir
    }

    /// Login name of the desktop user
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn editor(&self) -> &str {
        &self.editor
    }

    /// Private key path for a user's launcher keypair; the public key sits
    /// next to it with a `.pub` suffix.
    pub fn key_path(&self, key_name: &str, user: &str) -> PathBuf {
        self.ssh_dir.join(format!("{key_name}_{user}"))
    }

    pub fn known_hosts(&self) -> PathBuf {
        self.ssh_dir.join("known_hosts")
    }

    pub fn ensure_directories(&self) -> Result<(), LauncherEnvError> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.ssh_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.ssh_dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }

    fn home_dir() -> Result<PathBuf, LauncherEnvError> {
        env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map(PathBuf::from)
            .map_err(|_| LauncherEnvError::NoHomeDirectory)
    }

    fn resolve_config_dir(override_dir: Option<&PathBuf>) -> Result<PathBuf, LauncherEnvError> {
        if let Some(config_dir) = override_dir {
            return Ok(config_dir.join("dockbench"));
        }

        if let Ok(dir) = env::var("DOCKBENCH_CONFIG_HOME") {
            return Ok(PathBuf::from(dir).join("dockbench"));
        }

        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config).join("dockbench"));
        }

        Ok(Self::home_dir()?.join(".config").join("dockbench"))
    }

    fn resolve_ssh_dir(override_dir: Option<&PathBuf>) -> Result<PathBuf, LauncherEnvError> {
        if let Some(ssh_dir) = override_dir {
            return Ok(ssh_dir.clone());
        }

        if let Ok(dir) = env::var("DOCKBENCH_SSH_DIR") {
            return Ok(PathBuf::from(dir));
        }

        Ok(Self::home_dir()?.join(".ssh"))
    }

    fn resolve_user(override_user: Option<&String>) -> Result<String, LauncherEnvError> {
        if let Some(user) = override_user {
            return Ok(user.clone());
        }

        env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .map_err(|_| LauncherEnvError::NoUser)
    }

    fn resolve_editor(override_editor: Option<&String>) -> String {
        if let Some(editor) = override_editor {
            return editor.clone();
        }

        env::var("VISUAL")
            .or_else(|_| env::var("EDITOR"))
            .unwrap_or_else(|_| "vi".to_string())
    }
}

/// Builder for creating LauncherEnv instances with custom values
#[cfg(test)]
pub struct LauncherEnvBuilder {
    config_dir: Option<PathBuf>,
    ssh_dir: Option<PathBuf>,
    user: Option<String>,
    editor: Option<String>,
}

#[cfg(test)]
impl LauncherEnvBuilder {
    pub fn new() -> Self {
        Self {
            config_dir: None,
            ssh_dir: None,
            user: None,
            editor: None,
        }
    }

    pub fn with_config_dir(mut self, dir: PathBuf) -> Self {
        self.config_dir = Some(dir);
        self
    }

    pub fn with_ssh_dir(mut self, dir: PathBuf) -> Self {
        self.ssh_dir = Some(dir);
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_editor(mut self, editor: &str) -> Self {
        self.editor = Some(editor.to_string());
        self
    }

    pub fn build(self) -> Result<LauncherEnv, LauncherEnvError> {
        Ok(LauncherEnv {
            config_dir: LauncherEnv::resolve_config_dir(self.config_dir.as_ref())?,
            ssh_dir: LauncherEnv::resolve_ssh_dir(self.ssh_dir.as_ref())?,
            user: LauncherEnv::resolve_user(self.user.as_ref())?,
            editor: LauncherEnv::resolve_editor(self.editor.as_ref()),
        })
    }
}
