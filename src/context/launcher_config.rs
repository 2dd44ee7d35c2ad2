//! User configuration loaded from dockbench.toml
//!
//! This module contains configuration types that are loaded from the user's
//! configuration file (`~/.config/dockbench/dockbench.toml`). These options
//! customise the workbench image, container resources, SSH behaviour and
//! which descriptor keys become container mounts.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::session::SessionMode;

/// User configuration loaded from dockbench.toml
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Docker image and container resource configuration
    pub docker: DockerOptions,
    /// SSH connection and bootstrap tuning
    pub ssh: SshOptions,
    /// Session defaults
    pub session: SessionOptions,
    /// Descriptor keys mounted into the container
    pub mounts: Vec<MountSpec>,
    /// Named remote execution targets
    pub remotes: Vec<RemoteHost>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            docker: DockerOptions::default(),
            ssh: SshOptions::default(),
            session: SessionOptions::default(),
            mounts: default_mounts(),
            remotes: Vec::new(),
        }
    }
}

impl LauncherConfig {
    pub fn remote(&self, name: &str) -> Option<&RemoteHost> {
        self.remotes.iter().find(|remote| remote.name == name)
    }
}

/// Workbench container configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DockerOptions {
    /// Image the session container runs
    pub image: String,
    /// Dockerfile used to build `image` when it is missing, relative to the repository
    pub dockerfile: String,
    /// Port the interactive server listens on inside the container
    pub internal_port: u16,
    /// First host port tried when none is requested
    pub default_port: u16,
    /// Owner applied to managed volumes and passed to the container
    pub uid: u32,
    pub gid: u32,
    /// CPU ceiling for high-demand remote sessions
    pub cpu_limit: u32,
    /// Memory ceiling in gigabytes for high-demand remote sessions
    pub memory_limit_gb: f64,
    /// Seconds to wait before checking that a new container is still running
    pub startup_grace_secs: u64,
    /// Seconds `docker stop` waits before the engine kills the container
    pub stop_timeout_secs: u64,
    /// Disposable image used to populate and drain managed volumes (needs rsync)
    pub sync_image: String,
    /// Home directory of the session user inside the container
    pub container_home: String,
    pub build_timeout_secs: u64,
}

impl Default for DockerOptions {
    fn default() -> Self {
        let (uid, gid) = current_ids();
        Self {
            image: "dockbench/workbench:latest".to_string(),
            dockerfile: "docker_setup/Dockerfile".to_string(),
            internal_port: 8787,
            default_port: 8787,
            uid,
            gid,
            cpu_limit: 8,
            memory_limit_gb: 32.0,
            startup_grace_secs: 5,
            stop_timeout_secs: 10,
            sync_image: "instrumentisto/rsync-ssh:latest".to_string(),
            container_home: "/home/rstudio".to_string(),
            build_timeout_secs: 1800,
        }
    }
}

impl DockerOptions {
    /// Memory ceiling in the `docker run --memory` format
    pub fn memory_limit_arg(&self) -> String {
        let megabytes = (self.memory_limit_gb * 1024.0).round() as u64;
        format!("{megabytes}m")
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    /// Wall-clock budget for `docker stop`, a little above the engine's own grace period
    pub fn stop_deadline(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs + 20)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

#[cfg(unix)]
fn current_ids() -> (u32, u32) {
    unsafe { (libc::getuid(), libc::getgid()) }
}

#[cfg(not(unix))]
fn current_ids() -> (u32, u32) {
    (1000, 1000)
}

/// SSH connection and bootstrap tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshOptions {
    pub connect_timeout_secs: u64,
    /// Hard deadline for any single remote command
    pub command_timeout_secs: u64,
    /// Passwordless re-verification attempts after key installation
    pub verify_attempts: u32,
    pub verify_backoff_ms: u64,
    /// File name prefix of the launcher keypair in the SSH directory
    pub key_name: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            command_timeout_secs: 30,
            verify_attempts: 3,
            verify_backoff_ms: 1500,
            key_name: "id_ed25519_dockbench".to_string(),
        }
    }
}

impl SshOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn verify_backoff(&self) -> Duration {
        Duration::from_millis(self.verify_backoff_ms)
    }
}

/// Session defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Descriptor file holding `key: value` directory lines, relative to the repository
    pub descriptor_file: String,
    pub default_mode: SessionMode,
    /// Pull the repository before the pre-session snapshot
    pub pull_before_start: bool,
    /// Identity used for container naming instead of the login name
    pub user: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            descriptor_file: "sim_design.yaml".to_string(),
            default_mode: SessionMode::Bind,
            pull_before_start: false,
            user: None,
        }
    }
}

/// A descriptor key whose resolved directory is mounted into the container
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MountSpec {
    pub key: String,
    /// Absolute path inside the container
    pub container_path: String,
    /// Relative fallback used when the descriptor lacks the key
    pub default: Option<String>,
}

fn default_mounts() -> Vec<MountSpec> {
    vec![
        MountSpec {
            key: "output_dir".to_string(),
            container_path: "/home/rstudio/output".to_string(),
            default: Some("output".to_string()),
        },
        MountSpec {
            key: "synthpop_dir".to_string(),
            container_path: "/home/rstudio/synthpop".to_string(),
            default: Some("inputs/synthpop".to_string()),
        },
    ]
}

/// A named remote Docker host
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteHost {
    pub name: String,
    /// Host name, address, or SSH config alias
    pub host: String,
    pub user: String,
    /// Directory scanned for repositories on the remote
    pub repos_dir: Option<String>,
}

/// Load LauncherConfig from a configuration directory
///
/// Attempts to load and parse `dockbench.toml` from the given config directory.
/// Returns default configuration if the file doesn't exist or can't be parsed.
pub fn load_config(config_dir: &Path) -> LauncherConfig {
    let config_file = config_dir.join("dockbench.toml");
    if config_file.exists() {
        match std::fs::read_to_string(&config_file) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", config_file.display(), e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", config_file.display(), e);
            }
        }
    }
    LauncherConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, content: &str) {
        let mut file = std::fs::File::create(dir.join("dockbench.toml")).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_docker_options_default() {
        let options = DockerOptions::default();
        assert_eq!(options.internal_port, 8787);
        assert_eq!(options.default_port, 8787);
        assert_eq!(options.stop_timeout_secs, 10);
    }

    #[test]
    fn test_memory_limit_arg() {
        let options = DockerOptions {
            memory_limit_gb: 1.5,
            ..Default::default()
        };
        assert_eq!(options.memory_limit_arg(), "1536m");
    }

    #[test]
    fn test_missing_config_uses_defaults_with_mounts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = load_config(temp_dir.path());

        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.session.descriptor_file, "sim_design.yaml");
        let keys: Vec<_> = config.mounts.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["output_dir", "synthpop_dir"]);
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        write_config(
            temp_dir.path(),
            r#"
[docker]
image = "ghcr.io/example/model:1.2"
default_port = 9000

[session]
default_mode = "volume"
"#,
        );

        let config = load_config(temp_dir.path());
        assert_eq!(config.docker.image, "ghcr.io/example/model:1.2");
        assert_eq!(config.docker.default_port, 9000);
        assert_eq!(config.docker.internal_port, 8787);
        assert_eq!(config.session.default_mode, SessionMode::Volume);
        assert_eq!(config.mounts.len(), 2);
    }

    #[test]
    fn test_remotes_and_custom_mounts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        write_config(
            temp_dir.path(),
            r#"
[[remotes]]
name = "cluster"
host = "compute01.example.org"
user = "alice"
repos_dir = "/data/repos"

[[mounts]]
key = "results_dir"
container_path = "/home/rstudio/results"
"#,
        );

        let config = load_config(temp_dir.path());
        let remote = config.remote("cluster").unwrap();
        assert_eq!(remote.host, "compute01.example.org");
        assert_eq!(remote.repos_dir.as_deref(), Some("/data/repos"));
        assert!(config.remote("missing").is_none());
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].default, None);
    }

    #[test]
    fn test_invalid_config_uses_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        write_config(
            temp_dir.path(),
            r#"
[docker]
internal_port = "not-a-port"
"#,
        );

        let config = load_config(temp_dir.path());
        assert_eq!(config.docker.internal_port, 8787);
        assert_eq!(config.mounts.len(), 2);
    }
}
