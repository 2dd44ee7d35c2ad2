//! SSH trust bootstrap.
//!
//! Makes a target reachable without a password before any container work
//! starts. The bootstrapper walks a small state machine:
//!
//! ```text
//! NoKey -> KeyGenerated -> Authenticated
//!                       \-> KeyAuthFailed -> PasswordCollected -> KeyInstalling
//!                                                -> PasswordlessVerified
//!                                                -> InstalledUnverified
//!                                                -> Failed
//! ```
//!
//! `InstalledUnverified` is a soft failure: the key went in but key login
//! still does not work, so the returned target falls back to password
//! authentication for its own remote calls.

pub mod install;
pub mod keypair;

use crate::context::AppContext;
use crate::context::SshOptions;
use crate::context::command_runner::{CommandError, CommandRunner};
use crate::context::launcher_env::LauncherEnv;
use crate::context::prompter::Prompter;
use crate::target::{ExecutionTarget, display_path};
use crate::transport::{Transport, TransportError, path_join};
use install::{InstallError, KeyInstaller};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where staged key material lives under the remote home directory.
const REMOTE_KEY_DIR: &str = ".dockbench/keys";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to generate SSH keypair: {0}")]
    KeyGeneration(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NoKey,
    KeyGenerated,
    Authenticated,
    KeyAuthFailed,
    PasswordCollected,
    KeyInstalling,
    PasswordlessVerified,
    InstalledUnverified,
    Failed,
}

impl BootstrapState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BootstrapState::Authenticated
                | BootstrapState::PasswordlessVerified
                | BootstrapState::InstalledUnverified
                | BootstrapState::Failed
        )
    }
}

/// Key material paths valid on the execution target, for read-only mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMounts {
    pub private_key: String,
    pub public_key: String,
    pub known_hosts: String,
}

#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    pub state: BootstrapState,
    /// Target to use from here on; carries the password when key login
    /// could not be verified.
    pub target: ExecutionTarget,
    /// Name of the installer that put the key in place
    pub strategy: Option<&'static str>,
    pub key_mounts: Option<KeyMounts>,
    pub failure: Option<String>,
    pub history: Vec<BootstrapState>,
}

impl BootstrapOutcome {
    pub fn is_trusted(&self) -> bool {
        matches!(
            self.state,
            BootstrapState::Authenticated
                | BootstrapState::PasswordlessVerified
                | BootstrapState::InstalledUnverified
        )
    }

    pub fn password_fallback(&self) -> bool {
        self.target.uses_password()
    }
}

struct Progress {
    state: BootstrapState,
    history: Vec<BootstrapState>,
}

impl Progress {
    fn new(initial: BootstrapState) -> Self {
        Self {
            state: initial,
            history: vec![initial],
        }
    }

    fn advance(&mut self, host: &str, state: BootstrapState) {
        tracing::info!(host, from = ?self.state, to = ?state, "ssh bootstrap");
        self.state = state;
        self.history.push(state);
    }
}

pub struct SshBootstrapper {
    runner: Arc<dyn CommandRunner>,
    prompter: Arc<dyn Prompter>,
    env: Arc<LauncherEnv>,
    ctx: AppContext,
    options: SshOptions,
    strategies: Vec<Arc<dyn KeyInstaller>>,
}

impl SshBootstrapper {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            runner: ctx.command_runner(),
            prompter: ctx.prompter(),
            env: ctx.launcher_env(),
            ctx: ctx.clone(),
            options: ctx.launcher_config().ssh.clone(),
            strategies: install::default_strategies(ctx),
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn KeyInstaller>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Establish passwordless trust with `target`.
    ///
    /// Errors are reserved for fatal conditions (key generation, missing ssh
    /// client). Cancellation and failed installation come back as an outcome
    /// in the `Failed` state so the caller decides whether to abort.
    pub async fn bootstrap(
        &self,
        target: &ExecutionTarget,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let host = target.host.as_str();
        let mut progress = Progress::new(if target.keypair.exists() {
            BootstrapState::KeyGenerated
        } else {
            BootstrapState::NoKey
        });

        if keypair::ensure_keypair(self.runner.as_ref(), &target.keypair).await?
            == keypair::KeyStatus::Generated
        {
            progress.advance(host, BootstrapState::KeyGenerated);
        }

        if !target.is_remote() {
            progress.advance(host, BootstrapState::Authenticated);
            return self.local_outcome(target, progress).await;
        }

        if self.key_login_works(target).await? {
            progress.advance(host, BootstrapState::Authenticated);
            return self.trusted(target.clone(), None, progress).await;
        }
        progress.advance(host, BootstrapState::KeyAuthFailed);

        let prompt = format!("Password for {}", target.destination());
        let Some(password) = self.prompter.password(&prompt) else {
            progress.advance(host, BootstrapState::Failed);
            return Ok(failed(target, progress, "Password entry cancelled"));
        };
        progress.advance(host, BootstrapState::PasswordCollected);

        let public_key = keypair::public_key_line(&target.keypair).await?;
        progress.advance(host, BootstrapState::KeyInstalling);

        let strategy = match self.install_key(target, &password, &public_key).await {
            Ok(strategy) => strategy,
            Err(detail) => {
                progress.advance(host, BootstrapState::Failed);
                return Ok(failed(target, progress, &detail));
            }
        };

        if self.verify_with_retries(target).await? {
            progress.advance(host, BootstrapState::PasswordlessVerified);
            return self.trusted(target.clone(), Some(strategy), progress).await;
        }

        tracing::warn!(
            host,
            "Key installed but passwordless login could not be verified; falling back to password authentication"
        );
        progress.advance(host, BootstrapState::InstalledUnverified);
        self.trusted(
            target.with_password_fallback(&password),
            Some(strategy),
            progress,
        )
        .await
    }

    /// Single bounded attempt at key-only login.
    pub async fn key_login_works(&self, target: &ExecutionTarget) -> Result<bool, BootstrapError> {
        let spec = target
            .ssh_spec(&self.options, "true")
            .timeout(self.options.connect_timeout() + Duration::from_secs(5));
        match self.runner.run(spec).await {
            Ok(output) => Ok(output.is_success()),
            Err(err) if err.is_timeout() => {
                tracing::debug!("key login to {} timed out", target.host);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn install_key(
        &self,
        target: &ExecutionTarget,
        password: &str,
        public_key: &str,
    ) -> Result<&'static str, String> {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            if !strategy.is_available().await {
                tracing::debug!("key installer {} unavailable", strategy.name());
                continue;
            }
            match strategy.install(target, password, public_key).await {
                Ok(()) => {
                    tracing::info!(
                        "Installed public key on {} via {}",
                        target.host,
                        strategy.name()
                    );
                    return Ok(strategy.name());
                }
                Err(err @ InstallError::PasswordRejected { .. }) => return Err(err.to_string()),
                Err(err) => {
                    tracing::warn!("{} key installer failed: {}", strategy.name(), err);
                    attempts.push(format!("{}: {}", strategy.name(), err));
                }
            }
        }
        if attempts.is_empty() {
            Err("No key installation method is available".to_string())
        } else {
            Err(attempts.join("; "))
        }
    }

    async fn verify_with_retries(&self, target: &ExecutionTarget) -> Result<bool, BootstrapError> {
        let attempts = self.options.verify_attempts.max(1);
        for attempt in 1..=attempts {
            if self.key_login_works(target).await? {
                return Ok(true);
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.verify_backoff() * attempt).await;
            }
        }
        Ok(false)
    }

    async fn trusted(
        &self,
        target: ExecutionTarget,
        strategy: Option<&'static str>,
        progress: Progress,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let key_mounts = self.stage_keys(&target).await?;
        Ok(BootstrapOutcome {
            state: progress.state,
            target,
            strategy,
            key_mounts: Some(key_mounts),
            failure: None,
            history: progress.history,
        })
    }

    async fn local_outcome(
        &self,
        target: &ExecutionTarget,
        progress: Progress,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        let known_hosts = self.env.known_hosts();
        if !known_hosts.exists() {
            tokio::fs::write(&known_hosts, "").await?;
        }
        Ok(BootstrapOutcome {
            state: progress.state,
            target: target.clone(),
            strategy: None,
            key_mounts: Some(KeyMounts {
                private_key: display_path(&target.keypair.private_key),
                public_key: display_path(&target.keypair.public_key),
                known_hosts: display_path(&known_hosts),
            }),
            failure: None,
            history: progress.history,
        })
    }

    /// Copy the keypair and known_hosts into the remote key directory unless
    /// identical copies are already there.
    async fn stage_keys(&self, target: &ExecutionTarget) -> Result<KeyMounts, BootstrapError> {
        let transport = Transport::new(&self.ctx, target.clone());
        let home = transport.home_dir().await?;
        let key_dir = path_join(&home, REMOTE_KEY_DIR);
        transport.ensure_directory(&key_dir).await?;

        let file_name = target.keypair.file_name();
        let private_key = path_join(&key_dir, &file_name);
        let public_key = format!("{private_key}.pub");
        let known_hosts = path_join(&key_dir, "known_hosts");

        let local_known_hosts = match tokio::fs::read_to_string(self.env.known_hosts()).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };
        let files = [
            (
                private_key.as_str(),
                tokio::fs::read_to_string(&target.keypair.private_key).await?,
            ),
            (
                public_key.as_str(),
                tokio::fs::read_to_string(&target.keypair.public_key).await?,
            ),
            (known_hosts.as_str(), local_known_hosts),
        ];

        for (remote_path, content) in &files {
            if transport.read_file(remote_path).await?.as_deref() == Some(content.as_str()) {
                continue;
            }
            transport.write_file(remote_path, content, 0o600).await?;
            tracing::debug!("Staged {} on {}", remote_path, target.host);
        }

        Ok(KeyMounts {
            private_key,
            public_key,
            known_hosts,
        })
    }
}

fn failed(target: &ExecutionTarget, progress: Progress, detail: &str) -> BootstrapOutcome {
    BootstrapOutcome {
        state: progress.state,
        target: target.clone(),
        strategy: None,
        key_mounts: None,
        failure: Some(detail.to_string()),
        history: progress.history,
    }
}
