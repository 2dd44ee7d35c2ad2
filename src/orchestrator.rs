//! End-to-end session workflow.
//!
//! The orchestrator owns the state that is process-wide for one launcher run
//! (current target, current Docker context, ports handed out) and exposes the
//! operations the presentation layer calls. It never prints prompts itself;
//! questions go through the context's [`Prompter`](crate::context::prompter::Prompter).

use crate::config_paths::{ConfigPathResolver, ResolveError, ResolvedMount};
use crate::context::AppContext;
use crate::docker::container::choose_port;
use crate::docker::{
    ContainerManager, ContextHandle, DockerCli, DockerContextManager, DockerError, ImageStatus,
    StartRequest, StopReport,
};
use crate::git::{DiffSummary, GitError, GitReconciler, GitState, ReconcileOutcome};
use crate::repository::{self, RepositoryError, RepositoryReference};
use crate::session::{Session, SessionConfig};
use crate::ssh::{BootstrapError, BootstrapOutcome, KeyMounts, SshBootstrapper};
use crate::target::{ExecutionTarget, Keypair, display_path};
use crate::transport::{Transport, TransportError};
use std::collections::BTreeSet;
use thiserror::Error;

/// How far an error reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The workflow cannot continue
    Fatal,
    /// A step failed; the user decides what to do next
    Reported,
    /// A remote call timed out and may succeed if repeated
    Transient,
    /// The user backed out
    Cancelled,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Docker(#[from] DockerError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Could not establish SSH trust with {host}: {detail}")]
    Untrusted { host: String, detail: String },
    #[error("No execution target; bootstrap trust first")]
    NoTarget,
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl OrchestratorError {
    pub fn severity(&self) -> Severity {
        match self {
            OrchestratorError::Cancelled(_) => Severity::Cancelled,
            OrchestratorError::Bootstrap(_) | OrchestratorError::NoTarget => Severity::Fatal,
            OrchestratorError::Docker(err) if err.is_timeout() => Severity::Transient,
            OrchestratorError::Docker(
                DockerError::PortInUse(_)
                | DockerError::AlreadyRunning(_)
                | DockerError::EarlyExit { .. },
            ) => Severity::Reported,
            OrchestratorError::Docker(_) => Severity::Fatal,
            OrchestratorError::Transport(err) if err.is_timeout() => Severity::Transient,
            OrchestratorError::Transport(_) => Severity::Fatal,
            OrchestratorError::Resolve(err) if err.is_not_found() => Severity::Reported,
            OrchestratorError::Resolve(_) => Severity::Fatal,
            OrchestratorError::Git(_)
            | OrchestratorError::Repository(_)
            | OrchestratorError::Untrusted { .. } => Severity::Reported,
        }
    }
}

/// State shared by every operation of one launcher run. Single writer.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    pub current_target: Option<ExecutionTarget>,
    pub current_context: Option<ContextHandle>,
    /// Host ports of running sessions as last observed, plus ports handed out since
    pub used_ports: BTreeSet<u16>,
    pub key_mounts: Option<KeyMounts>,
}

/// Result of [`Orchestrator::start_session`], ready for rendering.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session: Session,
    pub url: String,
    pub image: ImageStatus,
    pub mounts: Vec<ResolvedMount>,
    /// Why docker runs over plain ssh instead of a context, if it does
    pub degraded: Option<String>,
    /// Repository state before the container started
    pub baseline: Option<GitState>,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    pub diff: Option<DiffSummary>,
}

pub struct Orchestrator {
    ctx: AppContext,
    state: OrchestratorState,
}

impl Orchestrator {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            ctx: ctx.clone(),
            state: OrchestratorState::default(),
        }
    }

    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }

    /// Identity used in container names and labels.
    pub fn user(&self) -> String {
        self.ctx
            .launcher_config()
            .session
            .user
            .clone()
            .unwrap_or_else(|| self.ctx.launcher_env().user().to_string())
    }

    /// Execution target for a configured remote name, `user@host`, a bare
    /// host, or the local machine when `remote` is `None`.
    pub fn target(&self, remote: Option<&str>) -> ExecutionTarget {
        let env = self.ctx.launcher_env();
        let config = self.ctx.launcher_config();
        let user = self.user();
        let keypair = Keypair::for_user(&env, &config.ssh.key_name, &user);

        let Some(remote) = remote else {
            return ExecutionTarget::local(keypair);
        };
        if let Some(host) = config.remote(remote) {
            return ExecutionTarget::remote(&host.host, &host.user, keypair);
        }
        match remote.split_once('@') {
            Some((login, host)) => ExecutionTarget::remote(host, login, keypair),
            None => ExecutionTarget::remote(remote, env.user(), keypair),
        }
    }

    /// Establish passwordless trust with `target` and make it current.
    ///
    /// A failed bootstrap is returned as [`OrchestratorError::Untrusted`];
    /// a trusted target replaces any previous one and its Docker context.
    pub async fn bootstrap_trust(
        &mut self,
        target: ExecutionTarget,
    ) -> Result<BootstrapOutcome, OrchestratorError> {
        let outcome = SshBootstrapper::new(&self.ctx).bootstrap(&target).await?;
        if !outcome.is_trusted() {
            return Err(OrchestratorError::Untrusted {
                host: target.host.clone(),
                detail: outcome
                    .failure
                    .clone()
                    .unwrap_or_else(|| format!("{:?}", outcome.state)),
            });
        }

        self.state.current_target = Some(outcome.target.clone());
        self.state.current_context = None;
        self.state.key_mounts = outcome.key_mounts.clone();
        Ok(outcome)
    }

    /// Start a session for `config.repo_path` on the current target.
    pub async fn start_session(
        &mut self,
        config: &SessionConfig,
    ) -> Result<StartedSession, OrchestratorError> {
        let target = self.current_target()?;
        let user = self.user();
        let manager = self.connect().await?;

        for stale in manager.list_active(&user).await? {
            let prompt = format!("Session {} is still running. Stop it first?", stale.name);
            if !self.ctx.prompter().confirm(&prompt, true) {
                return Err(OrchestratorError::Cancelled(format!(
                    "{} left running",
                    stale.name
                )));
            }
            let report = manager.stop(&stale.name, &target).await?;
            if let Some(session) = report.session {
                self.state.used_ports.remove(&session.port);
            }
        }

        let transport = Transport::new(&self.ctx, target.clone());
        let baseline = self
            .reconciler(transport.clone())
            .snapshot(&config.repo_path, config.pull_before_start)
            .await;
        let baseline = match baseline {
            Ok(state) => {
                if let Some(failure) = &state.pull_failure {
                    println!("Pull before start failed, continuing: {failure}");
                }
                Some(state)
            }
            Err(GitError::NotARepository(_)) => None,
            Err(err) => {
                tracing::warn!("Could not record repository state: {}", err);
                None
            }
        };

        let image = manager.ensure_image(&config.repo_path).await?;

        let launcher_config = self.ctx.launcher_config();
        let mounts = ConfigPathResolver::new(&transport)
            .resolve_mounts(
                &config.repo_path,
                &launcher_config.session.descriptor_file,
                &launcher_config.mounts,
            )
            .await?;

        self.state.used_ports = manager.used_ports().await?;
        let port = choose_port(
            &self.state.used_ports,
            config.requested_port,
            launcher_config.docker.default_port,
        )?;

        let mut session = Session::new(&user, &config.repo_path, target, port, config.mode);
        let request = StartRequest {
            mounts: mounts.clone(),
            key_mounts: self.key_mounts(),
            high_demand: config.high_demand,
        };
        manager.start(&mut session, &request).await?;
        self.state.used_ports.insert(port);

        let url = session.url();
        self.ctx
            .notification_client()
            .notify_session_ready(&session.container_name, &url);

        Ok(StartedSession {
            url,
            image,
            mounts,
            degraded: self
                .state
                .current_context
                .as_ref()
                .and_then(|handle| handle.degraded.clone()),
            baseline,
            session,
        })
    }

    /// Stop a session by container name. Stopping an absent session is a no-op.
    pub async fn stop_session(
        &mut self,
        container_name: &str,
    ) -> Result<StopReport, OrchestratorError> {
        let target = self.current_target()?;
        let manager = self.connect().await?;
        let report = manager.stop(container_name, &target).await?;

        if let Some(session) = &report.session {
            self.state.used_ports.remove(&session.port);
        }
        if report.stopped {
            let synced: usize = report
                .synced
                .iter()
                .map(|(_, sync)| sync.files_written)
                .sum();
            let note = (!report.synced.is_empty()).then(|| format!("{synced} file(s) synced back"));
            self.ctx
                .notification_client()
                .notify_session_stopped(container_name, note.as_deref());
        }
        Ok(report)
    }

    /// Commit and push whatever the session changed in `repo_path`.
    pub async fn reconcile(
        &self,
        repo_path: &str,
        baseline: Option<&GitState>,
    ) -> Result<Reconciliation, OrchestratorError> {
        let transport = Transport::new(&self.ctx, self.current_target()?);
        let reconciler = self.reconciler(transport);
        let outcome = reconciler.detect_and_commit(repo_path).await?;
        let diff = match baseline {
            Some(baseline) => Some(reconciler.diff_since(repo_path, baseline).await?),
            None => None,
        };
        Ok(Reconciliation { outcome, diff })
    }

    /// Sessions of this user running on the current target.
    pub async fn list_sessions(&mut self) -> Result<Vec<Session>, OrchestratorError> {
        let target = self.current_target()?;
        let manager = self.connect().await?;
        Ok(manager
            .list_active(&self.user())
            .await?
            .iter()
            .filter_map(|info| Session::from_labels(&info.name, &info.labels, target.clone()))
            .collect())
    }

    /// Repositories under `repos_dir` on the current target, or under the
    /// directory configured for the current remote.
    pub async fn list_repositories(
        &self,
        repos_dir: Option<&str>,
    ) -> Result<Vec<RepositoryReference>, OrchestratorError> {
        let target = self.current_target()?;
        let repos_dir = match repos_dir {
            Some(dir) => dir.to_string(),
            None => self
                .ctx
                .launcher_config()
                .remotes
                .iter()
                .find(|remote| remote.host == target.host)
                .and_then(|remote| remote.repos_dir.clone())
                .ok_or(RepositoryError::NoReposDir(target.host.clone()))?,
        };

        let transport = Transport::new(&self.ctx, target);
        Ok(repository::scan(&transport, &repos_dir).await?)
    }

    /// Pick a repository: check `local_path` on this machine, or let the user
    /// choose from a scan of the current target. `None` means they backed out.
    pub async fn select_repository(
        &self,
        repos_dir: Option<&str>,
        local_path: Option<&std::path::Path>,
    ) -> Result<Option<RepositoryReference>, OrchestratorError> {
        if let Some(path) = local_path {
            return Ok(Some(RepositoryReference::local(path)?));
        }
        let repositories = self.list_repositories(repos_dir).await?;
        Ok(repository::select_repository(
            self.ctx.prompter().as_ref(),
            &repositories,
        ))
    }

    fn current_target(&self) -> Result<ExecutionTarget, OrchestratorError> {
        self.state
            .current_target
            .clone()
            .ok_or(OrchestratorError::NoTarget)
    }

    fn key_mounts(&self) -> KeyMounts {
        self.state.key_mounts.clone().unwrap_or_else(|| {
            let target = self.state.current_target.as_ref();
            let env = self.ctx.launcher_env();
            let keypair = target.map(|t| t.keypair.clone()).unwrap_or_else(|| {
                Keypair::for_user(&env, &self.ctx.launcher_config().ssh.key_name, &self.user())
            });
            KeyMounts {
                private_key: display_path(&keypair.private_key),
                public_key: display_path(&keypair.public_key),
                known_hosts: display_path(&env.known_hosts()),
            }
        })
    }

    fn reconciler(&self, transport: Transport) -> GitReconciler {
        let key_path = self.key_mounts().private_key;
        GitReconciler::new(&self.ctx, transport, &key_path)
    }

    /// Container manager for the current target, selecting its Docker
    /// context on first use.
    async fn connect(&mut self) -> Result<ContainerManager, OrchestratorError> {
        let target = self.current_target()?;
        let handle = match &self.state.current_context {
            Some(handle) => handle.clone(),
            None => {
                let handle = DockerContextManager::new(&self.ctx)
                    .ensure_context(&target)
                    .await?;
                if let Some(reason) = &handle.degraded {
                    tracing::warn!("Docker runs over plain ssh on {}: {}", target.host, reason);
                }
                self.state.current_context = Some(handle.clone());
                handle
            }
        };

        let transport = Transport::new(&self.ctx, target);
        let cli = DockerCli::new(&self.ctx, transport, handle.invocation);
        Ok(ContainerManager::new(&self.ctx, cli))
    }
}
