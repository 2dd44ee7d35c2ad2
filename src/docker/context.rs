//! Docker client context selection.
//!
//! One context per target kind is created and reused. Remote contexts are
//! checked before they are trusted; when the docker CLI cannot reach the engine
//! over its own SSH layer the manager degrades to running docker on the target
//! through a plain ssh call instead.

use super::DockerError;
use super::cli::{DockerInvocation, args, checked};
use super::ssh_helper::SshHelper;
use crate::context::AppContext;
use crate::context::SshOptions;
use crate::context::command_runner::{CommandRunner, CommandSpec, ProcessOutput};
use crate::target::ExecutionTarget;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

pub const LOCAL_CONTEXT: &str = "dockbench-local";
pub const REMOTE_CONTEXT: &str = "dockbench-remote";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerContext {
    pub name: String,
    pub endpoint: String,
}

/// Result of [`DockerContextManager::ensure_context`].
#[derive(Debug, Clone)]
pub struct ContextHandle {
    /// Context made current, if any
    pub context: Option<DockerContext>,
    pub invocation: DockerInvocation,
    /// Why container commands bypass the docker context
    pub degraded: Option<String>,
}

/// Effective connection parameters for an SSH host alias.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedHost {
    pub hostname: String,
    pub user: Option<String>,
    pub port: Option<u16>,
}

pub struct DockerContextManager {
    ctx: AppContext,
    runner: Arc<dyn CommandRunner>,
    options: SshOptions,
}

impl DockerContextManager {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            ctx: ctx.clone(),
            runner: ctx.command_runner(),
            options: ctx.launcher_config().ssh.clone(),
        }
    }

    /// Create or update the context for `target`, make it current and check
    /// the engine answers.
    pub async fn ensure_context(
        &self,
        target: &ExecutionTarget,
    ) -> Result<ContextHandle, DockerError> {
        if !target.is_remote() {
            let context = self.select(LOCAL_CONTEXT, local_endpoint()).await?;
            if let Err(detail) = self.check_engine(&context.name, &[]).await {
                return Err(DockerError::EngineUnreachable {
                    host: target.host.clone(),
                    detail,
                });
            }
            return Ok(ContextHandle {
                invocation: DockerInvocation::Context(context.name.clone()),
                context: Some(context),
                degraded: None,
            });
        }

        if target.uses_password() {
            return self
                .direct_ssh(target, "key login is unverified, using password ssh".to_string())
                .await;
        }

        let helper = SshHelper::new(self.ctx.launcher_env().config_dir());
        helper.install().map_err(DockerError::SshHelper)?;
        let env = helper.env(target, &self.options);

        let endpoint = format!("ssh://{}", target.destination());
        let mut context = self.select(REMOTE_CONTEXT, endpoint).await?;
        let first_failure = match self.check_engine(&context.name, &env).await {
            Ok(()) => return Ok(connected(context)),
            Err(detail) => detail,
        };
        tracing::warn!(
            "Docker context {} failed its engine check: {}",
            context.name,
            first_failure
        );

        if let Some(direct) = self.direct_endpoint(target).await
            && direct != context.endpoint
        {
            tracing::info!("Retrying docker context with {}", direct);
            context = self.select(&context.name, direct).await?;
            if self.check_engine(&context.name, &env).await.is_ok() {
                return Ok(connected(context));
            }
        }

        self.direct_ssh(
            target,
            format!("docker context could not reach the engine: {first_failure}"),
        )
        .await
    }

    async fn direct_ssh(
        &self,
        target: &ExecutionTarget,
        reason: String,
    ) -> Result<ContextHandle, DockerError> {
        let transport = Transport::new(&self.ctx, target.clone());
        let output = transport
            .run_with_timeout(
                "docker info --format '{{.ServerVersion}}'",
                self.engine_check_timeout(),
            )
            .await?;
        if !output.is_success() {
            return Err(DockerError::EngineUnreachable {
                host: target.host.clone(),
                detail: output.detail(),
            });
        }
        tracing::warn!("Running docker on {} over ssh: {}", target.host, reason);
        Ok(ContextHandle {
            context: None,
            invocation: DockerInvocation::DirectSsh,
            degraded: Some(reason),
        })
    }

    /// Make `name` point at `endpoint` and select it.
    ///
    /// A context whose update fails is removed and recreated; if removal
    /// fails too, a `-2` suffixed context is created instead. One attempt.
    async fn select(&self, name: &str, endpoint: String) -> Result<DockerContext, DockerError> {
        let name = match self.current_endpoint(name).await? {
            Some(existing) if existing == endpoint => name.to_string(),
            Some(existing) => {
                tracing::debug!("Context {} points at {}, updating", name, existing);
                self.update_or_recreate(name, &endpoint).await?
            }
            None => {
                self.create(name, &endpoint).await?;
                name.to_string()
            }
        };

        let output = self.docker(args(["context", "use", &name])).await?;
        checked("context use", output)?;
        tracing::info!("Using docker context {} ({})", name, endpoint);
        Ok(DockerContext { name, endpoint })
    }

    async fn update_or_recreate(&self, name: &str, endpoint: &str) -> Result<String, DockerError> {
        let host = format!("host={endpoint}");
        let update = self
            .docker(args(["context", "update", name, "--docker", &host]))
            .await?;
        if update.is_success() {
            return Ok(name.to_string());
        }
        tracing::warn!("docker context update failed: {}", update.detail());

        let remove = self.docker(args(["context", "rm", "-f", name])).await?;
        if remove.is_success() {
            self.create(name, endpoint).await?;
            return Ok(name.to_string());
        }
        tracing::warn!("docker context rm failed: {}", remove.detail());

        let renamed = format!("{name}-2");
        match self.current_endpoint(&renamed).await? {
            Some(existing) if existing == endpoint => {}
            Some(_) => {
                let output = self
                    .docker(args(["context", "update", &renamed, "--docker", &host]))
                    .await?;
                checked("context update", output)?;
            }
            None => self.create(&renamed, endpoint).await?,
        }
        Ok(renamed)
    }

    async fn create(&self, name: &str, endpoint: &str) -> Result<(), DockerError> {
        let host = format!("host={endpoint}");
        let output = self
            .docker(args([
                "context",
                "create",
                name,
                "--description",
                "Managed by dockbench",
                "--docker",
                &host,
            ]))
            .await?;
        checked("context create", output).map(|_| ())
    }

    async fn current_endpoint(&self, name: &str) -> Result<Option<String>, DockerError> {
        let output = self
            .docker(args([
                "context",
                "inspect",
                name,
                "--format",
                "{{.Endpoints.docker.Host}}",
            ]))
            .await?;
        Ok(output
            .is_success()
            .then(|| output.stdout.trim().to_string()))
    }

    async fn check_engine(&self, name: &str, env: &[(String, String)]) -> Result<(), String> {
        let spec = env
            .iter()
            .fold(CommandSpec::new("docker"), |spec, (key, value)| {
                spec.env(key.clone(), value.clone())
            })
            .args(args([
                "--context",
                name,
                "info",
                "--format",
                "{{.ServerVersion}}",
            ]))
            .timeout(self.engine_check_timeout());
        match self.runner.run(spec).await {
            Ok(output) if output.is_success() => {
                tracing::debug!("Engine {} answered: {}", name, output.stdout.trim());
                Ok(())
            }
            Ok(output) => Err(output.detail()),
            Err(err) => Err(err.to_string()),
        }
    }

    /// Endpoint built from `ssh -G`, bypassing any alias.
    async fn direct_endpoint(&self, target: &ExecutionTarget) -> Option<String> {
        let spec = CommandSpec::new("ssh")
            .arg("-G")
            .arg(target.host.clone())
            .timeout(Duration::from_secs(5));
        let output = self.runner.run(spec).await.ok()?;
        if !output.is_success() {
            return None;
        }
        let resolved = parse_ssh_config(&output.stdout)?;
        let user = target.user.clone().or(resolved.user);
        let mut endpoint = match user {
            Some(user) => format!("ssh://{user}@{}", resolved.hostname),
            None => format!("ssh://{}", resolved.hostname),
        };
        if let Some(port) = resolved.port.filter(|port| *port != 22) {
            endpoint.push_str(&format!(":{port}"));
        }
        Some(endpoint)
    }

    async fn docker(&self, args: Vec<String>) -> Result<ProcessOutput, DockerError> {
        let spec = CommandSpec::new("docker")
            .args(args)
            .timeout(self.options.command_timeout());
        Ok(self.runner.run(spec).await?)
    }

    fn engine_check_timeout(&self) -> Duration {
        self.options.connect_timeout() + Duration::from_secs(20)
    }
}

fn connected(context: DockerContext) -> ContextHandle {
    ContextHandle {
        invocation: DockerInvocation::Context(context.name.clone()),
        context: Some(context),
        degraded: None,
    }
}

/// Platform engine endpoint: named pipe on Windows, Unix socket elsewhere.
pub fn local_endpoint() -> String {
    if cfg!(windows) {
        "npipe:////./pipe/docker_engine".to_string()
    } else {
        "unix:///var/run/docker.sock".to_string()
    }
}

/// Pick `hostname`, `user` and `port` out of `ssh -G` output.
pub fn parse_ssh_config(output: &str) -> Option<ResolvedHost> {
    let mut resolved = ResolvedHost::default();
    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once(' ') else {
            continue;
        };
        match key {
            "hostname" => resolved.hostname = value.trim().to_string(),
            "user" => resolved.user = Some(value.trim().to_string()),
            "port" => resolved.port = value.trim().parse().ok(),
            _ => {}
        }
    }
    (!resolved.hostname.is_empty()).then_some(resolved)
}
