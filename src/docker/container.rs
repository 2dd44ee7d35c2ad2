//! Session container lifecycle.

use super::DockerError;
use super::cli::{ContainerInfo, DockerCli, args, checked};
use super::sync::{SyncEngine, SyncReport};
use crate::config_paths::ResolvedMount;
use crate::context::{AppContext, DockerOptions};
use crate::session::{
    LABEL_USER, Session, SessionMode, SessionState, VolumeBinding, repo_basename, user_suffix,
};
use crate::ssh::KeyMounts;
use crate::target::ExecutionTarget;
use crate::transport::path_join;
use std::collections::BTreeSet;

const LOG_TAIL_LINES: &str = "50";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    Present,
    Built,
}

/// Per-start inputs beyond the session itself.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub mounts: Vec<ResolvedMount>,
    pub key_mounts: KeyMounts,
    pub high_demand: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StopReport {
    /// Session recovered from the container labels, if it was ours
    pub session: Option<Session>,
    /// False when there was no container to stop
    pub stopped: bool,
    /// The graceful stop did not finish and the container was killed
    pub forced: bool,
    pub synced: Vec<(String, SyncReport)>,
    /// Volumes left in place because syncing them back failed, with the reason
    pub sync_failures: Vec<(String, String)>,
}

pub struct ContainerManager {
    cli: DockerCli,
    options: DockerOptions,
}

impl ContainerManager {
    pub fn new(ctx: &AppContext, cli: DockerCli) -> Self {
        Self {
            cli,
            options: ctx.launcher_config().docker.clone(),
        }
    }

    pub fn cli(&self) -> &DockerCli {
        &self.cli
    }

    /// Running containers named for `user` (`<repo>_<user>`).
    pub async fn list_active(&self, user: &str) -> Result<Vec<ContainerInfo>, DockerError> {
        let suffix = user_suffix(user);
        let stdout = self
            .cli
            .output("ps", args(["ps", "--format", "{{.Names}}"]))
            .await?;
        let names: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|name| name.ends_with(&suffix) && name.len() > suffix.len())
            .map(str::to_string)
            .collect();

        let infos = self.cli.inspect(&names).await?;
        Ok(infos
            .into_iter()
            .filter(|info| info.is_running())
            .filter(|info| {
                info.labels
                    .get(LABEL_USER)
                    .is_none_or(|label_user| label_user == user)
            })
            .collect())
    }

    /// Host ports already published for the internal service port by any
    /// running container.
    pub async fn used_ports(&self) -> Result<BTreeSet<u16>, DockerError> {
        let stdout = self.cli.output("ps", args(["ps", "-q"])).await?;
        let ids: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();

        Ok(self
            .cli
            .inspect(&ids)
            .await?
            .iter()
            .flat_map(|info| info.host_ports_for(self.options.internal_port))
            .collect())
    }

    pub async fn allocate_port(&self, requested: Option<u16>) -> Result<u16, DockerError> {
        let used = self.used_ports().await?;
        choose_port(&used, requested, self.options.default_port)
    }

    /// Make sure the session image exists on the target, building it from the
    /// repository's Dockerfile when it does not.
    pub async fn ensure_image(&self, repo_path: &str) -> Result<ImageStatus, DockerError> {
        let image = self.options.image.clone();
        let stdout = self
            .cli
            .output("images", args(["images", "-q", &image]))
            .await?;
        if !stdout.trim().is_empty() {
            return Ok(ImageStatus::Present);
        }

        let dockerfile = path_join(repo_path, &self.options.dockerfile);
        if self.cli.transport().read_file(&dockerfile).await?.is_none() {
            return Err(DockerError::DockerfileMissing(dockerfile));
        }
        let build_context = dockerfile
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_else(|| repo_path.to_string());

        tracing::info!("Building image {} from {}", image, dockerfile);
        println!("Building image {image}, this can take a while...");
        let spec = self
            .cli
            .on_target_spec(args(["build", "-t", &image, "-f", &dockerfile, &build_context]))
            .timeout(self.options.build_timeout());
        let output = self.cli.execute(spec).await?;
        checked("build", output)?;
        Ok(ImageStatus::Built)
    }

    /// Start the session container and confirm it survives its startup grace.
    pub async fn start(
        &self,
        session: &mut Session,
        request: &StartRequest,
    ) -> Result<(), DockerError> {
        session.state = SessionState::Starting;

        if let Some(existing) = self.cli.find_container(&session.container_name).await? {
            if existing.is_running() {
                session.state = SessionState::Stopped;
                return Err(DockerError::AlreadyRunning(session.container_name.clone()));
            }
            tracing::info!("Removing exited container {}", existing.name);
            self.remove(&existing.name).await?;
        }

        session.volumes.clear();
        let sync = SyncEngine::new(&self.cli, &self.options);
        for mount in &request.mounts {
            match session.mode {
                SessionMode::Bind => {
                    self.cli.transport().ensure_directory(&mount.host_path).await?;
                }
                SessionMode::Volume => {
                    let volume = format!("{}_{}", session.container_name, mount.key);
                    if let Err(err) = sync.populate(&volume, &mount.host_path).await {
                        self.discard_volumes(session).await;
                        let _ = sync.remove_volume(&volume).await;
                        session.state = SessionState::Stopped;
                        return Err(err);
                    }
                    session.volumes.push(VolumeBinding {
                        volume,
                        source: mount.host_path.clone(),
                        container_path: mount.container_path.clone(),
                    });
                }
            }
        }

        let run_args = self.run_args(session, request);
        let failure = match self.cli.run(run_args).await {
            Ok(output) if output.is_success() => None,
            Ok(output) => Some(DockerError::Command {
                operation: "run".to_string(),
                detail: output.detail(),
            }),
            Err(err) => Some(err),
        };
        if let Some(err) = failure {
            // a timed out run may still have created the container
            let _ = self.remove(&session.container_name).await;
            self.discard_volumes(session).await;
            session.state = SessionState::Stopped;
            return Err(err);
        }

        tokio::time::sleep(self.options.startup_grace()).await;
        let running = match self.cli.find_container(&session.container_name).await {
            Ok(info) => info.is_some_and(|info| info.is_running()),
            Err(err) => {
                let _ = self.remove(&session.container_name).await;
                self.discard_volumes(session).await;
                session.state = SessionState::Stopped;
                return Err(err);
            }
        };
        if !running {
            let logs = self.logs(&session.container_name).await;
            let _ = self.remove(&session.container_name).await;
            self.discard_volumes(session).await;
            session.state = SessionState::Stopped;
            return Err(DockerError::EarlyExit {
                name: session.container_name.clone(),
                logs,
            });
        }

        session.state = SessionState::Running;
        tracing::info!(
            "Session {} running on port {} ({} mode)",
            session.container_name,
            session.port,
            session.mode
        );
        Ok(())
    }

    /// Stop and remove the container. A missing container is not an error.
    ///
    /// In volume mode every volume is synced back into its source directory
    /// and removed. A volume whose sync fails is kept and listed in
    /// `sync_failures`; the remaining volumes are still synced.
    pub async fn stop(
        &self,
        container_name: &str,
        target: &ExecutionTarget,
    ) -> Result<StopReport, DockerError> {
        let Some(info) = self.cli.find_container(container_name).await? else {
            tracing::info!("Container {} is not present, nothing to stop", container_name);
            return Ok(StopReport::default());
        };

        let mut session = Session::from_labels(&info.name, &info.labels, target.clone());
        if let Some(session) = session.as_mut() {
            session.state = SessionState::Stopping;
        }

        let mut forced = false;
        if info.is_running() {
            let grace = self.options.stop_timeout_secs.to_string();
            let stop = self
                .cli
                .run_with_timeout(
                    args(["stop", "-t", &grace, container_name]),
                    self.options.stop_deadline(),
                )
                .await;
            let stopped = matches!(&stop, Ok(output) if output.is_success());
            if !stopped {
                tracing::warn!("Graceful stop of {} failed, killing it", container_name);
                let output = self.cli.run(args(["kill", container_name])).await?;
                // kill fails if the container stopped in the meantime
                if !output.is_success() && !output.stderr.contains("is not running") {
                    return Err(DockerError::Command {
                        operation: "kill".to_string(),
                        detail: output.detail(),
                    });
                }
                forced = true;
            }
        }
        self.remove(container_name).await?;

        let mut synced = Vec::new();
        let mut sync_failures = Vec::new();
        if let Some(session) = session.as_mut() {
            if session.mode == SessionMode::Volume {
                let sync = SyncEngine::new(&self.cli, &self.options);
                for binding in &session.volumes {
                    let report = match sync.sync_back(&binding.volume, &binding.source).await {
                        Ok(report) => report,
                        Err(err) => {
                            tracing::warn!("Keeping volume {}: {}", binding.volume, err);
                            sync_failures.push((binding.volume.clone(), err.to_string()));
                            continue;
                        }
                    };
                    if let Err(err) = sync.remove_volume(&binding.volume).await {
                        tracing::warn!("{err}");
                    }
                    synced.push((binding.volume.clone(), report));
                }
            }
            session.state = SessionState::Stopped;
        }

        Ok(StopReport {
            session,
            stopped: true,
            forced,
            synced,
            sync_failures,
        })
    }

    fn run_args(&self, session: &Session, request: &StartRequest) -> Vec<String> {
        let home = self.options.container_home.trim_end_matches('/');
        let container_user = repo_basename(home);
        let repo_dest = format!("{home}/{}", repo_basename(&session.repo_path));
        let key_dest = format!("{home}/.ssh/id_ed25519");

        let mut run = args(["run", "-d", "--name"]);
        run.push(session.container_name.clone());
        run.push("-p".to_string());
        run.push(format!("{}:{}", session.port, self.options.internal_port));

        let env = [
            ("USER", container_user),
            ("USERID", self.options.uid.to_string()),
            ("GROUPID", self.options.gid.to_string()),
            ("DISABLE_AUTH", "true".to_string()),
            ("DOCKBENCH_USER", session.user.clone()),
            ("DOCKBENCH_SESSION", session.container_name.clone()),
            (
                "GIT_SSH_COMMAND",
                ExecutionTarget::git_ssh_command(&key_dest),
            ),
        ];
        for (key, value) in env {
            run.push("-e".to_string());
            run.push(format!("{key}={value}"));
        }

        let mut volumes = vec![format!("{}:{repo_dest}", session.repo_path)];
        match session.mode {
            SessionMode::Bind => volumes.extend(
                request
                    .mounts
                    .iter()
                    .map(|mount| format!("{}:{}", mount.host_path, mount.container_path)),
            ),
            SessionMode::Volume => volumes.extend(
                session
                    .volumes
                    .iter()
                    .map(|binding| format!("{}:{}", binding.volume, binding.container_path)),
            ),
        }
        let keys = &request.key_mounts;
        volumes.push(format!("{}:{key_dest}:ro", keys.private_key));
        volumes.push(format!("{}:{key_dest}.pub:ro", keys.public_key));
        volumes.push(format!("{}:{home}/.ssh/known_hosts:ro", keys.known_hosts));
        for volume in volumes {
            run.push("-v".to_string());
            run.push(volume);
        }

        for (key, value) in session.labels() {
            run.push("--label".to_string());
            run.push(format!("{key}={value}"));
        }

        if request.high_demand && session.target.is_remote() {
            run.push("--cpus".to_string());
            run.push(self.options.cpu_limit.to_string());
            run.push("--memory".to_string());
            run.push(self.options.memory_limit_arg());
        }

        run.push(self.options.image.clone());
        run
    }

    async fn logs(&self, container_name: &str) -> String {
        match self
            .cli
            .run(args(["logs", "--tail", LOG_TAIL_LINES, container_name]))
            .await
        {
            Ok(output) => {
                let combined = format!("{}{}", output.stdout, output.stderr);
                if combined.trim().is_empty() {
                    "(no output)".to_string()
                } else {
                    combined.trim_end().to_string()
                }
            }
            Err(err) => format!("(logs unavailable: {err})"),
        }
    }

    async fn remove(&self, container_name: &str) -> Result<(), DockerError> {
        let output = self.cli.run(args(["rm", "-f", container_name])).await?;
        if output.is_success() || output.stderr.contains("No such container") {
            Ok(())
        } else {
            Err(DockerError::Command {
                operation: "rm".to_string(),
                detail: output.detail(),
            })
        }
    }

    /// Best-effort removal of volumes populated for a start that failed.
    async fn discard_volumes(&self, session: &mut Session) {
        let sync = SyncEngine::new(&self.cli, &self.options);
        for binding in session.volumes.drain(..) {
            if let Err(err) = sync.remove_volume(&binding.volume).await {
                tracing::warn!("{err}");
            }
        }
    }
}

/// Port for a new session.
///
/// A requested port is used as-is unless another session already publishes
/// it. Without a request the lowest free port at or above `default_port` wins.
pub fn choose_port(
    used: &BTreeSet<u16>,
    requested: Option<u16>,
    default_port: u16,
) -> Result<u16, DockerError> {
    match requested {
        Some(port) if used.contains(&port) => Err(DockerError::PortInUse(port)),
        Some(port) => Ok(port),
        None => (default_port..=u16::MAX)
            .find(|port| !used.contains(port))
            .ok_or(DockerError::NoFreePort(default_port)),
    }
}
