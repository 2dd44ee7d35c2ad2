use super::{Command, connect, repository_path};
use crate::context::AppContext;
use crate::orchestrator::StartedSession;
use crate::session::{SessionConfig, SessionMode};
use async_trait::async_trait;
use std::error::Error;

pub struct StartCommand {
    pub repo: Option<String>,
    pub remote: Option<String>,
    pub mode: Option<SessionMode>,
    pub port: Option<u16>,
    pub high_demand: bool,
    pub pull: bool,
}

impl StartCommand {
    pub(crate) fn session_config(&self, ctx: &AppContext, repo_path: String) -> SessionConfig {
        let options = &ctx.launcher_config().session;
        SessionConfig {
            repo_path,
            mode: self.mode.unwrap_or(options.default_mode),
            requested_port: self.port,
            high_demand: self.high_demand,
            pull_before_start: self.pull || options.pull_before_start,
        }
    }
}

#[async_trait]
impl Command for StartCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let mut orchestrator = connect(ctx, self.remote.as_deref()).await?;
        let Some(repo_path) =
            repository_path(&orchestrator, self.repo.as_deref(), self.remote.is_some()).await?
        else {
            println!("No repository selected");
            return Ok(());
        };

        let started = orchestrator
            .start_session(&self.session_config(ctx, repo_path))
            .await?;
        print_started(&started);
        Ok(())
    }
}

pub(crate) fn print_started(started: &StartedSession) {
    let session = &started.session;
    println!("Session {} is running", session.container_name);
    println!("  URL:   {}", started.url);
    println!("  Mode:  {}", session.mode);
    for mount in &started.mounts {
        let note = if mount.defaulted { " (default)" } else { "" };
        println!(
            "  Mount: {} -> {}{}",
            mount.host_path, mount.container_path, note
        );
    }
    if let Some(reason) = &started.degraded {
        println!("  Note:  {reason}");
    }
}
