use super::start::{StartCommand, print_started};
use super::stop::{print_stopped, reconcile};
use super::{Command, connect, repository_path};
use crate::context::AppContext;
use async_trait::async_trait;
use std::error::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Whole workflow in one process: start, wait, stop, sync, commit.
pub struct RunCommand {
    pub start: StartCommand,
    pub no_commit: bool,
}

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let remote = self.start.remote.as_deref();
        let mut orchestrator = connect(ctx, remote).await?;
        let Some(repo_path) =
            repository_path(&orchestrator, self.start.repo.as_deref(), remote.is_some()).await?
        else {
            println!("No repository selected");
            return Ok(());
        };

        let started = orchestrator
            .start_session(&self.start.session_config(ctx, repo_path.clone()))
            .await?;
        print_started(&started);

        println!("Press Enter or Ctrl-C to stop the session");
        let mut line = String::new();
        let mut stdin = BufReader::new(tokio::io::stdin());
        tokio::select! {
            _ = stdin.read_line(&mut line) => {}
            _ = tokio::signal::ctrl_c() => println!(),
        }

        let name = started.session.container_name.clone();
        let report = orchestrator.stop_session(&name).await?;
        print_stopped(&name, &report);

        if !self.no_commit {
            reconcile(&orchestrator, &repo_path, started.baseline.as_ref()).await?;
        }
        Ok(())
    }
}
