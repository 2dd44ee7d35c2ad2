use super::{Command, connect};
use crate::context::AppContext;
use crate::docker::StopReport;
use crate::git::{PushOutcome, ReconcileOutcome};
use crate::orchestrator::{Orchestrator, Reconciliation};
use crate::session::container_name;
use async_trait::async_trait;
use std::error::Error;

pub struct StopCommand {
    /// Container name; derived from `repo` when absent
    pub name: Option<String>,
    pub repo: Option<String>,
    pub remote: Option<String>,
    /// Skip the commit and push step
    pub no_commit: bool,
}

#[async_trait]
impl Command for StopCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let mut orchestrator = connect(ctx, self.remote.as_deref()).await?;
        let name = match (&self.name, &self.repo) {
            (Some(name), _) => name.clone(),
            (None, Some(repo)) => container_name(repo, &orchestrator.user()),
            (None, None) => {
                let cwd = std::env::current_dir()?;
                container_name(&cwd.to_string_lossy(), &orchestrator.user())
            }
        };

        let report = orchestrator.stop_session(&name).await?;
        print_stopped(&name, &report);

        if self.no_commit || !report.stopped {
            return Ok(());
        }
        let repo_path = report
            .session
            .as_ref()
            .map(|session| session.repo_path.clone())
            .or_else(|| self.repo.clone());
        if let Some(repo_path) = repo_path {
            reconcile(&orchestrator, &repo_path, None).await?;
        }
        Ok(())
    }
}

pub(crate) fn print_stopped(name: &str, report: &StopReport) {
    if !report.stopped {
        println!("Session {name} is not running");
        return;
    }
    if report.forced {
        println!("Session {name} did not stop in time and was killed");
    } else {
        println!("Session {name} stopped");
    }
    for (volume, sync) in &report.synced {
        println!("  Synced {} file(s) from {}", sync.files_written, volume);
    }
    for (volume, reason) in &report.sync_failures {
        println!("  Could not sync {volume}, the volume was kept: {reason}");
    }
}

/// Commit and push the session's changes, printing what happened.
pub(crate) async fn reconcile(
    orchestrator: &Orchestrator,
    repo_path: &str,
    baseline: Option<&crate::git::GitState>,
) -> Result<(), Box<dyn Error>> {
    let Reconciliation { outcome, diff } = match orchestrator.reconcile(repo_path, baseline).await
    {
        Ok(reconciliation) => reconciliation,
        Err(err) => {
            println!("Skipping commit: {err}");
            return Ok(());
        }
    };

    match outcome {
        ReconcileOutcome::Clean => println!("No changes to commit in {repo_path}"),
        ReconcileOutcome::Cancelled => println!("Commit skipped; changes left in {repo_path}"),
        ReconcileOutcome::Committed { commit, push } => {
            println!("Committed {}", &commit[..commit.len().min(12)]);
            match push {
                PushOutcome::Pushed(method) => println!("Pushed ({method:?})"),
                PushOutcome::NoRemote => println!("No origin remote, nothing pushed"),
                PushOutcome::Skipped { failure, .. } => {
                    println!("Push skipped ({failure}); run `git push` later")
                }
            }
        }
    }

    if let Some(diff) = diff
        && !diff.new_commits.is_empty()
    {
        println!("Commits since the session started:");
        for commit in &diff.new_commits {
            println!("  {commit}");
        }
        println!("{} file(s) changed", diff.changed_files.len());
    }
    Ok(())
}
