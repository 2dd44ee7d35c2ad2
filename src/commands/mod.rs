use crate::context::AppContext;
use crate::orchestrator::Orchestrator;
use crate::repository::RepositoryReference;
use crate::ssh::BootstrapState;
use async_trait::async_trait;
use std::error::Error;
use std::path::Path;

pub mod bootstrap;
pub mod list;
pub mod repos;
pub mod resolve;
pub mod run;
pub mod start;
pub mod stop;

pub use bootstrap::BootstrapCommand;
pub use list::ListCommand;
pub use repos::ReposCommand;
pub use resolve::ResolveCommand;
pub use run::RunCommand;
pub use start::StartCommand;
pub use stop::StopCommand;

#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>>;
}

/// Orchestrator with trust established against the local machine or `remote`.
pub(crate) async fn connect(
    ctx: &AppContext,
    remote: Option<&str>,
) -> Result<Orchestrator, Box<dyn Error>> {
    let mut orchestrator = Orchestrator::new(ctx);
    let target = orchestrator.target(remote);
    let outcome = orchestrator.bootstrap_trust(target).await?;

    match outcome.state {
        BootstrapState::PasswordlessVerified => println!(
            "Installed your key on {} ({})",
            outcome.target.host,
            outcome.strategy.unwrap_or("unknown method")
        ),
        BootstrapState::InstalledUnverified => println!(
            "Key installed on {} but passwordless login could not be confirmed; using the password for this session",
            outcome.target.host
        ),
        _ => {}
    }
    Ok(orchestrator)
}

/// Repository path on the current target: the given path, the current
/// directory for local sessions, or the user's pick from a remote scan.
pub(crate) async fn repository_path(
    orchestrator: &Orchestrator,
    repo: Option<&str>,
    remote: bool,
) -> Result<Option<String>, Box<dyn Error>> {
    if remote {
        if let Some(repo) = repo {
            return Ok(Some(repo.to_string()));
        }
        let picked = orchestrator.select_repository(None, None).await?;
        return Ok(picked.map(|reference| reference.path));
    }

    let cwd = std::env::current_dir()?;
    let path = repo.map(Path::new).unwrap_or(cwd.as_path());
    let reference = RepositoryReference::local(path)?;
    if !reference.is_git {
        println!("{} is not a git repository; changes will not be committed", reference.path);
    }
    Ok(Some(reference.path))
}
