use super::{Command, connect};
use crate::context::AppContext;
use async_trait::async_trait;
use std::error::Error;

pub struct ReposCommand {
    pub remote: Option<String>,
    /// Directory to scan instead of the remote's configured `repos_dir`
    pub dir: Option<String>,
}

#[async_trait]
impl Command for ReposCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let orchestrator = connect(ctx, self.remote.as_deref()).await?;
        let repositories = orchestrator.list_repositories(self.dir.as_deref()).await?;
        for repository in repositories {
            println!("{:<32}  {}", repository.label(), repository.path);
        }
        Ok(())
    }
}
