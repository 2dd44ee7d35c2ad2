use super::Command;
use crate::config_paths::ConfigPathResolver;
use crate::context::AppContext;
use crate::orchestrator::Orchestrator;
use crate::transport::{Transport, path_join};
use async_trait::async_trait;
use std::error::Error;

/// Print the directory a descriptor key resolves to in a local repository.
pub struct ResolveCommand {
    pub repo: Option<String>,
    pub key: String,
}

#[async_trait]
impl Command for ResolveCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let repo = match &self.repo {
            Some(repo) => std::path::PathBuf::from(repo),
            None => std::env::current_dir()?,
        };
        let repo = crate::target::display_path(&repo.canonicalize()?);

        let target = Orchestrator::new(ctx).target(None);
        let transport = Transport::new(ctx, target);
        let config = ctx.launcher_config();
        let descriptor = path_join(&repo, &config.session.descriptor_file);

        let path = match ConfigPathResolver::new(&transport)
            .resolve(&descriptor, &self.key, &repo)
            .await
        {
            Ok(path) => path,
            Err(err) if err.is_not_found() => {
                let default = config
                    .mounts
                    .iter()
                    .find(|mount| mount.key == self.key)
                    .and_then(|mount| mount.default.as_deref());
                match default {
                    Some(default) => crate::config_paths::resolve_value(default, &repo),
                    None => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };
        println!("{path}");
        Ok(())
    }
}
