use super::Command;
use crate::context::AppContext;
use crate::orchestrator::Orchestrator;
use async_trait::async_trait;
use std::error::Error;

pub struct BootstrapCommand {
    pub remote: Option<String>,
}

#[async_trait]
impl Command for BootstrapCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let mut orchestrator = Orchestrator::new(ctx);
        let target = orchestrator.target(self.remote.as_deref());
        println!("Establishing trust with {}", target.destination());

        let outcome = orchestrator.bootstrap_trust(target).await?;
        let steps: Vec<String> = outcome
            .history
            .iter()
            .map(|state| format!("{state:?}"))
            .collect();
        println!("{}", steps.join(" -> "));
        if let Some(strategy) = outcome.strategy {
            println!("Key installed via {strategy}");
        }
        if let Some(mounts) = &outcome.key_mounts {
            println!("Key available at {} on {}", mounts.private_key, outcome.target.host);
        }
        if outcome.password_fallback() {
            println!("Passwordless login is not confirmed; commands will use the password");
        }
        Ok(())
    }
}
