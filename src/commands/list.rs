use super::{Command, connect};
use crate::context::AppContext;
use crate::session::Session;
use async_trait::async_trait;
use std::error::Error;
use tabled::settings::Style;
use tabled::{Table, Tabled};

pub struct ListCommand {
    pub remote: Option<String>,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "REPOSITORY")]
    repo: String,
    #[tabled(rename = "MODE")]
    mode: String,
    #[tabled(rename = "URL")]
    url: String,
}

impl From<&Session> for SessionRow {
    fn from(session: &Session) -> Self {
        Self {
            name: session.container_name.clone(),
            repo: session.repo_path.clone(),
            mode: session.mode.to_string(),
            url: session.url(),
        }
    }
}

#[async_trait]
impl Command for ListCommand {
    async fn execute(&self, ctx: &AppContext) -> Result<(), Box<dyn Error>> {
        let mut orchestrator = connect(ctx, self.remote.as_deref()).await?;
        let sessions = orchestrator.list_sessions().await?;

        if sessions.is_empty() {
            println!("No running sessions");
        } else {
            println!("{}", session_table(&sessions));
        }
        Ok(())
    }
}

fn session_table(sessions: &[Session]) -> String {
    let rows: Vec<SessionRow> = sessions.iter().map(SessionRow::from).collect();
    Table::new(rows).with(Style::blank()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMode;
    use crate::target::{ExecutionTarget, Keypair};

    #[test]
    fn test_session_table() {
        let keypair = Keypair {
            private_key: "/keys/id".into(),
            public_key: "/keys/id.pub".into(),
            comment: "dockbench-alice".to_string(),
        };
        let sessions = vec![Session::new(
            "alice",
            "/srv/repos/modelA",
            ExecutionTarget::remote("compute01", "alice", keypair),
            8788,
            SessionMode::Volume,
        )];

        let table = session_table(&sessions);

        assert!(table.contains("NAME"));
        assert!(table.contains("modelA_alice"));
        assert!(table.contains("http://compute01:8788"));
        assert!(table.contains("volume"));
    }
}
