use crate::context::command_runner::{CommandRunner, CommandSpec};
use crate::target::Keypair;
use std::time::Duration;

use super::BootstrapError;

/// Whether [`ensure_keypair`] had to create the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Existing,
    Generated,
}

/// Generate a passphrase-less ed25519 keypair unless both halves already exist.
pub async fn ensure_keypair(
    runner: &dyn CommandRunner,
    keypair: &Keypair,
) -> Result<KeyStatus, BootstrapError> {
    if keypair.exists() {
        return Ok(KeyStatus::Existing);
    }

    if let Some(parent) = keypair.private_key.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // ssh-keygen refuses to overwrite a half-present pair without a prompt
    for stale in [&keypair.private_key, &keypair.public_key] {
        if stale.exists() {
            tokio::fs::remove_file(stale).await?;
        }
    }

    let spec = CommandSpec::new("ssh-keygen")
        .args(["-t", "ed25519", "-N", "", "-C"])
        .arg(keypair.comment.clone())
        .arg("-f")
        .arg(keypair.private_key.to_string_lossy().to_string())
        .arg("-q")
        .timeout(Duration::from_secs(30));
    let output = runner.run(spec).await?;

    if !output.is_success() && !keypair.public_key.exists() {
        return Err(BootstrapError::KeyGeneration(output.detail()));
    }
    if !output.is_success() {
        tracing::warn!("ssh-keygen reported an error but produced a key: {}", output.detail());
    }

    tracing::info!("Generated keypair {}", keypair.private_key.display());
    Ok(KeyStatus::Generated)
}

/// The single authorized_keys line for this keypair.
pub async fn public_key_line(keypair: &Keypair) -> Result<String, BootstrapError> {
    let content = tokio::fs::read_to_string(&keypair.public_key).await?;
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            BootstrapError::KeyGeneration(format!(
                "{} is empty",
                keypair.public_key.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::command_runner::{DefaultCommandRunner, ProcessOutput};
    use crate::test_utils::ScriptedCommandRunner;
    use std::path::Path;

    fn keypair_in(dir: &Path) -> Keypair {
        Keypair {
            private_key: dir.join("id_test_alice"),
            public_key: dir.join("id_test_alice.pub"),
            comment: "dockbench-alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_existing_keypair_is_left_alone() {
        let temp = tempfile::TempDir::new().unwrap();
        let pair = keypair_in(temp.path());
        std::fs::write(&pair.private_key, "private").unwrap();
        std::fs::write(&pair.public_key, "ssh-ed25519 AAAA dockbench-alice\n").unwrap();
        let runner = ScriptedCommandRunner::new();

        let status = ensure_keypair(&runner, &pair).await.unwrap();

        assert_eq!(status, KeyStatus::Existing);
        assert_eq!(runner.count("ssh-keygen"), 0);
        assert_eq!(
            public_key_line(&pair).await.unwrap(),
            "ssh-ed25519 AAAA dockbench-alice"
        );
    }

    #[tokio::test]
    async fn test_failed_generation_without_public_key_is_fatal() {
        let temp = tempfile::TempDir::new().unwrap();
        let pair = keypair_in(temp.path());
        let runner = ScriptedCommandRunner::new()
            .on("ssh-keygen", ProcessOutput::failure(1, "unknown key type"));

        let err = ensure_keypair(&runner, &pair).await.unwrap_err();

        assert!(

            matches!(err, BootstrapError::KeyGeneration(ref detail) if detail == "unknown key type")

        );
    }

    #[tokio::test]
    async fn test_generation_arguments() {
        let temp = tempfile::TempDir::new().unwrap();
        let pair = keypair_in(&temp.path().join("ssh"));
        let runner = ScriptedCommandRunner::new();

        let status = ensure_keypair(&runner, &pair).await.unwrap();

        assert_eq!(status, KeyStatus::Generated);
        let line = runner.command_lines()[0].clone();
        assert!(line.starts_with("ssh-keygen -t ed25519 -N  -C dockbench-alice -f"));
        assert!(temp.path().join("ssh").is_dir());
    }

    #[tokio::test]
    async fn test_real_ssh_keygen_when_available() {
        if std::process::Command::new("ssh-keygen").arg("-?").output().is_err() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let pair = keypair_in(temp.path());

        ensure_keypair(&DefaultCommandRunner, &pair).await.unwrap();

        assert!(pair.exists());
        let line = public_key_line(&pair).await.unwrap();
        assert!(line.starts_with("ssh-ed25519 "));
        assert!(line.ends_with("dockbench-alice"));
    }
}
