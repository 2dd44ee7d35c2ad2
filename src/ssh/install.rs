//! Public key installation strategies, tried in order until one succeeds.

use crate::context::AppContext;
use crate::context::SshOptions;
use crate::context::command_runner::{CommandError, CommandRunner, CommandSpec};
use crate::target::{ExecutionTarget, shell_quote};
use async_trait::async_trait;
use portable_pty::{Child, ChildKiller, CommandBuilder, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// sshpass exit status for a rejected password
const SSHPASS_BAD_PASSWORD: i32 = 5;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("{host} rejected the password")]
    PasswordRejected { host: String },
    #[error("Key installation timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("Key installation failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

#[async_trait]
pub trait KeyInstaller: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    /// Append `public_key` to the target account's authorized_keys, logging in
    /// with `password`.
    async fn install(
        &self,
        target: &ExecutionTarget,
        password: &str,
        public_key: &str,
    ) -> Result<(), InstallError>;
}

/// Installer order used by the bootstrapper.
pub fn default_strategies(ctx: &AppContext) -> Vec<Arc<dyn KeyInstaller>> {
    let options = ctx.launcher_config().ssh.clone();
    vec![
        Arc::new(SshpassInstaller::new(ctx.command_runner(), options.clone())),
        Arc::new(PtyInstaller::new(options)),
    ]
}

/// Shell script that creates `~/.ssh` with the right permissions and appends
/// the key only when an identical line is not already present.
pub fn install_script(public_key: &str) -> String {
    let key = shell_quote(public_key.trim());
    [
        "umask 077".to_string(),
        "mkdir -p \"$HOME/.ssh\"".to_string(),
        "chmod 700 \"$HOME/.ssh\"".to_string(),
        "touch \"$HOME/.ssh/authorized_keys\"".to_string(),
        "chmod 600 \"$HOME/.ssh/authorized_keys\"".to_string(),
        format!(
            "if ! grep -qxF {key} \"$HOME/.ssh/authorized_keys\"; then \
             if [ -s \"$HOME/.ssh/authorized_keys\" ] && [ -n \"$(tail -c 1 \"$HOME/.ssh/authorized_keys\")\" ]; then \
             echo >> \"$HOME/.ssh/authorized_keys\"; fi; \
             printf '%s\\n' {key} >> \"$HOME/.ssh/authorized_keys\"; fi"
        ),
    ]
    .join(" && ")
}

/// Non-interactive password login through `sshpass -e`.
pub struct SshpassInstaller {
    runner: Arc<dyn CommandRunner>,
    options: SshOptions,
}

impl SshpassInstaller {
    pub fn new(runner: Arc<dyn CommandRunner>, options: SshOptions) -> Self {
        Self { runner, options }
    }
}

#[async_trait]
impl KeyInstaller for SshpassInstaller {
    fn name(&self) -> &'static str {
        "sshpass"
    }

    async fn is_available(&self) -> bool {
        let spec = CommandSpec::new("sshpass")
            .arg("-V")
            .timeout(Duration::from_secs(5));
        matches!(self.runner.run(spec).await, Ok(output) if output.is_success())
    }

    async fn install(
        &self,
        target: &ExecutionTarget,
        password: &str,
        public_key: &str,
    ) -> Result<(), InstallError> {
        let spec = target
            .with_password_fallback(password)
            .ssh_spec(&self.options, &install_script(public_key))
            .timeout(self.options.command_timeout());
        let output = self.runner.run(spec).await?;

        match output.exit_code {
            0 => Ok(()),
            SSHPASS_BAD_PASSWORD => Err(InstallError::PasswordRejected {
                host: target.host.clone(),
            }),
            _ => Err(InstallError::Failed(output.detail())),
        }
    }
}

/// Drives an interactive `ssh` login inside a pseudo-terminal, answering the
/// password prompt itself. Used where sshpass is not installed.
pub struct PtyInstaller {
    options: SshOptions,
}

impl PtyInstaller {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl KeyInstaller for PtyInstaller {
    fn name(&self) -> &'static str {
        "pty"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn install(
        &self,
        target: &ExecutionTarget,
        password: &str,
        public_key: &str,
    ) -> Result<(), InstallError> {
        let mut args = ExecutionTarget::password_auth_options(&self.options);
        args.push(target.destination());
        args.push(install_script(public_key));

        let password = password.to_string();
        let host = target.host.clone();
        let deadline = self.options.command_timeout();

        tokio::task::spawn_blocking(move || {
            answer_password_in_pty("ssh", args, &password, &host, deadline)
        })
        .await
        .map_err(|e| InstallError::Failed(e.to_string()))?
    }
}

fn pty_failure(err: impl std::fmt::Display) -> InstallError {
    InstallError::Failed(err.to_string())
}

fn asks_for_password(output: &str) -> bool {
    output.to_lowercase().contains("password:")
}

/// Child running in a pty plus the thread draining its output. Dropping it
/// kills the child if it is still running, reaps it and joins the reader.
struct PtyChild {
    child: Box<dyn Child + Send + Sync>,
    reader: Option<JoinHandle<()>>,
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            let _ = self.child.kill();
        }
        // the reader only sees EOF once the child is gone
        if self.child.wait().is_ok()
            && let Some(reader) = self.reader.take()
        {
            let _ = reader.join();
        }
    }
}

fn answer_password_in_pty(
    program: &str,
    args: Vec<String>,
    password: &str,
    host: &str,
    deadline: Duration,
) -> Result<(), InstallError> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: 24,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(pty_failure)?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(&args);
    let mut session = PtyChild {
        child: pair.slave.spawn_command(cmd).map_err(pty_failure)?,
        reader: None,
    };
    drop(pair.slave);

    let mut reader = pair.master.try_clone_reader().map_err(pty_failure)?;
    let mut writer = pair.master.take_writer().map_err(pty_failure)?;

    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    session.reader = Some(std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    }));

    let started = Instant::now();
    let mut transcript = String::new();
    let mut unanswered_from = 0;
    let mut answered = false;

    loop {
        if let Some(status) = session.child.try_wait().map_err(pty_failure)? {
            // collect what the child printed before it exited
            while let Ok(chunk) = rx.recv_timeout(Duration::from_millis(200)) {
                transcript.push_str(&String::from_utf8_lossy(&chunk));
            }
            if status.success() {
                return Ok(());
            }
            if answered && asks_for_password(&transcript[unanswered_from..]) {
                return Err(InstallError::PasswordRejected {
                    host: host.to_string(),
                });
            }
            return Err(InstallError::Failed(transcript.trim().to_string()));
        }

        if started.elapsed() > deadline {
            return Err(InstallError::TimedOut(deadline));
        }

        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(chunk) => {
                transcript.push_str(&String::from_utf8_lossy(&chunk));
                if asks_for_password(&transcript[unanswered_from..]) {
                    if answered {
                        // A second prompt means the first answer was wrong
                        return Err(InstallError::PasswordRejected {
                            host: host.to_string(),
                        });
                    }
                    writer
                        .write_all(format!("{password}\n").as_bytes())
                        .and_then(|_| writer.flush())
                        .map_err(pty_failure)?;
                    answered = true;
                    unanswered_from = transcript.len();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::command_runner::{DefaultCommandRunner, ProcessOutput};
    use crate::target::Keypair;
    use crate::test_utils::ScriptedCommandRunner;
    use std::path::PathBuf;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIExample dockbench-alice";

    fn target() -> ExecutionTarget {
        ExecutionTarget::remote(
            "compute01",
            "alice",
            Keypair {
                private_key: PathBuf::from("/keys/id"),
                public_key: PathBuf::from("/keys/id.pub"),
                comment: "dockbench-alice".to_string(),
            },
        )
    }

    async fn run_script_with_home(home: &std::path::Path) {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg(install_script(KEY))
            .env("HOME", home.to_string_lossy().to_string());
        let output = DefaultCommandRunner.run(spec).await.unwrap();
        assert!(output.is_success(), "{}", output.detail());
    }

    #[tokio::test]
    async fn test_install_script_is_idempotent() {
        let home = tempfile::TempDir::new().unwrap();

        run_script_with_home(home.path()).await;
        run_script_with_home(home.path()).await;

        let keys = std::fs::read_to_string(home.path().join(".ssh/authorized_keys")).unwrap();
        assert_eq!(keys.lines().filter(|line| *line == KEY).count(), 1);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir_mode = std::fs::metadata(home.path().join(".ssh"))
                .unwrap()
                .permissions()
                .mode();
            let file_mode = std::fs::metadata(home.path().join(".ssh/authorized_keys"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(dir_mode & 0o777, 0o700);
            assert_eq!(file_mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_install_script_keeps_existing_entries() {
        let home = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(home.path().join(".ssh")).unwrap();
        // No trailing newline on the existing entry
        std::fs::write(
            home.path().join(".ssh/authorized_keys"),
            "ssh-rsa AAAAB3Other other@host",
        )
        .unwrap();

        run_script_with_home(home.path()).await;

        let keys = std::fs::read_to_string(home.path().join(".ssh/authorized_keys")).unwrap();
        let lines: Vec<_> = keys.lines().collect();
        assert_eq!(lines, vec!["ssh-rsa AAAAB3Other other@host", KEY]);
    }

    #[tokio::test]
    async fn test_sshpass_installer_passes_password_in_env() {
        let runner = Arc::new(ScriptedCommandRunner::new());
        let installer = SshpassInstaller::new(runner.clone(), SshOptions::default());

        installer.install(&target(), "s3cret", KEY).await.unwrap();

        let call = &runner.calls()[0];
        assert_eq!(call.program, "sshpass");
        assert!(call.env.contains(&("SSHPASS".to_string(), "s3cret".to_string())));
        assert!(!call.command_line().contains("s3cret"));
        assert!(call.command_line().contains("authorized_keys"));
    }

    #[tokio::test]
    async fn test_sshpass_installer_classifies_rejected_password() {
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .on("sshpass -e", ProcessOutput::failure(SSHPASS_BAD_PASSWORD, "")),
        );
        let installer = SshpassInstaller::new(runner, SshOptions::default());

        let err = installer.install(&target(), "wrong", KEY).await.unwrap_err();
        assert!(matches!(err, InstallError::PasswordRejected { .. }));
    }

    #[tokio::test]
    async fn test_sshpass_availability_follows_version_check() {
        let missing = SshpassInstaller::new(
            Arc::new(
                ScriptedCommandRunner::new().on("sshpass -V", ProcessOutput::failure(127, "")),
            ),
            SshOptions::default(),
        );
        let present =
            SshpassInstaller::new(Arc::new(ScriptedCommandRunner::new()), SshOptions::default());

        assert!(!missing.is_available().await);
        assert!(present.is_available().await);
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn test_pty_second_prompt_is_rejected_and_child_killed() {
        let started = Instant::now();
        let err = answer_password_in_pty(
            "sh",
            sh("printf 'Password: '; read answer; printf 'Password: '; sleep 30"),
            "wrong",
            "compute01",
            Duration::from_secs(20),
        )
        .unwrap_err();

        assert!(matches!(err, InstallError::PasswordRejected { ref host } if host == "compute01"));
        // returning at all means the child was reaped and the reader joined
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_pty_deadline_kills_silent_child() {
        let started = Instant::now();
        let err = answer_password_in_pty(
            "sh",
            sh("sleep 30"),
            "pw",
            "compute01",
            Duration::from_millis(300),
        )
        .unwrap_err();

        assert!(matches!(err, InstallError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_pty_answered_login_succeeds_and_failure_keeps_transcript() {
        answer_password_in_pty(
            "sh",
            sh("printf 'Password: '; read answer; [ \"$answer\" = pw ]"),
            "pw",
            "compute01",
            Duration::from_secs(10),
        )
        .unwrap();

        let err = answer_password_in_pty(
            "sh",
            sh("echo 'Connection refused'; exit 255"),
            "pw",
            "compute01",
            Duration::from_secs(10),
        )
        .unwrap_err();
        assert!(
            matches!(err, InstallError::Failed(ref detail) if detail.contains("Connection refused"))
        );
    }

    #[test]
    fn test_password_prompt_detection() {
        assert!(asks_for_password("alice@compute01's password: "));
        assert!(asks_for_password("Password:"));
        assert!(!asks_for_password("Warning: Permanently added 'compute01'"));
    }
}
