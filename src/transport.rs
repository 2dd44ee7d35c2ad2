//! Uniform command and file access on the local machine or a remote host.
//!
//! Local targets run commands through `sh -c`; remote targets wrap the same
//! command text in a single ssh invocation. Every call carries a hard deadline
//! from [`SshOptions::command_timeout`] and is never retried here.

use crate::context::AppContext;
use crate::context::SshOptions;
use crate::context::command_runner::{CommandError, CommandRunner, CommandSpec, ProcessOutput};
use crate::target::{ExecutionTarget, shell_quote};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Exit status used by the read script when the file is absent.
const NOT_FOUND_STATUS: i32 = 3;
const DIR_CREATED: &str = "dockbench:created";
const DIR_EXISTS: &str = "dockbench:exists";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("{operation} failed on {host}: {detail}")]
    Failed {
        operation: String,
        host: String,
        detail: String,
    },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Command(err) if err.is_timeout())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryStatus {
    Created,
    Exists,
}

#[derive(Clone)]
pub struct Transport {
    runner: Arc<dyn CommandRunner>,
    target: ExecutionTarget,
    options: SshOptions,
}

impl Transport {
    pub fn new(ctx: &AppContext, target: ExecutionTarget) -> Self {
        Self {
            runner: ctx.command_runner(),
            target,
            options: ctx.launcher_config().ssh.clone(),
        }
    }

    pub fn target(&self) -> &ExecutionTarget {
        &self.target
    }

    /// Spec that runs shell text on the target with the default deadline.
    pub fn spec(&self, command: &str) -> CommandSpec {
        let spec = if self.target.is_remote() {
            self.target.ssh_spec(&self.options, command)
        } else {
            CommandSpec::new("sh").arg("-c").arg(command)
        };
        spec.timeout(self.options.command_timeout())
    }

    pub async fn run(&self, command: &str) -> Result<ProcessOutput, TransportError> {
        self.execute(self.spec(command)).await
    }

    pub async fn run_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ProcessOutput, TransportError> {
        self.execute(self.spec(command).timeout(timeout)).await
    }

    /// Run a command and fail with the tool's own output on a non-zero exit.
    pub async fn run_checked(
        &self,
        operation: &str,
        command: &str,
    ) -> Result<ProcessOutput, TransportError> {
        let output = self.run(command).await?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(self.failed(operation, &output))
        }
    }

    async fn execute(&self, spec: CommandSpec) -> Result<ProcessOutput, TransportError> {
        tracing::debug!(target_host = %self.target.host, "{}", spec.command_line());
        let output = self.runner.run(spec).await?;
        if !output.is_success() {
            tracing::debug!(
                exit_code = output.exit_code,
                "command failed on {}: {}",
                self.target.host,
                output.detail()
            );
        }
        Ok(output)
    }

    /// Contents of a file, or `None` when it does not exist.
    pub async fn read_file(&self, path: &str) -> Result<Option<String>, TransportError> {
        let quoted = shell_quote(path);
        let command =
            format!("if [ -f {quoted} ]; then cat {quoted}; else exit {NOT_FOUND_STATUS}; fi");
        let output = self.run(&command).await?;
        match output.exit_code {
            0 => Ok(Some(output.stdout)),
            NOT_FOUND_STATUS => Ok(None),
            _ => Err(self.failed("read", &output)),
        }
    }

    /// Write a file through stdin, creating parent directories and applying `mode`.
    pub async fn write_file(
        &self,
        path: &str,
        content: &str,
        mode: u32,
    ) -> Result<(), TransportError> {
        let quoted = shell_quote(path);
        let parent = parent_dir(path);
        let command = format!(
            "mkdir -p {} && cat > {quoted} && chmod {mode:o} {quoted}",
            shell_quote(&parent)
        );
        let spec = self.spec(&command).stdin(content.as_bytes().to_vec());
        let output = self.execute(spec).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(self.failed("write", &output))
        }
    }

    pub async fn ensure_directory(&self, path: &str) -> Result<DirectoryStatus, TransportError> {
        let quoted = shell_quote(path);
        let command = format!(
            "if [ -d {quoted} ]; then echo {DIR_EXISTS}; else mkdir -p {quoted} && echo {DIR_CREATED}; fi"
        );
        let output = self.run(&command).await?;
        if !output.is_success() {
            return Err(self.failed("mkdir", &output));
        }
        if output.stdout.contains(DIR_CREATED) {
            Ok(DirectoryStatus::Created)
        } else {
            Ok(DirectoryStatus::Exists)
        }
    }

    /// Home directory of the account commands run as.
    pub async fn home_dir(&self) -> Result<String, TransportError> {
        let output = self.run_checked("home lookup", "printf '%s' \"$HOME\"").await?;
        Ok(output.stdout.trim().to_string())
    }

    fn failed(&self, operation: &str, output: &ProcessOutput) -> TransportError {
        TransportError::Failed {
            operation: operation.to_string(),
            host: self.target.host.clone(),
            detail: output.detail(),
        }
    }
}

/// Join path segments with `/`, dropping a leading `./` from the tail.
pub fn path_join(base: &str, tail: &str) -> String {
    let tail = tail.trim_start_matches("./");
    if base.is_empty() {
        return tail.to_string();
    }
    if tail.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        tail.trim_start_matches('/')
    )
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(index) => path[..index].to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::command_runner::DefaultCommandRunner;
    use crate::target::Keypair;
    use crate::test_utils::{ScriptedCommandRunner, ScriptedPrompter, test_context};
    use std::path::PathBuf;

    fn keypair() -> Keypair {
        Keypair {
            private_key: PathBuf::from("/keys/id"),
            public_key: PathBuf::from("/keys/id.pub"),
            comment: "dockbench-alice".to_string(),
        }
    }

    fn local_transport(root: &std::path::Path) -> Transport {
        let ctx = test_context(
            root,
            Arc::new(ScriptedCommandRunner::new()),
            Arc::new(ScriptedPrompter::default()),
        );
        let ctx = AppContext::builder()
            .with_command_runner(Arc::new(DefaultCommandRunner))
            .with_prompter(ctx.prompter())
            .with_launcher_env(ctx.launcher_env())
            .with_launcher_config((*ctx.launcher_config()).clone())
            .build()
            .unwrap();
        Transport::new(&ctx, ExecutionTarget::local(keypair()))
    }

    #[test]
    fn test_path_join() {
        assert_eq!(path_join("/data/modelA", "./output"), "/data/modelA/output");
        assert_eq!(path_join("/data/modelA/", "output"), "/data/modelA/output");
        assert_eq!(path_join("", "output"), "output");
        assert_eq!(path_join("/data", ""), "/data");
    }

    #[tokio::test]
    async fn test_local_file_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let transport = local_transport(temp.path());
        let path = temp.path().join("nested/dir/file.txt");
        let path = path.to_string_lossy().to_string();

        assert_eq!(transport.read_file(&path).await.unwrap(), None);

        transport.write_file(&path, "key: value\n", 0o600).await.unwrap();
        assert_eq!(
            transport.read_file(&path).await.unwrap().as_deref(),
            Some("key: value\n")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn test_local_ensure_directory_reports_created_then_exists() {
        let temp = tempfile::TempDir::new().unwrap();
        let transport = local_transport(temp.path());
        let dir = temp.path().join("a b/c").to_string_lossy().to_string();

        assert_eq!(
            transport.ensure_directory(&dir).await.unwrap(),
            DirectoryStatus::Created
        );
        assert_eq!(
            transport.ensure_directory(&dir).await.unwrap(),
            DirectoryStatus::Exists
        );
    }

    #[tokio::test]
    async fn test_remote_commands_go_through_ssh() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .on("cat /data/sim_design.yaml", ProcessOutput::success("x: 1")),
        );
        let ctx = test_context(temp.path(), runner.clone(), Arc::new(ScriptedPrompter::default()));
        let transport =
            Transport::new(&ctx, ExecutionTarget::remote("compute01", "alice", keypair()));

        let content = transport.read_file("/data/sim_design.yaml").await.unwrap();
        assert_eq!(content.as_deref(), Some("x: 1"));

        let call = &runner.calls()[0];
        assert_eq!(call.program, "ssh");
        assert_eq!(call.timeout, Duration::from_secs(30));
        assert!(call.args.contains(&"alice@compute01".to_string()));
    }

    #[tokio::test]
    async fn test_remote_read_missing_and_failure() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(
            ScriptedCommandRunner::new()
                .on("/missing", ProcessOutput::failure(NOT_FOUND_STATUS, ""))
                .on("/denied", ProcessOutput::failure(255, "Permission denied (publickey)")),
        );
        let ctx = test_context(temp.path(), runner, Arc::new(ScriptedPrompter::default()));
        let transport =
            Transport::new(&ctx, ExecutionTarget::remote("compute01", "alice", keypair()));

        assert_eq!(transport.read_file("/missing").await.unwrap(), None);
        let err = transport.read_file("/denied").await.unwrap_err();
        assert!(err.to_string().contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let temp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(ScriptedCommandRunner::new().on_timeout("ssh"));
        let ctx = test_context(temp.path(), runner, Arc::new(ScriptedPrompter::default()));
        let transport =
            Transport::new(&ctx, ExecutionTarget::remote("compute01", "alice", keypair()));

        let err = transport.run("docker ps").await.unwrap_err();
        assert!(err.is_timeout());
    }
}
