use super::DockerError;
use super::ssh_helper::SshHelper;
use crate::context::AppContext;
use crate::context::command_runner::{CommandRunner, CommandSpec, ProcessOutput};
use crate::target::shell_join;
use crate::transport::Transport;
use bollard::models::{ContainerState, PortMap};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How docker commands reach the engine of the execution target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerInvocation {
    /// `docker --context NAME ...` on this machine
    Context(String),
    /// `docker ...` executed on the target through ssh
    DirectSsh,
}

/// Docker CLI bound to one execution target.
#[derive(Clone)]
pub struct DockerCli {
    runner: Arc<dyn CommandRunner>,
    transport: Transport,
    invocation: DockerInvocation,
    timeout: Duration,
    /// Set on context commands against a remote engine so the docker CLI's
    /// own ssh connection uses the session key
    env: Vec<(String, String)>,
}

impl DockerCli {
    pub fn new(ctx: &AppContext, transport: Transport, invocation: DockerInvocation) -> Self {
        let target = transport.target();
        let env = match invocation {
            DockerInvocation::Context(_) if target.is_remote() => {
                SshHelper::new(ctx.launcher_env().config_dir())
                    .env(target, &ctx.launcher_config().ssh)
            }
            _ => Vec::new(),
        };
        Self {
            runner: ctx.command_runner(),
            transport,
            invocation,
            timeout: ctx.launcher_config().ssh.command_timeout(),
            env,
        }
    }

    pub fn invocation(&self) -> &DockerInvocation {
        &self.invocation
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn spec(&self, args: Vec<String>) -> CommandSpec {
        match &self.invocation {
            DockerInvocation::Context(name) => self
                .env
                .iter()
                .fold(CommandSpec::new("docker"), |spec, (key, value)| {
                    spec.env(key.clone(), value.clone())
                })
                .arg("--context")
                .arg(name.clone())
                .args(args)
                .timeout(self.timeout),
            DockerInvocation::DirectSsh => self.on_target_spec(args),
        }
    }

    /// Spec that runs docker on the target host itself, whatever the
    /// invocation mode. Used where paths must exist where the CLI runs
    /// (image builds).
    pub fn on_target_spec(&self, args: Vec<String>) -> CommandSpec {
        let command = shell_join(std::iter::once("docker".to_string()).chain(args));
        self.transport.spec(&command).timeout(self.timeout)
    }

    pub async fn run(&self, args: Vec<String>) -> Result<ProcessOutput, DockerError> {
        self.execute(self.spec(args)).await
    }

    pub async fn run_with_timeout(
        &self,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<ProcessOutput, DockerError> {
        self.execute(self.spec(args).timeout(timeout)).await
    }

    pub async fn execute(&self, spec: CommandSpec) -> Result<ProcessOutput, DockerError> {
        tracing::debug!("{}", spec.command_line());
        Ok(self.runner.run(spec).await?)
    }

    /// Stdout of a docker command, or its output as the error detail.
    pub async fn output(&self, operation: &str, args: Vec<String>) -> Result<String, DockerError> {
        let output = self.run(args).await?;
        checked(operation, output)
    }

    /// Inspect containers by name or id. Unknown names are left out.
    pub async fn inspect(&self, names: &[String]) -> Result<Vec<ContainerInfo>, DockerError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = args(["inspect", "--type", "container"]);
        args.extend(names.iter().cloned());
        let output = self.run(args).await?;

        // docker inspect exits non-zero if any name is unknown but still
        // prints the ones it found
        if output.stdout.trim().is_empty() {
            if output.is_success() || output.stderr.contains("No such") {
                return Ok(Vec::new());
            }
            return Err(DockerError::Command {
                operation: "inspect".to_string(),
                detail: output.detail(),
            });
        }
        parse_inspect(&output.stdout)
    }

    pub async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>, DockerError> {
        Ok(self
            .inspect(&[name.to_string()])
            .await?
            .into_iter()
            .find(|info| info.name == name))
    }
}

pub fn checked(operation: &str, output: ProcessOutput) -> Result<String, DockerError> {
    if output.is_success() {
        Ok(output.stdout)
    } else {
        Err(DockerError::Command {
            operation: operation.to_string(),
            detail: output.detail(),
        })
    }
}

/// Owned argument list from string literals.
pub fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// The parts of `docker inspect` output the launcher relies on.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    pub ports: PortMap,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state.running.unwrap_or(false)
    }

    /// Host ports published for `internal_port/tcp`.
    pub fn host_ports_for(&self, internal_port: u16) -> Vec<u16> {
        self.ports
            .get(&format!("{internal_port}/tcp"))
            .and_then(|bindings| bindings.as_ref())
            .map(|bindings| {
                bindings
                    .iter()
                    .filter_map(|binding| binding.host_port.as_deref())
                    .filter_map(|port| port.parse().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn from_value(value: &Value) -> Option<Self> {
        let id = value.get("Id")?.as_str()?.to_string();
        let name = value
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string();

        let raw_state = value.get("State").cloned().unwrap_or(Value::Null);
        let state = serde_json::from_value(raw_state.clone()).unwrap_or_else(|_| ContainerState {
            running: raw_state.get("Running").and_then(Value::as_bool),
            ..Default::default()
        });

        let labels = value
            .pointer("/Config/Labels")
            .cloned()
            .and_then(|labels| serde_json::from_value(labels).ok())
            .unwrap_or_default();
        let ports = value
            .pointer("/NetworkSettings/Ports")
            .cloned()
            .and_then(|ports| serde_json::from_value(ports).ok())
            .unwrap_or_default();

        Some(Self {
            id,
            name,
            state,
            labels,
            ports,
        })
    }
}

pub fn parse_inspect(stdout: &str) -> Result<Vec<ContainerInfo>, DockerError> {
    let values: Vec<Value> =
        serde_json::from_str(stdout).map_err(|e| DockerError::Parse(e.to_string()))?;
    Ok(values.iter().filter_map(ContainerInfo::from_value).collect())
}
