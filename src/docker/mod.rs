//! Docker engine access through the docker CLI.
//!
//! - `context`: client context selection and reachability probing
//! - `cli`: command construction for context or direct-SSH invocation
//! - `container`: session container lifecycle and port allocation
//! - `sync`: managed volume population and sync-back
//! - `ssh_helper`: ssh wrapper carrying the session key for remote contexts

pub mod cli;
pub mod container;
pub mod context;
pub mod ssh_helper;
pub mod sync;

use crate::context::command_runner::CommandError;
use crate::transport::TransportError;
use thiserror::Error;

pub use cli::{ContainerInfo, DockerCli, DockerInvocation};
pub use container::{ContainerManager, ImageStatus, StartRequest, StopReport};
pub use context::{ContextHandle, DockerContext, DockerContextManager};
pub use sync::{SyncEngine, SyncError, SyncReport};

#[derive(Debug, Error)]
pub enum DockerError {
    /// The docker CLI ran and failed; `detail` is its own output
    #[error("docker {operation} failed: {detail}")]
    Command { operation: String, detail: String },
    #[error(transparent)]
    Process(#[from] CommandError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Docker engine on {host} is not reachable: {detail}")]
    EngineUnreachable { host: String, detail: String },
    #[error("Dockerfile not found at {0}")]
    DockerfileMissing(String),
    #[error("Port {0} is already used by a running session")]
    PortInUse(u16),
    #[error("No free port between {0} and 65535")]
    NoFreePort(u16),
    #[error("Container {0} is already running")]
    AlreadyRunning(String),
    #[error("Container {name} exited during startup:\n{logs}")]
    EarlyExit { name: String, logs: String },
    #[error("Could not parse docker output: {0}")]
    Parse(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Could not install the ssh wrapper for docker: {0}")]
    SshHelper(#[source] std::io::Error),
}

impl DockerError {
    pub fn is_timeout(&self) -> bool {
        match self {
            DockerError::Process(err) => err.is_timeout(),
            DockerError::Transport(err) => err.is_timeout(),
            _ => false,
        }
    }
}
