//! Execution targets and the SSH invocation details that go with them.

use crate::context::SshOptions;
use crate::context::command_runner::CommandSpec;
use crate::context::launcher_env::LauncherEnv;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Local,
    Remote,
}

/// How the remote account is authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    Key,
    /// Key installed but never verified; remote calls go through sshpass.
    Password(String),
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Key => write!(f, "Key"),
            AuthMode::Password(_) => write!(f, "Password(***)"),
        }
    }
}

/// Per-user launcher keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keypair {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    pub comment: String,
}

impl Keypair {
    pub fn for_user(env: &LauncherEnv, key_name: &str, user: &str) -> Self {
        let private_key = env.key_path(key_name, user);
        let mut public_key = private_key.clone().into_os_string();
        public_key.push(".pub");
        Self {
            private_key,
            public_key: PathBuf::from(public_key),
            comment: format!("dockbench-{user}"),
        }
    }

    pub fn file_name(&self) -> String {
        self.private_key
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "id_ed25519".to_string())
    }

    pub fn exists(&self) -> bool {
        self.public_key.exists() && self.private_key.exists()
    }
}

/// Where Docker commands run. Chosen once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTarget {
    pub kind: TargetKind,
    /// Host name, address, or SSH alias; `localhost` for local targets
    pub host: String,
    pub user: Option<String>,
    pub keypair: Keypair,
    pub auth: AuthMode,
}

impl ExecutionTarget {
    pub fn local(keypair: Keypair) -> Self {
        Self {
            kind: TargetKind::Local,
            host: "localhost".to_string(),
            user: None,
            keypair,
            auth: AuthMode::Key,
        }
    }

    pub fn remote(host: &str, user: &str, keypair: Keypair) -> Self {
        Self {
            kind: TargetKind::Remote,
            host: host.to_string(),
            user: Some(user.to_string()),
            keypair,
            auth: AuthMode::Key,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.kind == TargetKind::Remote
    }

    /// Same target, but remote calls authenticate with the given password.
    pub fn with_password_fallback(&self, password: &str) -> Self {
        Self {
            auth: AuthMode::Password(password.to_string()),
            ..self.clone()
        }
    }

    pub fn uses_password(&self) -> bool {
        matches!(self.auth, AuthMode::Password(_))
    }

    /// `user@host`, or just the host when no user is set
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Options shared by every key-based ssh call.
    pub fn key_auth_options(&self, options: &SshOptions) -> Vec<String> {
        let mut args = common_options(options);
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-i".to_string(),
            self.keypair.private_key.to_string_lossy().to_string(),
        ]);
        args
    }

    /// Options for password-authenticated ssh calls.
    pub fn password_auth_options(options: &SshOptions) -> Vec<String> {
        let mut args = common_options(options);
        args.extend([
            "-o".to_string(),
            "PreferredAuthentications=password,keyboard-interactive".to_string(),
            "-o".to_string(),
            "PubkeyAuthentication=no".to_string(),
        ]);
        args
    }

    /// Command spec that runs `remote_command` on this target over ssh,
    /// authenticating the way the target is configured to.
    pub fn ssh_spec(&self, options: &SshOptions, remote_command: &str) -> CommandSpec {
        match &self.auth {
            AuthMode::Key => CommandSpec::new("ssh")
                .args(self.key_auth_options(options))
                .arg(self.destination())
                .arg(remote_command),
            AuthMode::Password(password) => CommandSpec::new("sshpass")
                .arg("-e")
                .arg("ssh")
                .args(Self::password_auth_options(options))
                .arg(self.destination())
                .arg(remote_command)
                .env("SSHPASS", password.clone()),
        }
    }

    /// `GIT_SSH_COMMAND` value that pins git to the given key file.
    pub fn git_ssh_command(key_path: &str) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking=accept-new",
            shell_quote(key_path)
        )
    }
}

fn common_options(options: &SshOptions) -> Vec<String> {
    vec![
        "-o".to_string(),
        format!("ConnectTimeout={}", options.connect_timeout_secs),
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
    ]
}

/// Quote a string for POSIX sh, leaving plain words untouched.
pub fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Join already-quoted words into one shell command line.
pub fn shell_join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|word| shell_quote(word.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Render a path with forward slashes whatever the host OS.
pub fn display_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
