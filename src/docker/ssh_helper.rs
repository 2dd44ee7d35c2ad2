//! ssh wrapper for docker contexts with an `ssh://` endpoint.
//!
//! The docker CLI starts `ssh` from `PATH` for remote contexts and has no
//! option for identity files. Commands against a remote context therefore run
//! with the wrapper directory first on `PATH`; the wrapper prepends the
//! session's key options to its arguments and execs the real ssh.

use crate::context::SshOptions;
use crate::target::{ExecutionTarget, shell_join};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Shell-quoted options the wrapper puts in front of its own arguments
pub const SSH_OPTS_VAR: &str = "DOCKBENCH_SSH_OPTS";
/// ssh binary the wrapper hands over to
pub const REAL_SSH_VAR: &str = "DOCKBENCH_SSH";

const FALLBACK_SSH: &str = "/usr/bin/ssh";

const SCRIPT: &str = "#!/bin/sh\n\
eval \"set -- $DOCKBENCH_SSH_OPTS \\\"\\$@\\\"\"\n\
exec \"${DOCKBENCH_SSH:-/usr/bin/ssh}\" \"$@\"\n";

#[derive(Debug, Clone)]
pub struct SshHelper {
    dir: PathBuf,
}

impl SshHelper {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            dir: config_dir.join("ssh-helper"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the wrapper unless an identical one is already in place.
    pub fn install(&self) -> std::io::Result<()> {
        let path = self.dir.join("ssh");
        if std::fs::read_to_string(&path).is_ok_and(|existing| existing == SCRIPT) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, SCRIPT)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        }
        tracing::debug!("Installed ssh wrapper at {}", path.display());
        Ok(())
    }

    /// Environment for a docker command that may open ssh to `target`.
    pub fn env(&self, target: &ExecutionTarget, options: &SshOptions) -> Vec<(String, String)> {
        self.env_with_path(target, options, std::env::var_os("PATH"))
    }

    fn env_with_path(
        &self,
        target: &ExecutionTarget,
        options: &SshOptions,
        path: Option<OsString>,
    ) -> Vec<(String, String)> {
        let rest: Vec<PathBuf> = path
            .as_deref()
            .map(|path| {
                std::env::split_paths(path)
                    .filter(|dir| dir != &self.dir)
                    .collect()
            })
            .unwrap_or_default();

        let real_ssh = rest
            .iter()
            .map(|dir| dir.join("ssh"))
            .find(|candidate| candidate.is_file())
            .map(|candidate| candidate.to_string_lossy().to_string())
            .unwrap_or_else(|| FALLBACK_SSH.to_string());

        let dirs = std::iter::once(self.dir.clone()).chain(rest);
        let joined = match std::env::join_paths(dirs) {
            Ok(joined) => joined.to_string_lossy().to_string(),
            Err(err) => {
                tracing::warn!("Could not build PATH for the ssh wrapper: {err}");
                self.dir.to_string_lossy().to_string()
            }
        };

        vec![
            ("PATH".to_string(), joined),
            (REAL_SSH_VAR.to_string(), real_ssh),
            (
                SSH_OPTS_VAR.to_string(),
                shell_join(target.key_auth_options(options)),
            ),
        ]
    }
}
