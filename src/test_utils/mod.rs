//! Test utilities.
//!
//! This module provides scripted doubles and fixtures for:
//! - Subprocess execution (ScriptedCommandRunner)
//! - User prompts (ScriptedPrompter)
//! - Git repositories on disk (TestGitRepository)
//! - Launcher environment and context wiring (test_env, test_context)

pub mod command_runners;
pub mod git_test_utils;
pub mod prompters;

pub use command_runners::ScriptedCommandRunner;
pub use git_test_utils::TestGitRepository;
pub use prompters::ScriptedPrompter;

use crate::context::AppContext;
use crate::context::launcher_config::LauncherConfig;
use crate::context::launcher_env::LauncherEnv;
use std::path::Path;
use std::sync::Arc;

/// Launcher environment rooted in a temporary directory.
pub fn test_env(root: &Path, user: &str) -> LauncherEnv {
    LauncherEnv::builder()
        .with_config_dir(root.join("config"))
        .with_ssh_dir(root.join("ssh"))
        .with_user(user)
        .with_editor("true")
        .build()
        .expect("test env")
}

/// Context wired to scripted doubles, with fast timings for tests.
pub fn test_context(
    root: &Path,
    runner: Arc<ScriptedCommandRunner>,
    prompter: Arc<ScriptedPrompter>,
) -> AppContext {
    let mut config = LauncherConfig::default();
    config.docker.startup_grace_secs = 0;
    config.docker.uid = 1000;
    config.docker.gid = 1000;
    config.ssh.verify_backoff_ms = 1;

    AppContext::builder()
        .with_command_runner(runner)
        .with_prompter(prompter)
        .with_launcher_env(Arc::new(test_env(root, "alice")))
        .with_launcher_config(config)
        .build()
        .expect("test context")
}
