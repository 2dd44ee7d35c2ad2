pub mod command_runner;
pub mod launcher_config;
pub mod launcher_env;
pub mod notifications;
pub mod prompter;

use command_runner::CommandRunner;
use launcher_config::LauncherConfig;
use launcher_env::LauncherEnv;
use notifications::NotificationClient;
use prompter::Prompter;

use std::sync::Arc;

pub use launcher_config::{DockerOptions, MountSpec, RemoteHost, SessionOptions, SshOptions};

/// Collaborators shared by every orchestration step.
#[derive(Clone)]
pub struct AppContext {
    command_runner: Arc<dyn CommandRunner>,
    prompter: Arc<dyn Prompter>,
    notification_client: Arc<NotificationClient>,
    launcher_env: Arc<LauncherEnv>,
    launcher_config: Arc<LauncherConfig>,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    pub fn command_runner(&self) -> Arc<dyn CommandRunner> {
        Arc::clone(&self.command_runner)
    }

    pub fn prompter(&self) -> Arc<dyn Prompter> {
        Arc::clone(&self.prompter)
    }

    pub fn notification_client(&self) -> Arc<NotificationClient> {
        Arc::clone(&self.notification_client)
    }

    pub fn launcher_env(&self) -> Arc<LauncherEnv> {
        Arc::clone(&self.launcher_env)
    }

    pub fn launcher_config(&self) -> Arc<LauncherConfig> {
        Arc::clone(&self.launcher_config)
    }
}

pub struct AppContextBuilder {
    command_runner: Option<Arc<dyn CommandRunner>>,
    prompter: Option<Arc<dyn Prompter>>,
    notification_client: Option<Arc<NotificationClient>>,
    launcher_env: Option<Arc<LauncherEnv>>,
    launcher_config: Option<Arc<LauncherConfig>>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self {
            command_runner: None,
            prompter: None,
            notification_client: None,
            launcher_env: None,
            launcher_config: None,
        }
    }

    pub fn with_command_runner(mut self, command_runner: Arc<dyn CommandRunner>) -> Self {
        self.command_runner = Some(command_runner);
        self
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    pub fn with_notification_client(mut self, client: Arc<NotificationClient>) -> Self {
        self.notification_client = Some(client);
        self
    }

    pub fn with_launcher_env(mut self, launcher_env: Arc<LauncherEnv>) -> Self {
        self.launcher_env = Some(launcher_env);
        self
    }

    pub fn with_launcher_config(mut self, launcher_config: LauncherConfig) -> Self {
        self.launcher_config = Some(Arc::new(launcher_config));
        self
    }

    pub fn build(self) -> Result<AppContext, launcher_env::LauncherEnvError> {
        let launcher_env = match self.launcher_env {
            Some(env) => env,
            None => {
                let env = LauncherEnv::new()?;
                env.ensure_directories()?;
                Arc::new(env)
            }
        };

        let launcher_config = self
            .launcher_config
            .unwrap_or_else(|| Arc::new(launcher_config::load_config(launcher_env.config_dir())));

        Ok(AppContext {
            command_runner: self
                .command_runner
                .unwrap_or_else(|| Arc::new(command_runner::DefaultCommandRunner)),
            prompter: self
                .prompter
                .unwrap_or_else(|| Arc::new(prompter::DialoguerPrompter::new())),
            notification_client: self
                .notification_client
                .unwrap_or_else(notifications::create_notification_client),
            launcher_env,
            launcher_config,
        })
    }
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
