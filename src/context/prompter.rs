use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, Password, Select};
use is_terminal::IsTerminal;

/// What the user wants after a failed push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRecovery {
    Retry,
    OpenEditor,
    Skip,
}

/// Trait for every question the orchestration asks the user.
///
/// A `None`/`false` answer always means the user backed out; callers turn it
/// into a clean abort of the current operation.
pub trait Prompter: Send + Sync {
    /// Ask for the remote account password once. Empty input cancels.
    fn password(&self, prompt: &str) -> Option<String>;

    fn confirm(&self, prompt: &str, default: bool) -> bool;

    /// Ask for a commit message after showing what changed. Empty input cancels.
    fn commit_message(&self, change_summary: &str) -> Option<String>;

    fn select(&self, prompt: &str, items: &[String]) -> Option<usize>;

    fn push_recovery(&self, failure: &str) -> PushRecovery;
}

/// Terminal prompts backed by dialoguer.
pub struct DialoguerPrompter {
    interactive: bool,
}

impl DialoguerPrompter {
    pub fn new() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
        }
    }

    fn theme() -> ColorfulTheme {
        ColorfulTheme::default()
    }
}

impl Default for DialoguerPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for DialoguerPrompter {
    fn password(&self, prompt: &str) -> Option<String> {
        if !self.interactive {
            tracing::warn!("No terminal available to ask for a password");
            return None;
        }
        Password::with_theme(&Self::theme())
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .ok()
            .filter(|password| !password.is_empty())
    }

    fn confirm(&self, prompt: &str, default: bool) -> bool {
        if !self.interactive {
            return default;
        }
        Confirm::with_theme(&Self::theme())
            .with_prompt(prompt)
            .default(default)
            .interact_opt()
            .ok()
            .flatten()
            .unwrap_or(false)
    }

    fn commit_message(&self, change_summary: &str) -> Option<String> {
        if !self.interactive {
            return None;
        }
        println!("{change_summary}");
        Input::<String>::with_theme(&Self::theme())
            .with_prompt("Commit message (empty to skip)")
            .allow_empty(true)
            .interact_text()
            .ok()
            .map(|message| message.trim().to_string())
            .filter(|message| !message.is_empty())
    }

    fn select(&self, prompt: &str, items: &[String]) -> Option<usize> {
        if !self.interactive || items.is_empty() {
            return None;
        }
        Select::with_theme(&Self::theme())
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact_opt()
            .ok()
            .flatten()
    }

    fn push_recovery(&self, failure: &str) -> PushRecovery {
        if !self.interactive {
            return PushRecovery::Skip;
        }
        eprintln!("{failure}");
        let options = [
            "Retry the push",
            "Open the repository in an editor",
            "Skip pushing for now",
        ];
        let choice = Select::with_theme(&Self::theme())
            .with_prompt("Push failed")
            .items(&options)
            .default(0)
            .interact_opt()
            .ok()
            .flatten();

        match choice {
            Some(0) => PushRecovery::Retry,
            Some(1) => PushRecovery::OpenEditor,
            _ => PushRecovery::Skip,
        }
    }
}
