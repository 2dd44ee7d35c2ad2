use crate::context::prompter::{Prompter, PushRecovery};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Prompter with canned answers that counts how often each question is asked.
pub struct ScriptedPrompter {
    pub password: Option<String>,
    pub confirm: bool,
    pub commit_message: Option<String>,
    pub selection: Option<usize>,
    push_recovery: Mutex<VecDeque<PushRecovery>>,
    pub password_prompts: AtomicUsize,
    pub confirm_prompts: AtomicUsize,
    pub commit_prompts: AtomicUsize,
    pub push_recovery_prompts: AtomicUsize,
}

impl Default for ScriptedPrompter {
    fn default() -> Self {
        Self {
            password: None,
            confirm: true,
            commit_message: None,
            selection: None,
            push_recovery: Mutex::new(VecDeque::new()),
            password_prompts: AtomicUsize::new(0),
            confirm_prompts: AtomicUsize::new(0),
            commit_prompts: AtomicUsize::new(0),
            push_recovery_prompts: AtomicUsize::new(0),
        }
    }
}

impl ScriptedPrompter {
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_commit_message(mut self, message: &str) -> Self {
        self.commit_message = Some(message.to_string());
        self
    }

    pub fn with_selection(mut self, index: usize) -> Self {
        self.selection = Some(index);
        self
    }

    /// Answers for successive push failures; `Skip` once exhausted.
    pub fn with_push_recovery(self, answers: Vec<PushRecovery>) -> Self {
        *self.push_recovery.lock().unwrap() = answers.into();
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Prompter for ScriptedPrompter {
    fn password(&self, _prompt: &str) -> Option<String> {
        self.password_prompts.fetch_add(1, Ordering::SeqCst);
        self.password.clone()
    }

    fn confirm(&self, _prompt: &str, _default: bool) -> bool {
        self.confirm_prompts.fetch_add(1, Ordering::SeqCst);
        self.confirm
    }

    fn commit_message(&self, _change_summary: &str) -> Option<String> {
        self.commit_prompts.fetch_add(1, Ordering::SeqCst);
        self.commit_message.clone()
    }

    fn select(&self, _prompt: &str, items: &[String]) -> Option<usize> {
        self.selection.filter(|index| *index < items.len())
    }

    fn push_recovery(&self, _failure: &str) -> PushRecovery {
        self.push_recovery_prompts.fetch_add(1, Ordering::SeqCst);
        self.push_recovery
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PushRecovery::Skip)
    }
}
