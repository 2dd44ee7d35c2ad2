use crate::context::command_runner::{CommandError, CommandRunner, CommandSpec, ProcessOutput};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone)]
enum Scripted {
    Output(ProcessOutput),
    Timeout,
}

struct Rule {
    pattern: String,
    responses: VecDeque<Scripted>,
}

/// Command runner that answers from a script instead of spawning processes.
///
/// Rules match when their pattern is a substring of the full command line
/// (program, arguments and any shell text passed as an argument). The first
/// matching rule in registration order answers. A rule with several responses
/// hands them out in order and then keeps repeating the last one. Unmatched
/// commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedCommandRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pattern: &str, output: ProcessOutput) -> Self {
        self.on_sequence(pattern, vec![output])
    }

    pub fn on_sequence(self, pattern: &str, outputs: Vec<ProcessOutput>) -> Self {
        self.push_rule(pattern, outputs.into_iter().map(Scripted::Output).collect());
        self
    }

    pub fn on_timeout(self, pattern: &str) -> Self {
        self.push_rule(pattern, VecDeque::from([Scripted::Timeout]));
        self
    }

    /// Register a rule on an already shared runner.
    pub fn add(&self, pattern: &str, output: ProcessOutput) {
        self.push_rule(pattern, VecDeque::from([Scripted::Output(output)]));
    }

    fn push_rule(&self, pattern: &str, responses: VecDeque<Scripted>) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses,
        });
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(CommandSpec::command_line).collect()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|spec| spec.command_line().contains(pattern))
            .collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls_matching(pattern).len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, spec: CommandSpec) -> Result<ProcessOutput, CommandError> {
        let line = spec.command_line();
        self.calls.lock().unwrap().push(spec.clone());

        let scripted = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|rule| line.contains(&rule.pattern))
                .map(|rule| {
                    if rule.responses.len() > 1 {
                        rule.responses.pop_front()
                    } else {
                        rule.responses.front().cloned()
                    }
                })
        };

        match scripted.flatten() {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Timeout) => Err(CommandError::TimedOut {
                program: spec.program,
                after: Duration::from_secs(0),
            }),
            None => Ok(ProcessOutput::success("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_response() {
        let runner = ScriptedCommandRunner::new().on_sequence(
            "ssh",
            vec![ProcessOutput::failure(255, "denied"), ProcessOutput::success("ok")],
        );

        let first = runner.run(CommandSpec::new("ssh")).await.unwrap();
        let second = runner.run(CommandSpec::new("ssh")).await.unwrap();
        let third = runner.run(CommandSpec::new("ssh")).await.unwrap();

        assert_eq!(first.exit_code, 255);
        assert_eq!(second.stdout, "ok");
        assert_eq!(third.stdout, "ok");
        assert_eq!(runner.count("ssh"), 3);
    }

    #[tokio::test]
    async fn test_unmatched_command_succeeds_and_timeout_rule_errors() {
        let runner = ScriptedCommandRunner::new().on_timeout("sleep");

        let output = runner.run(CommandSpec::new("echo")).await.unwrap();
        assert!(output.is_success());

        let err = runner.run(CommandSpec::new("sleep").arg("9")).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
