//! Scripted command runner for tests
//!
//! Records every command and answers from canned responses matched by
//! substring of the rendered command line. `crontab -l` / `crontab -` are
//! served from an in-memory crontab.

use async_trait::async_trait;
use deckhand_core::{DeployError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::process::{BackgroundTask, CommandOutput, CommandRunner, CommandSpec};

struct Rule {
    pattern: String,
    queued: VecDeque<Result<CommandOutput>>,
    last: Result<CommandOutput>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<CommandSpec>,
    rules: Vec<Rule>,
    crontab: Option<String>,
}

#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every matching command with `output`
    pub fn on(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.on_seq(pattern, vec![output])
    }

    /// Answers matching commands with `outputs` in order; the last one repeats
    pub fn on_seq(&self, pattern: &str, outputs: Vec<CommandOutput>) -> &Self {
        let mut queued: VecDeque<Result<CommandOutput>> = outputs.into_iter().map(Ok).collect();
        let last = queued.pop_back().unwrap_or_else(|| Ok(CommandOutput::ok("")));
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            queued,
            last,
        });
        self
    }

    /// Fails every matching command with `error`
    pub fn on_error(&self, pattern: &str, error: DeployError) -> &Self {
        self.state.lock().unwrap().rules.push(Rule {
            pattern: pattern.to_string(),
            queued: VecDeque::new(),
            last: Err(error),
        });
        self
    }

    pub fn set_crontab(&self, content: &str) {
        self.state.lock().unwrap().crontab = Some(content.to_string());
    }

    pub fn crontab(&self) -> Option<String> {
        self.state.lock().unwrap().crontab.clone()
    }

    /// Rendered command lines, in call order
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(CommandSpec::display)
            .collect()
    }

    /// Full specs, in call order
    pub fn specs(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    fn respond(&self, spec: CommandSpec) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        let line = spec.display();
        state.calls.push(spec.clone());

        if let Some(rule) = state
            .rules
            .iter_mut()
            .rev()
            .find(|rule| line.contains(&rule.pattern))
        {
            return rule.queued.pop_front().unwrap_or_else(|| rule.last.clone());
        }

        if spec.program == "crontab" {
            if spec.args.iter().any(|a| a == "-l") {
                return Ok(match &state.crontab {
                    Some(content) => CommandOutput::ok(content.clone()),
                    None => CommandOutput::failed(1, "no crontab for root"),
                });
            }
            if spec.args.last().map(String::as_str) == Some("-") {
                state.crontab = spec.stdin.clone();
                return Ok(CommandOutput::ok(""));
            }
        }

        Ok(CommandOutput::ok(""))
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput> {
        self.respond(spec)
    }

    fn spawn_background(&self, spec: CommandSpec) -> BackgroundTask {
        let label = spec.display();
        let result = self.respond(spec);
        BackgroundTask::spawn(label, async move { result })
    }
}
