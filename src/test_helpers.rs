//! Common test helper functions shared across test modules.
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Mutex;

use crate::{
    error::Result,
    exec::{Cmd, CommandOutput, CommandRunner},
    forge::request::{PullRequest, PullRequestBuilder},
};

/// Midday UTC on the given day of August 2025.
pub fn august(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 8, day, 12, 0, 0).unwrap()
}

/// Creates a closed pull request touching `files`.
pub fn create_test_pull_request(
    number: u64,
    closed_at: DateTime<Utc>,
    files: &[&str],
) -> PullRequest {
    PullRequestBuilder::default()
        .number(number)
        .title(format!("Change #{number}"))
        .url(format!("https://github.com/canonical/charms/pull/{number}"))
        .closed_at(closed_at)
        .files(files.iter().map(|f| f.to_string()).collect::<Vec<_>>())
        .build()
        .unwrap()
}

struct Response {
    prefix: String,
    output: CommandOutput,
    once: bool,
}

/// Command runner answering from a script of `(command prefix, output)`
/// pairs. Commands are matched as program and arguments joined by single
/// spaces, without shell quoting. The first matching entry wins; `once`
/// entries are dropped after use. Unscripted commands panic so tests notice unexpected calls.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Mutex<Vec<Response>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every command starting with `prefix`.
    pub fn on(self, prefix: &str, output: CommandOutput) -> Self {
        self.push(prefix, output, false)
    }

    /// Answers the next command starting with `prefix` once.
    pub fn once(self, prefix: &str, output: CommandOutput) -> Self {
        self.push(prefix, output, true)
    }

    fn push(self, prefix: &str, output: CommandOutput, once: bool) -> Self {
        self.responses.lock().unwrap().push(Response {
            prefix: prefix.into(),
            output,
            once,
        });
        self
    }

    /// Every command line run so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Whether a command starting with `prefix` ran.
    pub fn ran(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
        let line = std::iter::once(cmd.program.as_str())
            .chain(cmd.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().unwrap().push(line.clone());

        let mut responses = self.responses.lock().unwrap();
        let index = responses
            .iter()
            .position(|r| line.starts_with(&r.prefix))
            .unwrap_or_else(|| panic!("unexpected command: {line}"));

        if responses[index].once {
            Ok(responses.remove(index).output)
        } else {
            Ok(responses[index].output.clone())
        }
    }
}
