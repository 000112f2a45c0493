//! External process execution.
//!
//! Every shell-out goes through [`CommandRunner`] so command handlers can be
//! tested against a mock. [`SystemRunner`] is the tokio-backed
//! implementation used by the binary.
use async_trait::async_trait;
use log::*;
use serde::de::DeserializeOwned;
use std::{fmt, io::ErrorKind, path::PathBuf, process::Stdio, time::Instant};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
};

use crate::error::{CephtoolsError, Result};

const REDACTED: &str = "***";

/// A program invocation. Builder methods take and return `self`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<String>,
    /// Stream stdout/stderr to the terminal instead of capturing them.
    pub passthrough: bool,
    /// Skip the `+ <command>` echo.
    pub quiet: bool,
    redacted: Vec<usize>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Argument masked when the command is displayed.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.redacted.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_words::quote(&self.program))?;
        for (i, arg) in self.args.iter().enumerate() {
            if self.redacted.contains(&i) {
                write!(f, " {REDACTED}")?;
            } else {
                write!(f, " {}", shell_words::quote(arg))?;
            }
        }
        Ok(())
    }
}

/// Result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Successful output with the given stdout. Handy in tests.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external programs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `cmd` to completion. A non-zero exit is not an error here.
    async fn run(&self, cmd: Cmd) -> Result<CommandOutput>;
}

/// Checked helpers on top of [`CommandRunner::run`].
#[async_trait]
pub trait CommandRunnerExt {
    /// Runs `cmd`, turning a non-zero exit into
    /// [`CephtoolsError::CommandFailed`].
    async fn run_checked(&self, cmd: Cmd) -> Result<CommandOutput>;

    /// Runs `cmd` checked and returns its stdout.
    async fn stdout(&self, cmd: Cmd) -> Result<String>;

    /// Runs `cmd` checked and decodes its stdout as JSON.
    async fn json<T: DeserializeOwned>(&self, cmd: Cmd) -> Result<T>;
}

#[async_trait]
impl<R: CommandRunner + ?Sized> CommandRunnerExt for R {
    async fn run_checked(&self, cmd: Cmd) -> Result<CommandOutput> {
        let command = cmd.to_string();
        let output = self.run(cmd).await?;
        check_output(command, output)
    }

    async fn stdout(&self, cmd: Cmd) -> Result<String> {
        Ok(self.run_checked(cmd).await?.stdout)
    }

    async fn json<T: DeserializeOwned>(&self, cmd: Cmd) -> Result<T> {
        let command = cmd.to_string();
        let stdout = self.stdout(cmd).await?;
        let raw = if stdout.trim().is_empty() {
            "null"
        } else {
            stdout.as_str()
        };

        serde_json::from_str(raw).map_err(|e| {
            CephtoolsError::from(e)
                .context(format!("failed to decode output of `{command}`"))
        })
    }
}

/// Maps a non-zero exit to [`CephtoolsError::CommandFailed`].
pub fn check_output(
    command: impl Into<String>,
    output: CommandOutput,
) -> Result<CommandOutput> {
    if output.success() {
        return Ok(output);
    }

    Err(CephtoolsError::CommandFailed {
        command: command.into(),
        code: output.code,
        stderr: output.stderr,
    })
}

/// Runs commands on the local host with tokio.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(cmd: &Cmd) -> Command {
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).kill_on_drop(true);
        if let Some(dir) = &cmd.cwd {
            command.current_dir(dir);
        }
        command
    }

    fn spawn_error(cmd: &Cmd, err: std::io::Error) -> CephtoolsError {
        if err.kind() == ErrorKind::NotFound {
            CephtoolsError::CommandNotFound {
                program: cmd.program.clone(),
            }
        } else {
            CephtoolsError::from(err)
                .context(format!("failed to exec `{cmd}`"))
        }
    }

    fn echo(cmd: &Cmd) {
        if !cmd.quiet {
            println!("+ {cmd}");
        }
    }

    /// Runs `cmd` and feeds each stdout line to `on_line` until it returns
    /// `true`. The process is then stopped. Returns whether a line matched.
    ///
    /// Stderr is passed through to the terminal.
    pub async fn stream_lines<F>(&self, cmd: &Cmd, mut on_line: F) -> Result<bool>
    where
        F: FnMut(&str) -> bool,
    {
        Self::echo(cmd);

        let mut child = Self::command(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Self::spawn_error(cmd, e))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "failed to capture output of `{cmd}`"
            ))
        })?;

        let mut lines = BufReader::new(stdout).lines();
        let mut matched = false;

        while let Some(line) = lines.next_line().await? {
            if on_line(&line) {
                matched = true;
                break;
            }
        }

        if child.try_wait()?.is_none() {
            debug!("stopping `{cmd}`");
            child.start_kill()?;
        }

        let status = child.wait().await?;
        debug!("`{cmd}` exited with {status}");

        Ok(matched)
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: Cmd) -> Result<CommandOutput> {
        Self::echo(&cmd);

        let mut command = Self::command(&cmd);

        if cmd.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else if cmd.passthrough {
            command.stdin(Stdio::inherit());
        } else {
            command.stdin(Stdio::null());
        }

        if cmd.passthrough {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        debug!("running: {cmd}");
        let start = Instant::now();

        let mut child =
            command.spawn().map_err(|e| Self::spawn_error(&cmd, e))?;

        if let Some(input) = &cmd.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin.write_all(input.as_bytes()).await?;
            // closing stdin signals EOF to the child
            drop(stdin);
        }

        let output = child.wait_with_output().await?;

        debug!(
            "process exited with {} ({:?})",
            output.status,
            start.elapsed()
        );

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[test]
    fn display_quotes_arguments() {
        let cmd = Cmd::new("juju")
            .args(["ssh", "-m", "cephtools", "0"])
            .arg("echo hello world");

        assert_eq!(
            cmd.to_string(),
            "juju ssh -m cephtools 0 'echo hello world'"
        );
    }

    #[test]
    fn display_masks_secret_arguments() {
        let cmd = Cmd::new("maas")
            .args(["login", "admin", "http://10.0.0.2:5240/MAAS"])
            .secret_arg("key:with:parts");

        assert_eq!(
            cmd.to_string(),
            "maas login admin http://10.0.0.2:5240/MAAS ***"
        );
        assert_eq!(cmd.args[3], "key:with:parts");
    }

    #[tokio::test]
    async fn run_checked_maps_failures() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq(Cmd::new("snap").arg("list")))
            .times(1)
            .returning(|_| Ok(CommandOutput::failed(2, "boom\n")));

        let err = runner
            .run_checked(Cmd::new("snap").arg("list"))
            .await
            .unwrap_err();

        match err {
            CephtoolsError::CommandFailed {
                command,
                code,
                stderr,
            } => {
                assert_eq!(command, "snap list");
                assert_eq!(code, 2);
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn json_decodes_stdout() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::ok(r#"{"api_status":"stable"}"#)));

        let value: serde_json::Value =
            runner.json(Cmd::new("lxc").args(["query", "/1.0"])).await.unwrap();

        assert_eq!(value["api_status"], "stable");
    }

    #[tokio::test]
    async fn json_reports_decode_errors_with_command() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::ok("not json")));

        let err = runner
            .json::<serde_json::Value>(Cmd::new("maas").args(["admin", "tags", "read"]))
            .await
            .unwrap_err();

        assert!(
            err.to_string()
                .starts_with("failed to decode output of `maas admin tags read`")
        );
    }

    #[tokio::test]
    async fn system_runner_captures_output() {
        let output = SystemRunner
            .run(Cmd::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]).quiet())
            .await
            .unwrap();

        assert_eq!(output.code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn system_runner_feeds_stdin() {
        let output = SystemRunner
            .run(Cmd::new("cat").stdin("set -e\necho hi\n").quiet())
            .await
            .unwrap();

        assert_eq!(output.stdout, "set -e\necho hi\n");
    }

    #[tokio::test]
    async fn system_runner_reports_missing_program() {
        let err = SystemRunner
            .run(Cmd::new("cephtools-definitely-missing").quiet())
            .await
            .unwrap_err();

        assert!(matches!(err, CephtoolsError::CommandNotFound { .. }));
        assert_eq!(err.exit_code(), 127);
    }

    #[tokio::test]
    async fn stream_lines_stops_at_match() {
        let cmd = Cmd::new("sh")
            .args(["-c", "echo one; echo two; sleep 30; echo three"])
            .quiet();
        let mut seen = vec![];

        let matched = SystemRunner
            .stream_lines(&cmd, |line| {
                seen.push(line.to_string());
                line == "two"
            })
            .await
            .unwrap();

        assert!(matched);
        assert_eq!(seen, vec!["one", "two"]);
    }
}
