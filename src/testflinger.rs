//! Testflinger machine reservations.
use chrono::{DateTime, NaiveDateTime};
use log::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    error::{CephtoolsError, Result, ResultExt},
    exec::{Cmd, CommandRunner, SystemRunner},
    state,
};

/// Queue reserved when none is given.
pub const DEFAULT_QUEUE: &str = "ceph-qa-1";
/// Default reservation length in seconds.
pub const DEFAULT_RESERVE_FOR: u64 = 3600;
/// Backend configuration file in the state directory.
pub const CONFIG_FILE: &str = "testflinger.yaml";
/// Default testflinger CLI.
pub const DEFAULT_BIN: &str = "testflinger";

const SUBMIT_BANNER: &str = "Job submitted successfully!";
const SSH_OPTIONS: [&str; 4] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
];

/// Line prefixes of the banner `testflinger poll` prints once a machine is
/// reserved, in order.
pub const RESERVATION_PREFIXES: [&str; 6] = [
    "*** TESTFLINGER SYSTEM RESERVED ***",
    "You can now connect to ",
    "Current time:           [",
    "Reservation expires at: [",
    "Reservation will automatically timeout in ",
    "To end the reservation sooner use: testflinger-cli cancel ",
];

/// Per-user settings for reservation jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Launchpad account whose ssh keys are imported on the machine.
    pub launchpad_account: Option<String>,
    #[serde(default)]
    pub job_tag: Option<String>,
    #[serde(default)]
    pub mattermost_name: Option<String>,
}

/// Values given on the command line for a new backend configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendOverrides {
    pub launchpad_account: Option<String>,
    pub job_tag: Option<String>,
    pub mattermost_name: Option<String>,
}

impl BackendOverrides {
    fn is_empty(&self) -> bool {
        self.launchpad_account.is_none()
            && self.job_tag.is_none()
            && self.mattermost_name.is_none()
    }
}

impl BackendConfig {
    pub fn default_path() -> Result<PathBuf> {
        state::state_file_path(CONFIG_FILE)
    }

    /// Loads `path`; `launchpad_account` must be set.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            CephtoolsError::invalid_config(format!(
                "invalid testflinger configuration in {}: {e}",
                path.display()
            ))
        })?;

        if config.launchpad_account.as_deref().is_none_or(str::is_empty) {
            return Err(CephtoolsError::invalid_config(format!(
                "Incomplete configuration in {}: launchpad_account must be set.",
                path.display()
            )));
        }

        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    fn launchpad_account(&self) -> &str {
        self.launchpad_account.as_deref().unwrap_or_default()
    }
}

/// Loads the configuration at `path`, or creates it from `overrides` when
/// missing. Returns whether the file was created, in which case the caller
/// stops and asks for a re-run.
pub fn ensure_backend_config(
    path: &Path,
    overrides: BackendOverrides,
) -> Result<(BackendConfig, bool)> {
    if path.exists() {
        if !overrides.is_empty() {
            return Err(CephtoolsError::invalid_args(format!(
                "{} already exists; remove it or omit config overrides.",
                path.display()
            )));
        }
        return Ok((BackendConfig::load(path)?, false));
    }

    if overrides.launchpad_account.is_none() {
        return Err(CephtoolsError::invalid_args(
            "Configuration file is missing. Provide --launchpad-account.",
        ));
    }

    let config = BackendConfig {
        launchpad_account: overrides.launchpad_account,
        job_tag: overrides.job_tag,
        mattermost_name: overrides.mattermost_name,
    };
    config.save(path)?;

    println!("Saved configuration to {}", path.display());
    println!("Run the command again to reserve a queue, now that the config exists.");

    Ok((config, true))
}

/// Reservation job definition for `queue`.
pub fn build_job_file(
    config: &BackendConfig,
    queue: &str,
    reserve_for: u64,
) -> String {
    let mut lines = vec![];

    if let Some(name) = &config.mattermost_name {
        lines.push(format!("# Ask {name} on Mattermost if you have questions"));
    }
    if let Some(tag) = &config.job_tag {
        lines.push("tags:".into());
        lines.push(format!("  - {tag}"));
        lines.push(String::new());
    }

    lines.push(format!("job_queue: {queue}"));
    lines.push(String::new());
    lines.push("provision_data:".into());
    lines.push("  distro: noble".into());
    lines.push(String::new());
    lines.push("reserve_data:".into());
    lines.push("  ssh_keys:".into());
    lines.push(format!("    - lp:{}", config.launchpad_account()));
    lines.push(format!("  timeout: {reserve_for}"));
    lines.push(String::new());

    lines.join("\n")
}

/// Job id from `testflinger submit` output.
pub fn parse_submit_output(stdout: &str) -> Result<String> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() < 2 || lines[0] != SUBMIT_BANNER {
        return Err(CephtoolsError::api(
            "testflinger submit",
            format!("unexpected output:\n{stdout}"),
        ));
    }

    let parts: Vec<&str> = lines[1].split_whitespace().collect();
    match parts.as_slice() {
        [_, .., id] => Ok(id.to_string()),
        _ => Err(CephtoolsError::api(
            "testflinger submit",
            "could not extract job id from output",
        )),
    }
}

/// A reserved machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDetails {
    pub job_id: String,
    pub queue: String,
    pub user: String,
    pub ip: String,
    /// Expiry as printed by testflinger.
    pub expires_at: String,
    pub timeout_seconds: u64,
}

impl ReservationDetails {
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.ip)
    }

    /// Copy-pasteable ssh command for the machine.
    pub fn ssh_command(&self) -> String {
        format!(
            "ssh -o 'StrictHostKeyChecking=no' -o 'UserKnownHostsFile=/dev/null' '{}'",
            self.target()
        )
    }

    pub fn summary(&self, testflinger_bin: &str) -> Vec<String> {
        vec![
            String::new(),
            format!(
                "Reserved queue {} under job {}. Reservation expires at {}.",
                self.queue, self.job_id, self.expires_at
            ),
            format!("Connect with: {}", self.ssh_command()),
            format!("Cancel early with: {testflinger_bin} cancel {}", self.job_id),
        ]
    }
}

fn is_timestamp(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}

/// Parses the six banner lines into reservation details.
pub fn parse_reservation_window<S: AsRef<str>>(
    window: &[S],
    queue: &str,
) -> Option<ReservationDetails> {
    if window.len() != RESERVATION_PREFIXES.len() {
        return None;
    }

    let fields = window
        .iter()
        .zip(RESERVATION_PREFIXES)
        .map(|(line, prefix)| line.as_ref().strip_prefix(prefix).map(str::trim))
        .collect::<Option<Vec<_>>>()?;

    let (user, ip) = fields[1].split_once('@')?;
    let current_time = fields[2].trim_end_matches(']');
    let expires_at = fields[3].trim_end_matches(']');

    if !is_timestamp(current_time) || !is_timestamp(expires_at) {
        return None;
    }

    let timeout_seconds = fields[4].split_whitespace().next()?.parse().ok()?;
    let job_id = fields[5].split_whitespace().last()?;

    Some(ReservationDetails {
        job_id: job_id.into(),
        queue: queue.into(),
        user: user.into(),
        ip: ip.into(),
        expires_at: expires_at.into(),
        timeout_seconds,
    })
}

/// Sliding window over `testflinger poll` output.
#[derive(Debug)]
pub struct ReservationWatcher {
    queue: String,
    window: VecDeque<String>,
}

impl ReservationWatcher {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            window: VecDeque::with_capacity(RESERVATION_PREFIXES.len()),
        }
    }

    /// Feeds one line; returns the details once the banner is complete.
    pub fn push(&mut self, line: &str) -> Option<ReservationDetails> {
        if self.window.len() == RESERVATION_PREFIXES.len() {
            self.window.pop_front();
        }
        self.window.push_back(line.to_string());

        let window: Vec<&str> = self.window.iter().map(String::as_str).collect();
        parse_reservation_window(&window, &self.queue)
    }
}

/// Bootstrap run on a reserved machine: build cephtools from source and
/// install the lab.
pub fn deploy_script() -> String {
    [
        "set -euxo pipefail",
        "sudo apt-get update",
        "sudo apt-get install -y build-essential pkg-config git",
        "sudo snap install rustup --classic",
        "rustup default stable",
        "mkdir -p ~/src",
        "cd ~/src",
        "git clone https://github.com/canonical/cephtools.git",
        "cd cephtools/",
        "cargo install --locked --path .",
        "export PATH=\"$PATH:$HOME/.cargo/bin\"",
        "cephtools vmaas install",
        "",
    ]
    .join("\n")
}

/// The testflinger CLI.
pub struct Testflinger<'a> {
    runner: &'a dyn CommandRunner,
    bin: String,
    job_dir: Option<PathBuf>,
}

impl<'a> Testflinger<'a> {
    pub fn new(runner: &'a dyn CommandRunner, bin: impl Into<String>) -> Self {
        Self {
            runner,
            bin: bin.into(),
            job_dir: None,
        }
    }

    /// Directory for job files instead of the home directory.
    pub fn with_job_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.job_dir = Some(dir.into());
        self
    }

    /// Writes the job file into the home directory and submits it. The file
    /// is removed afterwards.
    pub async fn submit(
        &self,
        config: &BackendConfig,
        queue: &str,
        reserve_for: u64,
    ) -> Result<String> {
        let dir = match &self.job_dir {
            Some(dir) => dir.clone(),
            None => state::home_dir()?,
        };

        let mut job = tempfile::Builder::new()
            .prefix(&format!("reserve-{queue}-"))
            .suffix(".yaml")
            .tempfile_in(dir)?;
        job.write_all(build_job_file(config, queue, reserve_for).as_bytes())?;
        let job = job.into_temp_path();

        let cmd = Cmd::new(&self.bin)
            .arg("submit")
            .arg(job.display().to_string());
        let output = self.runner.run(cmd).await?;
        job.close()?;

        if !output.success() {
            let message = [output.stderr.trim(), output.stdout.trim()]
                .into_iter()
                .find(|m| !m.is_empty())
                .unwrap_or("testflinger submit failed")
                .to_string();
            return Err(CephtoolsError::CommandFailed {
                command: format!("{} submit", self.bin),
                code: output.code,
                stderr: message,
            });
        }

        parse_submit_output(&output.stdout)
    }

    /// Streams `testflinger poll` until the reservation banner shows up.
    pub async fn await_reservation(
        &self,
        system: &SystemRunner,
        queue: &str,
        job_id: &str,
    ) -> Result<ReservationDetails> {
        let cmd = Cmd::new(&self.bin).args(["poll", job_id]);
        let mut watcher = ReservationWatcher::new(queue);
        let mut details = None;

        system
            .stream_lines(&cmd, |line| {
                println!("{line}");
                details = watcher.push(line);
                details.is_some()
            })
            .await?;

        let details = details.ok_or_else(|| {
            CephtoolsError::api(
                "testflinger poll",
                "failed to identify reservation details in output",
            )
        })?;

        if details.job_id != job_id {
            return Err(CephtoolsError::api(
                "testflinger poll",
                format!(
                    "job id mismatch: submitted {job_id}, poll reported {}",
                    details.job_id
                ),
            ));
        }

        Ok(details)
    }

    /// Submits a reservation and waits for the machine.
    pub async fn reserve(
        &self,
        system: &SystemRunner,
        config: &BackendConfig,
        queue: &str,
        reserve_for: u64,
    ) -> Result<ReservationDetails> {
        let job_id = self.submit(config, queue, reserve_for).await?;
        info!("Submitted job {job_id} to reserve {queue}. Waiting for details.");
        self.await_reservation(system, queue, &job_id).await
    }
}

/// Pipes `script` into `bash -se` on the reserved machine.
pub async fn remote_deploy(
    runner: &dyn CommandRunner,
    details: &ReservationDetails,
    script: &str,
) -> Result<()> {
    let cmd = Cmd::new("ssh")
        .args(SSH_OPTIONS)
        .arg(details.target())
        .args(["bash", "-se"])
        .stdin(script)
        .passthrough();

    let output = runner.run(cmd).await?;

    if !output.success() {
        return Err(CephtoolsError::CommandFailed {
            command: format!("ssh {}", details.target()),
            code: output.code,
            stderr: String::new(),
        })
        .with_context(|| {
            format!(
                "Failed to deploy VMaaS on queue {} ({})",
                details.queue, details.ip
            )
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use tempfile::TempDir;

    fn banner(job_id: &str) -> Vec<String> {
        vec![
            "*** TESTFLINGER SYSTEM RESERVED ***".into(),
            "You can now connect to ubuntu@10.1.2.3".into(),
            "Current time:           [2025-08-20T10:00:00.123456]".into(),
            "Reservation expires at: [2025-08-20T11:00:00.123456]".into(),
            "Reservation will automatically timeout in 3600 seconds".into(),
            format!("To end the reservation sooner use: testflinger-cli cancel {job_id}"),
        ]
    }

    fn config() -> BackendConfig {
        BackendConfig {
            launchpad_account: Some("jdoe".into()),
            job_tag: Some("ceph".into()),
            mattermost_name: Some("@jdoe".into()),
        }
    }

    #[test]
    fn job_file_includes_optional_fields() {
        let job = build_job_file(&config(), "ceph-qa-1", 7200);

        assert_eq!(
            job,
            "# Ask @jdoe on Mattermost if you have questions\n\
             tags:\n  - ceph\n\n\
             job_queue: ceph-qa-1\n\n\
             provision_data:\n  distro: noble\n\n\
             reserve_data:\n  ssh_keys:\n    - lp:jdoe\n  timeout: 7200\n"
        );

        let minimal = BackendConfig {
            launchpad_account: Some("jdoe".into()),
            job_tag: None,
            mattermost_name: None,
        };
        assert!(build_job_file(&minimal, "q", 60).starts_with("job_queue: q\n"));
    }

    #[test]
    fn parses_submit_output() {
        let id = parse_submit_output(
            "Job submitted successfully!\njob_id: 1f2e3d4c-aaaa-bbbb\n",
        )
        .unwrap();
        assert_eq!(id, "1f2e3d4c-aaaa-bbbb");

        assert!(parse_submit_output("error: queue unknown\n").is_err());
        assert!(parse_submit_output("Job submitted successfully!\nabc\n").is_err());
    }

    #[test]
    fn watcher_detects_banner_after_noise() {
        let mut watcher = ReservationWatcher::new("ceph-qa-1");

        assert!(watcher.push("Waiting on queue").is_none());
        assert!(watcher.push("This job is waiting on a node").is_none());

        let lines = banner("job-1");
        let (last, rest) = lines.split_last().unwrap();
        for line in rest {
            assert!(watcher.push(line).is_none());
        }

        let details = watcher.push(last).unwrap();
        assert_eq!(
            details,
            ReservationDetails {
                job_id: "job-1".into(),
                queue: "ceph-qa-1".into(),
                user: "ubuntu".into(),
                ip: "10.1.2.3".into(),
                expires_at: "2025-08-20T11:00:00.123456".into(),
                timeout_seconds: 3600,
            }
        );
    }

    #[test]
    fn rejects_malformed_banner() {
        let mut lines = banner("job-1");
        lines[1] = "You can now connect to 10.1.2.3".into();
        assert!(parse_reservation_window(&lines, "q").is_none());

        let mut lines = banner("job-1");
        lines[3] = "Reservation expires at: [soon]".into();
        assert!(parse_reservation_window(&lines, "q").is_none());

        assert!(parse_reservation_window(&banner("job-1")[1..], "q").is_none());
    }

    #[test]
    fn summary_lists_connect_and_cancel() {
        let details = parse_reservation_window(&banner("job-9"), "ceph-qa-1").unwrap();
        let summary = details.summary("testflinger");

        assert_eq!(
            summary[2],
            "Connect with: ssh -o 'StrictHostKeyChecking=no' -o 'UserKnownHostsFile=/dev/null' 'ubuntu@10.1.2.3'"
        );
        assert_eq!(summary[3], "Cancel early with: testflinger cancel job-9");
    }

    #[test]
    fn creates_config_then_asks_for_rerun() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("testflinger.yaml");

        let err = ensure_backend_config(&path, BackendOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("--launchpad-account"));

        let overrides = BackendOverrides {
            launchpad_account: Some("jdoe".into()),
            ..BackendOverrides::default()
        };
        let (created, was_created) =
            ensure_backend_config(&path, overrides.clone()).unwrap();
        assert!(was_created);
        assert_eq!(created.launchpad_account.as_deref(), Some("jdoe"));

        let (loaded, was_created) =
            ensure_backend_config(&path, BackendOverrides::default()).unwrap();
        assert!(!was_created);
        assert_eq!(loaded, created);

        let err = ensure_backend_config(&path, overrides).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn load_requires_launchpad_account() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("testflinger.yaml");
        fs::write(&path, "launchpad_account: null\njob_tag: ceph\n").unwrap();

        let err = BackendConfig::load(&path).unwrap_err();

        assert!(err.to_string().contains("launchpad_account must be set"));
    }

    #[tokio::test]
    async fn submit_writes_and_removes_job_file() {
        let home = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|cmd| {
            assert_eq!(cmd.program, "testflinger");
            assert_eq!(cmd.args[0], "submit");
            let job = fs::read_to_string(&cmd.args[1]).unwrap();
            assert!(job.contains("job_queue: ceph-qa-1"));
            assert!(cmd.args[1].contains("reserve-ceph-qa-1-"));
            Ok(CommandOutput::ok("Job submitted successfully!\njob_id: abc\n"))
        });

        let job_id = Testflinger::new(&runner, "testflinger")
            .with_job_dir(home.path())
            .submit(&config(), "ceph-qa-1", 3600)
            .await
            .unwrap();

        assert_eq!(job_id, "abc");
        assert_eq!(fs::read_dir(home.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn failed_deploy_names_queue() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|cmd| {
            assert_eq!(cmd.stdin.as_deref(), Some("echo hi\n"));
            assert_eq!(cmd.args.last().map(String::as_str), Some("-se"));
            Ok(CommandOutput::failed(2, ""))
        });
        let details = parse_reservation_window(&banner("job-1"), "ceph-qa-1").unwrap();

        let err = remote_deploy(&runner, &details, "echo hi\n")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("Failed to deploy VMaaS on queue ceph-qa-1 (10.1.2.3)"));
        assert_eq!(err.exit_code(), 2);
    }
}
