//! Typed wrapper over the `juju` command line.
use log::*;
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path, time::Duration};
use tokio::time::{Instant, sleep};

use crate::{
    error::{CephtoolsError, Result, ResultExt},
    exec::{Cmd, CommandOutput, CommandRunner, CommandRunnerExt},
};

/// Controller bootstrapped on the lab MAAS.
pub const MAAS_CONTROLLER: &str = "maas-controller";
/// MAAS space carrying Juju management traffic.
pub const JUJU_SPACE: &str = "jujuspace";
/// MAAS space of the external LXD network.
pub const EXTERNAL_SPACE: &str = "external";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(6);
const CONTROLLER_READY_ATTEMPTS: usize = 20;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusInfo {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnitStatus {
    #[serde(default)]
    pub machine: Option<serde_json::Value>,
    #[serde(rename = "workload-status", default)]
    pub workload_status: Option<StatusInfo>,
    #[serde(rename = "juju-status", default)]
    pub juju_status: Option<StatusInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationStatus {
    #[serde(rename = "application-status", default)]
    pub application_status: Option<StatusInfo>,
    #[serde(default)]
    pub units: BTreeMap<String, UnitStatus>,
}

/// Subset of `juju status --format json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationStatus>,
}

/// Outcome of inspecting a model while waiting for it to settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Active,
    Waiting,
    Failed(String),
}

fn is_failed(status: &Option<StatusInfo>) -> bool {
    status
        .as_ref()
        .is_some_and(|s| s.current == "error" || s.current == "blocked")
}

fn describe(name: &str, status: &Option<StatusInfo>) -> String {
    match status {
        Some(info) => match info.message.as_deref() {
            Some(message) if !message.is_empty() => {
                format!("{name} is {}: {message}", info.current)
            }
            _ => format!("{name} is {}", info.current),
        },
        None => format!("{name} has no status"),
    }
}

fn is_active(status: &Option<StatusInfo>) -> bool {
    status.as_ref().is_some_and(|s| s.current == "active")
}

impl Status {
    /// Sorted, distinct machine numbers hosting units of `application`.
    /// Units without a numeric machine (containers, pending) are skipped.
    pub fn application_machines(&self, application: &str) -> Vec<u64> {
        let Some(app) = self.applications.get(application) else {
            return vec![];
        };

        let mut machines: Vec<u64> = app
            .units
            .values()
            .filter_map(|unit| match unit.machine.as_ref()? {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => {
                    let s = s.trim();
                    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
                    {
                        s.parse().ok()
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .collect();

        machines.sort_unstable();
        machines.dedup();
        machines
    }

    /// Every application and unit active, or the first one in error or
    /// blocked.
    pub fn readiness(&self) -> Readiness {
        let mut all_active = true;

        for (name, app) in &self.applications {
            if is_failed(&app.application_status) {
                return Readiness::Failed(describe(
                    name,
                    &app.application_status,
                ));
            }
            all_active &= is_active(&app.application_status);

            for (unit_name, unit) in &app.units {
                if is_failed(&unit.workload_status) {
                    return Readiness::Failed(describe(
                        unit_name,
                        &unit.workload_status,
                    ));
                }
                if unit
                    .juju_status
                    .as_ref()
                    .is_some_and(|s| s.current == "error")
                {
                    return Readiness::Failed(describe(
                        unit_name,
                        &unit.juju_status,
                    ));
                }
                all_active &= is_active(&unit.workload_status);
            }
        }

        if all_active {
            Readiness::Active
        } else {
            Readiness::Waiting
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShowModelEntry {
    #[serde(rename = "model-uuid")]
    model_uuid: Option<String>,
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    #[serde(default)]
    name: String,
    #[serde(rename = "short-name", default)]
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsOutput {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ControllerMachines {
    #[serde(rename = "Total", default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ControllerEntry {
    #[serde(rename = "controller-machines", default)]
    controller_machines: ControllerMachines,
}

#[derive(Debug, Default, Deserialize)]
struct ControllersOutput {
    #[serde(default)]
    controllers: BTreeMap<String, ControllerEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsOutput {
    #[serde(rename = "client-credentials", default)]
    client_credentials: BTreeMap<String, serde_json::Value>,
}

/// Model identity from `juju show-model`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub uuid: String,
    /// Owner without the `@domain` suffix.
    pub owner: String,
}

fn already_exists(output: &CommandOutput) -> bool {
    output.stderr.contains("already exists")
        || output.stdout.contains("already exists")
}

/// `juju` commands run through a [`CommandRunner`].
pub struct Juju<'a> {
    runner: &'a dyn CommandRunner,
    poll_interval: Duration,
}

impl<'a> Juju<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self {
            runner,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn cmd<I, S>(args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new("juju").args(args)
    }

    /// `juju status` of `model`.
    pub async fn status(&self, model: &str) -> Result<Status> {
        let cmd = Self::cmd(["status", "-m", model, "--format", "json"]);
        let status: Option<Status> = self
            .runner
            .json(cmd)
            .await
            .context("failed to fetch Juju status")?;
        Ok(status.unwrap_or_default())
    }

    /// Machines hosting `application` in `model`.
    pub async fn application_machines(
        &self,
        model: &str,
        application: &str,
    ) -> Result<Vec<u64>> {
        Ok(self.status(model).await?.application_machines(application))
    }

    /// UUID and owner of `model`.
    pub async fn show_model(&self, model: &str) -> Result<ModelInfo> {
        let cmd = Self::cmd(["show-model", model, "--format", "json"]);
        let payload: Option<BTreeMap<String, ShowModelEntry>> = self
            .runner
            .json(cmd)
            .await
            .with_context(|| format!("failed to describe model '{model}'"))?;

        let mut payload = payload.unwrap_or_default();

        // show-model keys the entry by the name it was given
        let entry = payload.remove(model).ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "model '{model}' not found in Juju show-model output"
            ))
        })?;

        let uuid = entry.model_uuid.ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "unable to determine UUID for model '{model}'"
            ))
        })?;

        let owner = entry.owner.ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "unable to determine owner for model '{model}'"
            ))
        })?;

        let owner = owner.split('@').next().unwrap_or_default().to_string();

        Ok(ModelInfo { uuid, owner })
    }

    /// Whether `controller` has a model called `model`.
    pub async fn has_model(&self, controller: &str, model: &str) -> Result<bool> {
        let cmd = Self::cmd([
            "models",
            "--format",
            "json",
            "--controller",
            controller,
        ]);
        let output: Option<ModelsOutput> = self
            .runner
            .json(cmd)
            .await
            .context("failed to list Juju models")?;

        let suffix = format!("/{model}");

        Ok(output.map(|o| o.models).unwrap_or_default().iter().any(|m| {
            m.name == model
                || m.name.ends_with(&suffix)
                || m.short_name.as_deref() == Some(model)
        }))
    }

    /// Creates `model` on `controller` unless it exists, then applies
    /// `constraint` to it.
    pub async fn ensure_model(
        &self,
        controller: &str,
        model: &str,
        constraint: &str,
    ) -> Result<()> {
        if self.has_model(controller, model).await? {
            info!("juju model {model} already exists");
        } else {
            self.runner
                .run_checked(Self::cmd([
                    "add-model",
                    model,
                    "--controller",
                    controller,
                ]))
                .await
                .with_context(|| format!("failed to add Juju model '{model}'"))?;
        }

        let target = format!("{controller}:{model}");
        self.runner
            .run_checked(Self::cmd([
                "set-model-constraints",
                "-m",
                &target,
                constraint,
            ]))
            .await
            .with_context(|| {
                format!("failed to set constraints for model '{model}'")
            })?;

        Ok(())
    }

    /// Whether the client knows `cloud`.
    pub async fn has_cloud(&self, cloud: &str) -> Result<bool> {
        let cmd = Self::cmd(["clouds", "--client", "--format", "json"]);
        let clouds: Option<BTreeMap<String, serde_json::Value>> = self
            .runner
            .json(cmd)
            .await
            .context("failed to list Juju clouds")?;
        Ok(clouds.is_some_and(|c| c.contains_key(cloud)))
    }

    /// Whether the client holds a credential for `cloud`.
    pub async fn has_credential(&self, cloud: &str) -> Result<bool> {
        let cmd = Self::cmd(["credentials", "--client", "--format", "json"]);
        let creds: Option<CredentialsOutput> = self
            .runner
            .json(cmd)
            .await
            .context("failed to list Juju credentials")?;
        Ok(creds.is_some_and(|c| c.client_credentials.contains_key(cloud)))
    }

    /// Whether the client knows `controller`.
    pub async fn has_controller(&self, controller: &str) -> Result<bool> {
        Ok(self.controllers().await?.controllers.contains_key(controller))
    }

    async fn controllers(&self) -> Result<ControllersOutput> {
        let cmd = Self::cmd(["controllers", "--format", "json"]);
        let output: Option<ControllersOutput> = self
            .runner
            .json(cmd)
            .await
            .context("failed to list Juju controllers")?;
        Ok(output.unwrap_or_default())
    }

    /// Adds a client cloud. An existing cloud counts as success.
    pub async fn add_cloud(&self, cloud: &str, file: &Path) -> Result<()> {
        let cmd = Self::cmd([
            "add-cloud",
            cloud,
            &file.display().to_string(),
            "--client",
        ]);
        self.run_tolerating_existing(cmd, "failed to add Juju cloud")
            .await
    }

    /// Adds a client credential. An existing credential counts as
    /// success.
    pub async fn add_credential(&self, cloud: &str, file: &Path) -> Result<()> {
        let cmd = Self::cmd([
            "add-credential",
            cloud,
            "-f",
            &file.display().to_string(),
            "--client",
        ]);
        self.run_tolerating_existing(cmd, "failed to add Juju credential")
            .await
    }

    async fn run_tolerating_existing(
        &self,
        cmd: Cmd,
        context: &str,
    ) -> Result<()> {
        let command = cmd.to_string();
        let output = self.runner.run(cmd).await?;

        if output.success() {
            return Ok(());
        }

        if already_exists(&output) {
            info!("{}", output.stderr.trim());
            return Ok(());
        }

        Err(CephtoolsError::CommandFailed {
            command,
            code: output.code,
            stderr: output.stderr,
        }
        .context(context))
    }

    /// Bootstraps `controller` on `cloud` with management traffic in
    /// `space`.
    pub async fn bootstrap(
        &self,
        cloud: &str,
        controller: &str,
        space: &str,
    ) -> Result<()> {
        let cmd = Self::cmd([
            "bootstrap".to_string(),
            cloud.to_string(),
            controller.to_string(),
            "--bootstrap-constraints".to_string(),
            format!("spaces={space}"),
            "--config".to_string(),
            format!("juju-mgmt-space={space}"),
        ])
        .passthrough();

        self.runner
            .run_checked(cmd)
            .await
            .context("failed to bootstrap Juju controller")?;

        Ok(())
    }

    pub async fn switch(&self, target: &str) -> Result<()> {
        self.runner
            .run_checked(Self::cmd(["switch", target]))
            .await?;
        Ok(())
    }

    /// Polls until the controllers report at least one controller machine.
    pub async fn wait_for_controller_machines(&self) -> Result<()> {
        for attempt in 1..=CONTROLLER_READY_ATTEMPTS {
            let total: u64 = self
                .controllers()
                .await?
                .controllers
                .values()
                .map(|c| c.controller_machines.total)
                .sum();

            if total > 0 {
                return Ok(());
            }

            debug!(
                "controller machines not ready (attempt {attempt}/{CONTROLLER_READY_ATTEMPTS})"
            );
            sleep(self.poll_interval).await;
        }

        Err(CephtoolsError::invalid_config(
            "juju controller machines not ready after timeout",
        ))
    }

    /// Runs `command` on machine `node` of `model` over `juju ssh`,
    /// capturing its output.
    pub async fn ssh(
        &self,
        model: &str,
        node: &str,
        command: &[String],
    ) -> Result<CommandOutput> {
        let cmd = Self::cmd(["ssh", "-m", model, node])
            .args(command.iter().cloned())
            .quiet();
        self.runner.run(cmd).await
    }

    /// Polls `juju status` until every application in `model` is active.
    /// Error or blocked states and the timeout fail the wait.
    pub async fn wait_active(&self, model: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.status(model).await?.readiness() {
                Readiness::Active => return Ok(()),
                Readiness::Failed(reason) => {
                    return Err(CephtoolsError::invalid_config(format!(
                        "encountered an error state while waiting for model '{model}': {reason}"
                    )));
                }
                Readiness::Waiting => {}
            }

            if Instant::now() >= deadline {
                return Err(CephtoolsError::invalid_config(format!(
                    "timed out waiting for applications in model '{model}' to become active after {} seconds",
                    timeout.as_secs()
                )));
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockCommandRunner;
    use mockall::{Sequence, predicate::*};

    const STATUS: &str = r#"{
      "model": {"name": "cephtools"},
      "applications": {
        "microceph": {
          "application-status": {"current": "active"},
          "units": {
            "microceph/0": {"machine": "2", "workload-status": {"current": "active"}},
            "microceph/1": {"machine": "0", "workload-status": {"current": "active"}},
            "microceph/2": {"machine": "2", "workload-status": {"current": "active"}},
            "microceph/3": {"machine": "0/lxd/1", "workload-status": {"current": "active"}},
            "microceph/4": {"workload-status": {"current": "waiting"}}
          }
        }
      }
    }"#;

    fn status(json: &str) -> Status {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn application_machines_are_sorted_and_numeric() {
        let status = status(STATUS);
        assert_eq!(status.application_machines("microceph"), vec![0, 2]);
        assert!(status.application_machines("ceph-mon").is_empty());
    }

    #[test]
    fn readiness_waits_on_pending_units() {
        assert_eq!(status(STATUS).readiness(), Readiness::Waiting);
    }

    #[test]
    fn readiness_reports_blocked_units() {
        let status = status(
            r#"{"applications": {"microceph": {
                "application-status": {"current": "active"},
                "units": {"microceph/0": {"workload-status": {"current": "blocked", "message": "no disks"}}}
            }}}"#,
        );

        assert_eq!(
            status.readiness(),
            Readiness::Failed("microceph/0 is blocked: no disks".into())
        );
    }

    #[test]
    fn readiness_active_when_everything_active() {
        let status = status(
            r#"{"applications": {"microceph": {
                "application-status": {"current": "active"},
                "units": {"microceph/0": {"workload-status": {"current": "active"}}}
            }}}"#,
        );

        assert_eq!(status.readiness(), Readiness::Active);
    }

    #[tokio::test]
    async fn show_model_splits_owner_domain() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(eq(Cmd::new("juju").args([
                "show-model",
                "cephtools",
                "--format",
                "json",
            ])))
            .returning(|_| {
                Ok(CommandOutput::ok(
                    r#"{"cephtools": {"model-uuid": "1234-abcd", "owner": "admin@local"}}"#,
                ))
            });

        let info = Juju::new(&runner).show_model("cephtools").await.unwrap();

        assert_eq!(
            info,
            ModelInfo {
                uuid: "1234-abcd".into(),
                owner: "admin".into()
            }
        );
    }

    #[tokio::test]
    async fn show_model_missing_entry_is_error() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::ok(r#"{"other": {}}"#)));

        let err = Juju::new(&runner).show_model("cephtools").await.unwrap_err();

        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn ensure_model_skips_existing_model() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(CommandOutput::ok(
                    r#"{"models": [{"name": "admin/cephtools", "short-name": "cephtools"}]}"#,
                ))
            });
        runner
            .expect_run()
            .with(eq(Cmd::new("juju").args([
                "set-model-constraints",
                "-m",
                "maas-controller:cephtools",
                "tags=cephtools",
            ])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("")));

        Juju::new(&runner)
            .ensure_model(MAAS_CONTROLLER, "cephtools", "tags=cephtools")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_model_adds_missing_model() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok(r#"{"models": []}"#)));
        runner
            .expect_run()
            .with(eq(Cmd::new("juju").args([
                "add-model",
                "cephtools",
                "--controller",
                "maas-controller",
            ])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("")));
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok("")));

        Juju::new(&runner)
            .ensure_model(MAAS_CONTROLLER, "cephtools", "tags=cephtools")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn add_cloud_tolerates_existing_cloud() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| {
            Ok(CommandOutput::failed(
                1,
                "ERROR cloud called \"maas-cloud\" already exists\n",
            ))
        });

        Juju::new(&runner)
            .add_cloud("maas-cloud", Path::new("/tmp/cloud.yaml"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn add_credential_propagates_other_failures() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::failed(2, "permission denied")));

        let err = Juju::new(&runner)
            .add_credential("maas-cloud", Path::new("/tmp/cred.yaml"))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn wait_active_fails_on_error_state() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| {
            Ok(CommandOutput::ok(
                r#"{"applications": {"microceph": {"application-status": {"current": "error", "message": "hook failed"}}}}"#,
            ))
        });

        let err = Juju::new(&runner)
            .with_poll_interval(Duration::ZERO)
            .wait_active("cephtools", Duration::from_secs(60))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("microceph is error: hook failed"));
    }

    #[tokio::test]
    async fn wait_active_times_out() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::ok(STATUS)));

        let err = Juju::new(&runner)
            .with_poll_interval(Duration::ZERO)
            .wait_active("cephtools", Duration::ZERO)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn wait_active_returns_once_active() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok(STATUS)));
        runner
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutput::ok(r#"{"applications": {}}"#)));

        Juju::new(&runner)
            .with_poll_interval(Duration::ZERO)
            .wait_active("cephtools", Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn controller_machines_ready() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(1).returning(|_| {
            Ok(CommandOutput::ok(
                r#"{"controllers": {"maas-controller": {"controller-machines": {"Total": 1}}}}"#,
            ))
        });

        Juju::new(&runner)
            .with_poll_interval(Duration::ZERO)
            .wait_for_controller_machines()
            .await
            .unwrap();
    }
}
