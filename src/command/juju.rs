//! `juju deploy`: apply a Terragrunt plan against a Juju model.
use log::*;
use std::{env, path::Path, time::Duration};

use crate::{
    cli::{DeployArgs, JujuCommand},
    config::CephtoolsConfig,
    error::{CephtoolsError, Result},
    exec::SystemRunner,
    juju::{Juju, ModelInfo},
    terraform::{
        Terragrunt, resolve_plan_dir, terraform_root_candidates, var_args,
    },
};

/// Known plans and their directory relative to a terraform root.
const PLANS: [(&str, &str); 1] = [("microceph", "microceph")];

pub async fn execute(config: &CephtoolsConfig, cmd: &JujuCommand) -> Result<()> {
    match cmd {
        JujuCommand::Deploy(args) => deploy(config, args).await,
    }
}

fn plan_relative_path(plan: &str) -> Result<&'static str> {
    PLANS
        .iter()
        .find(|(name, _)| *name == plan)
        .map(|(_, path)| *path)
        .ok_or_else(|| {
            let known: Vec<&str> = PLANS.iter().map(|(name, _)| *name).collect();
            CephtoolsError::invalid_args(format!(
                "Unknown plan '{plan}'. Available plans: {}",
                known.join(", ")
            ))
        })
}

fn validate(args: &DeployArgs) -> Result<Duration> {
    if args.units <= 0 {
        return Err(CephtoolsError::invalid_args(
            "--units must be a positive integer.",
        ));
    }

    match u64::try_from(args.wait_timeout) {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(CephtoolsError::invalid_args(
            "--wait-timeout must be a positive integer.",
        )),
    }
}

/// `-var` arguments for the plan.
pub fn deploy_vars(model: &ModelInfo, args: &DeployArgs) -> Vec<String> {
    var_args([
        ("model_uuid", Some(model.uuid.clone())),
        ("units", Some(args.units.to_string())),
        ("charm_microceph_channel", args.charm_channel.clone()),
        (
            "charm_microceph_revision",
            args.charm_revision.map(|r| r.to_string()),
        ),
        ("base", args.base.clone()),
        ("snap_channel", args.snap_channel.clone()),
    ])
}

async fn deploy(config: &CephtoolsConfig, args: &DeployArgs) -> Result<()> {
    let relative = plan_relative_path(&args.plan)?;
    let timeout = validate(args)?;
    let model = args.model.as_deref().unwrap_or(&config.juju_model);

    let cwd = env::current_dir()?;
    let roots = terraform_root_candidates(config, &cwd)?;
    let plan_dir = resolve_plan_dir(&args.plan, Some(Path::new(relative)), &roots)?;

    let runner = SystemRunner;
    apply_plan(
        &Juju::new(&runner),
        &Terragrunt::new(&runner, plan_dir),
        model,
        args,
        timeout,
    )
    .await
}

async fn apply_plan(
    juju: &Juju<'_>,
    terragrunt: &Terragrunt<'_>,
    model: &str,
    args: &DeployArgs,
    timeout: Duration,
) -> Result<()> {
    let info = juju.show_model(model).await?;
    debug!("model {model} is {} owned by {}", info.uuid, info.owner);

    info!(
        "applying plan {} in {}",
        args.plan,
        terragrunt.dir().display()
    );
    terragrunt.apply(&deploy_vars(&info, args)).await?;

    if args.no_wait {
        return Ok(());
    }

    info!(
        "waiting up to {}s for model {model} to become active",
        timeout.as_secs()
    );
    juju.wait_active(model, timeout).await?;
    println!("All applications in model '{model}' are active.");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exec::CommandOutput, test_helpers::ScriptedRunner};
    use tempfile::TempDir;

    const SHOW_MODEL: &str = r#"{"cephtools": {"model-uuid": "0f3c-77", "owner": "admin@local"}}"#;
    const ACTIVE: &str = r#"{"applications": {"microceph": {
        "application-status": {"current": "active"},
        "units": {"microceph/0": {"machine": "0",
            "workload-status": {"current": "active"},
            "juju-status": {"current": "idle"}}}
    }}}"#;

    fn args() -> DeployArgs {
        DeployArgs {
            plan: "microceph".into(),
            model: None,
            units: 3,
            charm_channel: Some("squid/edge".into()),
            charm_revision: None,
            base: None,
            snap_channel: Some("squid/stable".into()),
            wait: false,
            no_wait: false,
            wait_timeout: 3600,
        }
    }

    #[test]
    fn vars_skip_unset_options() {
        let model = ModelInfo {
            uuid: "0f3c-77".into(),
            owner: "admin".into(),
        };

        assert_eq!(
            deploy_vars(&model, &args()),
            vec![
                "-var",
                "model_uuid=0f3c-77",
                "-var",
                "units=3",
                "-var",
                "charm_microceph_channel=squid/edge",
                "-var",
                "snap_channel=squid/stable",
            ]
        );
    }

    #[test]
    fn rejects_non_positive_values() {
        let mut bad = args();
        bad.units = 0;
        assert_eq!(validate(&bad).unwrap_err().exit_code(), 2);

        let mut bad = args();
        bad.wait_timeout = -5;
        assert!(validate(&bad).is_err());

        assert_eq!(validate(&args()).unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn unknown_plan_lists_available_plans() {
        let err = plan_relative_path("ceph-csi").unwrap_err();
        assert!(err.to_string().contains("Available plans: microceph"));
        assert_eq!(plan_relative_path("microceph").unwrap(), "microceph");
    }

    #[tokio::test]
    async fn applies_plan_and_waits_for_model() {
        let plan = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .on("juju show-model cephtools", CommandOutput::ok(SHOW_MODEL))
            .on("terragrunt apply", CommandOutput::ok(""))
            .on("juju status -m cephtools", CommandOutput::ok(ACTIVE));
        let juju = Juju::new(&runner).with_poll_interval(Duration::ZERO);
        let terragrunt = Terragrunt::new(&runner, plan.path());

        apply_plan(
            &juju,
            &terragrunt,
            "cephtools",
            &args(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert!(runner.ran(
            "terragrunt apply -auto-approve -var model_uuid=0f3c-77 -var units=3"
        ));
        assert!(runner.ran("juju status -m cephtools"));
    }

    #[tokio::test]
    async fn no_wait_skips_status_polling() {
        let plan = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .on("juju show-model cephtools", CommandOutput::ok(SHOW_MODEL))
            .on("terragrunt apply", CommandOutput::ok(""));
        let juju = Juju::new(&runner);
        let terragrunt = Terragrunt::new(&runner, plan.path());
        let mut args = args();
        args.no_wait = true;

        apply_plan(&juju, &terragrunt, "cephtools", &args, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(!runner.ran("juju status"));
    }

    #[tokio::test]
    async fn missing_model_stops_before_apply() {
        let plan = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "juju show-model other",
            CommandOutput::failed(1, "model \"other\" not found"),
        );
        let juju = Juju::new(&runner);
        let terragrunt = Terragrunt::new(&runner, plan.path());

        assert!(
            apply_plan(&juju, &terragrunt, "other", &args(), Duration::from_secs(1))
                .await
                .is_err()
        );
        assert!(!runner.ran("terragrunt"));
    }
}
