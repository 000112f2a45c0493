//! `vmaas` subcommands.
use log::*;
use std::{env, path::PathBuf};

use crate::{
    cli::{VmaasArgs, VmaasCommand},
    config::{CephtoolsConfig, lab::LabState},
    error::{CephtoolsError, Result},
    exec::{CommandRunner, SystemRunner},
    terraform::{resolve_terragrunt_dir, terraform_root_candidates},
    vmaas::{Lab, NodeSpec, VmaasContext, primary_ip},
};

pub async fn execute(config: &CephtoolsConfig, args: &VmaasArgs) -> Result<()> {
    // the node plan must be locatable before anything runs on the host
    let plan_dir = match &args.command {
        VmaasCommand::EnsureNodes(_) | VmaasCommand::DestroyNodes => {
            Some(node_plan_dir(config)?)
        }
        _ => None,
    };

    let runner = SystemRunner;
    let ip = primary_ip(&runner).await?;
    let defaults = args.apply_to(config.vmaas.clone());
    let ctx = VmaasContext::new(defaults, &config.juju_model, &ip);
    debug!("vmaas host address {ip}, MAAS at {}", ctx.maas_url);

    let state = LabState::open()?;
    run(&runner, &ctx, state, &args.command, plan_dir).await
}

fn node_plan_dir(config: &CephtoolsConfig) -> Result<PathBuf> {
    let cwd = env::current_dir()?;
    let roots = terraform_root_candidates(config, &cwd)?;
    resolve_terragrunt_dir(config, &roots)
}

async fn run(
    runner: &dyn CommandRunner,
    ctx: &VmaasContext,
    state: LabState,
    command: &VmaasCommand,
    plan_dir: Option<PathBuf>,
) -> Result<()> {
    let lab = Lab::new(runner, ctx, state);

    match command {
        VmaasCommand::Install => lab.install().await,
        VmaasCommand::InstallDeps => lab.install_deps().await,
        VmaasCommand::LxdInit => lab.lxd_init().await,
        VmaasCommand::MaasInit => lab.maas_init().await,
        VmaasCommand::RegisterVmHost => lab.register_vm_host().await,
        VmaasCommand::ConfigureNetwork => {
            lab.configure_network().await.map(|_| ())
        }
        VmaasCommand::EnsureNodes(nodes) => {
            let dir = required(plan_dir)?;
            lab.ensure_nodes(&NodeSpec::from(nodes), &dir).await
        }
        VmaasCommand::DestroyNodes => {
            let dir = required(plan_dir)?;
            lab.destroy_nodes(&dir).await
        }
        VmaasCommand::JujuInit => lab.juju_init().await,
    }
}

fn required(plan_dir: Option<PathBuf>) -> Result<PathBuf> {
    plan_dir.ok_or_else(|| {
        CephtoolsError::invalid_config(
            "terragrunt directory was not resolved",
        )
    })
}
