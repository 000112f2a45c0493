//! Command handlers for cephtools.
//!
//! Each subcommand is a thin procedure: resolve its inputs, call the
//! charm store, hosting API or external tools, print the result.
//!
//! - **list_prs**: pull requests merged between two channels' revisions
//! - **charm_rel**: release one channel's revisions to another
//! - **vmaas**: the local MAAS + LXD + Juju lab steps
//! - **juju**: Terragrunt plan deployments against a Juju model
//! - **microceph**: MicroCeph commands across a model's machines
//! - **testflinger**: machine reservations and remote lab installs
use crate::{cli::Command, config::CephtoolsConfig, error::Result};

/// Channel pull request listing.
pub mod list_prs;

/// Channel-to-channel charm releases.
///
/// Dry-run unless `--apply` is given. A charm that fails is reported and
/// the remaining charms are still processed.
pub mod charm_rel;

pub mod juju;
pub mod microceph;
pub mod testflinger;

/// Lab bootstrap steps. `install` runs them all and stops at the first
/// failure.
pub mod vmaas;

/// Runs `cmd`. Only the lab, deploy and MicroCeph commands read
/// `cephtools.yaml`, so the others work without a state directory.
pub async fn dispatch(cmd: &Command) -> Result<()> {
    match cmd {
        Command::ListPrs(args) => list_prs::execute(args).await,
        Command::CharmRel(args) => charm_rel::execute(args).await,
        Command::Vmaas(args) => {
            let config = CephtoolsConfig::load(true)?;
            vmaas::execute(&config, args).await
        }
        Command::Juju { command } => {
            let config = CephtoolsConfig::load(true)?;
            juju::execute(&config, command).await
        }
        Command::Microceph { command } => {
            let config = CephtoolsConfig::load(true)?;
            microceph::execute(&config, command).await
        }
        Command::Testflinger { command } => testflinger::execute(command).await,
    }
}
