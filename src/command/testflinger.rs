//! `testflinger reserve` / `testflinger deploy`.
use log::*;
use std::path::PathBuf;

use crate::{
    cli::{ReserveArgs, TestflingerCommand},
    error::{CephtoolsError, Result},
    exec::SystemRunner,
    state,
    testflinger::{
        BackendConfig, BackendOverrides, ReservationDetails, Testflinger,
        deploy_script, ensure_backend_config, remote_deploy,
    },
};

pub async fn execute(cmd: &TestflingerCommand) -> Result<()> {
    match cmd {
        TestflingerCommand::Reserve(args) => {
            if let Some(details) = reserve(args).await? {
                print_summary(&details, &args.testflinger_bin);
            }
            Ok(())
        }
        TestflingerCommand::Deploy(args) => {
            let Some(details) = reserve(args).await? else {
                return Ok(());
            };
            print_summary(&details, &args.testflinger_bin);

            println!("Configuring remote environment for VMaaS deployment.");
            remote_deploy(&SystemRunner, &details, &deploy_script()).await?;

            println!("Remote deployment succeeded. VMaaS should now be installed.");
            println!("Connect with: {}", details.ssh_command());
            Ok(())
        }
    }
}

fn reserve_for(args: &ReserveArgs) -> Result<u64> {
    u64::try_from(args.reserve_for)
        .ok()
        .filter(|secs| *secs > 0)
        .ok_or_else(|| {
            CephtoolsError::invalid_args("--reserve-for must be a positive integer.")
        })
}

fn config_path(args: &ReserveArgs) -> Result<PathBuf> {
    match &args.config {
        Some(path) => state::expand_user(path),
        None => BackendConfig::default_path(),
    }
}

fn overrides(args: &ReserveArgs) -> BackendOverrides {
    BackendOverrides {
        launchpad_account: args.launchpad_account.clone(),
        job_tag: args.job_tag.clone(),
        mattermost_name: args.mattermost_name.clone(),
    }
}

/// Submits the reservation and waits for the machine. `None` when the
/// backend configuration was only just created.
async fn reserve(args: &ReserveArgs) -> Result<Option<ReservationDetails>> {
    let reserve_for = reserve_for(args)?;
    let path = config_path(args)?;

    let (config, created) = ensure_backend_config(&path, overrides(args))?;
    if created {
        return Ok(None);
    }
    debug!("using testflinger configuration {}", path.display());

    let system = SystemRunner;
    let details = Testflinger::new(&system, &args.testflinger_bin)
        .reserve(&system, &config, &args.queue, reserve_for)
        .await?;

    Ok(Some(details))
}

fn print_summary(details: &ReservationDetails, testflinger_bin: &str) {
    for line in details.summary(testflinger_bin) {
        println!("{line}");
    }
}
