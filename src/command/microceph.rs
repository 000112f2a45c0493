//! `microceph disk add`.
use crate::{
    cli::{DiskAddArgs, DiskCommand, MicrocephCommand},
    config::CephtoolsConfig,
    error::Result,
    exec::{CommandRunner, SystemRunner},
    juju::Juju,
    microceph::{failures_error, remote_command, resolve_nodes, run_on_nodes},
};

pub async fn execute(
    config: &CephtoolsConfig,
    cmd: &MicrocephCommand,
) -> Result<()> {
    match cmd {
        MicrocephCommand::Disk {
            command: DiskCommand::Add(args),
        } => disk_add(&SystemRunner, &config.juju_model, args).await,
    }
}

async fn disk_add(
    runner: &dyn CommandRunner,
    model: &str,
    args: &DiskAddArgs,
) -> Result<()> {
    let juju = Juju::new(runner);
    let nodes = resolve_nodes(&juju, model, &args.nodes).await?;

    let mut disk_add = vec!["microceph".to_string(), "disk".into(), "add".into()];
    disk_add.extend(args.args.iter().cloned());
    let command = remote_command(&disk_add, !args.no_sudo);

    let failures =
        run_on_nodes(&juju, model, &nodes, &command, args.dry_run).await?;

    match failures_error(&command, &failures) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
