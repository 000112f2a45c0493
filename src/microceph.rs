//! Running MicroCeph commands across the machines of a Juju model.
use log::*;

use crate::{
    error::{CephtoolsError, Result},
    exec::CommandOutput,
    juju::Juju,
};

/// Juju application whose machines are targeted by default.
pub const MICROCEPH_APP: &str = "microceph";

/// Parses a `--nodes` value: a non-negative machine number.
pub fn parse_node(value: &str) -> Result<u64> {
    let value = value.trim();

    if value.is_empty() {
        return Err(CephtoolsError::invalid_args(
            "--nodes entries must be non-empty integers.",
        ));
    }

    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(CephtoolsError::invalid_args(format!(
            "--nodes entries must be non-negative integers, got '{value}'."
        )));
    }

    value.parse().map_err(|_| {
        CephtoolsError::invalid_args(format!(
            "--nodes entry '{value}' is out of range."
        ))
    })
}

/// Target machines: the explicit `nodes` verbatim, or the machines of the
/// microceph application in `model`.
pub async fn resolve_nodes(
    juju: &Juju<'_>,
    model: &str,
    nodes: &[String],
) -> Result<Vec<u64>> {
    if !nodes.is_empty() {
        return nodes.iter().map(|n| parse_node(n)).collect();
    }

    let machines = juju.application_machines(model, MICROCEPH_APP).await?;

    if machines.is_empty() {
        return Err(CephtoolsError::invalid_config(format!(
            "No {MICROCEPH_APP} units found in Juju model '{model}'. Ensure the application is deployed or provide --nodes."
        )));
    }

    debug!("resolved {MICROCEPH_APP} machines: {machines:?}");
    Ok(machines)
}

/// The command run on every node, optionally under sudo.
pub fn remote_command(args: &[String], sudo: bool) -> Vec<String> {
    let mut command = vec![];
    if sudo {
        command.push("sudo".to_string());
    }
    command.extend(args.iter().cloned());
    command
}

/// A node whose command exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub node: u64,
    pub code: i32,
    pub stderr: String,
}

/// Error summarising every failed node for `command`. The exit code is the
/// first failure's.
pub fn failures_error(
    command: &[String],
    failures: &[NodeFailure],
) -> Option<CephtoolsError> {
    let first = failures.first()?;

    let lines = failures
        .iter()
        .map(|f| {
            if f.stderr.is_empty() {
                format!("- {}: exit code {}", f.node, f.code)
            } else {
                format!("- {}: exit code {} (stderr: {})", f.node, f.code, f.stderr)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    Some(CephtoolsError::CommandFailed {
        command: shell_words::join(command),
        code: first.code,
        stderr: format!("Command failed on one or more nodes:\n{lines}"),
    })
}

/// Runs `command` on each node in turn over `juju ssh`. A failing node does
/// not stop the others. With `dry_run` only the per-node line is printed.
pub async fn run_on_nodes(
    juju: &Juju<'_>,
    model: &str,
    nodes: &[u64],
    command: &[String],
    dry_run: bool,
) -> Result<Vec<NodeFailure>> {
    if nodes.is_empty() {
        return Err(CephtoolsError::invalid_args(
            "No nodes available to run the command.",
        ));
    }

    let quoted = shell_words::join(command);
    let mut failures = vec![];

    for node in nodes {
        println!("[{node}] {quoted}");

        if dry_run {
            continue;
        }

        let CommandOutput {
            code,
            stdout,
            stderr,
        } = juju.ssh(model, &node.to_string(), command).await?;

        if !stdout.is_empty() {
            print!("{stdout}");
        }
        if !stderr.is_empty() {
            eprint!("{stderr}");
        }

        if code != 0 {
            failures.push(NodeFailure {
                node: *node,
                code,
                stderr: stderr.trim().to_string(),
            });
        }
    }

    Ok(failures)
}
