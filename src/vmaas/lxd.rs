//! `lxd-init` and the LXD health check.
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::{
    error::{CephtoolsError, Result},
    exec::{Cmd, CommandRunnerExt},
    vmaas::{EXT_NETWORK, LXD_PORT, Lab},
};

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    api_status: String,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct NetworkInfo {
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

fn network_url(name: &str) -> String {
    format!("/1.0/networks/{name}")
}

fn lxc<I, S>(args: I) -> Cmd
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Cmd::new("lxc").args(args)
}

impl Lab<'_> {
    async fn lxd_networks(&self) -> Result<Vec<String>> {
        let networks: Option<Vec<String>> =
            self.runner.json(lxc(["query", "/1.0/networks"])).await?;
        Ok(networks.unwrap_or_default())
    }

    pub(super) async fn lxd_network(&self, name: &str) -> Result<NetworkInfo> {
        let info: Option<NetworkInfo> = self
            .runner
            .json(lxc(["query".to_string(), network_url(name)]))
            .await?;
        Ok(info.unwrap_or_default())
    }

    /// Creates the managed NAT network `name` unless LXD already has it.
    pub async fn ensure_lxd_network(&self, name: &str) -> Result<()> {
        if self.lxd_networks().await?.contains(&network_url(name)) {
            return Ok(());
        }

        self.runner
            .run_checked(lxc([
                "network",
                "create",
                name,
                "ipv4.address=auto",
                "ipv4.nat=true",
                "ipv6.address=none",
            ]))
            .await?;
        Ok(())
    }

    /// `lxd-init`.
    pub async fn lxd_init(&self) -> Result<()> {
        let port = LXD_PORT.to_string();

        self.runner
            .run_checked(Cmd::new("sudo").args([
                "snap",
                "set",
                "lxd",
                "daemon.user.group=adm",
            ]))
            .await?;

        // re-running init against an initialised LXD fails; that is fine
        self.run_tolerant(
            Cmd::new("sudo")
                .args(["lxd", "init", "--auto"])
                .secret_arg(format!(
                    "--trust-password={}",
                    self.ctx.admin_pw.expose_secret()
                ))
                .arg(format!("--network-address={}", self.ctx.ip))
                .arg(format!("--network-port={port}")),
        )
        .await?;

        self.run_tolerant(lxc([
            "config".to_string(),
            "set".to_string(),
            "core.https_address".to_string(),
            format!(":{port}"),
        ]))
        .await?;

        for setting in ["dns.mode=none", "ipv4.dhcp=false", "ipv6.dhcp=false"] {
            self.run_tolerant(lxc([
                "network",
                "set",
                self.ctx.lxdbridge.as_str(),
                setting,
            ]))
            .await?;
        }

        self.ensure_lxd_network(EXT_NETWORK).await?;
        self.pacing.settle(2).await;

        self.verify_lxd().await?;
        println!("lxd ready.");
        Ok(())
    }

    /// Checks the API is stable, listens on the lab port and both lab
    /// networks are managed.
    pub async fn verify_lxd(&self) -> Result<()> {
        let info: Option<ServerInfo> =
            self.runner.json(lxc(["query", "/1.0"])).await?;
        let status = info.map(|i| i.api_status).unwrap_or_default();
        if status != "stable" {
            return Err(CephtoolsError::invalid_config(format!(
                "LXD api_status is '{status}', expected 'stable'"
            )));
        }

        let https_address = self
            .runner
            .stdout(lxc(["config", "get", "core.https_address"]))
            .await?;
        let expected = format!(":{LXD_PORT}");
        if https_address.trim() != expected {
            return Err(CephtoolsError::invalid_config(format!(
                "expected core.https_address '{expected}', got '{}'",
                https_address.trim()
            )));
        }

        let bridge = &self.ctx.lxdbridge;
        if !self.lxd_networks().await?.contains(&network_url(bridge)) {
            return Err(CephtoolsError::invalid_config(format!(
                "LXD network {bridge} not found"
            )));
        }

        for name in [bridge.as_str(), EXT_NETWORK] {
            if !self.lxd_network(name).await?.managed {
                return Err(CephtoolsError::invalid_config(format!(
                    "LXD network {name} is not managed"
                )));
            }
        }

        Ok(())
    }
}
