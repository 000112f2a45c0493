//! MAAS region setup, login and VM host registration.
use log::*;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::{
    error::{CephtoolsError, Result},
    exec::{Cmd, CommandRunnerExt},
    vmaas::{LXD_PORT, Lab},
};

const BOOT_RESOURCE_ATTEMPTS: usize = 20;
const REQUIRED_ARCHITECTURE: &str = "amd64/generic";

#[derive(Debug, Deserialize)]
struct VmHost {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    system_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BootResource {
    #[serde(default)]
    architecture: Option<String>,
}

/// Whether `maas status` output reports both regiond and rackd running.
pub fn services_active(status: &str) -> Result<bool> {
    let status = status.to_lowercase();
    let regiond = Regex::new(r"regiond\s+enabled\s+active")?;
    let rackd = Regex::new(r"rackd\s+enabled\s+active")?;
    Ok(regiond.is_match(&status) && rackd.is_match(&status))
}

impl Lab<'_> {
    /// `maas <admin> ARGS...`
    pub(super) fn maas<I, S>(&self, args: I) -> Cmd
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Cmd::new("maas").arg(&self.ctx.admin).args(args)
    }

    /// API key of the admin user.
    pub async fn maas_api_key(&self) -> Result<SecretString> {
        let cmd = Cmd::new("sudo").args(["maas", "apikey", "--username"]).arg(
            &self.ctx.admin,
        );
        let key = self.runner.stdout(cmd).await?;
        Ok(SecretString::from(key.trim().to_string()))
    }

    /// `maas-init`.
    pub async fn maas_init(&self) -> Result<()> {
        let ctx = self.ctx;
        let password = ctx.admin_pw.expose_secret();

        let init = Cmd::new("sudo")
            .args([
                "maas",
                "init",
                "region+rack",
                "--database-uri",
                "maas-test-db:///",
                "--admin-username",
                &ctx.admin,
                "--admin-password",
            ])
            .secret_arg(password)
            .args(["--admin-email", &ctx.admin_mail, "--maas-url", &ctx.maas_url]);

        let output = self.runner.run(init).await?;
        if output.success() {
            self.pacing.settle(10).await;
        } else {
            // an already initialised region refuses a second init
            warn!("{}", output.stderr.trim());
        }

        let createadmin = Cmd::new("sudo")
            .args(["maas", "createadmin", "--username", &ctx.admin, "--password"])
            .secret_arg(password)
            .args(["--email", &ctx.admin_mail]);
        self.run_tolerant(createadmin).await?;

        let api_key = self.maas_api_key().await?;
        self.runner
            .run_checked(
                Cmd::new("maas")
                    .args(["login", &ctx.admin, &ctx.maas_url])
                    .secret_arg(api_key.expose_secret()),
            )
            .await?;
        self.pacing.settle(5).await;

        self.verify_maas().await?;
        println!("maas initialized and logged in.");

        self.state.write_cloud(&ctx.maas_url)?;
        println!("cloud.yaml written.");
        Ok(())
    }

    /// Checks regiond and rackd are active and the API answers.
    pub async fn verify_maas(&self) -> Result<()> {
        let status = self
            .runner
            .stdout(Cmd::new("sudo").args(["maas", "status"]))
            .await?;

        if !services_active(&status)? {
            return Err(CephtoolsError::invalid_config(
                "MAAS services not running (regiond/rackd must be enabled and active)",
            ));
        }

        self.runner
            .run_checked(self.maas(["boot-resources", "read"]))
            .await?;
        Ok(())
    }

    async fn vm_hosts(&self) -> Result<Vec<VmHost>> {
        let hosts: Option<Vec<VmHost>> =
            self.runner.json(self.maas(["vm-hosts", "read"])).await?;
        Ok(hosts.unwrap_or_default())
    }

    /// MAAS id of the configured VM host.
    pub async fn vm_host_id(&self) -> Result<String> {
        let vmhost = &self.ctx.vmhost;

        self.vm_hosts()
            .await?
            .into_iter()
            .find(|h| &h.name == vmhost)
            .and_then(|h| match h.id {
                Some(serde_json::Value::String(id)) => Some(id),
                Some(serde_json::Value::Number(id)) => Some(id.to_string()),
                _ => h.system_id,
            })
            .ok_or_else(|| {
                CephtoolsError::invalid_config(format!(
                    "VM host '{vmhost}' not found in MAAS vm-hosts output"
                ))
            })
    }

    /// `register-vm-host`.
    pub async fn register_vm_host(&self) -> Result<()> {
        let ctx = self.ctx;

        if self.vm_hosts().await?.iter().any(|h| h.name == ctx.vmhost) {
            info!("VM host {} already registered", ctx.vmhost);
        } else {
            let cmd = self
                .maas([
                    "vm-hosts".to_string(),
                    "create".to_string(),
                    "type=lxd".to_string(),
                    format!("name={}", ctx.vmhost),
                    "project=default".to_string(),
                    format!("power_address=https://{}:{LXD_PORT}", ctx.ip),
                ])
                .secret_arg(format!("password={}", ctx.admin_pw.expose_secret()));
            self.runner.run_checked(cmd).await?;
        }

        self.import_boot_resources().await?;
        println!("vm host registered and boot resources import kicked off.");
        Ok(())
    }

    /// Starts the boot resource import and polls until the amd64 generic
    /// image is listed.
    pub async fn import_boot_resources(&self) -> Result<()> {
        self.runner
            .run_checked(self.maas(["boot-resources", "import"]))
            .await?;
        self.pacing.settle(10).await;

        for attempt in 1..=BOOT_RESOURCE_ATTEMPTS {
            let resources: Option<Vec<BootResource>> = self
                .runner
                .json(self.maas(["boot-resources", "read"]).quiet())
                .await?;

            if resources.unwrap_or_default().iter().any(|r| {
                r.architecture.as_deref() == Some(REQUIRED_ARCHITECTURE)
            }) {
                return Ok(());
            }

            debug!(
                "waiting for {REQUIRED_ARCHITECTURE} boot resources (attempt {attempt}/{BOOT_RESOURCE_ATTEMPTS})"
            );
            tokio::time::sleep(self.pacing.poll_interval).await;
        }

        Err(CephtoolsError::invalid_config(format!(
            "failed to import {REQUIRED_ARCHITECTURE} boot resources"
        )))
    }
}
