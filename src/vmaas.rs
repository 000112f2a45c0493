//! Single-host lab bootstrap: LXD, MAAS and a Juju controller on top.
//!
//! Each step shells out to the tool it configures and relies on that tool
//! for idempotence. Steps run strictly in sequence and the first failure
//! stops the run.
use log::*;
use secrecy::SecretString;
use std::{net::UdpSocket, time::Duration};
use tokio::time::sleep;

use crate::{
    config::{
        VmaasDefaults,
        lab::{CLOUD_FILE, CREDENTIALS_FILE, LabState, MAAS_CLOUD},
    },
    error::{CephtoolsError, Result},
    exec::{Cmd, CommandRunner, CommandRunnerExt},
    juju::{JUJU_SPACE, Juju, MAAS_CONTROLLER},
};

pub mod deps;
pub mod lxd;
pub mod maas;
pub mod network;
pub mod nodes;

pub use nodes::NodeSpec;

/// Managed LXD network attached to the `external` space.
pub const EXT_NETWORK: &str = "ext";
/// Port the LXD API listens on.
pub const LXD_PORT: u16 = 8443;
/// Port of the MAAS region API.
pub const MAAS_PORT: u16 = 5240;

const ROUTE_PROBE: &str = "8.8.8.8:80";

/// Everything the lab steps need to know about the host and its MAAS.
#[derive(Debug, Clone)]
pub struct VmaasContext {
    pub admin: String,
    pub admin_pw: SecretString,
    pub admin_mail: String,
    pub maas_ch: String,
    pub lxdbridge: String,
    pub vmhost: String,
    pub maas_tag: String,
    pub juju_model: String,
    /// Primary IPv4 address of the host.
    pub ip: String,
    pub maas_url: String,
}

impl VmaasContext {
    pub fn new(defaults: VmaasDefaults, juju_model: &str, ip: &str) -> Self {
        Self {
            admin: defaults.admin,
            admin_pw: SecretString::from(defaults.admin_pw),
            admin_mail: defaults.admin_mail,
            maas_ch: defaults.maas_ch,
            lxdbridge: defaults.lxdbridge,
            vmhost: defaults.vmhost,
            maas_tag: defaults.maas_tag,
            juju_model: juju_model.into(),
            ip: ip.into(),
            maas_url: format!("http://{ip}:{MAAS_PORT}/MAAS"),
        }
    }
}

/// Host address used for outbound traffic. The route is probed with an
/// unconnected UDP socket; `hostname -I` is the fallback.
pub async fn primary_ip(runner: &dyn CommandRunner) -> Result<String> {
    let probed = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect(ROUTE_PROBE)?;
            socket.local_addr()
        })
        .map(|addr| addr.ip().to_string());

    match probed {
        Ok(ip) => Ok(ip),
        Err(e) => {
            debug!("route probe failed, falling back to hostname -I: {e}");
            let stdout = runner
                .stdout(Cmd::new("hostname").arg("-I").quiet())
                .await?;

            stdout.split_whitespace().next().map(String::from).ok_or_else(
                || {
                    CephtoolsError::invalid_config(
                        "unable to determine the host IP address",
                    )
                },
            )
        }
    }
}

/// How long the lab waits for external services.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// Honour the fixed settle delays after slow MAAS/LXD operations.
    pub settle: bool,
    /// Delay between polls of boot resources and controllers.
    pub poll_interval: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle: true,
            poll_interval: Duration::from_secs(6),
        }
    }
}

impl Pacing {
    /// No waiting at all.
    pub fn immediate() -> Self {
        Self {
            settle: false,
            poll_interval: Duration::ZERO,
        }
    }

    async fn settle(&self, secs: u64) {
        if self.settle {
            sleep(Duration::from_secs(secs)).await;
        }
    }
}

/// Runs the lab steps for one [`VmaasContext`].
pub struct Lab<'a> {
    runner: &'a dyn CommandRunner,
    ctx: &'a VmaasContext,
    state: LabState,
    pacing: Pacing,
}

impl<'a> Lab<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        ctx: &'a VmaasContext,
        state: LabState,
    ) -> Self {
        Self {
            runner,
            ctx,
            state,
            pacing: Pacing::default(),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    fn juju(&self) -> Juju<'a> {
        Juju::new(self.runner).with_poll_interval(self.pacing.poll_interval)
    }

    /// Runs `cmd` and only logs a non-zero exit.
    async fn run_tolerant(&self, cmd: Cmd) -> Result<()> {
        let command = cmd.to_string();
        let output = self.runner.run(cmd).await?;

        if !output.success() {
            warn!(
                "`{command}` exited with {} (ignored): {}",
                output.code,
                output.stderr.trim()
            );
        }

        Ok(())
    }

    /// `juju-init`: verify LXD and MAAS, store the MAAS credential and
    /// bootstrap the controller.
    pub async fn juju_init(&self) -> Result<()> {
        self.verify_lxd().await?;
        self.verify_maas().await?;
        self.ensure_snap("juju", None, false).await?;

        let api_key = self.maas_api_key().await?;
        self.state.write_credentials(&api_key)?;

        self.juju_onboard().await?;
        println!("juju initialized and controller bootstrapped.");
        Ok(())
    }

    async fn juju_onboard(&self) -> Result<()> {
        // both files must be readable before juju is touched
        self.state.read_cloud()?;
        self.state.read_credential()?;

        let juju = self.juju();

        if juju.has_cloud(MAAS_CLOUD).await? {
            info!("juju cloud {MAAS_CLOUD} already present");
        } else {
            juju.add_cloud(MAAS_CLOUD, &self.state.path(CLOUD_FILE))
                .await?;
        }

        if juju.has_credential(MAAS_CLOUD).await? {
            info!("juju credential for {MAAS_CLOUD} already present");
        } else {
            juju.add_credential(MAAS_CLOUD, &self.state.path(CREDENTIALS_FILE))
                .await?;
        }

        self.pacing.settle(2).await;

        if juju.has_controller(MAAS_CONTROLLER).await? {
            info!("juju controller {MAAS_CONTROLLER} already bootstrapped");
        } else {
            juju.bootstrap(MAAS_CLOUD, MAAS_CONTROLLER, JUJU_SPACE).await?;
        }

        juju.switch(MAAS_CONTROLLER).await?;
        juju.wait_for_controller_machines().await
    }

    /// `install`: every step in order, then the Juju model.
    pub async fn install(&self) -> Result<()> {
        println!("Starting full vmaas installation...");

        banner(1, "Installing dependencies");
        self.install_deps().await?;

        banner(2, "Initializing LXD");
        self.lxd_init().await?;

        banner(3, "Initializing MAAS");
        self.maas_init().await?;

        banner(4, "Registering VM host");
        self.register_vm_host().await?;

        banner(5, "Configuring network");
        self.configure_network().await?;

        banner(6, "Initializing Juju");
        self.juju_init().await?;

        banner(7, "Creating Juju model");
        let constraint = format!("tags={}", self.ctx.maas_tag);
        self.juju()
            .ensure_model(MAAS_CONTROLLER, &self.ctx.juju_model, &constraint)
            .await?;
        println!(
            "Juju model '{}' ensured with constraint {constraint}.",
            self.ctx.juju_model
        );

        println!("\n=== Installation complete! ===");
        println!("MAAS URL: {}", self.ctx.maas_url);
        println!("Admin user: {}", self.ctx.admin);
        println!("You can now use 'juju status' to check your controller.");
        Ok(())
    }
}

fn banner(step: usize, title: &str) {
    println!("\n=== Step {step}/7: {title} ===");
}
