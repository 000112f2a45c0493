//! `install-deps`: snaps and the terragrunt binary.
use log::*;
use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{
    error::{CephtoolsError, Result},
    exec::{Cmd, CommandRunnerExt},
    vmaas::Lab,
};

/// Pinned terragrunt release.
pub const TERRAGRUNT_VERSION: &str = "v0.89.3";
const TERRAGRUNT_BIN_DIR: &str = "/usr/local/bin";

/// Snap names listed by `snap list` output, header skipped.
pub fn installed_snaps(listing: &str) -> Vec<&str> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .collect()
}

/// Release asset name of terragrunt for `os`/`arch` as reported by
/// [`std::env::consts`].
pub fn terragrunt_asset(os: &str, arch: &str) -> Result<String> {
    if os != "linux" {
        return Err(CephtoolsError::invalid_config(
            "terragrunt installer currently supports only Linux hosts",
        ));
    }

    let arch = match arch {
        "x86_64" | "amd64" => "amd64",
        "aarch64" | "arm64" => "arm64",
        other => {
            return Err(CephtoolsError::invalid_config(format!(
                "unsupported architecture for terragrunt: {other}"
            )));
        }
    };

    Ok(format!("terragrunt_linux_{arch}"))
}

fn on_path(binary: &str) -> bool {
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

impl Lab<'_> {
    /// Installs `name` from the snap store unless it is already present.
    pub async fn ensure_snap(
        &self,
        name: &str,
        channel: Option<&str>,
        classic: bool,
    ) -> Result<()> {
        let listing = self.runner.stdout(Cmd::new("snap").arg("list")).await?;

        if installed_snaps(&listing).contains(&name) {
            debug!("snap {name} already installed");
            return Ok(());
        }

        let mut cmd = Cmd::new("sudo").args(["snap", "install", name]);
        if let Some(channel) = channel {
            cmd = cmd.arg(format!("--channel={channel}"));
        }
        if classic {
            cmd = cmd.arg("--classic");
        }

        self.runner.run_checked(cmd).await?;
        Ok(())
    }

    /// Downloads the pinned terragrunt release into `/usr/local/bin` when no
    /// terragrunt is installed.
    pub async fn ensure_terragrunt(&self) -> Result<()> {
        let target = Path::new(TERRAGRUNT_BIN_DIR).join("terragrunt");
        if target.exists() || on_path("terragrunt") {
            debug!("terragrunt already installed");
            return Ok(());
        }

        let asset = terragrunt_asset(env::consts::OS, env::consts::ARCH)?;
        let url = format!(
            "https://github.com/gruntwork-io/terragrunt/releases/download/{TERRAGRUNT_VERSION}/{asset}"
        );

        let download_dir = tempfile::tempdir()?;
        let download: PathBuf = download_dir.path().join(&asset);
        let download_str = download.display().to_string();

        self.runner
            .run_checked(
                Cmd::new("curl").args(["-fsSL", "-o", &download_str, &url]),
            )
            .await?;
        self.runner
            .run_checked(Cmd::new("chmod").args(["+x", &download_str]))
            .await?;
        self.runner
            .run_checked(Cmd::new("sudo").args([
                "mv",
                &download_str,
                &target.display().to_string(),
            ]))
            .await?;

        Ok(())
    }

    async fn lxd_ready(&self) -> Result<()> {
        self.run_tolerant(Cmd::new("sudo").args(["lxd", "waitready"]))
            .await
    }

    /// `install-deps`.
    pub async fn install_deps(&self) -> Result<()> {
        self.ensure_snap("maas", Some(&self.ctx.maas_ch), false)
            .await?;
        self.ensure_snap("maas-test-db", None, false).await?;
        self.ensure_snap("lxd", None, false).await?;
        self.ensure_snap("terraform", None, true).await?;
        self.ensure_terragrunt().await?;
        self.lxd_ready().await?;

        println!("deps installed.");
        Ok(())
    }
}
