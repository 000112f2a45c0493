//! `ensure-nodes` / `destroy-nodes`: lab VMs via the `maas-nodes` plan.
use log::*;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path};

use crate::{
    error::{CephtoolsError, Result},
    exec::CommandRunnerExt,
    state,
    terraform::{Terragrunt, hcl_string},
    vmaas::Lab,
};

/// Variables file written for the node plan. Holds the MAAS API key.
pub const NODES_VAR_FILE: &str = "ensure-nodes.hcl";
/// Tag put on unused block devices of lab machines.
pub const OSD_TAG: &str = "osd";

/// Shape of the lab VMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSpec {
    /// Size of each data disk in GB.
    pub vm_data_disk_size: u64,
    pub vm_data_disk_count: u64,
    pub vm_count: u64,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            vm_data_disk_size: 8,
            vm_data_disk_count: 1,
            vm_count: 6,
        }
    }
}

impl NodeSpec {
    pub fn validate(&self) -> Result<()> {
        if self.vm_data_disk_size == 0 || self.vm_data_disk_count == 0 {
            return Err(CephtoolsError::invalid_args(
                "--vm-data-disk-size and --vm-data-disk-count must be positive.",
            ));
        }

        if self.vm_count == 0 {
            return Err(CephtoolsError::invalid_args(
                "--vm-count must be a positive integer.",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Machine {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    system_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    id: Option<serde_json::Value>,
    #[serde(default)]
    used_for: String,
}

fn block_device_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders `name = value` lines for a terraform variables file.
pub fn render_var_file(vars: &[(&str, String)]) -> String {
    vars.iter()
        .map(|(name, value)| format!("{name} = {value}\n"))
        .collect()
}

impl Lab<'_> {
    fn var_file(&self) -> std::path::PathBuf {
        self.state.path(NODES_VAR_FILE)
    }

    fn write_node_vars(&self, spec: &NodeSpec, vm_host_id: &str) -> Result<()> {
        let cloud = self.state.read_cloud()?;
        let (_, api_key) = self.state.read_credential()?;
        let network = self.state.read_network()?;

        let vars = [
            ("maas_api_url", hcl_string(&cloud.endpoint)),
            ("maas_api_key", hcl_string(api_key.expose_secret())),
            ("lxd_vm_host_id", hcl_string(vm_host_id)),
            ("vm_data_disk_size", spec.vm_data_disk_size.to_string()),
            ("vm_data_disk_count", spec.vm_data_disk_count.to_string()),
            ("vm_count", spec.vm_count.to_string()),
            ("primary_subnet_cidr", hcl_string(&network.primary.cidr)),
            ("external_subnet_cidr", hcl_string(&network.external.cidr)),
        ];

        state::write_private(&self.var_file(), &render_var_file(&vars))
    }

    fn var_file_arg(&self) -> String {
        format!("-var-file={}", self.var_file().display())
    }

    /// Creates the MAAS tag `tag` unless it exists.
    pub async fn ensure_tag(&self, tag: &str) -> Result<()> {
        let tags: Option<Vec<Tag>> =
            self.runner.json(self.maas(["tags", "read"])).await?;

        if tags.unwrap_or_default().iter().any(|t| t.name == tag) {
            return Ok(());
        }

        self.runner
            .run_checked(self.maas([
                "tags".to_string(),
                "create".to_string(),
                format!("name={tag}"),
            ]))
            .await?;
        Ok(())
    }

    /// Tags the machines named `hostnames`, returning hostname to system id
    /// for every machine MAAS knows.
    pub async fn tag_machines(
        &self,
        hostnames: &[String],
        tag: &str,
    ) -> Result<BTreeMap<String, String>> {
        if hostnames.is_empty() {
            return Ok(BTreeMap::new());
        }

        let machines: Option<Vec<Machine>> =
            self.runner.json(self.maas(["machines", "read"])).await?;

        let system_ids: BTreeMap<String, String> = machines
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| match (m.hostname, m.system_id) {
                (Some(h), Some(id)) if !h.is_empty() && !id.is_empty() => {
                    Some((h, id))
                }
                _ => None,
            })
            .collect();

        let mut missing = vec![];

        for hostname in hostnames {
            let Some(system_id) = system_ids.get(hostname) else {
                missing.push(hostname.as_str());
                continue;
            };

            self.runner
                .run_checked(self.maas([
                    "tag".to_string(),
                    "update-nodes".to_string(),
                    tag.to_string(),
                    format!("add={system_id}"),
                ]))
                .await?;
        }

        if !missing.is_empty() {
            missing.sort();
            warn!(
                "Unable to tag machines not found in MAAS: {}",
                missing.join(", ")
            );
        }

        Ok(system_ids)
    }

    /// Tags every unused block device of the named machines with `tag`.
    pub async fn tag_data_disks(
        &self,
        hostnames: &[String],
        system_ids: &BTreeMap<String, String>,
        tag: &str,
    ) -> Result<()> {
        for system_id in hostnames.iter().filter_map(|h| system_ids.get(h)) {
            let devices: Option<Vec<BlockDevice>> = self
                .runner
                .json(self.maas(["block-devices", "read", system_id.as_str()]))
                .await?;

            for device in devices.unwrap_or_default() {
                if device.used_for != "Unused" {
                    continue;
                }
                let Some(id) = device.id.as_ref().map(block_device_id) else {
                    continue;
                };

                self.runner
                    .run_checked(self.maas([
                        "block-device".to_string(),
                        "add-tag".to_string(),
                        system_id.clone(),
                        id,
                        format!("tag={tag}"),
                    ]))
                    .await?;
            }
        }

        Ok(())
    }

    /// `ensure-nodes` against the plan in `plan_dir`.
    pub async fn ensure_nodes(&self, spec: &NodeSpec, plan_dir: &Path) -> Result<()> {
        spec.validate()?;

        let vm_host_id = self.vm_host_id().await?;
        self.write_node_vars(spec, &vm_host_id)?;

        let terragrunt = Terragrunt::new(self.runner, plan_dir);
        terragrunt
            .apply(&["-parallelism=1".to_string(), self.var_file_arg()])
            .await?;

        let hostnames = terragrunt.vm_hostnames().await?;
        let tag = &self.ctx.maas_tag;

        self.ensure_tag(tag).await?;
        let system_ids = self.tag_machines(&hostnames, tag).await?;
        self.tag_data_disks(&hostnames, &system_ids, OSD_TAG).await?;

        println!("Terragrunt apply completed; MAAS will reconcile VM nodes.");
        Ok(())
    }

    /// `destroy-nodes`: tears down what `ensure-nodes` created.
    pub async fn destroy_nodes(&self, plan_dir: &Path) -> Result<()> {
        let var_file = self.var_file();
        if !var_file.exists() {
            return Err(CephtoolsError::invalid_config(format!(
                "{} not found; run ensure-nodes first",
                var_file.display()
            )));
        }

        Terragrunt::new(self.runner, plan_dir)
            .destroy(&[self.var_file_arg()])
            .await?;

        println!("Terragrunt destroy completed.");
        Ok(())
    }
}
