//! `configure-network`: MAAS subnets, DHCP and spaces for the lab bridges.
use ipnet::Ipv4Net;
use log::*;
use serde::Deserialize;
use std::net::Ipv4Addr;

use crate::{
    config::lab::{DynamicRange, LabNetwork, NetworkSegment},
    error::{CephtoolsError, Result},
    exec::{Cmd, CommandRunnerExt},
    juju::{EXTERNAL_SPACE, JUJU_SPACE},
    vmaas::{EXT_NETWORK, Lab},
};

/// Addresses at the top of each subnet handed to MAAS dynamic DHCP.
pub const DYNAMIC_RANGE_SIZE: u32 = 80;

#[derive(Debug, Deserialize)]
struct Route {
    dst: Option<String>,
    prefsrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Subnet {
    id: u64,
    #[serde(default)]
    cidr: String,
}

#[derive(Debug, Deserialize)]
struct Vlan {
    fabric_id: u64,
    vid: u64,
}

#[derive(Debug, Deserialize)]
struct SubnetDetail {
    vlan: Vlan,
}

#[derive(Debug, Deserialize)]
struct RackController {
    system_id: String,
}

#[derive(Debug, Deserialize)]
struct Space {
    id: u64,
    #[serde(default)]
    name: String,
}

/// MAAS identifiers of the subnet backing a CIDR.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubnetIds {
    subnet_id: u64,
    fabric_id: u64,
    vlan_id: u64,
    rack_sysid: String,
}

/// CIDR and gateway of the first `ip -j route` entry with a prefix and a
/// preferred source.
pub fn route_cidr_and_gateway(routes_json: &str) -> Result<(String, String)> {
    let routes: Vec<Route> = serde_json::from_str(routes_json)?;

    routes
        .into_iter()
        .find_map(|r| match (r.dst, r.prefsrc) {
            (Some(dst), Some(src)) if dst.contains('/') => Some((dst, src)),
            _ => None,
        })
        .ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "could not derive CIDR or gateway from routes: {}",
                routes_json.trim()
            ))
        })
}

/// CIDR and gateway of an LXD `ipv4.address` value such as `10.1.2.1/24`.
pub fn interface_cidr_and_gateway(address: &str) -> Result<(String, String)> {
    let iface: Ipv4Net = address.parse()?;
    Ok((iface.trunc().to_string(), iface.addr().to_string()))
}

/// The last [`DYNAMIC_RANGE_SIZE`] host addresses of `cidr`.
pub fn dynamic_range(cidr: &str) -> Result<DynamicRange> {
    let net: Ipv4Net = cidr.parse()?;

    let too_small = || {
        CephtoolsError::invalid_config(format!(
            "subnet {cidr} too small for {DYNAMIC_RANGE_SIZE} hosts"
        ))
    };

    if net.prefix_len() > 30 {
        return Err(too_small());
    }

    let first = u32::from(net.network()) + 1;
    let last = u32::from(net.broadcast()) - 1;

    if last - first + 1 < DYNAMIC_RANGE_SIZE {
        return Err(too_small());
    }

    Ok(DynamicRange {
        start: Ipv4Addr::from(last - DYNAMIC_RANGE_SIZE + 1).to_string(),
        end: Ipv4Addr::from(last).to_string(),
    })
}

impl Lab<'_> {
    async fn bridge_cidr_and_gateway(&self) -> Result<(String, String)> {
        let routes = self
            .runner
            .stdout(Cmd::new("ip").args(["-j", "r", "s", "dev", &self.ctx.lxdbridge]))
            .await?;
        route_cidr_and_gateway(&routes)
    }

    async fn lxd_network_cidr_and_gateway(
        &self,
        name: &str,
    ) -> Result<(String, String)> {
        let network = self.lxd_network(name).await?;

        match network.config.get("ipv4.address") {
            Some(address) if !address.eq_ignore_ascii_case("none") => {
                interface_cidr_and_gateway(address)
            }
            _ => Err(CephtoolsError::invalid_config(format!(
                "LXD network {name} lacks an IPv4 address"
            ))),
        }
    }

    async fn subnet_ids(&self, cidr: &str) -> Result<SubnetIds> {
        let subnets: Option<Vec<Subnet>> =
            self.runner.json(self.maas(["subnets", "read"])).await?;

        let subnet_id = subnets
            .unwrap_or_default()
            .into_iter()
            .find(|s| s.cidr == cidr)
            .map(|s| s.id)
            .ok_or_else(|| {
                CephtoolsError::invalid_config(format!(
                    "MAAS subnet for {cidr} not found"
                ))
            })?;

        let detail: SubnetDetail = self
            .runner
            .json(self.maas(["subnet".to_string(), "read".to_string(), subnet_id.to_string()]))
            .await?;

        let racks: Option<Vec<RackController>> = self
            .runner
            .json(self.maas(["rack-controllers", "read"]))
            .await?;

        let rack_sysid = racks
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|r| r.system_id)
            .ok_or_else(|| {
                CephtoolsError::invalid_config("MAAS has no rack controllers")
            })?;

        Ok(SubnetIds {
            subnet_id,
            fabric_id: detail.vlan.fabric_id,
            vlan_id: detail.vlan.vid,
            rack_sysid,
        })
    }

    async fn find_space(&self, name: &str) -> Result<Option<u64>> {
        let spaces: Option<Vec<Space>> =
            self.runner.json(self.maas(["spaces", "read"])).await?;

        Ok(spaces
            .unwrap_or_default()
            .into_iter()
            .find(|s| s.name == name)
            .map(|s| s.id))
    }

    /// Id of the MAAS space `name`, created when missing.
    pub async fn ensure_space(&self, name: &str) -> Result<u64> {
        if let Some(id) = self.find_space(name).await? {
            return Ok(id);
        }

        self.runner
            .run_checked(self.maas(["spaces".to_string(), "create".to_string(), format!("name={name}")]))
            .await?;

        self.find_space(name).await?.ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "MAAS space '{name}' not found after creation"
            ))
        })
    }

    /// Gateway, dynamic range, DHCP and space for one LXD network.
    async fn configure_segment(
        &self,
        bridge: &str,
        cidr: String,
        gateway: String,
        space: &str,
    ) -> Result<NetworkSegment> {
        let ids = self.subnet_ids(&cidr).await?;
        let subnet = ids.subnet_id.to_string();
        let fabric = ids.fabric_id.to_string();
        let vlan = ids.vlan_id.to_string();

        self.runner
            .run_checked(self.maas([
                "subnet".to_string(),
                "update".to_string(),
                subnet.clone(),
                format!("gateway_ip={gateway}"),
            ]))
            .await?;

        let range = dynamic_range(&cidr)?;
        // an existing range makes the create fail
        self.run_tolerant(self.maas([
            "ipranges".to_string(),
            "create".to_string(),
            "type=dynamic".to_string(),
            format!("subnet={subnet}"),
            format!("start_ip={}", range.start),
            format!("end_ip={}", range.end),
        ]))
        .await?;
        self.pacing.settle(12).await;

        self.runner
            .run_checked(self.maas([
                "vlan".to_string(),
                "update".to_string(),
                fabric.clone(),
                vlan.clone(),
                "dhcp_on=true".to_string(),
                format!("primary_rack={}", ids.rack_sysid),
            ]))
            .await?;
        println!("network configured on {bridge} ({cidr}, gw {gateway}).");

        let space_id = self.ensure_space(space).await?;
        self.runner
            .run_checked(self.maas([
                "vlan".to_string(),
                "update".to_string(),
                fabric,
                vlan,
                format!("space={space_id}"),
            ]))
            .await?;
        println!("space '{space}' ({space_id}) created and assigned to VLAN.");

        debug!("configured {bridge}: subnet {subnet}, space {space_id}");

        Ok(NetworkSegment {
            bridge: bridge.into(),
            cidr,
            gateway,
            dynamic_range: range,
            subnet_id: ids.subnet_id,
            fabric_id: ids.fabric_id,
            vlan_id: ids.vlan_id,
            rack_sysid: ids.rack_sysid,
            space_id,
        })
    }

    /// `configure-network`.
    pub async fn configure_network(&self) -> Result<LabNetwork> {
        let (cidr, gateway) = self.bridge_cidr_and_gateway().await?;
        let primary = self
            .configure_segment(&self.ctx.lxdbridge, cidr, gateway, JUJU_SPACE)
            .await?;

        let (cidr, gateway) =
            self.lxd_network_cidr_and_gateway(EXT_NETWORK).await?;
        let external = self
            .configure_segment(EXT_NETWORK, cidr, gateway, EXTERNAL_SPACE)
            .await?;

        let network = LabNetwork { primary, external };
        self.state.write_network(&network)?;
        println!("network.yaml written with current network configuration.");

        Ok(network)
    }
}
