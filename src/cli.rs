//! CLI argument parsing.
use clap::{Parser, Subcommand};

use crate::{
    config::VmaasDefaults,
    testflinger::{DEFAULT_BIN, DEFAULT_QUEUE, DEFAULT_RESERVE_FOR},
    vmaas::NodeSpec,
};

/// Release and lab automation for Ceph charms.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = false, global = true)]
    /// Enable debug logging.
    pub debug: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List pull requests merged between the revisions of two channels.
    ListPrs(ListPrsArgs),

    /// Release the revisions of one channel to another.
    CharmRel(CharmRelArgs),

    /// Bootstrap and manage the local MAAS + LXD + Juju lab.
    Vmaas(VmaasArgs),

    /// Juju deployments driven by Terragrunt plans.
    Juju {
        #[command(subcommand)]
        command: JujuCommand,
    },

    /// Run MicroCeph commands on the units of a model.
    Microceph {
        #[command(subcommand)]
        command: MicrocephCommand,
    },

    /// Reserve Testflinger machines.
    Testflinger {
        #[command(subcommand)]
        command: TestflingerCommand,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListPrsArgs {
    #[arg(long, default_value = ".")]
    /// Local checkout whose origin remote identifies the repository.
    pub repo: String,

    #[arg(long)]
    /// Repository URL. Takes precedence over --repo.
    pub github_repo: Option<String>,

    #[arg(long)]
    /// Access token. Falls back to GITHUB_TOKEN, then GH_TOKEN.
    pub github_token: Option<String>,

    #[arg(long, default_value_t = false)]
    /// Include pull requests that touch no file under the charm directory.
    pub all_paths: bool,

    /// Charm name, also the charm's directory in the repository.
    pub charm: String,

    /// Source channel, e.g. squid/candidate.
    pub source: String,

    /// Target channel, e.g. squid/stable.
    pub target: String,

    /// Base, e.g. ubuntu@24.04.
    pub base: String,

    /// Branch the pull requests were merged into.
    pub base_branch: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CharmRelArgs {
    #[arg(long, overrides_with = "no_apply")]
    /// Perform the releases. Without it nothing is changed.
    pub apply: bool,

    #[arg(long = "no-apply", overrides_with = "apply")]
    /// Only print the releases that would be made (default).
    pub no_apply: bool,

    /// Channel to read revisions from.
    pub source: String,

    /// Channel to release to.
    pub target: String,

    /// Base, e.g. ubuntu@24.04.
    pub base: String,

    /// Charms to release.
    pub charms: Vec<String>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct VmaasArgs {
    #[arg(long)]
    /// MAAS admin user.
    pub admin: Option<String>,

    #[arg(long)]
    /// MAAS admin password.
    pub admin_pw: Option<String>,

    #[arg(long)]
    /// MAAS admin email.
    pub admin_mail: Option<String>,

    #[arg(long)]
    /// MAAS snap channel.
    pub maas_ch: Option<String>,

    #[arg(long)]
    /// LXD bridge managed by MAAS.
    pub lxdbridge: Option<String>,

    #[arg(long)]
    /// Name of the LXD VM host in MAAS.
    pub vmhost: Option<String>,

    #[command(subcommand)]
    pub command: VmaasCommand,
}

impl VmaasArgs {
    /// `defaults` with every given option applied.
    pub fn apply_to(&self, defaults: VmaasDefaults) -> VmaasDefaults {
        let pick = |flag: &Option<String>, current: String| {
            flag.clone().unwrap_or(current)
        };

        VmaasDefaults {
            admin: pick(&self.admin, defaults.admin),
            admin_pw: pick(&self.admin_pw, defaults.admin_pw),
            admin_mail: pick(&self.admin_mail, defaults.admin_mail),
            maas_ch: pick(&self.maas_ch, defaults.maas_ch),
            lxdbridge: pick(&self.lxdbridge, defaults.lxdbridge),
            vmhost: pick(&self.vmhost, defaults.vmhost),
            maas_tag: defaults.maas_tag,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum VmaasCommand {
    /// Run every setup step in order.
    Install,

    /// Install the MAAS, LXD, Terraform and Terragrunt tooling.
    InstallDeps,

    /// Initialise LXD and its networks.
    LxdInit,

    /// Initialise the MAAS region and log in.
    MaasInit,

    /// Register LXD as a MAAS VM host.
    RegisterVmHost,

    /// Configure subnets, DHCP and spaces in MAAS.
    ConfigureNetwork,

    /// Create the lab VMs and tag them for Juju.
    EnsureNodes(EnsureNodesArgs),

    /// Destroy the lab VMs.
    DestroyNodes,

    /// Bootstrap the Juju controller on MAAS.
    JujuInit,
}

#[derive(clap::Args, Debug, Clone)]
pub struct EnsureNodesArgs {
    #[arg(long, default_value_t = 8)]
    /// Size of each data disk in GB.
    pub vm_data_disk_size: u64,

    #[arg(long, default_value_t = 1)]
    /// Data disks per VM.
    pub vm_data_disk_count: u64,

    #[arg(long, default_value_t = 6)]
    /// Number of VMs.
    pub vm_count: u64,
}

impl From<&EnsureNodesArgs> for NodeSpec {
    fn from(args: &EnsureNodesArgs) -> Self {
        NodeSpec {
            vm_data_disk_size: args.vm_data_disk_size,
            vm_data_disk_count: args.vm_data_disk_count,
            vm_count: args.vm_count,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum JujuCommand {
    /// Apply a Terragrunt plan against a Juju model.
    Deploy(DeployArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct DeployArgs {
    #[arg(long)]
    /// Plan to apply.
    pub plan: String,

    #[arg(long)]
    /// Juju model. Defaults to the configured model.
    pub model: Option<String>,

    #[arg(long, default_value_t = 3)]
    /// Number of units.
    pub units: i64,

    #[arg(long)]
    /// Charm channel.
    pub charm_channel: Option<String>,

    #[arg(long)]
    /// Charm revision.
    pub charm_revision: Option<u64>,

    #[arg(long)]
    /// Base for the deployed machines, e.g. ubuntu@24.04.
    pub base: Option<String>,

    #[arg(long)]
    /// Snap channel installed by the charm.
    pub snap_channel: Option<String>,

    #[arg(long, overrides_with = "no_wait")]
    /// Wait for the model to become active (default).
    pub wait: bool,

    #[arg(long = "no-wait", overrides_with = "wait")]
    /// Return once the plan is applied.
    pub no_wait: bool,

    #[arg(long, default_value_t = 3600)]
    /// Seconds to wait for the model to become active.
    pub wait_timeout: i64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum MicrocephCommand {
    /// Disk management.
    Disk {
        #[command(subcommand)]
        command: DiskCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum DiskCommand {
    /// Run `microceph disk add` on every node.
    Add(DiskAddArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct DiskAddArgs {
    #[arg(long = "nodes")]
    /// Juju machine number. Repeat for several; defaults to every
    /// microceph unit's machine.
    pub nodes: Vec<String>,

    #[arg(long, overrides_with = "no_sudo")]
    /// Run under sudo (default).
    pub sudo: bool,

    #[arg(long = "no-sudo", overrides_with = "sudo")]
    /// Run without sudo.
    pub no_sudo: bool,

    #[arg(long, default_value_t = false)]
    /// Print the command per node without running it.
    pub dry_run: bool,

    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    /// Arguments passed to `microceph disk add`.
    pub args: Vec<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TestflingerCommand {
    /// Reserve a machine and print how to reach it.
    Reserve(ReserveArgs),

    /// Reserve a machine and install the lab on it.
    Deploy(ReserveArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReserveArgs {
    #[arg(default_value = DEFAULT_QUEUE)]
    /// Queue to reserve from.
    pub queue: String,

    #[arg(long, default_value_t = DEFAULT_RESERVE_FOR as i64)]
    /// Reservation length in seconds.
    pub reserve_for: i64,

    #[arg(long)]
    /// Backend configuration file.
    pub config: Option<String>,

    #[arg(long)]
    /// Launchpad account for a new configuration file.
    pub launchpad_account: Option<String>,

    #[arg(long)]
    /// Job tag for a new configuration file.
    pub job_tag: Option<String>,

    #[arg(long)]
    /// Mattermost name for a new configuration file.
    pub mattermost_name: Option<String>,

    #[arg(long, default_value = DEFAULT_BIN)]
    /// testflinger executable.
    pub testflinger_bin: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_prs() {
        let args = Args::try_parse_from([
            "cephtools",
            "list-prs",
            "--all-paths",
            "ceph-mon",
            "squid/candidate",
            "squid/stable",
            "ubuntu@24.04",
            "main",
        ])
        .unwrap();

        let Command::ListPrs(list) = args.command else {
            panic!("expected list-prs");
        };
        assert_eq!(list.repo, ".");
        assert!(list.all_paths);
        assert_eq!(list.charm, "ceph-mon");
        assert_eq!(list.base_branch, "main");
    }

    #[test]
    fn charm_rel_defaults_to_dry_run() {
        let args = Args::try_parse_from([
            "cephtools", "charm-rel", "edge", "beta", "ubuntu@24.04", "a", "b",
        ])
        .unwrap();

        let Command::CharmRel(rel) = args.command else {
            panic!("expected charm-rel");
        };
        assert!(!rel.apply);
        assert_eq!(rel.charms, vec!["a", "b"]);

        let args = Args::try_parse_from([
            "cephtools",
            "charm-rel",
            "--no-apply",
            "--apply",
            "edge",
            "beta",
            "ubuntu@24.04",
        ])
        .unwrap();
        let Command::CharmRel(rel) = args.command else {
            panic!("expected charm-rel");
        };
        assert!(rel.apply);
        assert!(rel.charms.is_empty());
    }

    #[test]
    fn vmaas_options_override_config() {
        let args = Args::try_parse_from([
            "cephtools",
            "vmaas",
            "--admin",
            "root",
            "--vmhost",
            "lab-lxd",
            "ensure-nodes",
            "--vm-count",
            "3",
        ])
        .unwrap();

        let Command::Vmaas(vmaas) = args.command else {
            panic!("expected vmaas");
        };
        let resolved = vmaas.apply_to(VmaasDefaults::default());
        assert_eq!(resolved.admin, "root");
        assert_eq!(resolved.vmhost, "lab-lxd");
        assert_eq!(resolved.lxdbridge, "lxdbr0");

        let VmaasCommand::EnsureNodes(nodes) = vmaas.command else {
            panic!("expected ensure-nodes");
        };
        let spec = NodeSpec::from(&nodes);
        assert_eq!(spec.vm_count, 3);
        assert_eq!(spec.vm_data_disk_size, 8);
    }

    #[test]
    fn disk_add_takes_trailing_arguments() {
        let args = Args::try_parse_from([
            "cephtools",
            "--debug",
            "microceph",
            "disk",
            "add",
            "--nodes",
            "0",
            "--nodes",
            "2",
            "--no-sudo",
            "--",
            "/dev/sdb",
            "--wipe",
        ])
        .unwrap();

        assert!(args.debug);
        let Command::Microceph {
            command: MicrocephCommand::Disk {
                command: DiskCommand::Add(add),
            },
        } = args.command
        else {
            panic!("expected microceph disk add");
        };
        assert_eq!(add.nodes, vec!["0", "2"]);
        assert!(add.no_sudo);
        assert_eq!(add.args, vec!["/dev/sdb", "--wipe"]);
    }

    #[test]
    fn disk_add_requires_arguments() {
        assert!(
            Args::try_parse_from(["cephtools", "microceph", "disk", "add"])
                .is_err()
        );
    }

    #[test]
    fn testflinger_queue_defaults() {
        let args =
            Args::try_parse_from(["cephtools", "testflinger", "reserve"])
                .unwrap();

        let Command::Testflinger {
            command: TestflingerCommand::Reserve(reserve),
        } = args.command
        else {
            panic!("expected testflinger reserve");
        };
        assert_eq!(reserve.queue, "ceph-qa-1");
        assert_eq!(reserve.reserve_for, 3600);
        assert_eq!(reserve.testflinger_bin, "testflinger");
    }
}
