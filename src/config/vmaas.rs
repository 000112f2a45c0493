//! Defaults for the `vmaas` lab commands.
use serde::{Deserialize, Serialize};

/// Default MAAS snap channel.
pub const DEFAULT_MAAS_CHANNEL: &str = "3.6/stable";
/// Default MAAS admin user.
pub const DEFAULT_ADMIN: &str = "admin";
/// Default MAAS admin password.
pub const DEFAULT_ADMIN_PASSWORD: &str = "maaspass";
/// Default MAAS admin email.
pub const DEFAULT_ADMIN_MAIL: &str = "admin@example.com";
/// Default LXD bridge.
pub const DEFAULT_LXD_BRIDGE: &str = "lxdbr0";
/// Default name of the LXD VM host registered in MAAS.
pub const DEFAULT_VM_HOST: &str = "local-lxd";
/// Default MAAS tag applied to lab machines.
pub const DEFAULT_MAAS_TAG: &str = "cephtools";

/// Resolved `vmaas` section. Every value is a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmaasDefaults {
    pub maas_ch: String,
    pub admin: String,
    pub admin_pw: String,
    pub admin_mail: String,
    pub lxdbridge: String,
    pub vmhost: String,
    pub maas_tag: String,
}

impl Default for VmaasDefaults {
    fn default() -> Self {
        Self {
            maas_ch: DEFAULT_MAAS_CHANNEL.into(),
            admin: DEFAULT_ADMIN.into(),
            admin_pw: DEFAULT_ADMIN_PASSWORD.into(),
            admin_mail: DEFAULT_ADMIN_MAIL.into(),
            lxdbridge: DEFAULT_LXD_BRIDGE.into(),
            vmhost: DEFAULT_VM_HOST.into(),
            maas_tag: DEFAULT_MAAS_TAG.into(),
        }
    }
}

/// `vmaas` section as written in the file. Missing or null keys keep their
/// built-in default.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(super) struct VmaasSection {
    maas_ch: Option<String>,
    admin: Option<String>,
    admin_pw: Option<String>,
    admin_mail: Option<String>,
    lxdbridge: Option<String>,
    vmhost: Option<String>,
    maas_tag: Option<String>,
}

impl From<VmaasSection> for VmaasDefaults {
    fn from(section: VmaasSection) -> Self {
        let defaults = VmaasDefaults::default();

        Self {
            maas_ch: section.maas_ch.unwrap_or(defaults.maas_ch),
            admin: section.admin.unwrap_or(defaults.admin),
            admin_pw: section.admin_pw.unwrap_or(defaults.admin_pw),
            admin_mail: section.admin_mail.unwrap_or(defaults.admin_mail),
            lxdbridge: section.lxdbridge.unwrap_or(defaults.lxdbridge),
            vmhost: section.vmhost.unwrap_or(defaults.vmhost),
            maas_tag: section.maas_tag.unwrap_or(defaults.maas_tag),
        }
    }
}
