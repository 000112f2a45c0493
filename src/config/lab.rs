//! State files written by the lab bootstrap steps and read back by later
//! ones: `cloud.yaml`, `cred.yaml` and `network.yaml`.
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{CephtoolsError, Result},
    state,
};

/// Juju cloud name used for the lab MAAS.
pub const MAAS_CLOUD: &str = "maas-cloud";
/// Juju credential name stored for the lab MAAS.
pub const MAAS_CREDENTIAL: &str = "admin";

pub const CLOUD_FILE: &str = "cloud.yaml";
pub const CREDENTIALS_FILE: &str = "cred.yaml";
pub const NETWORK_FILE: &str = "network.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cloud {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "auth-types")]
    pub auth_types: Vec<String>,
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CloudsFile {
    clouds: BTreeMap<String, Cloud>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "auth-type")]
    pub auth_type: String,
    #[serde(rename = "maas-oauth")]
    pub maas_oauth: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialsFile {
    credentials: BTreeMap<String, BTreeMap<String, Credential>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRange {
    pub start: String,
    pub end: String,
}

/// What MAAS knows about one LXD network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub bridge: String,
    pub cidr: String,
    pub gateway: String,
    pub dynamic_range: DynamicRange,
    pub subnet_id: u64,
    pub fabric_id: u64,
    pub vlan_id: u64,
    pub rack_sysid: String,
    pub space_id: u64,
}

/// Primary bridge segment plus the external network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabNetwork {
    #[serde(flatten)]
    pub primary: NetworkSegment,
    pub external: NetworkSegment,
}

#[derive(Debug, Serialize, Deserialize)]
struct NetworkFile {
    network: LabNetwork,
}

/// Reader and writer for the lab state files in one directory.
#[derive(Debug, Clone)]
pub struct LabState {
    dir: PathBuf,
}

impl LabState {
    /// Lab state in the per-user state directory.
    pub fn open() -> Result<Self> {
        Ok(Self::new(state::ensure_state_dir()?))
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Writes `cloud.yaml` describing the lab MAAS endpoint.
    pub fn write_cloud(&self, endpoint: &str) -> Result<PathBuf> {
        let file = CloudsFile {
            clouds: BTreeMap::from([(
                MAAS_CLOUD.to_string(),
                Cloud {
                    kind: "maas".into(),
                    auth_types: vec!["oauth1".into()],
                    endpoint: endpoint.into(),
                },
            )]),
        };

        let path = self.path(CLOUD_FILE);
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_yaml::to_string(&file)?)?;
        Ok(path)
    }

    /// Writes `cred.yaml` holding the MAAS API key.
    pub fn write_credentials(&self, api_key: &SecretString) -> Result<PathBuf> {
        let credential = Credential {
            auth_type: "oauth1".into(),
            maas_oauth: api_key.expose_secret().to_string(),
        };
        let file = CredentialsFile {
            credentials: BTreeMap::from([(
                MAAS_CLOUD.to_string(),
                BTreeMap::from([(MAAS_CREDENTIAL.to_string(), credential)]),
            )]),
        };

        let path = self.path(CREDENTIALS_FILE);
        state::write_private(&path, &serde_yaml::to_string(&file)?)?;
        Ok(path)
    }

    pub fn write_network(&self, network: &LabNetwork) -> Result<PathBuf> {
        let file = NetworkFile {
            network: network.clone(),
        };

        let path = self.path(NETWORK_FILE);
        fs::create_dir_all(&self.dir)?;
        fs::write(&path, serde_yaml::to_string(&file)?)?;
        Ok(path)
    }

    /// The `maas-cloud` entry of `cloud.yaml`.
    pub fn read_cloud(&self) -> Result<Cloud> {
        let path = self.path(CLOUD_FILE);
        let file: CloudsFile = read_yaml(&path)?;

        file.clouds.get(MAAS_CLOUD).cloned().ok_or_else(|| {
            CephtoolsError::invalid_config(format!(
                "{} is missing the {MAAS_CLOUD} cloud",
                path.display()
            ))
        })
    }

    /// The first `maas-cloud` credential of `cred.yaml` with its name.
    pub fn read_credential(&self) -> Result<(String, SecretString)> {
        let path = self.path(CREDENTIALS_FILE);
        let file: CredentialsFile = read_yaml(&path)?;

        file.credentials
            .get(MAAS_CLOUD)
            .and_then(|creds| creds.iter().next())
            .map(|(name, cred)| {
                (name.clone(), SecretString::from(cred.maas_oauth.clone()))
            })
            .ok_or_else(|| {
                CephtoolsError::invalid_config(format!(
                    "{} does not define any {MAAS_CLOUD} credentials",
                    path.display()
                ))
            })
    }

    pub fn read_network(&self) -> Result<LabNetwork> {
        let file: NetworkFile = read_yaml(&self.path(NETWORK_FILE))?;
        Ok(file.network)
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(CephtoolsError::invalid_config(format!(
            "expected configuration file at {}",
            path.display()
        )));
    }

    let content = fs::read_to_string(path)?;

    serde_yaml::from_str(&content).map_err(|e| {
        CephtoolsError::invalid_config(format!("{}: {}", path.display(), e))
    })
}
