//! Loading of the per-user `cephtools.yaml` file.
//!
//! The file lives in the state directory and may either hold the settings at
//! the top level or nest them under a `cephtools:` key.
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{CephtoolsError, Result},
    state,
};

pub mod lab;
pub mod vmaas;

pub use vmaas::VmaasDefaults;

/// Default configuration filename.
pub const CONFIG_FILENAME: &str = "cephtools.yaml";
/// Juju model used when none is configured.
pub const DEFAULT_JUJU_MODEL: &str = "cephtools";
/// Terraform root used when none is configured.
pub const DEFAULT_TERRAFORM_ROOT: &str = "~/src/cephtools/terraform";

const SECTION_KEY: &str = "cephtools";

/// Optional `paths` section mirroring the path keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terragrunt_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    terraform_root: Option<String>,
    terragrunt_dir: Option<String>,
    juju_model: Option<String>,
    paths: Option<PathsConfig>,
    vmaas: Option<vmaas::VmaasSection>,
}

/// Parsed `cephtools.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CephtoolsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terragrunt_dir: Option<String>,
    pub juju_model: String,
    #[serde(skip_serializing_if = "is_empty_paths")]
    pub paths: PathsConfig,
    pub vmaas: VmaasDefaults,
}

fn is_empty_paths(paths: &PathsConfig) -> bool {
    *paths == PathsConfig::default()
}

impl Default for CephtoolsConfig {
    fn default() -> Self {
        Self {
            terraform_root: None,
            terragrunt_dir: None,
            juju_model: DEFAULT_JUJU_MODEL.into(),
            paths: PathsConfig::default(),
            vmaas: VmaasDefaults::default(),
        }
    }
}

impl From<RawConfig> for CephtoolsConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            terraform_root: raw.terraform_root,
            terragrunt_dir: raw.terragrunt_dir,
            juju_model: raw
                .juju_model
                .unwrap_or_else(|| DEFAULT_JUJU_MODEL.into()),
            paths: raw.paths.unwrap_or_default(),
            vmaas: raw.vmaas.map(VmaasDefaults::from).unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct ConfigFile<'a> {
    cephtools: &'a CephtoolsConfig,
}

impl CephtoolsConfig {
    /// Default location of the config file in the state directory.
    pub fn default_path() -> Result<PathBuf> {
        state::state_file_path(CONFIG_FILENAME)
    }

    /// Loads the config from the default location, writing a default file
    /// first when `ensure` is set and none exists.
    pub fn load(ensure: bool) -> Result<Self> {
        Self::load_from(&Self::default_path()?, ensure)
    }

    /// Loads the config from `path`. Without a file the built-in defaults
    /// are returned.
    pub fn load_from(path: &Path, ensure: bool) -> Result<Self> {
        if ensure && !path.exists() {
            write_default(path)?;
        }

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| {
            CephtoolsError::invalid_config(format!(
                "{}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Parses config content, unwrapping an optional `cephtools:` section.
    pub fn parse(content: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)?;

        let section = match value {
            serde_yaml::Value::Null => return Ok(Self::default()),
            serde_yaml::Value::Mapping(mut map) => {
                match map.remove(SECTION_KEY) {
                    Some(serde_yaml::Value::Null) => return Ok(Self::default()),
                    Some(section @ serde_yaml::Value::Mapping(_)) => section,
                    Some(_) => {
                        return Err(CephtoolsError::invalid_config(
                            "unexpected structure for the 'cephtools' section",
                        ));
                    }
                    None => serde_yaml::Value::Mapping(map),
                }
            }
            _ => {
                return Err(CephtoolsError::invalid_config(
                    "unexpected YAML structure (expected a mapping)",
                ));
            }
        };

        let raw: RawConfig = serde_yaml::from_value(section)?;

        Ok(raw.into())
    }

    /// Configured terraform root, checking the `paths` section second.
    pub fn terraform_root(&self) -> Option<&str> {
        self.terraform_root
            .as_deref()
            .or(self.paths.terraform_root.as_deref())
    }

    /// Configured terragrunt directory, checking the `paths` section second.
    pub fn terragrunt_dir(&self) -> Option<&str> {
        self.terragrunt_dir
            .as_deref()
            .or(self.paths.terragrunt_dir.as_deref())
    }

    /// Renders the config nested under the `cephtools:` key.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&ConfigFile { cephtools: self })?)
    }
}

fn write_default(path: &Path) -> Result<()> {
    let config = CephtoolsConfig {
        terraform_root: Some(
            state::expand_user(DEFAULT_TERRAFORM_ROOT)?
                .display()
                .to_string(),
        ),
        ..CephtoolsConfig::default()
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    log::debug!("writing default config to {}", path.display());
    fs::write(path, config.to_yaml()?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);

        let config = CephtoolsConfig::load_from(&path, false).unwrap();

        assert_eq!(config, CephtoolsConfig::default());
        assert!(!path.exists());
    }

    #[test]
    fn ensure_writes_nested_default_file() {
        let home = TempDir::new().unwrap();
        let path = home.path().join("state").join(CONFIG_FILENAME);

        temp_env::with_var("HOME", Some(home.path()), || {
            let config = CephtoolsConfig::load_from(&path, true).unwrap();
            let content = fs::read_to_string(&path).unwrap();

            assert!(content.starts_with("cephtools:\n"));
            assert!(content.contains("juju_model: cephtools"));
            assert!(content.contains("maas_ch: 3.6/stable"));
            assert_eq!(config.juju_model, DEFAULT_JUJU_MODEL);
            assert_eq!(
                config.terraform_root(),
                Some(
                    home.path()
                        .join("src/cephtools/terraform")
                        .to_str()
                        .unwrap()
                )
            );
        });
    }

    #[test]
    fn parses_nested_section() {
        let config = CephtoolsConfig::parse(
            "cephtools:\n  juju_model: lab\n  vmaas:\n    admin: root\n",
        )
        .unwrap();

        assert_eq!(config.juju_model, "lab");
        assert_eq!(config.vmaas.admin, "root");
        assert_eq!(config.vmaas.lxdbridge, "lxdbr0");
    }

    #[test]
    fn parses_top_level_keys() {
        let config = CephtoolsConfig::parse(
            "terragrunt_dir: /srv/tg\nterraform_root: /srv/tf\n",
        )
        .unwrap();

        assert_eq!(config.terragrunt_dir(), Some("/srv/tg"));
        assert_eq!(config.terraform_root(), Some("/srv/tf"));
        assert_eq!(config.juju_model, DEFAULT_JUJU_MODEL);
    }

    #[test]
    fn paths_section_is_secondary() {
        let config = CephtoolsConfig::parse(
            "terraform_root: /a\npaths:\n  terraform_root: /b\n  terragrunt_dir: /c\n",
        )
        .unwrap();

        assert_eq!(config.terraform_root(), Some("/a"));
        assert_eq!(config.terragrunt_dir(), Some("/c"));
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(
            CephtoolsConfig::parse("").unwrap(),
            CephtoolsConfig::default()
        );
    }

    #[test]
    fn wrong_type_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "juju_model: [a, b]\n").unwrap();

        let err = CephtoolsConfig::load_from(&path, false).unwrap_err();

        assert!(matches!(err, CephtoolsError::InvalidConfig(_)));
    }

    #[test]
    fn non_mapping_is_config_error() {
        let err = CephtoolsConfig::parse("- a\n- b\n").unwrap_err();
        assert!(matches!(err, CephtoolsError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(CephtoolsConfig::parse("juju_modle: lab\n").is_err());
    }
}
