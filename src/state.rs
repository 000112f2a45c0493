//! Per-user state directory holding the config file and lab state files.
use directories::BaseDirs;
use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::{CephtoolsError, Result};

/// Environment variable overriding the state directory.
pub const STATE_ENV_VAR: &str = "CEPHTOOLS_STATE_HOME";

/// Current user's home directory.
pub fn home_dir() -> Result<PathBuf> {
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or_else(|| {
            CephtoolsError::invalid_config(
                "unable to determine the home directory",
            )
        })
}

/// Expands a leading `~` to the home directory.
pub fn expand_user(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return home_dir();
    }

    if let Some(rest) = path.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }

    Ok(PathBuf::from(path))
}

/// Returns the state directory without creating it.
///
/// `CEPHTOOLS_STATE_HOME` wins when set. Otherwise `~/src/cephtools/state`
/// is used when `~/src/cephtools` exists, falling back to
/// `~/cephtools/state`.
pub fn default_state_home() -> Result<PathBuf> {
    if let Ok(configured) = env::var(STATE_ENV_VAR)
        && !configured.is_empty()
    {
        return expand_user(&configured);
    }

    let home = home_dir()?;
    let preferred_root = home.join("src").join("cephtools");

    if preferred_root.exists() {
        return Ok(preferred_root.join("state"));
    }

    Ok(home.join("cephtools").join("state"))
}

/// Ensures the state directory exists and returns it.
pub fn ensure_state_dir() -> Result<PathBuf> {
    let dir = default_state_home()?;
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path of a file inside the state directory. Nothing is created.
pub fn state_file_path(name: &str) -> Result<PathBuf> {
    Ok(default_state_home()?.join(name))
}

/// Writes a file readable only by the current user.
pub fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;

    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents.as_bytes())?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn env_var_overrides_state_home() {
        let tmp = TempDir::new().unwrap();
        let state = tmp.path().join("custom");

        temp_env::with_var(STATE_ENV_VAR, Some(&state), || {
            assert_eq!(default_state_home().unwrap(), state);
        });
    }

    #[test]
    fn prefers_src_checkout_when_present() {
        let home = TempDir::new().unwrap();
        fs::create_dir_all(home.path().join("src/cephtools")).unwrap();

        temp_env::with_vars(
            [
                (STATE_ENV_VAR, None),
                ("HOME", Some(home.path().as_os_str())),
            ],
            || {
                assert_eq!(
                    default_state_home().unwrap(),
                    home.path().join("src/cephtools/state")
                );
            },
        );
    }

    #[test]
    fn falls_back_to_home_cephtools() {
        let home = TempDir::new().unwrap();

        temp_env::with_vars(
            [
                (STATE_ENV_VAR, None),
                ("HOME", Some(home.path().as_os_str())),
            ],
            || {
                assert_eq!(
                    default_state_home().unwrap(),
                    home.path().join("cephtools/state")
                );
            },
        );
    }

    #[test]
    fn ensure_state_dir_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let state = tmp.path().join("nested/state");

        temp_env::with_var(STATE_ENV_VAR, Some(&state), || {
            assert_eq!(ensure_state_dir().unwrap(), state);
            assert!(state.is_dir());
            assert_eq!(
                state_file_path("cloud.yaml").unwrap(),
                state.join("cloud.yaml")
            );
        });
    }

    #[test]
    fn expand_user_handles_tilde() {
        let home = TempDir::new().unwrap();

        temp_env::with_var("HOME", Some(home.path()), || {
            assert_eq!(expand_user("~").unwrap(), home.path());
            assert_eq!(
                expand_user("~/src/terraform").unwrap(),
                home.path().join("src/terraform")
            );
            assert_eq!(
                expand_user("/opt/terraform").unwrap(),
                PathBuf::from("/opt/terraform")
            );
        });
    }

    #[test]
    fn write_private_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("secret.hcl");

        write_private(&path, "maas_api_key = \"abc\"\n").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "maas_api_key = \"abc\"\n"
        );
    }
}
