//! Locating Terragrunt plans and running `terragrunt` in them.
use log::*;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashSet},
    env, fs,
    path::{Path, PathBuf},
};

use crate::{
    config::{CephtoolsConfig, DEFAULT_TERRAFORM_ROOT},
    error::{CephtoolsError, Result, ResultExt},
    exec::{Cmd, CommandRunner, CommandRunnerExt},
    state,
};

/// Environment variable naming the terraform root.
pub const TERRAFORM_ROOT_ENV: &str = "CEPHTOOLS_TERRAFORM_ROOT";
/// Environment variable naming the lab node plan directory.
pub const TERRAGRUNT_DIR_ENV: &str = "CEPHTOOLS_TERRAGRUNT_DIR";
/// File marking a directory as a Terragrunt plan.
pub const TERRAGRUNT_FILE: &str = "terragrunt.hcl";
/// Plan directory of the lab nodes under a terraform root.
pub const MAAS_NODES_DIR: &str = "maas-nodes";

fn env_path(var: &str) -> Result<Option<PathBuf>> {
    match env::var(var) {
        Ok(value) if !value.is_empty() => Ok(Some(state::expand_user(&value)?)),
        _ => Ok(None),
    }
}

fn normalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn checked_list(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "  - <none>".into();
    }

    paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Terraform root directories in order of preference: the environment
/// override, the configured root (or the default), `terraform/` in `cwd`
/// and each of its parents, then the source checkout.
pub fn terraform_root_candidates(
    config: &CephtoolsConfig,
    cwd: &Path,
) -> Result<Vec<PathBuf>> {
    let mut candidates = vec![];

    if let Some(root) = env_path(TERRAFORM_ROOT_ENV)? {
        candidates.push(root);
    }

    let default_root = state::expand_user(DEFAULT_TERRAFORM_ROOT)?;

    match config.terraform_root() {
        Some(root) => candidates.push(state::expand_user(root)?),
        None => candidates.push(default_root.clone()),
    }

    candidates.extend(cwd.ancestors().map(|dir| dir.join("terraform")));
    candidates.push(Path::new(env!("CARGO_MANIFEST_DIR")).join("terraform"));

    if !candidates.contains(&default_root) {
        candidates.push(default_root);
    }

    Ok(candidates)
}

/// Finds the plan directory for `plan`. For every root candidate the root
/// itself, `root/<relative>` and `root/<plan>` are tried; the first
/// directory holding a `terragrunt.hcl` wins.
pub fn resolve_plan_dir(
    plan: &str,
    relative: Option<&Path>,
    roots: &[PathBuf],
) -> Result<PathBuf> {
    let plan_path = Path::new(plan);
    let mut seen = HashSet::new();
    let mut checked = vec![];

    for root in roots {
        let mut paths = vec![root.clone()];
        if let Some(relative) = relative {
            paths.push(root.join(relative));
        }
        if relative != Some(plan_path) {
            paths.push(root.join(plan_path));
        }

        for path in paths {
            let resolved = normalize(&path);
            if !seen.insert(resolved.clone()) {
                continue;
            }
            checked.push(resolved.clone());

            if resolved.is_dir() && resolved.join(TERRAGRUNT_FILE).exists() {
                debug!("using plan directory {}", resolved.display());
                return Ok(resolved);
            }
        }
    }

    Err(CephtoolsError::invalid_config(format!(
        "Terragrunt plan directory not found for '{plan}'. Checked locations:\n{}\nSet {TERRAFORM_ROOT_ENV} or update terraform_root in the config.",
        checked_list(&checked)
    )))
}

/// Finds the lab node plan directory: the environment override, the
/// configured `terragrunt_dir`, then `maas-nodes` under every terraform
/// root candidate. The first existing directory wins.
pub fn resolve_terragrunt_dir(
    config: &CephtoolsConfig,
    roots: &[PathBuf],
) -> Result<PathBuf> {
    let mut candidates = vec![];

    if let Some(dir) = env_path(TERRAGRUNT_DIR_ENV)? {
        candidates.push(dir);
    }

    if let Some(dir) = config.terragrunt_dir() {
        candidates.push(state::expand_user(dir)?);
    }

    candidates.extend(roots.iter().map(|root| root.join(MAAS_NODES_DIR)));

    let mut seen = HashSet::new();
    let mut checked = vec![];

    for candidate in candidates {
        let resolved = normalize(&candidate);
        if !seen.insert(resolved.clone()) {
            continue;
        }
        checked.push(resolved.clone());

        if resolved.is_dir() {
            return Ok(resolved);
        }
    }

    Err(CephtoolsError::invalid_config(format!(
        "Unable to locate terragrunt configuration directory.\nChecked the following locations:\n{}\nSet {TERRAGRUNT_DIR_ENV} to override.",
        checked_list(&checked)
    )))
}

/// Flattens variables into `-var key=value` arguments. `None` values are
/// skipped.
pub fn var_args<'a, I>(vars: I) -> Vec<String>
where
    I: IntoIterator<Item = (&'a str, Option<String>)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .flat_map(|(key, value)| ["-var".to_string(), format!("{key}={value}")])
        .collect()
}

/// Quotes a value as an HCL string literal.
pub fn hcl_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    // template sequences stay literal
    out.replace("${", "$${").replace("%{", "%%{")
}

#[derive(Debug, Deserialize)]
struct OutputValue {
    value: serde_json::Value,
}

/// `terragrunt` invocations in one plan directory.
pub struct Terragrunt<'a> {
    runner: &'a dyn CommandRunner,
    dir: PathBuf,
}

impl<'a> Terragrunt<'a> {
    pub fn new(runner: &'a dyn CommandRunner, dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cmd<I, S>(&self, args: I) -> Result<Cmd>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.dir.is_dir() {
            return Err(CephtoolsError::invalid_config(format!(
                "Terragrunt plan directory not found: {}",
                self.dir.display()
            )));
        }

        Ok(Cmd::new("terragrunt")
            .args(args)
            .current_dir(self.dir.clone()))
    }

    /// `terragrunt apply -auto-approve ARGS...`, streaming its output.
    pub async fn apply(&self, extra: &[String]) -> Result<()> {
        let cmd = self
            .cmd(["apply", "-auto-approve"])?
            .args(extra.iter().cloned())
            .passthrough();

        self.runner
            .run_checked(cmd)
            .await
            .context("terragrunt apply failed")?;

        Ok(())
    }

    /// `terragrunt destroy -auto-approve ARGS...`, streaming its output.
    pub async fn destroy(&self, extra: &[String]) -> Result<()> {
        let cmd = self
            .cmd(["destroy", "-auto-approve"])?
            .args(extra.iter().cloned())
            .passthrough();

        self.runner
            .run_checked(cmd)
            .await
            .context("terragrunt destroy failed")?;

        Ok(())
    }

    /// Plan outputs keyed by name.
    pub async fn outputs(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        let cmd = self.cmd(["output", "-json"])?;
        let outputs: Option<BTreeMap<String, OutputValue>> = self
            .runner
            .json(cmd)
            .await
            .context("failed to read terragrunt outputs")?;

        Ok(outputs
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.value))
            .collect())
    }

    /// The `vm_hostnames` list output.
    pub async fn vm_hostnames(&self) -> Result<Vec<String>> {
        let outputs = self.outputs().await?;

        let value = outputs.get("vm_hostnames").ok_or_else(|| {
            CephtoolsError::invalid_config(
                "terragrunt outputs did not include vm_hostnames",
            )
        })?;

        let hostnames = value.as_array().ok_or_else(|| {
            CephtoolsError::invalid_config(
                "terragrunt vm_hostnames output must be a list",
            )
        })?;

        Ok(hostnames
            .iter()
            .map(|h| match h {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, MockCommandRunner};
    use mockall::predicate::*;
    use tempfile::TempDir;

    fn no_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [(TERRAFORM_ROOT_ENV, None::<&str>), (TERRAGRUNT_DIR_ENV, None)],
            f,
        );
    }

    #[test]
    fn candidates_start_with_env_then_config() {
        let tmp = TempDir::new().unwrap();
        let config = CephtoolsConfig {
            terraform_root: Some("/srv/terraform".into()),
            ..CephtoolsConfig::default()
        };

        temp_env::with_var(TERRAFORM_ROOT_ENV, Some("/env/terraform"), || {
            let candidates =
                terraform_root_candidates(&config, tmp.path()).unwrap();

            assert_eq!(candidates[0], PathBuf::from("/env/terraform"));
            assert_eq!(candidates[1], PathBuf::from("/srv/terraform"));
            assert_eq!(candidates[2], tmp.path().join("terraform"));
            assert!(candidates.contains(
                &tmp.path().parent().unwrap().join("terraform")
            ));
        });
    }

    #[test]
    fn candidates_fall_back_to_default_root() {
        let home = TempDir::new().unwrap();

        temp_env::with_vars(
            [
                (TERRAFORM_ROOT_ENV, None),
                ("HOME", Some(home.path().to_str().unwrap())),
            ],
            || {
                let candidates = terraform_root_candidates(
                    &CephtoolsConfig::default(),
                    Path::new("/"),
                )
                .unwrap();

                assert_eq!(
                    candidates[0],
                    home.path().join("src/cephtools/terraform")
                );
            },
        );
    }

    #[test]
    fn plan_dir_requires_terragrunt_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("terraform");
        fs::create_dir_all(root.join("microceph")).unwrap();

        let err = resolve_plan_dir(
            "microceph",
            Some(Path::new("microceph")),
            &[root.clone()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Checked locations"));

        fs::write(root.join("microceph").join(TERRAGRUNT_FILE), "").unwrap();

        let dir = resolve_plan_dir(
            "microceph",
            Some(Path::new("microceph")),
            &[tmp.path().join("missing"), root.clone()],
        )
        .unwrap();
        assert_eq!(dir, normalize(&root.join("microceph")));
    }

    #[test]
    fn terragrunt_dir_prefers_env() {
        let tmp = TempDir::new().unwrap();
        let from_env = tmp.path().join("env-nodes");
        let root = tmp.path().join("terraform");
        fs::create_dir_all(&from_env).unwrap();
        fs::create_dir_all(root.join(MAAS_NODES_DIR)).unwrap();

        temp_env::with_var(TERRAGRUNT_DIR_ENV, Some(&from_env), || {
            let dir = resolve_terragrunt_dir(
                &CephtoolsConfig::default(),
                &[root.clone()],
            )
            .unwrap();
            assert_eq!(dir, normalize(&from_env));
        });
    }

    #[test]
    fn terragrunt_dir_uses_config_then_roots() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("terraform");
        fs::create_dir_all(root.join(MAAS_NODES_DIR)).unwrap();
        let config = CephtoolsConfig {
            terragrunt_dir: Some(
                tmp.path().join("missing").display().to_string(),
            ),
            ..CephtoolsConfig::default()
        };

        no_env(|| {
            let dir = resolve_terragrunt_dir(&config, &[root.clone()]).unwrap();
            assert_eq!(dir, normalize(&root.join(MAAS_NODES_DIR)));
        });
    }

    #[test]
    fn terragrunt_dir_lists_checked_locations() {
        let tmp = TempDir::new().unwrap();

        no_env(|| {
            let err = resolve_terragrunt_dir(
                &CephtoolsConfig::default(),
                &[tmp.path().join("nope")],
            )
            .unwrap_err();

            assert!(matches!(err, CephtoolsError::InvalidConfig(_)));
            assert!(err.to_string().contains("nope/maas-nodes"));
        });
    }

    #[test]
    fn var_args_skip_missing_values() {
        let args = var_args([
            ("model_uuid", Some("abc".to_string())),
            ("base", None),
            ("units", Some("3".to_string())),
        ]);

        assert_eq!(args, vec!["-var", "model_uuid=abc", "-var", "units=3"]);
    }

    #[test]
    fn hcl_strings_are_escaped() {
        assert_eq!(hcl_string("plain"), "\"plain\"");
        assert_eq!(hcl_string("a\"b\\c"), "\"a\\\"b\\\\c\"");
        assert_eq!(hcl_string("${x}"), "\"$${x}\"");
    }

    #[tokio::test]
    async fn apply_runs_in_plan_dir() {
        let tmp = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        let expected = Cmd::new("terragrunt")
            .args(["apply", "-auto-approve", "-var", "units=3"])
            .current_dir(tmp.path().to_path_buf())
            .passthrough();
        runner
            .expect_run()
            .with(eq(expected))
            .times(1)
            .returning(|_| Ok(CommandOutput::ok("")));

        Terragrunt::new(&runner, tmp.path())
            .apply(&["-var".into(), "units=3".into()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn apply_fails_for_missing_dir() {
        let runner = MockCommandRunner::new();

        let err = Terragrunt::new(&runner, "/definitely/not/here")
            .apply(&[])
            .await
            .unwrap_err();

        assert!(matches!(err, CephtoolsError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn reads_vm_hostnames_output() {
        let tmp = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| {
            Ok(CommandOutput::ok(
                r#"{"vm_hostnames": {"sensitive": false, "type": ["list", "string"], "value": ["vm-1", "vm-2"]}}"#,
            ))
        });

        let hostnames = Terragrunt::new(&runner, tmp.path())
            .vm_hostnames()
            .await
            .unwrap();

        assert_eq!(hostnames, vec!["vm-1", "vm-2"]);
    }

    #[tokio::test]
    async fn missing_vm_hostnames_is_error() {
        let tmp = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandOutput::ok("{}")));

        let err = Terragrunt::new(&runner, tmp.path())
            .vm_hostnames()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("vm_hostnames"));
    }
}
