//! Configuration for source hosting connections.
use git_url_parse::{GitUrl, Scheme};
use secrecy::SecretString;
use std::{env, path::Path};

use crate::error::{CephtoolsError, Result};

/// Public GitHub host.
pub const GITHUB_HOST: &str = "github.com";
/// Token variables checked in order when no token flag is given.
pub const TOKEN_ENV_VARS: [&str; 2] = ["GITHUB_TOKEN", "GH_TOKEN"];
/// Remote looked up in a local checkout.
pub const DEFAULT_REMOTE: &str = "origin";

/// Remote repository connection configuration.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Remote host (e.g., "github.com").
    pub host: String,
    /// URL scheme used for API calls (http or https).
    pub scheme: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Access token. Anonymous access when absent.
    pub token: Option<SecretString>,
}

impl RemoteConfig {
    /// Parses a repository URL (https or ssh form).
    pub fn from_url(url: &str, token: Option<SecretString>) -> Result<Self> {
        let parsed = GitUrl::parse(url)?;

        let host = parsed.host.ok_or_else(|| {
            CephtoolsError::invalid_args(format!(
                "unable to parse host from repo url: {url}"
            ))
        })?;

        let owner = parsed.owner.ok_or_else(|| {
            CephtoolsError::invalid_args(format!(
                "unable to parse owner from repo url: {url}"
            ))
        })?;

        let scheme = match parsed.scheme {
            Scheme::Http => "http",
            _ => "https",
        };

        Ok(Self {
            host,
            scheme: scheme.into(),
            owner,
            repo: parsed.name,
            token,
        })
    }

    /// Reads the `origin` remote of the git checkout containing `path`.
    pub fn from_repo_path(
        path: &Path,
        token: Option<SecretString>,
    ) -> Result<Self> {
        let repo = git2::Repository::discover(path)?;
        let remote = repo.find_remote(DEFAULT_REMOTE)?;

        let url = remote.url().ok_or_else(|| {
            CephtoolsError::invalid_args(format!(
                "remote {DEFAULT_REMOTE} of {} has no usable url",
                path.display()
            ))
        })?;

        Self::from_url(url, token)
    }

    /// REST API base for the host.
    pub fn api_base_uri(&self) -> String {
        if self.host == GITHUB_HOST {
            format!("{}://api.{}", self.scheme, self.host)
        } else {
            format!("{}://{}/api/v3", self.scheme, self.host)
        }
    }

    /// `owner/repo` slug.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Token from the flag, else the first non-empty token variable.
pub fn resolve_token(explicit: Option<&str>) -> Option<SecretString> {
    if let Some(token) = explicit
        && !token.is_empty()
    {
        return Some(SecretString::from(token.to_string()));
    }

    TOKEN_ENV_VARS
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.is_empty())
        .map(SecretString::from)
}
