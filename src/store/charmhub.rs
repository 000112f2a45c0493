//! Implements the CharmStore trait for Charmhub
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::*;
use serde::Deserialize;
use std::{
    env, fs,
    io::{Read, Seek},
    path::PathBuf,
    sync::Arc,
};
use url::Url;

use crate::{
    error::{CephtoolsError, Result, ResultExt},
    exec::{Cmd, CommandRunner, CommandRunnerExt},
    state,
    store::{
        traits::CharmStore,
        types::{Base, Channel, ChannelRelease},
    },
};

/// Public Charmhub API.
pub const DEFAULT_CHARMHUB_URL: &str = "https://api.charmhub.io";
/// Environment variable overriding the Charmhub API URL.
pub const CHARMHUB_URL_ENV: &str = "CHARMHUB_URL";

/// Build metadata file inside a charm archive.
pub const GIT_INFO_FILE: &str = "git-info.txt";

const COMMIT_DATE_KEY: &str = "commit_date:";
const COMMIT_DATE_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
];

const CHANNEL_MAP_FIELDS: &str =
    "channel-map.revision.revision,channel-map.revision.created-at";

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(rename = "channel-map", default)]
    channel_map: Vec<ChannelMapEntry>,
}

#[derive(Debug, Deserialize)]
struct ChannelMapEntry {
    channel: ChannelInfo,
    revision: RevisionInfo,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    track: String,
    risk: String,
    #[serde(default)]
    branch: Option<String>,
    base: BaseInfo,
}

#[derive(Debug, Deserialize)]
struct BaseInfo {
    name: String,
    channel: String,
    architecture: String,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    revision: u64,
    #[serde(rename = "created-at")]
    created_at: DateTime<Utc>,
}

impl From<ChannelMapEntry> for ChannelRelease {
    fn from(entry: ChannelMapEntry) -> Self {
        ChannelRelease {
            channel: Channel {
                track: Some(entry.channel.track),
                risk: entry.channel.risk,
                branch: entry.channel.branch.filter(|b| !b.is_empty()),
            },
            base: Base {
                name: entry.channel.base.name,
                channel: entry.channel.base.channel,
            },
            architecture: entry.channel.base.architecture,
            revision: entry.revision.revision,
            created_at: entry.revision.created_at,
        }
    }
}

/// Decodes the channel map of a Charmhub info response.
pub fn parse_channel_map(body: &str) -> Result<Vec<ChannelRelease>> {
    let info: InfoResponse = serde_json::from_str(body)?;
    Ok(info.channel_map.into_iter().map(Into::into).collect())
}

fn parse_commit_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }

    if let Some(date) = COMMIT_DATE_FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(value, format).ok())
    {
        return Ok(date.with_timezone(&Utc));
    }

    // no offset means UTC
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|_| {
            CephtoolsError::api(
                GIT_INFO_FILE,
                format!("unrecognised commit_date {value:?}"),
            )
        })
}

/// Reads the `commit_date:` line of a `git-info.txt`.
pub fn parse_git_info(info: &str) -> Result<DateTime<Utc>> {
    let value = info
        .lines()
        .find_map(|line| line.trim_start().strip_prefix(COMMIT_DATE_KEY))
        .map(str::trim)
        .ok_or_else(|| {
            CephtoolsError::api(GIT_INFO_FILE, "commit_date not found")
        })?;

    parse_commit_date(value)
}

/// Commit date recorded in the `git-info.txt` of a charm archive.
pub fn archive_commit_date<R: Read + Seek>(reader: R) -> Result<DateTime<Utc>> {
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut info = String::new();
    archive.by_name(GIT_INFO_FILE)?.read_to_string(&mut info)?;

    parse_git_info(&info)
}

/// Charmhub client. Reads go to the public info endpoint; releases are
/// published with `charmcraft`, which holds the publisher credentials.
/// Charm archives are fetched with `juju download`.
pub struct Charmhub {
    client: reqwest::Client,
    base_url: Url,
    runner: Arc<dyn CommandRunner>,
    download_dir: PathBuf,
}

impl Charmhub {
    /// Client for the URL in `CHARMHUB_URL`, or the public API.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let base_url = env::var(CHARMHUB_URL_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_CHARMHUB_URL.into());

        Self::with_base_url(&base_url, runner)
    }

    pub fn with_base_url(
        base_url: &str,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cephtools/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: Url::parse(base_url)?,
            runner,
            // juju is a strictly confined snap
            download_dir: state::home_dir()?.join("snap/juju/common"),
        })
    }

    /// Directory charm archives are downloaded into.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    fn info_url(&self, charm: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                CephtoolsError::invalid_config(format!(
                    "invalid charm store url: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["v2", "charms", "info", charm]);
        url.query_pairs_mut().append_pair("fields", CHANNEL_MAP_FIELDS);
        Ok(url)
    }
}

#[async_trait]
impl CharmStore for Charmhub {
    async fn channel_map(&self, charm: &str) -> Result<Vec<ChannelRelease>> {
        let url = self.info_url(charm)?;
        debug!("fetching channel map: {url}");

        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CephtoolsError::api(
                format!("charm store lookup for {charm}"),
                "charm not found",
            ));
        }

        let body = response.error_for_status()?.text().await?;

        parse_channel_map(&body).map_err(|e| {
            e.context(format!("failed to decode channel map for {charm}"))
        })
    }

    async fn commit_date(
        &self,
        charm: &str,
        channel: &Channel,
        base: &Base,
    ) -> Result<DateTime<Utc>> {
        fs::create_dir_all(&self.download_dir)?;
        // removed with the archive when dropped
        let dir = tempfile::Builder::new()
            .prefix("cephtools-")
            .tempdir_in(&self.download_dir)?;
        let archive = dir.path().join(format!("{charm}.charm"));

        let cmd = Cmd::new("juju").args([
            "download".to_string(),
            charm.to_string(),
            "--channel".to_string(),
            channel.to_string(),
            "--base".to_string(),
            base.to_string(),
            "--filepath".to_string(),
            archive.display().to_string(),
        ]);
        self.runner.run_checked(cmd).await?;

        let file = fs::File::open(&archive)?;
        archive_commit_date(file).with_context(|| {
            format!("failed to read {GIT_INFO_FILE} of {charm} on {channel}")
        })
    }

    async fn release(
        &self,
        charm: &str,
        revision: u64,
        channel: &Channel,
    ) -> Result<()> {
        let cmd = Cmd::new("charmcraft").args([
            "release".to_string(),
            charm.to_string(),
            format!("--revision={revision}"),
            format!("--channel={channel}"),
        ]);

        self.runner.run_checked(cmd).await?;

        Ok(())
    }
}
