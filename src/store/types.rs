//! Channel, base and channel-map types.
use chrono::{DateTime, Utc};
use std::{fmt, str::FromStr};

use crate::error::CephtoolsError;

/// Track used when a channel names only a risk.
pub const DEFAULT_TRACK: &str = "latest";
/// OS name used when a base names only a version.
pub const DEFAULT_BASE_NAME: &str = "ubuntu";

const RISKS: [&str; 4] = ["stable", "candidate", "beta", "edge"];

/// A charm channel such as `squid/candidate` or `edge`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub track: Option<String>,
    pub risk: String,
    pub branch: Option<String>,
}

impl Channel {
    /// Track name with `latest` standing in for a missing one.
    pub fn track_or_default(&self) -> &str {
        self.track.as_deref().unwrap_or(DEFAULT_TRACK)
    }

    /// Whether a channel-map entry with these parts refers to this channel.
    pub fn matches(
        &self,
        track: &str,
        risk: &str,
        branch: Option<&str>,
    ) -> bool {
        self.track_or_default() == track
            && self.risk == risk
            && self.branch.as_deref() == branch
    }
}

impl FromStr for Channel {
    type Err = CephtoolsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();

        if parts.iter().any(|p| p.is_empty()) {
            return Err(CephtoolsError::invalid_args(format!(
                "invalid channel: {s:?}"
            )));
        }

        let channel = match parts.as_slice() {
            [risk] => Channel {
                track: None,
                risk: risk.to_string(),
                branch: None,
            },
            [track, risk] if RISKS.contains(risk) => Channel {
                track: Some(track.to_string()),
                risk: risk.to_string(),
                branch: None,
            },
            // risk/branch form
            [risk, branch] if RISKS.contains(risk) => Channel {
                track: None,
                risk: risk.to_string(),
                branch: Some(branch.to_string()),
            },
            [track, risk, branch] => Channel {
                track: Some(track.to_string()),
                risk: risk.to_string(),
                branch: Some(branch.to_string()),
            },
            _ => {
                return Err(CephtoolsError::invalid_args(format!(
                    "invalid channel: {s:?}"
                )));
            }
        };

        if !RISKS.contains(&channel.risk.as_str()) {
            return Err(CephtoolsError::invalid_args(format!(
                "invalid channel {s:?}: risk must be one of {}",
                RISKS.join(", ")
            )));
        }

        Ok(channel)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(track) = &self.track {
            write!(f, "{track}/")?;
        }
        write!(f, "{}", self.risk)?;
        if let Some(branch) = &self.branch {
            write!(f, "/{branch}")?;
        }
        Ok(())
    }
}

/// An OS base such as `ubuntu@24.04`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Base {
    pub name: String,
    pub channel: String,
}

impl FromStr for Base {
    type Err = CephtoolsError;

    /// Accepts `name@channel` or a bare channel (`24.04`), which implies
    /// `ubuntu`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, channel) = match s.split_once('@') {
            Some((name, channel)) => (name, channel),
            None => (DEFAULT_BASE_NAME, s),
        };

        if name.is_empty() || channel.is_empty() || channel.contains('@') {
            return Err(CephtoolsError::invalid_args(format!(
                "invalid base {s:?}: expected NAME@CHANNEL such as ubuntu@24.04"
            )));
        }

        Ok(Base {
            name: name.into(),
            channel: channel.into(),
        })
    }
}

impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.channel)
    }
}

/// One row of a charm's channel map: a revision attached to a channel for
/// a base and architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRelease {
    pub channel: Channel,
    pub base: Base,
    pub architecture: String,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
}

/// Rows attached to `channel` for `base`, across architectures.
pub fn releases_for<'a>(
    releases: &'a [ChannelRelease],
    channel: &'a Channel,
    base: &'a Base,
) -> impl Iterator<Item = &'a ChannelRelease> + 'a {
    releases.iter().filter(move |r| {
        &r.base == base
            && channel.matches(
                r.channel.track_or_default(),
                &r.channel.risk,
                r.channel.branch.as_deref(),
            )
    })
}

/// Most recent revision attached to `channel` for `base`. Among
/// architectures the latest creation time wins.
pub fn latest_release<'a>(
    releases: &'a [ChannelRelease],
    channel: &'a Channel,
    base: &'a Base,
) -> Option<&'a ChannelRelease> {
    releases_for(releases, channel, base).max_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then(a.revision.cmp(&b.revision))
    })
}

/// Distinct revisions attached to `channel` for `base`, ascending.
pub fn attached_revisions(
    releases: &[ChannelRelease],
    channel: &Channel,
    base: &Base,
) -> Vec<u64> {
    let mut revisions: Vec<u64> = releases_for(releases, channel, base)
        .map(|r| r.revision)
        .collect();
    revisions.sort_unstable();
    revisions.dedup();
    revisions
}
