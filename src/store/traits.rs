//! Traits related to charm stores
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    store::types::{Base, Channel, ChannelRelease},
};

/// Read and release access to a charm store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CharmStore: Send + Sync {
    /// Every revision currently attached to a channel of `charm`.
    async fn channel_map(&self, charm: &str) -> Result<Vec<ChannelRelease>>;

    /// Commit time of the source tree the charm currently on `channel` for
    /// `base` was built from.
    async fn commit_date(
        &self,
        charm: &str,
        channel: &Channel,
        base: &Base,
    ) -> Result<DateTime<Utc>>;

    /// Points `channel` of `charm` at `revision`.
    async fn release(
        &self,
        charm: &str,
        revision: u64,
        channel: &Channel,
    ) -> Result<()>;
}
