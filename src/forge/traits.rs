//! Traits related to source hosting
use async_trait::async_trait;

use crate::{
    error::Result,
    forge::request::{ListPrRequest, PullRequest},
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// Closed pull requests against `req.base_branch` closed in
    /// `(req.closed_after, req.closed_until]`. Pull requests that were
    /// never closed are left out.
    async fn closed_pull_requests(
        &self,
        req: ListPrRequest,
    ) -> Result<Vec<PullRequest>>;
}
