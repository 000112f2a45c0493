//! Implements the PullRequestSource trait for Github
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::*;
use octocrab::{
    Octocrab, Page,
    models::{pulls::PullRequest as GithubPullRequest, repos::DiffEntry},
    params,
};

use crate::{
    error::Result,
    forge::{
        config::RemoteConfig,
        request::{ListPrRequest, PullRequest},
        traits::PullRequestSource,
    },
};

const PAGE_SIZE: u8 = 100;

/// What to do with one entry of the updated-descending pull request list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Closed inside the window.
    Keep(DateTime<Utc>),
    /// Outside the window, or never closed. Later entries may still match.
    Skip,
    /// Last updated before the window opened, as is everything after it.
    Stop,
}

fn placement(
    updated_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    req: &ListPrRequest,
) -> Placement {
    if let Some(updated_at) = updated_at
        && updated_at <= req.closed_after
    {
        return Placement::Stop;
    }

    match closed_at {
        Some(closed_at)
            if closed_at > req.closed_after && closed_at <= req.closed_until =>
        {
            Placement::Keep(closed_at)
        }
        _ => Placement::Skip,
    }
}

/// GitHub client scoped to one repository.
pub struct Github {
    config: RemoteConfig,
    instance: Octocrab,
}

impl Github {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let builder = match &config.token {
            Some(token) => Octocrab::builder().personal_token(token.clone()),
            None => Octocrab::builder(),
        };

        let instance = builder.base_uri(config.api_base_uri())?.build()?;

        Ok(Self { config, instance })
    }

    async fn changed_files(&self, number: u64) -> Result<Vec<String>> {
        let first_page = self
            .instance
            .pulls(&self.config.owner, &self.config.repo)
            .list_files(number)
            .await?;

        let entries: Vec<DiffEntry> =
            self.instance.all_pages(first_page).await?;

        Ok(entries.into_iter().map(|e| e.filename).collect())
    }

    async fn convert(
        &self,
        pr: GithubPullRequest,
        closed_at: DateTime<Utc>,
        include_files: bool,
    ) -> Result<PullRequest> {
        let files = if include_files {
            self.changed_files(pr.number).await?
        } else {
            vec![]
        };

        Ok(PullRequest {
            number: pr.number,
            title: pr.title.unwrap_or_default(),
            url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
            closed_at,
            files,
        })
    }
}

#[async_trait]
impl PullRequestSource for Github {
    async fn closed_pull_requests(
        &self,
        req: ListPrRequest,
    ) -> Result<Vec<PullRequest>> {
        info!(
            "listing closed pull requests of {} against {}",
            self.config.slug(),
            req.base_branch
        );

        // most recently updated first so paging can stop once updates fall
        // behind the window
        let mut page: Page<GithubPullRequest> = self
            .instance
            .pulls(&self.config.owner, &self.config.repo)
            .list()
            .state(params::State::Closed)
            .base(req.base_branch.clone())
            .sort(params::pulls::Sort::Updated)
            .direction(params::Direction::Descending)
            .per_page(PAGE_SIZE)
            .send()
            .await?;

        let mut pull_requests = vec![];

        loop {
            let mut exhausted = false;
            let next = page.next.clone();

            for pr in page.items {
                match placement(pr.updated_at, pr.closed_at, &req) {
                    Placement::Stop => {
                        exhausted = true;
                        break;
                    }
                    Placement::Skip => {
                        debug!("skipping pull request #{}", pr.number);
                    }
                    Placement::Keep(closed_at) => {
                        pull_requests.push(
                            self.convert(pr, closed_at, req.include_files).await?,
                        );
                    }
                }
            }

            if exhausted {
                break;
            }

            match self.instance.get_page::<GithubPullRequest>(&next).await? {
                Some(next_page) => page = next_page,
                None => break,
            }
        }

        debug!("found {} closed pull requests", pull_requests.len());

        Ok(pull_requests)
    }
}
