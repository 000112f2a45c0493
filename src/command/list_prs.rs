//! `list-prs`: pull requests merged between two channels' revisions.
use chrono::{DateTime, SecondsFormat, Utc};
use derive_builder::Builder;
use log::*;
use std::{path::Path, sync::Arc};

use crate::{
    cli::ListPrsArgs,
    error::{CephtoolsError, Result, ResultExt},
    exec::SystemRunner,
    forge::{
        Github, ListPrRequest, PullRequest, PullRequestSource, RemoteConfig,
        config::resolve_token,
    },
    store::{Base, Channel, CharmStore, Charmhub, types::latest_release},
};

#[derive(Debug, Builder)]
#[builder(setter(into), build_fn(private, name = "_build"))]
pub struct ListPrsParams {
    pub charm: String,
    pub source: Channel,
    pub target: Channel,
    pub base: Base,
    pub base_branch: String,
    /// Keep pull requests that touch nothing under the charm directory.
    #[builder(default)]
    pub all_paths: bool,
}

impl ListPrsParamsBuilder {
    pub fn build(&self) -> Result<ListPrsParams> {
        self._build().map_err(|e| {
            CephtoolsError::invalid_args(format!(
                "Failed to build list-prs parameters: {e}"
            ))
        })
    }
}

impl ListPrsParams {
    pub fn builder() -> ListPrsParamsBuilder {
        ListPrsParamsBuilder::default()
    }

    fn from_args(args: &ListPrsArgs) -> Result<Self> {
        Self::builder()
            .charm(args.charm.as_str())
            .source(args.source.parse::<Channel>()?)
            .target(args.target.parse::<Channel>()?)
            .base(args.base.parse::<Base>()?)
            .base_branch(args.base_branch.as_str())
            .all_paths(args.all_paths)
            .build()
    }
}

pub async fn execute(args: &ListPrsArgs) -> Result<()> {
    let params = ListPrsParams::from_args(args)?;

    let token = resolve_token(args.github_token.as_deref());
    let remote = match &args.github_repo {
        Some(url) => RemoteConfig::from_url(url, token)?,
        None => RemoteConfig::from_repo_path(Path::new(&args.repo), token)?,
    };
    debug!("listing pull requests of {}", remote.slug());

    let github = Github::new(remote)?;
    let store = Charmhub::new(Arc::new(SystemRunner))?;

    for pr in list_prs(&store, &github, &params).await? {
        println!("{}", format_pull_request(&pr));
    }

    Ok(())
}

/// Pull requests closed between the source commits of the most recent
/// revisions on the source and target channels, newest first.
pub async fn list_prs(
    store: &dyn CharmStore,
    prs: &dyn PullRequestSource,
    params: &ListPrsParams,
) -> Result<Vec<PullRequest>> {
    let charm = &params.charm;

    let releases = store
        .channel_map(charm)
        .await
        .with_context(|| format!("failed to read channel map of {charm}"))?;

    let Some(source) = latest_release(&releases, &params.source, &params.base)
    else {
        info!(
            "no revision of {charm} attached to {} for {}",
            params.source, params.base
        );
        return Ok(vec![]);
    };

    let Some(target) = latest_release(&releases, &params.target, &params.base)
    else {
        info!(
            "no revision of {charm} attached to {} for {}",
            params.target, params.base
        );
        return Ok(vec![]);
    };

    if source.revision == target.revision {
        info!(
            "{} and {} point at the same release",
            params.source, params.target
        );
        return Ok(vec![]);
    }

    let source_date =
        commit_date(store, charm, &params.source, &params.base).await?;
    let target_date =
        commit_date(store, charm, &params.target, &params.base).await?;

    debug!(
        "{charm}: {} is revision {} built from {source_date}, {} is revision {} built from {target_date}",
        params.source, source.revision, params.target, target.revision
    );

    if source_date == target_date {
        info!(
            "{} and {} were built from the same commit",
            params.source, params.target
        );
        return Ok(vec![]);
    }

    let after = source_date.min(target_date);
    let until = source_date.max(target_date);

    let request = ListPrRequest {
        base_branch: params.base_branch.clone(),
        closed_after: after,
        closed_until: until,
        include_files: !params.all_paths,
    };

    let mut found: Vec<PullRequest> = prs
        .closed_pull_requests(request)
        .await?
        .into_iter()
        .filter(|pr| in_window(pr.closed_at, after, until))
        .filter(|pr| params.all_paths || pr.touches_dir(charm))
        .collect();

    found.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));

    Ok(found)
}

async fn commit_date(
    store: &dyn CharmStore,
    charm: &str,
    channel: &Channel,
    base: &Base,
) -> Result<DateTime<Utc>> {
    store
        .commit_date(charm, channel, base)
        .await
        .with_context(|| {
            format!("failed to read commit date of {charm} on {channel} ({base})")
        })
}

fn in_window(
    closed_at: DateTime<Utc>,
    after: DateTime<Utc>,
    until: DateTime<Utc>,
) -> bool {
    closed_at > after && closed_at <= until
}

/// Output block for one pull request.
pub fn format_pull_request(pr: &PullRequest) -> String {
    format!(
        "#{}  {}\n{}  closedAt: {}\n",
        pr.number,
        pr.title,
        pr.url,
        pr.closed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
