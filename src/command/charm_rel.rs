//! `charm-rel`: point a target channel at the source channel's revisions.
use log::*;
use std::sync::Arc;

use crate::{
    cli::CharmRelArgs,
    error::{CephtoolsError, Result, ResultExt},
    exec::SystemRunner,
    store::{Base, Channel, CharmStore, Charmhub, types::attached_revisions},
};

/// A charm whose release did not complete.
#[derive(Debug)]
pub struct CharmFailure {
    pub charm: String,
    pub error: CephtoolsError,
}

pub async fn execute(args: &CharmRelArgs) -> Result<()> {
    let source: Channel = args.source.parse()?;
    let target: Channel = args.target.parse()?;
    let base: Base = args.base.parse()?;

    if args.charms.is_empty() {
        warn!("no charms given: nothing to release");
        return Ok(());
    }

    let store = Charmhub::new(Arc::new(SystemRunner))?;

    let failures =
        release_charms(&store, &args.charms, &source, &target, &base, args.apply)
            .await;

    summarize(args.charms.len(), failures)
}

/// Releases each charm in turn. A failing charm is reported and the
/// remaining charms are still processed.
pub async fn release_charms(
    store: &dyn CharmStore,
    charms: &[String],
    source: &Channel,
    target: &Channel,
    base: &Base,
    apply: bool,
) -> Vec<CharmFailure> {
    let mut failures = vec![];

    for charm in charms {
        println!("--- {charm} ---");
        if !apply {
            println!("Dry run mode: no changes will be made.");
        }

        if let Err(error) =
            release_charm(store, charm, source, target, base, apply).await
        {
            error!("{charm}: {error}");
            failures.push(CharmFailure {
                charm: charm.clone(),
                error,
            });
        }
    }

    failures
}

async fn release_charm(
    store: &dyn CharmStore,
    charm: &str,
    source: &Channel,
    target: &Channel,
    base: &Base,
    apply: bool,
) -> Result<()> {
    let releases = store
        .channel_map(charm)
        .await
        .with_context(|| format!("failed to read channel map of {charm}"))?;

    let revisions = attached_revisions(&releases, source, base);

    if revisions.is_empty() {
        return Err(CephtoolsError::api(
            format!("charm {charm}"),
            format!("could not resolve revision for {charm} on {source} ({base})"),
        ));
    }

    let mut first_error = None;

    for revision in revisions {
        if !apply {
            println!("  would release {charm} {revision} to {target}");
            continue;
        }

        println!("Releasing {charm} {revision} to {target}...");

        if let Err(e) = store.release(charm, revision, target).await {
            let e = e.context(format!(
                "failed to release {charm} {revision} to {target}"
            ));
            error!("{e}");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn summarize(total: usize, failures: Vec<CharmFailure>) -> Result<()> {
    if failures.is_empty() {
        info!("processed {total} charm(s) without errors");
        return Ok(());
    }

    let failed: Vec<&str> = failures.iter().map(|f| f.charm.as_str()).collect();
    error!(
        "{} of {total} charm(s) failed: {}",
        failed.len(),
        failed.join(", ")
    );

    Err(CephtoolsError::api(
        "charm-rel",
        format!("failed to release: {}", failed.join(", ")),
    ))
}
