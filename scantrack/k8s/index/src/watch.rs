//! Watch-driven cache invalidation.
//!
//! One task per cluster and report kind follows a watcher stream over the
//! dynamic API. Any applied or deleted object invalidates the cached list
//! pages for that kind/cluster and the object's own detail entry, so the
//! next read repopulates from the API server. Watcher errors are logged;
//! the stream re-establishes itself with its own backoff.

use futures::StreamExt;
use kube::{
    api::{ApiResource, DynamicObject},
    runtime::watcher,
    Api, Client, ResourceExt,
};
use scantrack_cache::{keys, SharedCache};
use scantrack_core::ReportKind;
use std::collections::HashSet;
use tracing::{debug, info_span, trace, warn, Instrument};

fn api_resource(kind: &ReportKind) -> ApiResource {
    let (group, version) = kind.group_version();
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: kind.api_version.clone(),
        kind: kind.kind.clone(),
        plural: kind.name.clone(),
    }
}

/// Keeps one invalidation watcher running per discovered kind in a cluster.
///
/// Kinds are taken from the registry's subscription, so a kind that only
/// materializes after startup (a seed discovery that failed and succeeded
/// on a later lazy refresh, a CRD installed mid-flight) gets its watcher as
/// soon as it appears. A kind that leaves the snapshot keeps its watcher;
/// the dead stream logs errors until drain.
pub async fn supervise_cluster(
    client: Client,
    cluster: String,
    mut kinds: tokio::sync::watch::Receiver<Vec<ReportKind>>,
    cache: SharedCache,
    drain: drain::Watch,
) {
    let mut watched = HashSet::new();
    loop {
        for kind in newly_watched(&mut watched, &kinds.borrow_and_update()) {
            let span = info_span!("watch", cluster = %cluster, kind = %kind.name);
            tokio::spawn(
                invalidate_on_changes(
                    client.clone(),
                    cluster.clone(),
                    kind,
                    cache.clone(),
                    drain.clone(),
                )
                .instrument(span),
            );
        }

        tokio::select! {
            changed = kinds.changed() => {
                if changed.is_err() {
                    debug!(%cluster, "Report-kind registry dropped; stopping watch supervisor");
                    return;
                }
            }
            release = drain.clone().signaled() => {
                debug!(%cluster, "Stopping watch supervisor");
                drop(release);
                return;
            }
        }
    }
}

/// Returns the kinds without a running watcher, marking them as watched.
fn newly_watched(watched: &mut HashSet<String>, kinds: &[ReportKind]) -> Vec<ReportKind> {
    kinds
        .iter()
        .filter(|kind| watched.insert(kind.name.clone()))
        .cloned()
        .collect()
}

/// Follows changes to one report kind in one cluster, invalidating the
/// affected cache entries until the process drains.
pub async fn invalidate_on_changes(
    client: Client,
    cluster: String,
    kind: ReportKind,
    cache: SharedCache,
    drain: drain::Watch,
) {
    let api: Api<DynamicObject> = Api::all_with(client, &api_resource(&kind));
    let events = watcher(api, watcher::Config::default());
    tokio::pin!(events);

    let shutdown = drain.signaled();
    tokio::pin!(shutdown);

    debug!(%cluster, kind = %kind.name, "Watching for report changes");
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(Ok(watcher::Event::Apply(obj) | watcher::Event::Delete(obj))) => {
                    invalidate(&cache, &kind, &cluster, &obj);
                }
                Some(Ok(_)) => {
                    // Initial-sync events describe state the cache will
                    // repopulate lazily; nothing to invalidate.
                    trace!(%cluster, kind = %kind.name, "Ignoring init event");
                }
                Some(Err(error)) => {
                    warn!(%error, %cluster, kind = %kind.name, "Watch stream error");
                }
                None => {
                    warn!(%cluster, kind = %kind.name, "Watch stream ended");
                    return;
                }
            },
            release = &mut shutdown => {
                debug!(%cluster, kind = %kind.name, "Stopping watch");
                drop(release);
                return;
            }
        }
    }
}

fn invalidate(cache: &SharedCache, kind: &ReportKind, cluster: &str, obj: &DynamicObject) {
    let removed = cache.remove_prefix(&keys::list_prefix(&kind.name, cluster));
    let detail = keys::detail(&kind.name, cluster, obj.namespace().as_deref(), &obj.name_any());
    let removed = removed + cache.remove_prefix(&detail);
    trace!(
        %cluster,
        kind = %kind.name,
        object = %obj.name_any(),
        removed,
        "Processed report change"
    );
}
