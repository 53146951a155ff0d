//! Discovered report kinds, indexed per process.
//!
//! The registry holds one immutable snapshot of the report kinds a cluster
//! serves. Discovery replaces the snapshot wholesale under a write lock, so
//! readers never observe a half-applied refresh. Staleness is checked under
//! a read lock; a failed refresh keeps the previous snapshot authoritative
//! and is retried lazily by the next request that needs a fresh registry.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod catalog;
mod discover;
mod metrics;
pub mod watch;

pub use self::{
    catalog::ReportKindCatalog,
    discover::{
        kinds_from_crds, kinds_from_resource_list, CrdDefinitions, Discover, FallbackDiscover,
        PreferredResources,
    },
    metrics::IndexMetrics,
};

use anyhow::Result;
use parking_lot::RwLock;
use scantrack_core::ReportKind;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Snapshot {
    kinds: Vec<ReportKind>,
    by_name: HashMap<String, usize>,
    last_refresh: Option<Instant>,
}

impl Snapshot {
    fn new(kinds: Vec<ReportKind>) -> Self {
        let by_name = kinds
            .iter()
            .enumerate()
            .map(|(i, kind)| (kind.name.clone(), i))
            .collect();
        Self {
            kinds,
            by_name,
            last_refresh: Some(Instant::now()),
        }
    }
}

/// Shared handle to a [`CrdRegistry`].
pub type SharedRegistry = Arc<CrdRegistry>;

/// TTL-refreshed registry of the report kinds discovered on a cluster.
#[derive(Debug)]
pub struct CrdRegistry {
    snapshot: RwLock<Snapshot>,
    ttl: Duration,
    metrics: IndexMetrics,
    kinds_tx: tokio::sync::watch::Sender<Vec<ReportKind>>,
}

impl CrdRegistry {
    pub fn new(ttl: Duration) -> Self {
        let (kinds_tx, _) = tokio::sync::watch::channel(Vec::new());
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            ttl,
            metrics: IndexMetrics::default(),
            kinds_tx,
        }
    }

    pub fn shared(ttl: Duration) -> SharedRegistry {
        Arc::new(Self::new(ttl))
    }

    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// All kinds in the current snapshot, in discovery order.
    pub fn all(&self) -> Vec<ReportKind> {
        self.snapshot.read().kinds.clone()
    }

    /// Looks up a kind by its plural name.
    pub fn get(&self, name: &str) -> Option<ReportKind> {
        let snapshot = self.snapshot.read();
        snapshot
            .by_name
            .get(name)
            .map(|&i| snapshot.kinds[i].clone())
    }

    /// Subscribes to snapshot replacements. The receiver holds the kinds of
    /// the latest successful discovery and wakes on each new one; kinds that
    /// only materialize after startup (a seed discovery that failed, a CRD
    /// installed later) still reach subscribers.
    pub fn kinds_rx(&self) -> tokio::sync::watch::Receiver<Vec<ReportKind>> {
        self.kinds_tx.subscribe()
    }

    /// Whether the snapshot is empty or older than the refresh TTL.
    pub fn is_stale(&self) -> bool {
        let snapshot = self.snapshot.read();
        match snapshot.last_refresh {
            Some(at) => snapshot.kinds.is_empty() || at.elapsed() > self.ttl,
            None => true,
        }
    }

    /// Runs discovery and replaces the snapshot atomically.
    pub async fn discover(&self, discover: &dyn Discover) -> Result<()> {
        match discover.discover().await {
            Ok(kinds) => {
                info!(kinds = kinds.len(), "Discovered report kinds");
                self.metrics.discovery_succeeded(kinds.len());
                *self.snapshot.write() = Snapshot::new(kinds.clone());
                self.kinds_tx.send_replace(kinds);
                Ok(())
            }
            Err(error) => {
                self.metrics.discovery_failed();
                Err(error)
            }
        }
    }

    /// Refreshes the snapshot only when it is stale or empty.
    ///
    /// Failure is non-fatal to the registry: the previous snapshot remains
    /// authoritative, and the unmet TTL makes the next eligible request
    /// retry. The error is returned so the caller can log it.
    pub async fn refresh_if_needed(&self, discover: &dyn Discover) -> Result<()> {
        if !self.is_stale() {
            debug!("Report-kind registry is fresh");
            return Ok(());
        }
        self.discover(discover).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn kind(name: &str, namespaced: bool) -> ReportKind {
        ReportKind {
            name: name.to_string(),
            short_name: String::new(),
            api_version: "aquasecurity.github.io/v1alpha1".to_string(),
            namespaced,
            kind: name.to_string(),
        }
    }

    struct Counting {
        kinds: Vec<ReportKind>,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(kinds: Vec<ReportKind>) -> Self {
            Self {
                kinds,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Discover for Counting {
        async fn discover(&self) -> Result<Vec<ReportKind>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.kinds.clone())
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl Discover for Failing {
        async fn discover(&self) -> Result<Vec<ReportKind>> {
            anyhow::bail!("denied")
        }
    }

    #[tokio::test]
    async fn every_discovered_kind_is_retrievable_by_name() {
        let registry = CrdRegistry::new(Duration::from_secs(300));
        let discover = Counting::new(vec![
            kind("vulnerabilityreports", true),
            kind("clustercompliancereports", false),
        ]);
        registry.discover(&discover).await.unwrap();

        for k in registry.all() {
            assert_eq!(registry.get(&k.name), Some(k.clone()));
        }
    }

    #[tokio::test]
    async fn refresh_within_ttl_is_idempotent() {
        let registry = CrdRegistry::new(Duration::from_secs(300));
        let discover = Counting::new(vec![kind("vulnerabilityreports", true)]);

        registry.refresh_if_needed(&discover).await.unwrap();
        registry.refresh_if_needed(&discover).await.unwrap();
        assert_eq!(discover.calls(), 1);
    }

    #[tokio::test]
    async fn empty_snapshot_is_always_stale() {
        let registry = CrdRegistry::new(Duration::from_secs(300));
        let discover = Counting::new(Vec::new());

        registry.refresh_if_needed(&discover).await.unwrap();
        // An empty result leaves the registry empty, so the next call
        // retries discovery rather than trusting the TTL.
        registry.refresh_if_needed(&discover).await.unwrap();
        assert_eq!(discover.calls(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let registry = CrdRegistry::new(Duration::from_secs(0));
        let discover = Counting::new(vec![kind("vulnerabilityreports", true)]);
        registry.discover(&discover).await.unwrap();

        assert!(registry.refresh_if_needed(&Failing).await.is_err());
        assert_eq!(registry.all().len(), 1);
        assert!(registry.get("vulnerabilityreports").is_some());
    }

    #[tokio::test]
    async fn discovery_wakes_kind_subscribers() {
        let registry = CrdRegistry::new(Duration::from_secs(300));
        let mut rx = registry.kinds_rx();
        assert!(rx.borrow_and_update().is_empty());

        registry
            .discover(&Counting::new(vec![kind("vulnerabilityreports", true)]))
            .await
            .unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().len(), 1);
    }

    #[tokio::test]
    async fn late_subscribers_see_the_current_kinds() {
        let registry = CrdRegistry::new(Duration::from_secs(300));
        registry
            .discover(&Counting::new(vec![
                kind("vulnerabilityreports", true),
                kind("sbomreports", true),
            ]))
            .await
            .unwrap();

        let kinds: Vec<_> = registry
            .kinds_rx()
            .borrow()
            .iter()
            .map(|k| k.name.clone())
            .collect();
        assert_eq!(kinds, vec!["vulnerabilityreports", "sbomreports"]);
    }

    #[tokio::test]
    async fn discovery_replaces_snapshot_wholesale() {
        let registry = CrdRegistry::new(Duration::from_secs(300));
        registry
            .discover(&Counting::new(vec![
                kind("vulnerabilityreports", true),
                kind("sbomreports", true),
            ]))
            .await
            .unwrap();
        registry
            .discover(&Counting::new(vec![kind("configauditreports", true)]))
            .await
            .unwrap();

        assert_eq!(registry.all().len(), 1);
        assert!(registry.get("vulnerabilityreports").is_none());
        assert!(registry.get("configauditreports").is_some());
    }
}
