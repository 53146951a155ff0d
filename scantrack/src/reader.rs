//! Serves report queries by orchestrating the discovered-kind registry, the
//! per-cluster clients, and the report cache.
//!
//! The cache is consulted first; a miss falls through to a live API call
//! whose normalized result repopulates the cache. A kind whose CRD is not
//! installed in the target cluster yields zero reports rather than an
//! error, so a dashboard polling clusters with different installed feature
//! sets degrades gracefully.

use crate::fetch::FetchReports;
use chrono::{DateTime, Utc};
use scantrack_cache::{keys, SharedCache};
use scantrack_core::{
    DiscoverReports, Error, Report, ReportKind, ReportQuery, Severity,
};
use scantrack_k8s_clients::{ClusterClient, SharedClients};
use scantrack_k8s_index::{FallbackDiscover, ReportKindCatalog, SharedRegistry};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

pub struct Reader<F> {
    clients: SharedClients,
    registry: SharedRegistry,
    catalog: ReportKindCatalog,
    cache: SharedCache,
    fetcher: F,
    cache_ttl: Duration,
}

/// Outcome of resolving a requested kind name.
enum Resolved {
    /// The kind is in the live registry: its CRD is installed.
    Installed(ReportKind),
    /// The kind is valid vocabulary but its CRD is not installed in the
    /// target cluster.
    Uninstalled(ReportKind),
}

impl Resolved {
    fn kind(&self) -> &ReportKind {
        match self {
            Self::Installed(kind) | Self::Uninstalled(kind) => kind,
        }
    }

    fn is_installed(&self) -> bool {
        matches!(self, Self::Installed(_))
    }
}

impl<F: FetchReports> Reader<F> {
    pub fn new(
        clients: SharedClients,
        registry: SharedRegistry,
        cache: SharedCache,
        fetcher: F,
        cache_ttl: Duration,
    ) -> Self {
        // Cluster membership is fixed at bootstrap. Writing the entry
        // through here keeps a snapshot loaded from a previous run from
        // serving that run's cluster list.
        if let Ok(bytes) = serde_json::to_vec(&clients.names()) {
            cache.set(keys::CLUSTERS, bytes, None);
        }
        Self {
            clients,
            registry,
            catalog: ReportKindCatalog::default(),
            cache,
            fetcher,
            cache_ttl,
        }
    }

    fn cluster(&self, name: &str) -> Result<Arc<ClusterClient>, Error> {
        self.clients
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("cluster '{name}'")))
    }

    /// Refreshes the discovered-kind registry when stale. Failure keeps the
    /// previous snapshot authoritative and is retried on a later request.
    async fn refresh_registry(&self, cluster: &ClusterClient) {
        let discover = FallbackDiscover::for_cluster(cluster.client());
        if let Err(error) = self.registry.refresh_if_needed(&discover).await {
            warn!(%error, cluster = %cluster.name(), "Report-kind discovery failed; serving stale registry");
        }
    }

    /// Maps a requested kind name (plural or short) to a [`Resolved`] kind,
    /// or `NotFound` when neither the registry nor the catalog knows it.
    async fn resolve_kind(&self, name: &str, cluster: &ClusterClient) -> Result<Resolved, Error> {
        self.refresh_registry(cluster).await;

        let canonical = self
            .catalog
            .get(name)
            .map(|k| k.name.clone())
            .unwrap_or_else(|| name.to_string());

        if let Some(kind) = self.registry.get(&canonical) {
            return Ok(Resolved::Installed(kind));
        }
        if let Some(kind) = self.catalog.get(&canonical) {
            return Ok(Resolved::Uninstalled(kind.clone()));
        }
        Err(Error::NotFound(format!("report kind '{name}'")))
    }

    fn check_list_scope(kind: &ReportKind, namespace: Option<&str>) -> Result<bool, Error> {
        if kind.namespaced && namespace.is_none() {
            return Err(Error::InvalidScope(format!(
                "report kind '{}' is namespaced; a namespace is required",
                kind.name
            )));
        }
        // A cluster-scoped kind has no namespace axis: a namespace filter
        // matches nothing rather than being an error.
        Ok(!(namespace.is_some() && !kind.namespaced))
    }
}

#[async_trait::async_trait]
impl<F: FetchReports> DiscoverReports for Reader<F> {
    async fn report_kinds(&self) -> Result<Vec<ReportKind>, Error> {
        if let Some(cluster) = self.clients.names().first().and_then(|n| self.clients.get(n)) {
            self.refresh_registry(&cluster).await;
        }

        let kinds = self.registry.all();
        if kinds.is_empty() {
            // Discovery has never succeeded; fall back to the static
            // vocabulary so the dashboard can still render its tabs.
            return Ok(self.catalog.all().to_vec());
        }
        Ok(kinds)
    }

    async fn clusters(&self) -> Result<Vec<String>, Error> {
        if let Some(bytes) = self.cache.get(keys::CLUSTERS) {
            if let Ok(names) = serde_json::from_slice::<Vec<String>>(&bytes) {
                return Ok(names);
            }
        }

        let names = self.clients.names();
        if let Ok(bytes) = serde_json::to_vec(&names) {
            // Cluster membership changes only by administrative action, so
            // the entry never expires.
            self.cache.set(keys::CLUSTERS, bytes, None);
        }
        Ok(names)
    }

    async fn namespaces(&self, cluster: &str) -> Result<Vec<String>, Error> {
        let client = self.cluster(cluster)?;

        let key = keys::namespaces(cluster);
        if let Some(bytes) = self.cache.get(&key) {
            if let Ok(names) = serde_json::from_slice::<Vec<String>>(&bytes) {
                return Ok(names);
            }
        }

        let names = self
            .fetcher
            .list_namespaces(client.client())
            .await
            .map_err(Error::unavailable)?;
        if let Ok(bytes) = serde_json::to_vec(&names) {
            self.cache.set(&key, bytes, Some(self.cache_ttl));
        }
        Ok(names)
    }

    async fn list_reports(&self, query: &ReportQuery) -> Result<Vec<Report>, Error> {
        let cluster = self.cluster(&query.cluster)?;
        let resolved = self.resolve_kind(&query.kind, &cluster).await?;
        let kind = resolved.kind();

        if !Self::check_list_scope(kind, query.namespace.as_deref())? {
            return Ok(Vec::new());
        }
        if !resolved.is_installed() {
            debug!(kind = %kind.name, cluster = %query.cluster, "Report CRD not installed; zero reports");
            return Ok(Vec::new());
        }

        let canonical = ReportQuery {
            kind: kind.name.clone(),
            ..query.clone()
        };
        let key = keys::list(&canonical);
        if let Some(bytes) = self.cache.get(&key) {
            if let Ok(reports) = serde_json::from_slice::<Vec<Report>>(&bytes) {
                return Ok(reports);
            }
        }

        let raw = self
            .fetcher
            .list_reports(
                cluster.client(),
                kind,
                canonical.namespace.as_deref(),
                canonical.limit,
                canonical.continue_token.as_deref(),
            )
            .await
            .map_err(Error::unavailable)?;

        let mut reports: Vec<Report> = raw
            .into_iter()
            .map(|value| normalize(kind, &canonical.cluster, value))
            .collect();
        if let Some(search) = canonical.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            reports.retain(|r| r.name.to_lowercase().contains(&needle));
        }

        if let Ok(bytes) = serde_json::to_vec(&reports) {
            self.cache.set(&key, bytes, Some(self.cache_ttl));
        }
        Ok(reports)
    }

    async fn get_report(
        &self,
        kind: &str,
        cluster: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Report, Error> {
        let client = self.cluster(cluster)?;
        let resolved = self.resolve_kind(kind, &client).await?;
        let kind = resolved.kind().clone();

        if kind.namespaced && namespace.is_none() {
            return Err(Error::InvalidScope(format!(
                "report kind '{}' is namespaced; a namespace is required",
                kind.name
            )));
        }
        if !kind.namespaced && namespace.is_some() || !resolved.is_installed() {
            return Err(Error::NotFound(format!("{} '{name}'", kind.name)));
        }

        let key = keys::detail(&kind.name, cluster, namespace, name);
        if let Some(bytes) = self.cache.get(&key) {
            if let Ok(report) = serde_json::from_slice::<Report>(&bytes) {
                return Ok(report);
            }
        }

        let raw = self
            .fetcher
            .get_report(client.client(), &kind, namespace, name)
            .await
            .map_err(Error::unavailable)?
            .ok_or_else(|| Error::NotFound(format!("{} '{name}'", kind.name)))?;

        let report = normalize(&kind, cluster, raw);
        if let Ok(bytes) = serde_json::to_vec(&report) {
            self.cache.set(&key, bytes, Some(self.cache_ttl));
        }
        Ok(report)
    }
}

fn parse_time(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Builds the normalized read model from a raw report object.
fn normalize(kind: &ReportKind, cluster: &str, value: Value) -> Report {
    let name = value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .map(str::to_string);
    let created_at = parse_time(&value, "/metadata/creationTimestamp");
    // The operator stamps the last scan time inside the report body.
    let updated_at = parse_time(&value, "/report/updateTimestamp").or(created_at);

    Report {
        kind: kind.name.clone(),
        cluster: cluster.to_string(),
        namespace,
        name,
        status: Severity::from_report(&value),
        data: value,
        created_at,
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use kube::{Client, Config};
    use scantrack_cache::ReportCache;
    use scantrack_k8s_clients::ClusterClientRegistry;
    use scantrack_k8s_index::{CrdRegistry, Discover};
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(3600);

    fn kind(name: &str, short: &str, kind_name: &str, namespaced: bool) -> ReportKind {
        ReportKind {
            name: name.to_string(),
            short_name: short.to_string(),
            api_version: "aquasecurity.github.io/v1alpha1".to_string(),
            namespaced,
            kind: kind_name.to_string(),
        }
    }

    struct Seeded(Vec<ReportKind>);

    #[async_trait::async_trait]
    impl Discover for Seeded {
        async fn discover(&self) -> Result<Vec<ReportKind>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct FakeFetch {
        reports: Vec<Value>,
        namespaces: Vec<String>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl FetchReports for FakeFetch {
        async fn list_reports(
            &self,
            _client: Client,
            _kind: &ReportKind,
            _namespace: Option<&str>,
            _limit: Option<u32>,
            _continue_token: Option<&str>,
        ) -> Result<Vec<Value>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.reports.clone())
        }

        async fn get_report(
            &self,
            _client: Client,
            _kind: &ReportKind,
            _namespace: Option<&str>,
            name: &str,
        ) -> Result<Option<Value>> {
            Ok(self
                .reports
                .iter()
                .find(|r| r.pointer("/metadata/name").and_then(Value::as_str) == Some(name))
                .cloned())
        }

        async fn list_namespaces(&self, _client: Client) -> Result<Vec<String>> {
            Ok(self.namespaces.clone())
        }
    }

    fn offline_clients(names: &[&str]) -> SharedClients {
        let registry = ClusterClientRegistry::default();
        for name in names {
            let config = Config::new("https://127.0.0.1:6443".parse().unwrap());
            let client = Client::try_from(config.clone()).unwrap();
            registry.set(ClusterClient::new(*name, client, config));
        }
        Arc::new(registry)
    }

    async fn reader_with(
        clusters: &[&str],
        kinds: Vec<ReportKind>,
        fetcher: FakeFetch,
    ) -> Reader<FakeFetch> {
        let registry = CrdRegistry::shared(TTL);
        registry.discover(&Seeded(kinds)).await.unwrap();
        Reader::new(
            offline_clients(clusters),
            registry,
            ReportCache::shared(),
            fetcher,
            TTL,
        )
    }

    fn vuln_report(name: &str, namespace: &str, critical: u64) -> Value {
        json!({
            "apiVersion": "aquasecurity.github.io/v1alpha1",
            "kind": "VulnerabilityReport",
            "metadata": {
                "name": name,
                "namespace": namespace,
                "creationTimestamp": "2026-05-01T12:00:00Z",
            },
            "report": {
                "summary": {"criticalCount": critical, "highCount": 1},
                "updateTimestamp": "2026-05-02T08:30:00Z",
            },
        })
    }

    fn default_kinds() -> Vec<ReportKind> {
        vec![
            kind("vulnerabilityreports", "vuln", "VulnerabilityReport", true),
            kind("clustercompliancereports", "compliance", "ClusterComplianceReport", false),
        ]
    }

    #[tokio::test]
    async fn namespaced_kind_without_namespace_is_a_caller_error() {
        let reader = reader_with(&["east"], default_kinds(), FakeFetch::default()).await;
        let query = ReportQuery::new("vulnerabilityreports", "east");
        assert!(matches!(
            reader.list_reports(&query).await,
            Err(Error::InvalidScope(_))
        ));
    }

    #[tokio::test]
    async fn cluster_scoped_kind_with_namespace_is_empty_not_an_error() {
        let fetcher = FakeFetch {
            reports: vec![vuln_report("should-not-surface", "default", 1)],
            ..Default::default()
        };
        let reader = reader_with(&["east"], default_kinds(), fetcher).await;
        let query = ReportQuery::new("clustercompliancereports", "east").in_namespace("default");
        assert_eq!(reader.list_reports(&query).await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn uninstalled_kind_lists_empty() {
        // `sbomreports` is catalog vocabulary but absent from the live
        // registry, i.e. its CRD is not installed in this cluster.
        let reader = reader_with(&["east"], default_kinds(), FakeFetch::default()).await;
        let query = ReportQuery::new("sbomreports", "east").in_namespace("default");
        assert_eq!(reader.list_reports(&query).await.unwrap(), Vec::new());
    }

    #[tokio::test]
    async fn unknown_kind_is_not_found() {
        let reader = reader_with(&["east"], default_kinds(), FakeFetch::default()).await;
        let query = ReportQuery::new("pods", "east").in_namespace("default");
        assert!(matches!(
            reader.list_reports(&query).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_cluster_is_not_found() {
        let reader = reader_with(&["east"], default_kinds(), FakeFetch::default()).await;
        let query = ReportQuery::new("vulnerabilityreports", "nowhere").in_namespace("default");
        assert!(matches!(
            reader.list_reports(&query).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn short_names_resolve_to_the_plural_kind() {
        let fetcher = FakeFetch {
            reports: vec![vuln_report("app-abc", "default", 0)],
            ..Default::default()
        };
        let reader = reader_with(&["east"], default_kinds(), fetcher).await;
        let query = ReportQuery::new("vuln", "east").in_namespace("default");
        let reports = reader.list_reports(&query).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, "vulnerabilityreports");
    }

    #[tokio::test]
    async fn list_normalizes_severity_and_timestamps() {
        let fetcher = FakeFetch {
            reports: vec![
                vuln_report("app-abc", "default", 2),
                vuln_report("app-def", "default", 0),
            ],
            ..Default::default()
        };
        let reader = reader_with(&["east"], default_kinds(), fetcher).await;
        let query = ReportQuery::new("vulnerabilityreports", "east").in_namespace("default");
        let reports = reader.list_reports(&query).await.unwrap();

        assert_eq!(reports[0].status, Severity::Critical);
        assert_eq!(reports[1].status, Severity::High);
        assert_eq!(reports[0].cluster, "east");
        assert_eq!(reports[0].namespace.as_deref(), Some("default"));
        assert_eq!(
            reports[0].created_at.unwrap().to_rfc3339(),
            "2026-05-01T12:00:00+00:00"
        );
        assert!(reports[0].updated_at.unwrap() > reports[0].created_at.unwrap());
    }

    #[tokio::test]
    async fn search_filters_by_report_name() {
        let fetcher = FakeFetch {
            reports: vec![
                vuln_report("nginx-deploy", "default", 1),
                vuln_report("redis-sts", "default", 1),
            ],
            ..Default::default()
        };
        let reader = reader_with(&["east"], default_kinds(), fetcher).await;
        let query = ReportQuery {
            search: Some("NGINX".to_string()),
            ..ReportQuery::new("vulnerabilityreports", "east").in_namespace("default")
        };
        let reports = reader.list_reports(&query).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "nginx-deploy");
    }

    #[tokio::test]
    async fn get_report_found_and_missing() {
        let fetcher = FakeFetch {
            reports: vec![vuln_report("app-abc", "default", 1)],
            ..Default::default()
        };
        let reader = reader_with(&["east"], default_kinds(), fetcher).await;

        let report = reader
            .get_report("vulnerabilityreports", "east", Some("default"), "app-abc")
            .await
            .unwrap();
        assert_eq!(report.status, Severity::Critical);

        assert!(matches!(
            reader
                .get_report("vulnerabilityreports", "east", Some("default"), "missing")
                .await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn namespaces_come_from_the_cluster_and_are_cached() {
        let fetcher = FakeFetch {
            namespaces: vec!["default".to_string(), "kube-system".to_string()],
            ..Default::default()
        };
        let cache = ReportCache::shared();
        let registry = CrdRegistry::shared(TTL);
        registry.discover(&Seeded(default_kinds())).await.unwrap();
        let reader = Reader::new(
            offline_clients(&["east"]),
            registry,
            cache.clone(),
            fetcher,
            TTL,
        );

        let names = reader.namespaces("east").await.unwrap();
        assert_eq!(names, vec!["default", "kube-system"]);
        assert!(cache.get(&keys::namespaces("east")).is_some());
        assert!(matches!(
            reader.namespaces("nowhere").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn clusters_are_sorted_and_never_expire() {
        let cache = ReportCache::shared();
        let registry = CrdRegistry::shared(TTL);
        registry.discover(&Seeded(default_kinds())).await.unwrap();
        let reader = Reader::new(
            offline_clients(&["west", "east"]),
            registry,
            cache.clone(),
            FakeFetch::default(),
            TTL,
        );

        assert_eq!(reader.clusters().await.unwrap(), vec!["east", "west"]);
        // Still present after an expiry sweep.
        cache.sweep();
        assert!(cache.get(keys::CLUSTERS).is_some());
    }

    #[tokio::test]
    async fn restored_snapshot_does_not_outlive_the_bootstrapped_clusters() {
        let cache = ReportCache::shared();
        // A snapshot carried over from a previous run, naming a cluster
        // that no longer has a kubeconfig.
        cache.set(
            keys::CLUSTERS,
            serde_json::to_vec(&vec!["old-cluster"]).unwrap(),
            None,
        );

        let registry = CrdRegistry::shared(TTL);
        registry.discover(&Seeded(default_kinds())).await.unwrap();
        let reader = Reader::new(
            offline_clients(&["new-cluster"]),
            registry,
            cache,
            FakeFetch::default(),
            TTL,
        );

        assert_eq!(reader.clusters().await.unwrap(), vec!["new-cluster"]);
    }

    #[tokio::test]
    async fn second_list_is_served_from_cache() {
        let fetcher = FakeFetch {
            reports: vec![vuln_report("app-abc", "default", 1)],
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cache = ReportCache::shared();
        let registry = CrdRegistry::shared(TTL);
        registry.discover(&Seeded(default_kinds())).await.unwrap();
        let reader = Reader::new(
            offline_clients(&["east"]),
            registry,
            cache.clone(),
            fetcher,
            TTL,
        );

        let query = ReportQuery::new("vulnerabilityreports", "east").in_namespace("default");
        let first = reader.list_reports(&query).await.unwrap();
        let cached_entries = cache.len();
        let second = reader.list_reports(&query).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), cached_entries);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lists_across_clusters_do_not_serialize() {
        let delay = Duration::from_millis(200);
        let registry = CrdRegistry::shared(TTL);
        registry.discover(&Seeded(default_kinds())).await.unwrap();
        let reader = Arc::new(Reader::new(
            offline_clients(&["east", "west"]),
            registry,
            ReportCache::shared(),
            FakeFetch {
                delay: Some(delay),
                ..Default::default()
            },
            TTL,
        ));

        let east = ReportQuery::new("vulnerabilityreports", "east").in_namespace("default");
        let west = ReportQuery::new("vulnerabilityreports", "west").in_namespace("default");

        let started = tokio::time::Instant::now();
        let (a, b) = tokio::join!(reader.list_reports(&east), reader.list_reports(&west));
        a.unwrap();
        b.unwrap();

        // Serialized backends would take two full delays.
        assert!(started.elapsed() < delay * 2, "{:?}", started.elapsed());
    }
}
