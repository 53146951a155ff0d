use crate::{fetch::ApiFetcher, reader::Reader};
use anyhow::{Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use scantrack_cache::{persist, ReportCache};
use scantrack_core::DiscoverReports;
use scantrack_k8s_clients as clients;
use scantrack_k8s_index::{watch, CrdRegistry, FallbackDiscover};
use std::path::PathBuf;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[clap(
    name = "scantrack",
    about = "Aggregates security report resources across clusters"
)]
pub struct Args {
    #[clap(long, default_value = "scantrack=info,warn", env = "SCANTRACK_LOG")]
    log_level: String,

    /// Directory holding one kubeconfig file per cluster.
    #[clap(long, default_value = "/kubeconfigs", env = "SCANTRACK_KUBECONFIG_DIR")]
    kubeconfig_dir: PathBuf,

    /// Kubeconfig registered in addition to the directory entries.
    #[clap(long, env = "SCANTRACK_DEFAULT_KUBECONFIG")]
    default_kubeconfig: Option<PathBuf>,

    /// Where the cache snapshot is written between restarts.
    #[clap(
        long,
        default_value = "/tmp/scantrack-cache.json",
        env = "SCANTRACK_CACHE_PATH"
    )]
    cache_path: PathBuf,

    /// Lifetime of cached report entries, in seconds.
    #[clap(long, default_value = "300", env = "SCANTRACK_CACHE_TTL_SECONDS")]
    cache_ttl: u64,

    /// How often the cache is snapshotted to disk, in seconds.
    #[clap(long, default_value = "60", env = "SCANTRACK_SNAPSHOT_INTERVAL_SECONDS")]
    snapshot_interval: u64,

    /// How long a discovered report-kind registry stays fresh, in seconds.
    #[clap(long, default_value = "300", env = "SCANTRACK_REGISTRY_TTL_SECONDS")]
    registry_ttl: u64,

    /// Disables the per-kind watches that invalidate cache entries when
    /// reports change.
    #[clap(long)]
    watches_disabled: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            kubeconfig_dir,
            default_kubeconfig,
            cache_path,
            cache_ttl,
            snapshot_interval,
            registry_ttl,
            watches_disabled,
        } = self;

        let filter = EnvFilter::try_new(&log_level)
            .with_context(|| format!("Invalid log level {log_level}"))?;
        tracing_subscriber::fmt().with_env_filter(filter).init();

        let clients =
            clients::bootstrap(&kubeconfig_dir, default_kubeconfig.as_deref()).await?;
        let registry = CrdRegistry::shared(Duration::from_secs(registry_ttl));
        let cache = ReportCache::shared();
        cache.load_or_cold_start(&cache_path);

        let mut prom = <Registry>::default();
        registry
            .metrics()
            .register(prom.sub_registry_with_prefix("index"));
        cache.register_metrics(prom.sub_registry_with_prefix("cache"));

        // Seed the registry from the first cluster that answers; the rest
        // serve the same operator CRDs. A total failure is tolerated here
        // and retried lazily on the first request.
        for name in clients.names() {
            let Some(cluster) = clients.get(&name) else {
                continue;
            };
            let discover = FallbackDiscover::for_cluster(cluster.client());
            match registry.discover(&discover).await {
                Ok(()) => break,
                Err(error) => {
                    warn!(%error, cluster = %name, "Initial report-kind discovery failed")
                }
            }
        }

        let (drain_tx, drain_rx) = drain::channel();

        if watches_disabled {
            info!("Cache invalidation watches are disabled");
        } else {
            // Supervisors follow the registry's kind subscription, so
            // watchers also come up for kinds a later lazy refresh
            // discovers after a failed seed.
            for name in clients.names() {
                let Some(cluster) = clients.get(&name) else {
                    continue;
                };
                tokio::spawn(watch::supervise_cluster(
                    cluster.client(),
                    name.clone(),
                    registry.kinds_rx(),
                    cache.clone(),
                    drain_rx.clone(),
                ));
            }
        }

        tokio::spawn(persist(
            cache.clone(),
            cache_path.clone(),
            Duration::from_secs(snapshot_interval),
            drain_rx.clone(),
        ));
        drop(drain_rx);

        let reader = Reader::new(
            clients.clone(),
            registry,
            cache.clone(),
            ApiFetcher::default(),
            Duration::from_secs(cache_ttl),
        );

        // Warm the identity entries so the first dashboard request is served
        // from memory.
        let cluster_names = reader.clusters().await?;
        let kinds = reader.report_kinds().await?;
        info!(
            clusters = cluster_names.len(),
            kinds = kinds.len(),
            "Serving report queries"
        );

        shutdown_signal().await;
        info!("Shutting down");
        drain_tx.drain().await;

        let mut rendered = String::new();
        if prometheus_client::encoding::text::encode(&mut rendered, &prom).is_ok() {
            debug!(metrics = %rendered, "Final metrics");
        }
        Ok(())
    }
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(signal) => signal,
        Err(error) => {
            warn!(%error, "Failed to register SIGTERM handler");
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "Failed to wait for SIGINT");
            }
            return;
        }
    };

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(error) = res {
                warn!(%error, "Failed to wait for SIGINT");
            }
        }
        _ = terminate.recv() => {}
    }
}
