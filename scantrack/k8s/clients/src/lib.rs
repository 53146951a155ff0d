//! Per-cluster Kubernetes clients.
//!
//! Each kubeconfig source yields one [`ClusterClient`] registered under a
//! resolved, human-meaningful cluster name. Construction performs no
//! network I/O; a malformed-but-parseable kubeconfig is accepted here and
//! only fails on first use.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod identity;

use anyhow::{bail, Context, Result};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A named, per-cluster API client.
///
/// Owned by the [`ClusterClientRegistry`]; never mutated after creation.
pub struct ClusterClient {
    name: String,
    client: Client,
    config: Config,
}

impl ClusterClient {
    pub fn new(name: impl Into<String>, client: Client, config: Config) -> Self {
        Self {
            name: name.into(),
            client,
            config,
        }
    }

    /// Builds a client from a kubeconfig file, resolving its cluster
    /// identity from the file's current context.
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path)
            .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
        let name = identity::resolve(&kubeconfig);

        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .with_context(|| format!("Failed to load kubeconfig {}", path.display()))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(config.clone())
            .with_context(|| format!("Failed to build client for cluster '{name}'"))?;
        Ok(Self::new(name, client, config))
    }

    /// Builds a client from the pod's service-account environment.
    pub fn from_incluster() -> Result<Self> {
        let mut config = Config::incluster().context("No in-cluster configuration")?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client =
            Client::try_from(config.clone()).context("Failed to build in-cluster client")?;
        Ok(Self::new(identity::INCLUSTER, client, config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Shared handle to a [`ClusterClientRegistry`].
pub type SharedClients = Arc<ClusterClientRegistry>;

/// Maps cluster names to their clients.
///
/// Written only during bootstrap; read-mostly afterward.
#[derive(Default)]
pub struct ClusterClientRegistry {
    clients: RwLock<HashMap<String, Arc<ClusterClient>>>,
}

impl ClusterClientRegistry {
    pub fn get(&self, name: &str) -> Option<Arc<ClusterClient>> {
        self.clients.read().get(name).cloned()
    }

    /// Registers a client under its resolved name. A duplicate identity
    /// overwrites the earlier entry: an explicit kubeconfig-directory entry
    /// supersedes an auto-detected default.
    pub fn set(&self, client: ClusterClient) -> Option<Arc<ClusterClient>> {
        let name = client.name().to_string();
        self.clients.write().insert(name, Arc::new(client))
    }

    /// All registered cluster names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}

/// Assembles the client registry from every available kubeconfig source.
///
/// Sources, in registration order: non-hidden files in `kubeconfig_dir`
/// (parse failures are logged and skipped), the in-cluster service account
/// when present, and the default kubeconfig. Fatal only when zero clients
/// could be constructed.
pub async fn bootstrap(
    kubeconfig_dir: &Path,
    default_kubeconfig: Option<&Path>,
) -> Result<SharedClients> {
    let registry = ClusterClientRegistry::default();

    match std::fs::read_dir(kubeconfig_dir) {
        Ok(entries) => {
            let mut paths: Vec<_> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && !is_hidden(path))
                .collect();
            paths.sort();

            for path in paths {
                match ClusterClient::from_kubeconfig(&path).await {
                    Ok(client) => {
                        info!(cluster = %client.name(), path = %path.display(), "Registered cluster");
                        if let Some(replaced) = registry.set(client) {
                            warn!(cluster = %replaced.name(), "Replaced duplicate cluster identity");
                        }
                    }
                    Err(error) => {
                        warn!(%error, path = %path.display(), "Skipping unusable kubeconfig");
                    }
                }
            }
        }
        Err(error) => {
            debug!(%error, dir = %kubeconfig_dir.display(), "No kubeconfig directory");
        }
    }

    match ClusterClient::from_incluster() {
        Ok(client) => {
            info!(cluster = %client.name(), "Registered in-cluster client");
            registry.set(client);
        }
        Err(error) => debug!(%error, "Not running in a cluster"),
    }

    match default_client(default_kubeconfig).await {
        Ok(client) => {
            info!(cluster = %client.name(), "Registered default-kubeconfig cluster");
            registry.set(client);
        }
        Err(error) => debug!(%error, "No usable default kubeconfig"),
    }

    if registry.is_empty() {
        bail!("No cluster client could be constructed from any kubeconfig source");
    }
    Ok(Arc::new(registry))
}

async fn default_client(path: Option<&Path>) -> Result<ClusterClient> {
    if let Some(path) = path {
        return ClusterClient::from_kubeconfig(path).await;
    }

    let kubeconfig = Kubeconfig::read().context("Failed to read default kubeconfig")?;
    let name = identity::resolve(&kubeconfig);
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("Failed to load default kubeconfig")?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);
    let client = Client::try_from(config.clone())
        .with_context(|| format!("Failed to build client for cluster '{name}'"))?;
    Ok(ClusterClient::new(name, client, config))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}
