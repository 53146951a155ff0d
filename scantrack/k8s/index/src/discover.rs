//! Report-kind discovery strategies.
//!
//! Discovery is an ordered list of strategies tried in sequence; the first
//! success wins. Strategy A asks the discovery API for the group's served
//! resources. Strategy B lists `CustomResourceDefinition`s directly, which
//! survives clusters where discovery is RBAC-denied but CRD reads are not.

use anyhow::{bail, Context, Result};
use k8s_openapi::{
    apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition,
    apimachinery::pkg::apis::meta::v1::APIResourceList,
};
use kube::{api::ListParams, Api, Client};
use scantrack_core::{ReportKind, REPORTS_API_GROUP, REPORTS_API_VERSION};
use tracing::{debug, warn};

/// Yields the report kinds a cluster currently serves.
#[async_trait::async_trait]
pub trait Discover: Send + Sync {
    async fn discover(&self) -> Result<Vec<ReportKind>>;
}

/// Strategy A: the cluster's preferred resources for the reports group.
pub struct PreferredResources {
    client: Client,
    api_version: String,
}

impl PreferredResources {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_version: REPORTS_API_VERSION.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Discover for PreferredResources {
    async fn discover(&self) -> Result<Vec<ReportKind>> {
        let resources = self
            .client
            .list_api_group_resources(&self.api_version)
            .await
            .with_context(|| format!("Failed to enumerate resources of {}", self.api_version))?;
        Ok(kinds_from_resource_list(&resources))
    }
}

/// Strategy B: read the group's `CustomResourceDefinition`s.
pub struct CrdDefinitions {
    client: Client,
    group: String,
}

impl CrdDefinitions {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            group: REPORTS_API_GROUP.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Discover for CrdDefinitions {
    async fn discover(&self) -> Result<Vec<ReportKind>> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        let crds = api
            .list(&ListParams::default())
            .await
            .context("Failed to list CustomResourceDefinitions")?;
        Ok(kinds_from_crds(crds.items.iter(), &self.group))
    }
}

/// The production strategy list: preferred resources, then CRDs.
pub struct FallbackDiscover {
    strategies: Vec<Box<dyn Discover>>,
}

impl FallbackDiscover {
    pub fn new(strategies: Vec<Box<dyn Discover>>) -> Self {
        Self { strategies }
    }

    pub fn for_cluster(client: Client) -> Self {
        Self::new(vec![
            Box::new(PreferredResources::new(client.clone())),
            Box::new(CrdDefinitions::new(client)),
        ])
    }
}

#[async_trait::async_trait]
impl Discover for FallbackDiscover {
    async fn discover(&self) -> Result<Vec<ReportKind>> {
        let mut last = None;
        for (i, strategy) in self.strategies.iter().enumerate() {
            match strategy.discover().await {
                Ok(kinds) => {
                    if i > 0 {
                        debug!(strategy = i, "Discovery succeeded via fallback strategy");
                    }
                    return Ok(kinds);
                }
                Err(error) => {
                    warn!(%error, strategy = i, "Discovery strategy failed");
                    last = Some(error);
                }
            }
        }
        match last {
            Some(error) => Err(error),
            None => bail!("No discovery strategy configured"),
        }
    }
}

/// Builds report kinds from a discovery `APIResourceList`, excluding
/// subresources (resource names containing `/`).
pub fn kinds_from_resource_list(list: &APIResourceList) -> Vec<ReportKind> {
    list.resources
        .iter()
        .filter(|r| !r.name.contains('/'))
        .map(|r| ReportKind {
            name: r.name.clone(),
            short_name: r
                .short_names
                .as_ref()
                .and_then(|s| s.first())
                .cloned()
                .unwrap_or_default(),
            api_version: list.group_version.clone(),
            namespaced: r.namespaced,
            kind: r.kind.clone(),
        })
        .collect()
}

/// Builds report kinds from CRDs in `group`, preferring each CRD's
/// `served && storage` version and falling back to its first declared one.
pub fn kinds_from_crds<'a>(
    crds: impl Iterator<Item = &'a CustomResourceDefinition>,
    group: &str,
) -> Vec<ReportKind> {
    crds.filter(|crd| crd.spec.group == group)
        .filter_map(|crd| {
            let version = crd
                .spec
                .versions
                .iter()
                .find(|v| v.served && v.storage)
                .or_else(|| crd.spec.versions.first())?;
            Some(ReportKind {
                name: crd.spec.names.plural.clone(),
                short_name: crd
                    .spec
                    .names
                    .short_names
                    .as_ref()
                    .and_then(|s| s.first())
                    .cloned()
                    .unwrap_or_default(),
                api_version: format!("{group}/{}", version.name),
                namespaced: crd.spec.scope == "Namespaced",
                kind: crd.spec.names.kind.clone(),
            })
        })
        .collect()
}
