//! Live Kubernetes fetches behind a seam the reader can fake in tests.

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{ApiResource, DynamicObject, ListParams},
    Api, Client, ResourceExt,
};
use scantrack_core::ReportKind;
use tracing::debug;

/// Raw report access against one cluster's API server.
#[async_trait::async_trait]
pub trait FetchReports: Send + Sync {
    /// Lists raw report objects. A kind whose CRD is absent from the
    /// cluster yields an empty list, not an error.
    async fn list_reports(
        &self,
        client: Client,
        kind: &ReportKind,
        namespace: Option<&str>,
        limit: Option<u32>,
        continue_token: Option<&str>,
    ) -> Result<Vec<serde_json::Value>>;

    /// Fetches one raw report object; `None` when it does not exist.
    async fn get_report(
        &self,
        client: Client,
        kind: &ReportKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Lists a cluster's namespace names.
    async fn list_namespaces(&self, client: Client) -> Result<Vec<String>>;
}

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

fn is_missing_crd(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api) if api.code == 404)
}

/// The production fetcher: dynamic list/get plus a typed namespace list.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiFetcher;

#[async_trait::async_trait]
impl FetchReports for ApiFetcher {
    async fn list_reports(
        &self,
        client: Client,
        kind: &ReportKind,
        namespace: Option<&str>,
        limit: Option<u32>,
        continue_token: Option<&str>,
    ) -> Result<Vec<serde_json::Value>> {
        let ar = api_resource(kind);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(client, ns, &ar),
            _ => Api::all_with(client, &ar),
        };

        let mut params = ListParams::default();
        if let Some(limit) = limit {
            params = params.limit(limit);
        }
        if let Some(token) = continue_token {
            params = params.continue_token(token);
        }

        let list = match api.list(&params).await {
            Ok(list) => list,
            Err(error) if is_missing_crd(&error) => {
                debug!(kind = %kind.name, "Report CRD not installed");
                return Ok(Vec::new());
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to list {} reports", kind.name))
            }
        };

        let values = list
            .items
            .into_iter()
            .map(|item| raw_object(&ar, item))
            .collect();
        Ok(values)
    }

    async fn get_report(
        &self,
        client: Client,
        kind: &ReportKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let ar = api_resource(kind);
        let api: Api<DynamicObject> = match namespace {
            Some(ns) if kind.namespaced => Api::namespaced_with(client, ns, &ar),
            _ => Api::all_with(client, &ar),
        };

        match api.get_opt(name).await {
            Ok(Some(obj)) => Ok(Some(raw_object(&ar, obj))),
            Ok(None) => Ok(None),
            Err(error) if is_missing_crd(&error) => Ok(None),
            Err(error) => {
                Err(error).with_context(|| format!("Failed to get {} '{name}'", kind.name))
            }
        }
    }

    async fn list_namespaces(&self, client: Client) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(client);
        let list = api
            .list(&ListParams::default())
            .await
            .context("Failed to list namespaces")?;
        let mut names: Vec<String> = list.items.iter().map(ResourceExt::name_any).collect();
        names.sort();
        Ok(names)
    }
}

/// Serializes a listed object, reinstating the `apiVersion`/`kind` pair the
/// list API strips from individual items.
fn raw_object(ar: &ApiResource, obj: DynamicObject) -> serde_json::Value {
    let mut value = serde_json::to_value(obj).unwrap_or(serde_json::Value::Null);
    if let serde_json::Value::Object(ref mut map) = value {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(ar.api_version.clone()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(ar.kind.clone()),
        );
    }
    value
}
