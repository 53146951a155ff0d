use crate::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A report custom-resource kind served by a cluster.
///
/// Identified by `name` (the plural resource name); immutable once
/// discovered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportKind {
    /// Plural resource name, e.g. `vulnerabilityreports`.
    pub name: String,

    /// Operator short name, e.g. `vuln`. Empty when the cluster did not
    /// advertise one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub short_name: String,

    /// Group/version, e.g. `aquasecurity.github.io/v1alpha1`.
    pub api_version: String,

    /// Whether objects of this kind live in a namespace.
    pub namespaced: bool,

    /// The Kind, e.g. `VulnerabilityReport`.
    pub kind: String,
}

impl ReportKind {
    /// Splits `api_version` into its group and version parts.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", &*self.api_version),
        }
    }
}

/// A normalized report, reconstructed from a live API object or the cache.
///
/// The cluster is the source of truth; this is a read model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Plural name of the report kind.
    pub kind: String,
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,

    /// Severity bucket derived from the report's summary counts.
    pub status: Severity,

    /// The raw report payload.
    pub data: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Parameters of a report-list request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportQuery {
    /// Plural name of the report kind to list.
    pub kind: String,
    pub cluster: String,
    pub namespace: Option<String>,

    /// Server-side page size.
    pub limit: Option<u32>,
    /// Continuation token from a previous page.
    pub continue_token: Option<String>,
    /// Free-text filter applied to report names.
    pub search: Option<String>,
}

impl ReportQuery {
    pub fn new(kind: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            cluster: cluster.into(),
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}
