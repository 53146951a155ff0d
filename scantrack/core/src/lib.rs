#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
pub mod report;
mod severity;

pub use self::{
    error::Error,
    report::{Report, ReportKind, ReportQuery},
    severity::Severity,
};

/// The API group under which the scanning operator publishes its report
/// custom resources.
pub const REPORTS_API_GROUP: &str = "aquasecurity.github.io";

/// The API version currently served for all report kinds.
pub const REPORTS_API_VERSION: &str = "aquasecurity.github.io/v1alpha1";

/// Serves report lookups to the dashboard's routing layer.
///
/// Implementations resolve a query against the per-cluster clients and the
/// discovered report kinds, consulting the report cache before touching the
/// Kubernetes API.
#[async_trait::async_trait]
pub trait DiscoverReports {
    /// Returns the report kinds currently known for the serving clusters.
    async fn report_kinds(&self) -> Result<Vec<ReportKind>, Error>;

    /// Returns the names of all bootstrapped clusters, sorted.
    async fn clusters(&self) -> Result<Vec<String>, Error>;

    /// Lists the namespaces of a single cluster.
    async fn namespaces(&self, cluster: &str) -> Result<Vec<String>, Error>;

    /// Lists reports matching a query.
    async fn list_reports(&self, query: &ReportQuery) -> Result<Vec<Report>, Error>;

    /// Fetches a single report by exact name.
    async fn get_report(
        &self,
        kind: &str,
        cluster: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Report, Error>;
}
