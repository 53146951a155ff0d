//! Cache key construction.
//!
//! Keys are pure functions of the query shape: distinct queries never
//! collide and identical queries always hit. Fields are joined with `/`
//! after escaping, and optional fields are encoded with a marker that a
//! present value can never produce, so the functions are injective over
//! their input tuples. List keys share a per-kind/cluster prefix so watch
//! events can invalidate them wholesale.

use scantrack_core::ReportQuery;

/// Key under which the cluster list is stored. Never expires.
pub const CLUSTERS: &str = "clusters";

fn esc(field: &str) -> String {
    field.replace('%', "%25").replace('/', "%2F")
}

/// `None` encodes as `-`; `Some(v)` as `=` + escaped `v`. The marker byte
/// keeps `None` distinct from every present value, including `Some("")`
/// and `Some("-")`.
fn opt(field: Option<&str>) -> String {
    match field {
        None => "-".to_string(),
        Some(v) => format!("={}", esc(v)),
    }
}

/// Key of a cluster's namespace list.
pub fn namespaces(cluster: &str) -> String {
    format!("namespaces/{}", esc(cluster))
}

/// Prefix shared by every list key for a kind within a cluster.
pub fn list_prefix(kind: &str, cluster: &str) -> String {
    format!("reports/{}/{}/", esc(kind), esc(cluster))
}

/// Key of a report-list result.
pub fn list(query: &ReportQuery) -> String {
    let limit = query.limit.map(|l| l.to_string());
    format!(
        "{}{}/{}/{}/{}",
        list_prefix(&query.kind, &query.cluster),
        opt(query.namespace.as_deref()),
        opt(limit.as_deref()),
        opt(query.continue_token.as_deref()),
        opt(query.search.as_deref()),
    )
}

/// Prefix shared by every detail key for a kind within a cluster.
pub fn detail_prefix(kind: &str, cluster: &str) -> String {
    format!("report/{}/{}/", esc(kind), esc(cluster))
}

/// Key of a single report's details.
pub fn detail(kind: &str, cluster: &str, namespace: Option<&str>, name: &str) -> String {
    format!(
        "{}{}/{}",
        detail_prefix(kind, cluster),
        opt(namespace),
        esc(name),
    )
}
