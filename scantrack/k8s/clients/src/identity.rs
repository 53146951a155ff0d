//! Cluster-identity resolution.
//!
//! Kubeconfig generators produce wildly inconsistent context names: cloud
//! CLIs emit ARNs or `user@host:port` strings, manual edits emit anything.
//! The dashboard needs one stable, human-meaningful name per cluster, so
//! the raw context is normalized here.

use kube::config::Kubeconfig;
use regex::Regex;
use std::sync::LazyLock;

/// Identity of a client built from the in-cluster service account.
pub const INCLUSTER: &str = "incluster";

/// Identity of last resort when a kubeconfig names nothing at all.
pub const DEFAULT: &str = "default";

static EKS_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:[^:]*:eks:[^:]*:[^:]*:cluster/(.+)$").expect("should_compile")
});

/// Resolves the cluster name a kubeconfig should be registered under.
///
/// Priority: the EKS cluster name when `current-context` is an EKS ARN;
/// else the last `/`- or `:`-delimited segment of the context; else the raw
/// context; else the first declared cluster name; else [`DEFAULT`].
pub fn resolve(kubeconfig: &Kubeconfig) -> String {
    if let Some(context) = kubeconfig
        .current_context
        .as_deref()
        .filter(|c| !c.is_empty())
    {
        return from_context(context);
    }

    kubeconfig
        .clusters
        .first()
        .map(|c| c.name.clone())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT.to_string())
}

fn from_context(context: &str) -> String {
    if let Some(captures) = EKS_ARN.captures(context) {
        return captures[1].to_string();
    }

    if context.contains(['/', ':']) {
        if let Some(last) = context
            .rsplit(['/', ':'])
            .find(|segment| !segment.is_empty())
        {
            return last.to_string();
        }
    }

    context.to_string()
}
