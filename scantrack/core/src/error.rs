/// Errors surfaced to the routing layer.
///
/// Only conditions that make a specific request unanswerable propagate;
/// recoverable conditions (discovery fallback, stale cache, missing CRDs)
/// are resolved internally and yield empty results instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request shape does not match the resource's scope, e.g. a
    /// namespaced kind queried without a namespace.
    #[error("invalid scope: {0}")]
    InvalidScope(String),

    /// The named cluster, kind, or report does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The cluster's API server could not answer.
    #[error("upstream unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}

impl Error {
    pub fn unavailable(err: impl Into<anyhow::Error>) -> Self {
        Self::Unavailable(err.into())
    }
}
