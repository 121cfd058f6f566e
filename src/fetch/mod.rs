pub mod http;

use anyhow::Result;
use async_trait::async_trait;

pub use http::HttpFetcher;

/// Outcome of one fetch attempt for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Response body, to be forwarded downstream
    Success(String),

    /// Transient failure; the caller must retry the same work item
    /// without touching its logical state
    Reuse,

    /// The item cannot currently be served (e.g. no usable session);
    /// the caller should back off and poll again later
    Unavailable,
}

/// Fetch collaborator used by every crawl worker. Each worker binds a
/// dedicated long-lived session under its own name before entering its
/// loop, so connection and proxy state is never shared across workers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Establish (or replace) the network session bound to a worker.
    async fn bind_session(&self, worker: &str) -> Result<()>;

    /// Fetch a URL through the session bound to `worker`.
    async fn fetch(&self, url: &str, worker: &str) -> Result<FetchOutcome>;
}
