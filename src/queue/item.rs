use serde::{Deserialize, Serialize};

/// Opaque handle identifying one crawl target (a user profile).
pub type Token = String;

/// A token enriched with the relationship counts discovered while parsing
/// its profile page. Produced once per token by the profile parse loop and
/// consumed by exactly one relationship-list worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// The token this info belongs to
    pub url_token: Token,

    /// Number of profiles this user follows, if the page exposed it
    pub following_count: Option<u64>,

    /// Number of profiles following this user, if the page exposed it
    pub follower_count: Option<u64>,
}

/// One raw HTML page handed from a fetch worker to the parse stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Raw response body
    pub html: String,

    /// Token the page belongs to
    pub token: Token,

    /// Name of the worker that fetched the page, for log attribution
    pub worker: String,
}
