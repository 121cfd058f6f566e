use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::{thread_rng, Rng};
use reqwest::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::cli::config::{FetchSettings, ProxySettings};
use crate::fetch::{FetchOutcome, Fetcher};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Pause between retry attempts against the same session.
const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// HTTP fetch collaborator backed by reqwest.
///
/// One cookie-holding client per worker name; a worker's session picks
/// its proxy once at bind time and keeps it until the session is
/// replaced. When a session exhausts its retry budget the fetcher
/// rebinds it with a freshly chosen proxy and reports `Reuse` so the
/// caller replays the work item through the new session.
pub struct HttpFetcher {
    /// Retry and timeout policy
    fetch: FetchSettings,

    /// Proxy pool configuration
    proxy: ProxySettings,

    /// Per-worker sessions (worker name -> client)
    sessions: RwLock<HashMap<String, Client>>,
}

impl HttpFetcher {
    pub fn new(fetch: FetchSettings, proxy: ProxySettings) -> Self {
        Self {
            fetch,
            proxy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Build a fresh session client, routed through a randomly chosen
    /// proxy when the pool is enabled.
    fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(self.fetch.connect_timeout_secs))
            .user_agent(DEFAULT_USER_AGENT);

        if self.proxy.enabled && !self.proxy.proxy_list.is_empty() {
            let pick = &self.proxy.proxy_list[thread_rng().gen_range(0..self.proxy.proxy_list.len())];
            let proxy = reqwest::Proxy::all(pick.proxy_url())
                .context(format!("Invalid proxy configuration: {}", pick.name))?;
            builder = builder.proxy(proxy);
            debug!(proxy = %pick.name, "Session routed through proxy");
        }

        builder.build().context("Failed to build HTTP client")
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn bind_session(&self, worker: &str) -> Result<()> {
        let client = self.build_client()?;
        self.sessions
            .write()
            .await
            .insert(worker.to_string(), client);
        debug!(worker, "Bound fetch session");
        Ok(())
    }

    async fn fetch(&self, url: &str, worker: &str) -> Result<FetchOutcome> {
        let client = { self.sessions.read().await.get(worker).cloned() };
        let Some(client) = client else {
            warn!(worker, "No session bound, fetch unavailable");
            return Ok(FetchOutcome::Unavailable);
        };

        let mut network_errors = 0;
        let mut bad_responses = 0;

        loop {
            match client.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response
                        .text()
                        .await
                        .context("Failed to read response body")?;
                    return Ok(FetchOutcome::Success(body));
                }
                Ok(response) => {
                    bad_responses += 1;
                    debug!(worker, url, status = %response.status(), "Non-success response");
                    if bad_responses > self.fetch.response_error_retry_times {
                        break;
                    }
                }
                Err(e) => {
                    network_errors += 1;
                    debug!(worker, url, error = %e, "Request error");
                    if network_errors > self.fetch.network_reconnect_times {
                        break;
                    }
                }
            }
            tokio::time::sleep(RETRY_PAUSE).await;
        }

        // The session looks poisoned; replace it (new cookies, new proxy)
        // and hand the work item back untouched.
        warn!(worker, url, "Retry budget exhausted, rebinding session");
        self.bind_session(worker).await?;
        Ok(FetchOutcome::Reuse)
    }
}
