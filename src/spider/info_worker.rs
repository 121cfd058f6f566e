use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::debug;

use crate::cli::config::SpiderConfig;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::queue::{StageQueue, Token, TokenGate, WorkItem};
use crate::spider::urls::UrlBuilder;
use crate::spider::worker::sleep_or_shutdown;

/// One profile-info fetch worker.
///
/// Pulls unseen tokens from the gate, fetches each token's profile page
/// through its own bound session and pushes the raw HTML downstream for
/// parsing. A `Reuse` outcome returns the token to the gate untouched;
/// an `Unavailable` outcome drops the attempt, since endlessly retrying
/// a token no session can serve would stall the whole pool.
pub struct InfoWorker {
    name: String,
    config: Arc<SpiderConfig>,
    fetcher: Arc<dyn Fetcher>,
    gate: Arc<TokenGate>,
    profile_html: Arc<StageQueue<WorkItem>>,
    urls: UrlBuilder,
}

impl InfoWorker {
    pub fn new(
        name: &str,
        config: Arc<SpiderConfig>,
        fetcher: Arc<dyn Fetcher>,
        gate: Arc<TokenGate>,
        profile_html: Arc<StageQueue<WorkItem>>,
    ) -> Self {
        let urls = UrlBuilder::new(&config.spider.base_url);
        Self {
            name: name.to_string(),
            config,
            fetcher,
            gate,
            profile_html,
            urls,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.fetcher.bind_session(&self.name).await?;
        debug!(worker = %self.name, "Profile-info worker started");

        let interval = Duration::from_millis(self.config.spider.scrape_interval_ms);

        loop {
            let Some(token) = self.next_unseen_token(&mut shutdown).await? else {
                return Ok(());
            };

            match self
                .fetcher
                .fetch(&self.urls.profile(&token), &self.name)
                .await?
            {
                FetchOutcome::Reuse => {
                    // Hand the token back unchanged; no state was consumed.
                    if self.gate.offer(vec![token]).await.is_err() {
                        return Ok(());
                    }
                }
                FetchOutcome::Success(html) => {
                    let item = WorkItem {
                        html,
                        token,
                        worker: self.name.clone(),
                    };
                    if self.profile_html.push(item).await.is_err() {
                        return Ok(());
                    }
                }
                FetchOutcome::Unavailable => {
                    debug!(worker = %self.name, token, "Fetch unavailable, dropping attempt");
                }
            }

            if sleep_or_shutdown(interval, &mut shutdown).await {
                return Ok(());
            }
        }
    }

    /// Poll the gate until it yields a token the dedup set has not seen.
    /// `None` means shutdown was requested.
    async fn next_unseen_token(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Token>> {
        let idle = Duration::from_millis(self.config.spider.idle_backoff_ms);

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }

            match self.gate.poll().await {
                Some(token) => {
                    if !self.gate.is_seen(&token).await? {
                        return Ok(Some(token));
                    }
                    debug!(worker = %self.name, token, "Skipping already-seen token");
                }
                None => {
                    if sleep_or_shutdown(idle, shutdown).await {
                        return Ok(None);
                    }
                }
            }
        }
    }
}
