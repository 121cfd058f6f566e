use anyhow::Result;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::debug;

use crate::cli::config::QueueSettings;
use crate::queue::item::Token;
use crate::queue::stage::{QueueClosed, StageQueue};
use crate::storage::dedup::DedupStore;

/// Admission point for discovered tokens.
///
/// The gate pairs a FIFO admission queue with a read-only membership
/// query against the dedup store. Offers are not deduplicated: the same
/// token may be offered by several discoverers, and the filter is
/// consulted only when a worker polls a token out. The gate never writes
/// the dedup set; marking happens in the parse stage once a profile page
/// has been consumed for good, so an in-flight token cannot race a
/// duplicate offer.
pub struct TokenGate {
    admission: StageQueue<Token>,
    dedup: Arc<dyn DedupStore>,
}

impl TokenGate {
    pub fn new(settings: &QueueSettings, dedup: Arc<dyn DedupStore>) -> Self {
        Self {
            admission: StageQueue::new(
                "token",
                settings.token_queue_max,
                settings.token_queue_remain,
            ),
            dedup,
        }
    }

    /// Append discovered tokens to the admission queue.
    pub async fn offer(&self, tokens: Vec<Token>) -> Result<(), QueueClosed> {
        let count = tokens.len();
        for token in tokens {
            self.admission.push(token).await?;
        }
        if count > 0 {
            debug!(count, "Offered tokens to the gate");
        }
        Ok(())
    }

    /// Bounded-wait offer for producers that are themselves consumers
    /// of an upstream queue. Tokens that cannot be admitted within
    /// `wait` are handed back; since the filter is consulted at poll
    /// time, a caller may re-offer or drop them without breaking the
    /// dedup contract.
    pub async fn offer_timeout(
        &self,
        tokens: Vec<Token>,
        wait: Duration,
    ) -> Result<Vec<Token>, QueueClosed> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut pending = tokens.into_iter();

        while let Some(token) = pending.next() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if let Some(token) = self.admission.push_timeout(token, remaining).await? {
                let mut unadmitted = vec![token];
                unadmitted.extend(pending);
                debug!(
                    count = unadmitted.len(),
                    "Gate saturated, handing back unadmitted tokens"
                );
                return Ok(unadmitted);
            }
        }
        Ok(Vec::new())
    }

    /// Non-blocking pop from the admission queue. `None` means "try
    /// again later", not end of input.
    pub async fn poll(&self) -> Option<Token> {
        self.admission.try_pop().await
    }

    /// Membership query against the dedup store. May false-positive,
    /// never false-negatives.
    pub async fn is_seen(&self, token: &str) -> Result<bool> {
        self.dedup.exists(token).await
    }

    /// Current admission queue depth.
    pub async fn pending(&self) -> usize {
        self.admission.len().await
    }

    pub async fn close(&self) {
        self.admission.close().await;
    }
}
