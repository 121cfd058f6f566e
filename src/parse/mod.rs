pub mod extract;

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::debug;

use crate::cli::config::SpiderConfig;
use crate::queue::{StageQueue, TokenGate, TokenInfo, WorkItem};
use crate::spider::worker::WorkerHandle;
use crate::storage::dedup::DedupStore;
use crate::storage::users::{UserProfile, UserStore};

/// Everything the two parse loops need, cloneable so a restarted loop
/// picks up the same collaborators.
#[derive(Clone)]
struct ParseDeps {
    config: Arc<SpiderConfig>,
    gate: Arc<TokenGate>,
    dedup: Arc<dyn DedupStore>,
    users: Arc<dyn UserStore>,
    analysed: Arc<StageQueue<TokenInfo>>,
    profile_html: Arc<StageQueue<WorkItem>>,
    list_html: Arc<StageQueue<WorkItem>>,
}

/// Downstream consumer of the raw HTML queues.
///
/// Runs two supervised loops: the profile loop turns profile pages into
/// analysed tokens (and is the only place the dedup set is written),
/// the list loop feeds newly discovered tokens back into the gate.
/// Each loop carries its own failure flag and can be restarted
/// independently by the supervisor.
pub struct ParseStage {
    deps: ParseDeps,
    shutdown: watch::Receiver<bool>,
    profile_loop: Mutex<Option<WorkerHandle>>,
    list_loop: Mutex<Option<WorkerHandle>>,
}

impl ParseStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<SpiderConfig>,
        gate: Arc<TokenGate>,
        dedup: Arc<dyn DedupStore>,
        users: Arc<dyn UserStore>,
        analysed: Arc<StageQueue<TokenInfo>>,
        profile_html: Arc<StageQueue<WorkItem>>,
        list_html: Arc<StageQueue<WorkItem>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            deps: ParseDeps {
                config,
                gate,
                dedup,
                users,
                analysed,
                profile_html,
                list_html,
            },
            shutdown,
            profile_loop: Mutex::new(None),
            list_loop: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        *self.profile_loop.lock().await = Some(self.spawn_profile_loop());
        *self.list_loop.lock().await = Some(self.spawn_list_loop());
    }

    fn spawn_profile_loop(&self) -> WorkerHandle {
        WorkerHandle::spawn(
            "profile-parser",
            profile_parse_loop(self.deps.clone(), self.shutdown.clone()),
        )
    }

    fn spawn_list_loop(&self) -> WorkerHandle {
        WorkerHandle::spawn(
            "list-parser",
            list_parse_loop(self.deps.clone(), self.shutdown.clone()),
        )
    }

    pub async fn profile_loop_failed(&self) -> bool {
        self.profile_loop
            .lock()
            .await
            .as_ref()
            .map(WorkerHandle::is_failed)
            .unwrap_or(false)
    }

    pub async fn list_loop_failed(&self) -> bool {
        self.list_loop
            .lock()
            .await
            .as_ref()
            .map(WorkerHandle::is_failed)
            .unwrap_or(false)
    }

    pub async fn restart_profile_loop(&self) {
        *self.profile_loop.lock().await = Some(self.spawn_profile_loop());
    }

    pub async fn restart_list_loop(&self) {
        *self.list_loop.lock().await = Some(self.spawn_list_loop());
    }

    /// Wait for both loops to finish. Used only during shutdown.
    pub async fn stop(&self) {
        let handles = [
            self.profile_loop.lock().await.take(),
            self.list_loop.lock().await.take(),
        ];
        for handle in handles.into_iter().flatten() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle.join()).await;
        }
    }
}

/// Consume profile pages: extract counts, mark the token seen, persist
/// the profile and emit a TokenInfo for the list workers.
async fn profile_parse_loop(deps: ParseDeps, shutdown: watch::Receiver<bool>) -> Result<()> {
    let idle = Duration::from_millis(deps.config.spider.idle_backoff_ms);
    debug!("Profile parse loop started");

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        let Some(item) = deps.profile_html.pop_timeout(idle).await else {
            if deps.profile_html.is_closed().await {
                return Ok(());
            }
            continue;
        };

        let facts = extract::profile_facts(&item.html);

        // The profile page is consumed for good from here on, so this is
        // the point where the token becomes "seen".
        deps.dedup.mark(&item.token).await?;

        deps.users
            .save_profile(&UserProfile {
                url_token: item.token.clone(),
                following_count: facts.following_count,
                follower_count: facts.follower_count,
                crawled_at: Utc::now(),
            })
            .await?;

        let info = TokenInfo {
            url_token: item.token,
            following_count: facts.following_count,
            follower_count: facts.follower_count,
        };
        debug!(token = %info.url_token, from = %item.worker, "Parsed profile page");
        if deps.analysed.push(info).await.is_err() {
            return Ok(());
        }
    }
}

/// Consume relationship-list pages and feed discovered tokens back
/// into the gate.
///
/// This loop closes the pipeline cycle, so its offer to the gate is
/// bounded: blocking here while every downstream queue sits at its
/// high watermark would wedge the whole pipeline. Tokens the gate
/// cannot admit in time are dropped; they stay unmarked and are
/// rediscovered by later list pages.
async fn list_parse_loop(deps: ParseDeps, shutdown: watch::Receiver<bool>) -> Result<()> {
    let idle = Duration::from_millis(deps.config.spider.idle_backoff_ms);
    debug!("List parse loop started");

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }
        let Some(item) = deps.list_html.pop_timeout(idle).await else {
            if deps.list_html.is_closed().await {
                return Ok(());
            }
            continue;
        };

        let tokens = extract::discovered_tokens(&item.html);
        if tokens.is_empty() {
            continue;
        }
        debug!(
            token = %item.token,
            discovered = tokens.len(),
            from = %item.worker,
            "Parsed list page"
        );
        match deps.gate.offer_timeout(tokens, idle).await {
            Ok(unadmitted) if !unadmitted.is_empty() => {
                debug!(
                    token = %item.token,
                    dropped = unadmitted.len(),
                    "Gate saturated, dropping discovered tokens"
                );
            }
            Ok(_) => {}
            Err(_) => return Ok(()),
        }
    }
}
