use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::debug;

use crate::cli::config::NotificationSettings;
use crate::queue::{StageQueue, TokenGate, TokenInfo, WorkItem};
use crate::spider::worker::{sleep_or_shutdown, WorkerHandle};

/// Webhook-based status notifier.
///
/// When enabled it posts a message at startup and then a periodic
/// pipeline summary (queue depths) on `send_interval_secs`. The
/// reporting loop runs under the same supervision as the workers.
pub struct Notifier {
    settings: NotificationSettings,
    client: reqwest::Client,
    gate: Arc<TokenGate>,
    analysed: Arc<StageQueue<TokenInfo>>,
    profile_html: Arc<StageQueue<WorkItem>>,
    list_html: Arc<StageQueue<WorkItem>>,
    shutdown: watch::Receiver<bool>,
    service: Mutex<Option<WorkerHandle>>,
}

impl Notifier {
    pub fn new(
        settings: NotificationSettings,
        gate: Arc<TokenGate>,
        analysed: Arc<StageQueue<TokenInfo>>,
        profile_html: Arc<StageQueue<WorkItem>>,
        list_html: Arc<StageQueue<WorkItem>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            gate,
            analysed,
            profile_html,
            list_html,
            shutdown,
            service: Mutex::new(None),
        }
    }

    /// One-off message to the configured webhook.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        send_webhook(&self.client, &self.settings.webhook_url, text).await
    }

    pub async fn start(&self) {
        *self.service.lock().await = Some(self.spawn_loop());
    }

    fn spawn_loop(&self) -> WorkerHandle {
        let settings = self.settings.clone();
        let client = self.client.clone();
        let gate = self.gate.clone();
        let analysed = self.analysed.clone();
        let profile_html = self.profile_html.clone();
        let list_html = self.list_html.clone();
        let shutdown = self.shutdown.clone();

        WorkerHandle::spawn("notifier", async move {
            notify_loop(
                settings,
                client,
                gate,
                analysed,
                profile_html,
                list_html,
                shutdown,
            )
            .await
        })
    }

    pub async fn failed(&self) -> bool {
        self.service
            .lock()
            .await
            .as_ref()
            .map(WorkerHandle::is_failed)
            .unwrap_or(false)
    }

    pub async fn restart(&self) {
        *self.service.lock().await = Some(self.spawn_loop());
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.service.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle.join()).await;
        }
    }
}

async fn send_webhook(client: &reqwest::Client, url: &str, text: &str) -> Result<()> {
    client
        .post(url)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await
        .context("Failed to reach notification webhook")?
        .error_for_status()
        .context("Notification webhook rejected the message")?;
    Ok(())
}

async fn notify_loop(
    settings: NotificationSettings,
    client: reqwest::Client,
    gate: Arc<TokenGate>,
    analysed: Arc<StageQueue<TokenInfo>>,
    profile_html: Arc<StageQueue<WorkItem>>,
    list_html: Arc<StageQueue<WorkItem>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let interval = Duration::from_secs(settings.send_interval_secs);
    debug!("Notification loop started");

    loop {
        if sleep_or_shutdown(interval, &mut shutdown).await {
            return Ok(());
        }
        let text = format!(
            "pipeline status: tokens={} analysed={} profile_html={} list_html={}",
            gate.pending().await,
            analysed.len().await,
            profile_html.len().await,
            list_html.len().await,
        );
        send_webhook(&client, &settings.webhook_url, &text).await?;
    }
}
