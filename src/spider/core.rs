use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cli::config::SpiderConfig;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::notify::Notifier;
use crate::parse::ParseStage;
use crate::queue::{StageQueue, TokenGate, TokenInfo, WorkItem};
use crate::spider::info_worker::InfoWorker;
use crate::spider::list_worker::ListWorker;
use crate::spider::worker::WorkerHandle;
use crate::storage::dedup::Dedup;
use crate::storage::users::UserStorage;

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The assembled pipeline: gate, queues, worker pools, parse stage and
/// notifier, plus the supervisor that keeps them running.
///
/// Workers are registered under stable names; when one crashes the
/// supervisor spawns a replacement under the same name, so the registry
/// keys never change over the life of the process.
pub struct Spider {
    config: Arc<SpiderConfig>,
    fetcher: Arc<dyn Fetcher>,
    gate: Arc<TokenGate>,
    analysed: Arc<StageQueue<TokenInfo>>,
    profile_html: Arc<StageQueue<WorkItem>>,
    list_html: Arc<StageQueue<WorkItem>>,
    parse: ParseStage,
    notifier: Option<Notifier>,
    info_workers: Mutex<HashMap<String, WorkerHandle>>,
    list_workers: Mutex<HashMap<String, WorkerHandle>>,
    shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Spider {
    pub async fn new(config: Arc<SpiderConfig>) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
            config.fetch.clone(),
            config.proxy.clone(),
        ));
        Self::assemble(config, fetcher).await
    }

    /// Wire the pipeline around an already-built fetcher.
    pub(crate) async fn assemble(
        config: Arc<SpiderConfig>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let dedup = Dedup::create(&config.dedup).await?;
        let users = UserStorage::create(&config.user_storage).await?;

        let gate = Arc::new(TokenGate::new(&config.queues, dedup.clone()));
        let analysed = Arc::new(StageQueue::new(
            "analysed-token",
            config.queues.analysed_queue_max,
            config.queues.analysed_queue_remain,
        ));
        let profile_html = Arc::new(StageQueue::new(
            "profile-html",
            config.queues.html_queue_max,
            config.queues.html_queue_remain,
        ));
        let list_html = Arc::new(StageQueue::new(
            "list-html",
            config.queues.html_queue_max,
            config.queues.html_queue_remain,
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);

        let parse = ParseStage::new(
            config.clone(),
            gate.clone(),
            dedup,
            users,
            analysed.clone(),
            profile_html.clone(),
            list_html.clone(),
            shutdown_rx.clone(),
        );

        let notifier = config.notification.enabled.then(|| {
            Notifier::new(
                config.notification.clone(),
                gate.clone(),
                analysed.clone(),
                profile_html.clone(),
                list_html.clone(),
                shutdown_rx.clone(),
            )
        });

        Ok(Self {
            config,
            fetcher,
            gate,
            analysed,
            profile_html,
            list_html,
            parse,
            notifier,
            info_workers: Mutex::new(HashMap::new()),
            list_workers: Mutex::new(HashMap::new()),
            shutdown,
            shutdown_rx,
        })
    }

    /// Seed the gate, start the parse stage and notifier, and spawn
    /// both worker pools.
    pub async fn start(&self) -> Result<()> {
        if let Some(seed) = &self.config.spider.seed_token {
            info!(token = %seed, "Seeding token gate");
            let _ = self.gate.offer(vec![seed.clone()]).await;
        }

        self.parse.start().await;

        if let Some(notifier) = &self.notifier {
            notifier.start().await;
            if let Err(e) = notifier.send_message("spider started").await {
                warn!("Startup notification failed: {:#}", e);
            }
        }

        let mut info_workers = self.info_workers.lock().await;
        for i in 0..self.config.spider.info_worker_count {
            let name = format!("info-worker-{i}");
            info_workers.insert(name.clone(), self.spawn_info_worker(&name));
        }
        drop(info_workers);

        let mut list_workers = self.list_workers.lock().await;
        for i in 0..self.config.spider.list_worker_count {
            let name = format!("list-worker-{i}");
            list_workers.insert(name.clone(), self.spawn_list_worker(&name));
        }
        drop(list_workers);

        info!(
            info_workers = self.config.spider.info_worker_count,
            list_workers = self.config.spider.list_worker_count,
            "Spider started"
        );
        Ok(())
    }

    fn spawn_info_worker(&self, name: &str) -> WorkerHandle {
        let worker = InfoWorker::new(
            name,
            self.config.clone(),
            self.fetcher.clone(),
            self.gate.clone(),
            self.profile_html.clone(),
        );
        let shutdown = self.shutdown_rx.clone();
        WorkerHandle::spawn(name, async move { worker.run(shutdown).await })
    }

    fn spawn_list_worker(&self, name: &str) -> WorkerHandle {
        let worker = ListWorker::new(
            name,
            self.config.clone(),
            self.fetcher.clone(),
            self.analysed.clone(),
            self.list_html.clone(),
        );
        let shutdown = self.shutdown_rx.clone();
        WorkerHandle::spawn(name, async move { worker.run(shutdown).await })
    }

    /// One supervisor pass: replace anything that crashed since the
    /// last check. Healthy units are left untouched.
    pub async fn supervise_once(&self) {
        if self.parse.profile_loop_failed().await {
            error!("Profile parse loop crashed, restarting");
            self.parse.restart_profile_loop().await;
        }
        if self.parse.list_loop_failed().await {
            error!("List parse loop crashed, restarting");
            self.parse.restart_list_loop().await;
        }
        if let Some(notifier) = &self.notifier {
            if notifier.failed().await {
                error!("Notifier crashed, restarting");
                notifier.restart().await;
            }
        }

        let mut info_workers = self.info_workers.lock().await;
        let failed: Vec<String> = info_workers
            .iter()
            .filter(|(_, handle)| handle.is_failed())
            .map(|(name, _)| name.clone())
            .collect();
        for name in failed {
            error!(worker = %name, "Profile-info worker crashed, replacing");
            info_workers.insert(name.clone(), self.spawn_info_worker(&name));
        }
        drop(info_workers);

        let mut list_workers = self.list_workers.lock().await;
        let failed: Vec<String> = list_workers
            .iter()
            .filter(|(_, handle)| handle.is_failed())
            .map(|(name, _)| name.clone())
            .collect();
        for name in failed {
            error!(worker = %name, "Relationship-list worker crashed, replacing");
            list_workers.insert(name.clone(), self.spawn_list_worker(&name));
        }
    }

    /// Run until interrupted, supervising on the configured period.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        let check = Duration::from_secs(self.config.spider.check_interval_secs);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(check) => self.supervise_once().await,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupt received, shutting down");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Signal shutdown, close every queue and join what we spawned.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);

        self.gate.close().await;
        self.analysed.close().await;
        self.profile_html.close().await;
        self.list_html.close().await;

        for handle in self.info_workers.lock().await.drain().map(|(_, h)| h) {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, handle.join()).await;
        }
        for handle in self.list_workers.lock().await.drain().map(|(_, h)| h) {
            let _ = tokio::time::timeout(STOP_JOIN_TIMEOUT, handle.join()).await;
        }

        self.parse.stop().await;
        if let Some(notifier) = &self.notifier {
            notifier.stop().await;
        }
        debug!("Spider stopped");
    }
}
