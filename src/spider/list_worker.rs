use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::debug;

use crate::cli::config::SpiderConfig;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::queue::{StageQueue, TokenInfo, WorkItem};
use crate::spider::pagination::effective_pages;
use crate::spider::urls::UrlBuilder;
use crate::spider::worker::sleep_or_shutdown;

/// Which relationship list a page walk is traversing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Following,
    Follower,
}

impl ListKind {
    fn label(self) -> &'static str {
        match self {
            ListKind::Following => "following",
            ListKind::Follower => "follower",
        }
    }
}

/// One relationship-list fetch worker.
///
/// Consumes analysed tokens and walks both relationship lists page by
/// page, in increasing page order. Unlike the profile path, an
/// `Unavailable` outcome here retries the same page rather than
/// dropping it: skipping a page would leave a silent hole in the list
/// traversal.
pub struct ListWorker {
    name: String,
    config: Arc<SpiderConfig>,
    fetcher: Arc<dyn Fetcher>,
    analysed: Arc<StageQueue<TokenInfo>>,
    list_html: Arc<StageQueue<WorkItem>>,
    urls: UrlBuilder,
}

impl ListWorker {
    pub fn new(
        name: &str,
        config: Arc<SpiderConfig>,
        fetcher: Arc<dyn Fetcher>,
        analysed: Arc<StageQueue<TokenInfo>>,
        list_html: Arc<StageQueue<WorkItem>>,
    ) -> Self {
        let urls = UrlBuilder::new(&config.spider.base_url);
        Self {
            name: name.to_string(),
            config,
            fetcher,
            analysed,
            list_html,
            urls,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.fetcher.bind_session(&self.name).await?;
        debug!(worker = %self.name, "Relationship-list worker started");

        loop {
            let Some(info) = self.next_token_info(&mut shutdown).await else {
                return Ok(());
            };

            if self.config.spider.analyse_following_list
                && self.walk_list(ListKind::Following, &info, &mut shutdown).await?
            {
                return Ok(());
            }

            if self.config.spider.analyse_follower_list
                && self.walk_list(ListKind::Follower, &info, &mut shutdown).await?
            {
                return Ok(());
            }
        }
    }

    /// Poll the analysed queue until a token info is available. `None`
    /// means shutdown was requested.
    async fn next_token_info(&self, shutdown: &mut watch::Receiver<bool>) -> Option<TokenInfo> {
        let idle = Duration::from_millis(self.config.spider.idle_backoff_ms);

        loop {
            if *shutdown.borrow() {
                return None;
            }
            if let Some(info) = self.analysed.try_pop().await {
                return Some(info);
            }
            if sleep_or_shutdown(idle, shutdown).await {
                return None;
            }
        }
    }

    /// Walk one list type for one token, pages 1..=max in order.
    /// Returns true when the caller should stop (shutdown).
    async fn walk_list(
        &self,
        kind: ListKind,
        info: &TokenInfo,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let spider = &self.config.spider;
        let max_page = match kind {
            ListKind::Following => {
                effective_pages(info.following_count, spider.page_size, spider.following_page_max)
            }
            ListKind::Follower => {
                effective_pages(info.follower_count, spider.page_size, spider.follower_page_max)
            }
        };
        let interval = Duration::from_millis(spider.scrape_interval_ms);

        debug!(
            worker = %self.name,
            token = %info.url_token,
            list = kind.label(),
            max_page,
            "Walking list"
        );

        let mut page = 1;
        while page <= max_page {
            if *shutdown.borrow() {
                return Ok(true);
            }

            let url = match kind {
                ListKind::Following => self.urls.following(&info.url_token, page),
                ListKind::Follower => self.urls.followers(&info.url_token, page),
            };

            match self.fetcher.fetch(&url, &self.name).await? {
                FetchOutcome::Success(html) => {
                    let item = WorkItem {
                        html,
                        token: info.url_token.clone(),
                        worker: self.name.clone(),
                    };
                    if self.list_html.push(item).await.is_err() {
                        return Ok(true);
                    }
                    page += 1;
                }
                FetchOutcome::Reuse => {
                    debug!(worker = %self.name, url, "Retrying page after reuse");
                }
                FetchOutcome::Unavailable => {
                    // Advancing past an unserved page would corrupt the
                    // traversal, so this path retries instead of dropping.
                    debug!(worker = %self.name, url, "Retrying page after unavailable fetch");
                }
            }

            if sleep_or_shutdown(interval, shutdown).await {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MockFetcher;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn test_config() -> SpiderConfig {
        let mut config = SpiderConfig::default();
        config.spider.page_size = 20;
        config.spider.scrape_interval_ms = 1;
        config.spider.idle_backoff_ms = 1;
        config
    }

    struct Harness {
        analysed: Arc<StageQueue<TokenInfo>>,
        list_html: Arc<StageQueue<WorkItem>>,
        shutdown: watch::Sender<bool>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                analysed: Arc::new(StageQueue::new("analysed-token", 100, 80)),
                list_html: Arc::new(StageQueue::new("list-html", 100, 80)),
                shutdown: watch::channel(false).0,
            }
        }

        fn spawn(
            &self,
            config: SpiderConfig,
            fetcher: MockFetcher,
        ) -> tokio::task::JoinHandle<Result<()>> {
            let worker = ListWorker::new(
                "list-worker-0",
                Arc::new(config),
                Arc::new(fetcher),
                self.analysed.clone(),
                self.list_html.clone(),
            );
            let rx = self.shutdown.subscribe();
            tokio::spawn(worker.run(rx))
        }
    }

    /// Mock that records every fetched URL and replays a script of
    /// outcomes, falling back to Success once the script runs dry.
    fn scripted_fetcher(
        fetched: Arc<Mutex<Vec<String>>>,
        script: Vec<FetchOutcome>,
    ) -> MockFetcher {
        let mut mock = MockFetcher::new();
        mock.expect_bind_session().returning(|_| Ok(()));
        let script = Mutex::new(VecDeque::from(script));
        mock.expect_fetch().returning(move |url, _| {
            fetched.lock().unwrap().push(url.to_string());
            Ok(script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(FetchOutcome::Success("<html>page</html>".to_string())))
        });
        mock
    }

    async fn wait_for_fetches(fetched: &Arc<Mutex<Vec<String>>>, count: usize) {
        for _ in 0..400 {
            if fetched.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {} fetches, saw {:?}", count, fetched.lock().unwrap());
    }

    fn alice_info() -> TokenInfo {
        TokenInfo {
            url_token: "alice".to_string(),
            following_count: Some(45),
            follower_count: Some(0),
        }
    }

    #[tokio::test]
    async fn test_walks_both_lists_in_page_order() {
        let harness = Harness::new();
        let fetched = Arc::new(Mutex::new(Vec::new()));
        let fetcher = scripted_fetcher(fetched.clone(), vec![]);

        harness.analysed.push(alice_info()).await.unwrap();
        let handle = harness.spawn(test_config(), fetcher);

        // 45 following at page size 20 -> pages 1..=3; 0 followers still
        // get their single-page scan.
        wait_for_fetches(&fetched, 4).await;
        harness.shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(
            fetched.lock().unwrap().as_slice(),
            [
                "https://www.zhihu.com/people/alice/following?page=1",
                "https://www.zhihu.com/people/alice/following?page=2",
                "https://www.zhihu.com/people/alice/following?page=3",
                "https://www.zhihu.com/people/alice/followers?page=1",
            ]
        );
        assert_eq!(harness.list_html.len().await, 4);
        let first = harness.list_html.try_pop().await.unwrap();
        assert_eq!(first.token, "alice");
        assert_eq!(first.worker, "list-worker-0");
    }

    #[tokio::test]
    async fn test_disabled_follower_list_is_never_fetched() {
        let harness = Harness::new();
        let fetched = Arc::new(Mutex::new(Vec::new()));
        let fetcher = scripted_fetcher(fetched.clone(), vec![]);

        let mut config = test_config();
        config.spider.analyse_follower_list = false;

        harness.analysed.push(alice_info()).await.unwrap();
        let handle = harness.spawn(config, fetcher);

        wait_for_fetches(&fetched, 3).await;
        // Give the worker time to issue a follower fetch if it wrongly
        // tried one, then stop it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let urls = fetched.lock().unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls.iter().all(|url| url.contains("/following?page=")));
    }

    #[tokio::test]
    async fn test_page_cap_limits_traversal() {
        let harness = Harness::new();
        let fetched = Arc::new(Mutex::new(Vec::new()));
        let fetcher = scripted_fetcher(fetched.clone(), vec![]);

        let mut config = test_config();
        config.spider.following_page_max = 10;
        config.spider.analyse_follower_list = false;

        // 1000 following over pages of 20 computes to 50 pages; the cap wins.
        harness
            .analysed
            .push(TokenInfo {
                url_token: "alice".to_string(),
                following_count: Some(1000),
                follower_count: None,
            })
            .await
            .unwrap();
        let handle = harness.spawn(config, fetcher);

        wait_for_fetches(&fetched, 10).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let urls = fetched.lock().unwrap();
        assert_eq!(urls.len(), 10);
        assert_eq!(
            urls.last().unwrap(),
            "https://www.zhihu.com/people/alice/following?page=10"
        );
    }

    #[tokio::test]
    async fn test_reuse_and_unavailable_retry_the_same_page() {
        let harness = Harness::new();
        let fetched = Arc::new(Mutex::new(Vec::new()));
        // Page 1 fails twice (once per failure mode) before succeeding.
        let fetcher = scripted_fetcher(
            fetched.clone(),
            vec![FetchOutcome::Reuse, FetchOutcome::Unavailable],
        );

        let mut config = test_config();
        config.spider.analyse_follower_list = false;

        harness
            .analysed
            .push(TokenInfo {
                url_token: "alice".to_string(),
                following_count: Some(25),
                follower_count: None,
            })
            .await
            .unwrap();
        let handle = harness.spawn(config, fetcher);

        // 2 pages, with page 1 attempted three times.
        wait_for_fetches(&fetched, 4).await;
        harness.shutdown.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(
            fetched.lock().unwrap().as_slice(),
            [
                "https://www.zhihu.com/people/alice/following?page=1",
                "https://www.zhihu.com/people/alice/following?page=1",
                "https://www.zhihu.com/people/alice/following?page=1",
                "https://www.zhihu.com/people/alice/following?page=2",
            ]
        );
        // Only the successful attempts produced downstream items.
        assert_eq!(harness.list_html.len().await, 2);
    }
}
