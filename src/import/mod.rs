pub mod engine;
pub mod progress;
pub mod source;

use crate::catalog::Repositories;
use crate::config::ImporterSettings;
use crate::error::{ImportError, ParseError};
use crate::mapping::{auto_detect_mappings, AutoMapping};
use crate::parser::{ascii_delimiter, FeedParser, ParseHints, ParseResult};
use actix::prelude::*;
use engine::ImportJob;
use feed_types::feed::FeedConfig;
use feed_types::history::{FeedState, ImportProgress, ImportRun, LogLevel, RecentRuns};
use feed_types::{FeedFormat, FeedStatus, ImportStatus};
use log_error::LogError;
use progress::{ProgressHandle, ProgressTracker};
use reqwest::Client;
use source::FeedSource;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use typesafe_repository::IdentityOf;
use uuid::Uuid;

struct RunHandle {
    run_id: IdentityOf<ImportRun>,
    token: CancellationToken,
}

/// Owns the running imports. At most one run per feed at a time.
pub struct ImportService {
    repos: Repositories,
    source: Arc<dyn FeedSource>,
    client: Client,
    settings: ImporterSettings,
    running: HashMap<IdentityOf<FeedConfig>, RunHandle>,
    progress: HashMap<IdentityOf<FeedConfig>, ProgressHandle>,
}

impl ImportService {
    pub fn new(
        repos: Repositories,
        source: Arc<dyn FeedSource>,
        client: Client,
        settings: ImporterSettings,
    ) -> Self {
        Self {
            repos,
            source,
            client,
            settings,
            running: HashMap::new(),
            progress: HashMap::new(),
        }
    }
}

impl Actor for ImportService {
    type Context = Context<Self>;
}

/// Tells the service a run is gone, including when its task panicked.
struct RunGuard {
    addr: Addr<ImportService>,
    feed_id: IdentityOf<FeedConfig>,
    run_id: IdentityOf<ImportRun>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.addr.do_send(RunFinished {
            feed_id: self.feed_id,
            run_id: self.run_id,
        });
    }
}

#[derive(Message)]
#[rtype(result = "Result<IdentityOf<ImportRun>, ImportError>")]
pub struct StartRun(pub FeedConfig, pub String);

#[derive(Message)]
#[rtype(result = "bool")]
pub struct RequestStop(pub IdentityOf<FeedConfig>);

#[derive(Message)]
#[rtype(result = "ImportProgress")]
pub struct GetProgress(pub IdentityOf<FeedConfig>);

#[derive(Message)]
#[rtype(result = "Result<Vec<ImportRun>, anyhow::Error>")]
pub struct GetHistory(pub IdentityOf<FeedConfig>, pub Option<usize>);

#[derive(Message)]
#[rtype(result = "Result<ParseResult, ParseError>")]
pub struct PreviewFeed {
    pub url: String,
    pub format: Option<FeedFormat>,
    pub item_path: Option<String>,
    pub delimiter: Option<char>,
    pub limit: usize,
}

#[derive(Message)]
#[rtype(result = "Vec<AutoMapping>")]
pub struct AutoDetectMappings(pub Vec<String>);

#[derive(Message)]
#[rtype(result = "()")]
struct RunFinished {
    feed_id: IdentityOf<FeedConfig>,
    run_id: IdentityOf<ImportRun>,
}

impl Handler<StartRun> for ImportService {
    type Result = Result<IdentityOf<ImportRun>, ImportError>;

    fn handle(
        &mut self,
        StartRun(feed, triggered_by): StartRun,
        ctx: &mut Self::Context,
    ) -> Self::Result {
        let feed_id = feed.id;
        if self.running.contains_key(&feed_id) {
            return Err(ImportError::Conflict(feed_id));
        }
        let run = ImportRun::start(Uuid::new_v4(), feed_id, triggered_by);
        let run_id = run.id;
        let token = CancellationToken::new();
        let progress = Arc::new(RwLock::new(ImportProgress::starting(&run)));
        self.progress.insert(feed_id, progress.clone());
        self.running.insert(
            feed_id,
            RunHandle {
                run_id,
                token: token.clone(),
            },
        );

        let job = ImportJob::new(
            feed,
            run,
            self.repos.clone(),
            self.source.clone(),
            self.settings.clone(),
            token,
            progress,
        );
        let guard = RunGuard {
            addr: ctx.address(),
            feed_id,
            run_id,
        };
        tokio::task::spawn_local(async move {
            let _guard = guard;
            let run = job.run().await;
            log::debug!("Run {} of feed {} ended as {}", run.id, run.feed_id, run.status);
        });
        Ok(run_id)
    }
}

impl Handler<RunFinished> for ImportService {
    type Result = ResponseActFuture<Self, ()>;

    fn handle(
        &mut self,
        RunFinished { feed_id, run_id }: RunFinished,
        _ctx: &mut Self::Context,
    ) -> Self::Result {
        if self.running.get(&feed_id).map(|h| h.run_id) == Some(run_id) {
            self.running.remove(&feed_id);
        }
        let progress = self.progress.get(&feed_id).cloned();
        let repos = self.repos.clone();
        let capacity = self.settings.log_capacity;
        let fut = async move {
            if let Some(progress) = progress {
                settle_aborted(&repos, ProgressTracker::new(progress, capacity), run_id).await;
            }
        };
        Box::pin(fut.into_actor(self))
    }
}

/// A run whose task ended without reaching a terminal status (a panic) is recorded as failed,
/// so history and feed state never stay `running`.
async fn settle_aborted(
    repos: &Repositories,
    progress: ProgressTracker,
    run_id: IdentityOf<ImportRun>,
) {
    let snapshot = progress.snapshot().await;
    if snapshot.run_id != Some(run_id) || snapshot.status.is_terminal() {
        return;
    }
    let message = "Import task ended unexpectedly".to_string();
    let feed_id = snapshot.feed_id;
    let stored = repos
        .history
        .get_one(&run_id)
        .await
        .log_error("Unable to read import history")
        .flatten();
    let mut run = stored.unwrap_or_else(|| ImportRun::start(run_id, feed_id, String::new()));
    run.total_items = snapshot.total;
    run.processed = snapshot.processed;
    run.created = snapshot.created;
    run.updated = snapshot.updated;
    run.skipped = snapshot.skipped;
    run.errors = snapshot.errors;
    run.status = ImportStatus::Failed;
    run.finished_at = Some(OffsetDateTime::now_utc());
    run.error_message = Some(message.clone());
    repos
        .history
        .save(run.clone())
        .await
        .log_error("Unable to save import history");
    let total_products = repos
        .products
        .count_by_feed(&feed_id)
        .await
        .log_error("Unable to count feed products")
        .unwrap_or_default();
    repos
        .feeds
        .save(FeedState {
            id: feed_id,
            status: FeedStatus::Error,
            last_run_at: Some(run.started_at),
            last_error: Some(message.clone()),
            total_products,
        })
        .await
        .log_error("Unable to save feed state");
    progress.log(LogLevel::Error, format!("Import failed: {message}")).await;
    progress
        .update(
            &run,
            Duration::from_secs(snapshot.elapsed_secs),
            message,
            snapshot.current_item,
        )
        .await;
}

impl Handler<RequestStop> for ImportService {
    type Result = bool;

    fn handle(&mut self, RequestStop(feed_id): RequestStop, _ctx: &mut Self::Context) -> bool {
        match self.running.get(&feed_id) {
            Some(handle) => {
                log::info!("Stop requested for run {} of feed {feed_id}", handle.run_id);
                handle.token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Handler<GetProgress> for ImportService {
    type Result = ResponseActFuture<Self, ImportProgress>;

    fn handle(
        &mut self,
        GetProgress(feed_id): GetProgress,
        _ctx: &mut Self::Context,
    ) -> Self::Result {
        let progress = self.progress.get(&feed_id).cloned();
        let fut = async move {
            match progress {
                Some(progress) => progress.read().await.clone(),
                None => ImportProgress::idle(feed_id),
            }
        };
        Box::pin(fut.into_actor(self))
    }
}

impl Handler<GetHistory> for ImportService {
    type Result = ResponseActFuture<Self, Result<Vec<ImportRun>, anyhow::Error>>;

    fn handle(
        &mut self,
        GetHistory(feed_id, limit): GetHistory,
        _ctx: &mut Self::Context,
    ) -> Self::Result {
        let history = self.repos.history.clone();
        let limit = limit.unwrap_or(self.settings.history_limit);
        let fut = async move { history.select(&RecentRuns { feed_id, limit }).await };
        Box::pin(fut.into_actor(self))
    }
}

impl Handler<PreviewFeed> for ImportService {
    type Result = ResponseActFuture<Self, Result<ParseResult, ParseError>>;

    fn handle(&mut self, msg: PreviewFeed, _ctx: &mut Self::Context) -> Self::Result {
        let hints = ParseHints {
            format: msg.format,
            xml_item_path: msg.item_path,
            csv_delimiter: msg.delimiter.and_then(ascii_delimiter),
            ..Default::default()
        };
        let parser = FeedParser::new(msg.url, hints, &self.settings);
        let client = self.client.clone();
        let fut = async move { parser.preview(&client, msg.limit).await };
        Box::pin(fut.into_actor(self))
    }
}

impl Handler<AutoDetectMappings> for ImportService {
    type Result = MessageResult<AutoDetectMappings>;

    fn handle(
        &mut self,
        AutoDetectMappings(fields): AutoDetectMappings,
        _ctx: &mut Self::Context,
    ) -> Self::Result {
        MessageResult(auto_detect_mappings(&fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::memory_catalog;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use feed_types::feed::TargetField;
    use tokio::sync::Notify;

    /// Holds every fetch until released.
    struct GatedSource {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl FeedSource for GatedSource {
        async fn fetch(&self, _: &FeedConfig) -> Result<Bytes, FetchError> {
            self.release.notified().await;
            Ok(Bytes::from_static(
                br#"[{"title": "Lamp", "price": "12.5", "ean": "1"}]"#,
            ))
        }
    }

    async fn service(release: Arc<Notify>) -> Addr<ImportService> {
        ImportService::new(
            memory_catalog().await,
            Arc::new(GatedSource { release }),
            Client::new(),
            ImporterSettings::default(),
        )
        .start()
    }

    /// First fetch panics, later ones serve one product.
    struct PanicOnceSource(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl FeedSource for PanicOnceSource {
        async fn fetch(&self, _: &FeedConfig) -> Result<Bytes, FetchError> {
            if !self.0.swap(true, std::sync::atomic::Ordering::SeqCst) {
                panic!("feed source blew up");
            }
            Ok(Bytes::from_static(
                br#"[{"title": "Lamp", "price": "12.5", "ean": "1"}]"#,
            ))
        }
    }

    async fn wait_terminal(addr: &Addr<ImportService>, feed_id: Uuid) -> ImportProgress {
        for _ in 0..500 {
            let progress = addr.send(GetProgress(feed_id)).await.unwrap();
            if progress.status.is_terminal() {
                return progress;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run of {feed_id} did not finish");
    }

    #[actix_rt::test]
    async fn second_start_of_running_feed_conflicts() {
        let release = Arc::new(Notify::new());
        let addr = service(release.clone()).await;
        let feed = FeedConfig::new("lamps", "https://example.com/lamps.json");

        let first = addr.send(StartRun(feed.clone(), "manual".into())).await.unwrap();
        let second = addr.send(StartRun(feed.clone(), "cron".into())).await.unwrap();
        assert!(first.is_ok());
        assert!(matches!(second, Err(ImportError::Conflict(id)) if id == feed.id));

        release.notify_one();
        let progress = wait_terminal(&addr, feed.id).await;
        assert_eq!(progress.status, ImportStatus::Completed);
        assert_eq!(progress.created, 1);
        assert_eq!(progress.run_id, first.ok());

        let history = addr.send(GetHistory(feed.id, None)).await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].triggered_by, "manual");
    }

    #[actix_rt::test]
    async fn stop_cancels_running_import() {
        let release = Arc::new(Notify::new());
        let addr = service(release.clone()).await;
        let feed = FeedConfig::new("lamps", "https://example.com/lamps.json");

        assert!(!addr.send(RequestStop(feed.id)).await.unwrap());
        addr.send(StartRun(feed.clone(), "manual".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(addr.send(RequestStop(feed.id)).await.unwrap());
        release.notify_one();

        let progress = wait_terminal(&addr, feed.id).await;
        assert_eq!(progress.status, ImportStatus::Cancelled);
        assert_eq!(progress.processed, 0);
    }

    #[actix_rt::test]
    async fn panicked_run_is_failed_and_releases_the_feed() {
        let repos = memory_catalog().await;
        let addr = ImportService::new(
            repos.clone(),
            Arc::new(PanicOnceSource(Default::default())),
            Client::new(),
            ImporterSettings::default(),
        )
        .start();
        let feed = FeedConfig::new("lamps", "https://example.com/lamps.json");

        let first = addr
            .send(StartRun(feed.clone(), "manual".into()))
            .await
            .unwrap()
            .unwrap();
        let progress = wait_terminal(&addr, feed.id).await;
        assert_eq!(progress.status, ImportStatus::Failed);
        assert_eq!(progress.run_id, Some(first));

        let stored = repos.history.get_one(&first).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Failed);
        assert!(stored.finished_at.is_some());
        assert!(stored.error_message.is_some());
        let state = repos.feeds.get_one(&feed.id).await.unwrap().unwrap();
        assert_eq!(state.status, FeedStatus::Error);

        let second = addr
            .send(StartRun(feed.clone(), "manual".into()))
            .await
            .unwrap()
            .unwrap();
        let progress = wait_terminal(&addr, feed.id).await;
        assert_eq!(progress.run_id, Some(second));
        assert_eq!(progress.status, ImportStatus::Completed);
        assert_eq!(progress.created, 1);
    }

    #[actix_rt::test]
    async fn progress_of_unknown_feed_is_idle() {
        let addr = service(Arc::new(Notify::new())).await;
        let feed_id = Uuid::new_v4();
        let progress = addr.send(GetProgress(feed_id)).await.unwrap();
        assert_eq!(progress.status, ImportStatus::Idle);
        assert_eq!(progress.feed_id, feed_id);

        let mappings = addr
            .send(AutoDetectMappings(vec!["Product Name".into(), "EAN".into()]))
            .await
            .unwrap();
        assert!(mappings
            .iter()
            .any(|m| m.source_field == "EAN" && m.target_field == TargetField::Ean));
    }
}
