use super::progress::{ProgressHandle, ProgressTracker};
use super::source::FeedSource;
use crate::catalog::Repositories;
use crate::category_resolver::{product_slug, CategoryResolver};
use crate::config::ImporterSettings;
use crate::error::{Cancelled, ImportError, ItemError};
use crate::fingerprint::Fingerprint;
use crate::mapping::Mapper;
use crate::parser::FeedParser;
use feed_types::feed::FeedConfig;
use feed_types::history::{FeedState, ImportRun, LogLevel};
use feed_types::item::RawRecord;
use feed_types::product::Product;
use feed_types::{FeedStatus, ImportStatus};
use log_error::LogError;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use typesafe_repository::async_ops::Save;
use uuid::Uuid;

/// Outcome of one item in the process pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Created,
    Updated,
    Skipped,
    Failed,
}

/// One import run: download, count, process, then settle history and feed state.
pub struct ImportJob {
    feed: FeedConfig,
    run: ImportRun,
    repos: Repositories,
    source: Arc<dyn FeedSource>,
    settings: ImporterSettings,
    token: CancellationToken,
    progress: ProgressTracker,
    mapper: Mapper,
    categories: CategoryResolver,
    current_item: Option<String>,
    started: Instant,
}

impl ImportJob {
    pub fn new(
        feed: FeedConfig,
        run: ImportRun,
        repos: Repositories,
        source: Arc<dyn FeedSource>,
        settings: ImporterSettings,
        token: CancellationToken,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            mapper: Mapper::for_feed(&feed),
            categories: CategoryResolver::new(repos.categories.clone()),
            progress: ProgressTracker::new(progress, settings.log_capacity),
            feed,
            run,
            repos,
            source,
            settings,
            token,
            current_item: None,
            started: Instant::now(),
        }
    }

    pub async fn run(mut self) -> ImportRun {
        self.begin().await;
        let outcome = self.execute().await;
        self.finish(outcome).await;
        self.run
    }

    async fn begin(&mut self) {
        self.repos
            .history
            .save(self.run.clone())
            .await
            .log_error("Unable to save import history");
        self.save_feed_state(FeedStatus::Running, None).await;
        self.progress
            .log(
                LogLevel::Info,
                format!("Import of {} started ({})", self.feed.name, self.run.triggered_by),
            )
            .await;
    }

    async fn execute(&mut self) -> Result<(), ImportError> {
        self.publish("Downloading feed").await;
        let data = self.source.fetch(&self.feed).await?;
        let parser = FeedParser::for_feed(&self.feed, &self.settings);
        self.progress
            .log(
                LogLevel::Info,
                format!(
                    "Downloaded {} bytes, format {}",
                    data.len(),
                    parser.format_of(&data)
                ),
            )
            .await;

        self.publish("Counting items").await;
        let token = self.token.clone();
        let mut total = 0;
        let malformed = parser.parse_full(&data, |_| {
            if token.is_cancelled() {
                return Err(Cancelled);
            }
            total += 1;
            Ok(())
        })?;
        // the process pass counts malformed records as errors
        total += malformed;
        self.run.total_items = total;
        self.progress
            .log(LogLevel::Info, format!("Found {total} items"))
            .await;

        self.publish("Processing items").await;
        for record in parser.records(&data)? {
            if self.token.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            self.run.processed += 1;
            let outcome = match record {
                Ok(raw) => self.process(raw).await,
                Err(err) => {
                    self.progress
                        .item_log(LogLevel::Error, format!("Item error: {err}"))
                        .await;
                    ItemOutcome::Failed
                }
            };
            match outcome {
                ItemOutcome::Created => self.run.created += 1,
                ItemOutcome::Updated => self.run.updated += 1,
                ItemOutcome::Skipped => self.run.skipped += 1,
                ItemOutcome::Failed => self.run.errors += 1,
            }
            let processed = self.run.processed;
            if processed % self.settings.progress_every.max(1) == 0 || processed == total {
                self.publish("Processing items").await;
                self.repos
                    .history
                    .save(self.run.clone())
                    .await
                    .log_error("Unable to save import history");
            }
        }
        Ok(())
    }

    async fn process(&mut self, raw: RawRecord) -> ItemOutcome {
        let item = match self.mapper.map_item(&raw) {
            Ok(item) => item,
            Err(err) => {
                self.progress
                    .item_log(LogLevel::Warning, format!("Skipped item: {err}"))
                    .await;
                return ItemOutcome::Skipped;
            }
        };
        let title = item.title.clone();
        self.current_item = Some(title.clone());
        if item.price <= Decimal::ZERO {
            let err = ItemError::InvalidPrice(title);
            self.progress
                .item_log(LogLevel::Error, format!("Item error: {err}"))
                .await;
            return ItemOutcome::Failed;
        }
        let fingerprint = Fingerprint::of(&item);
        let match_by = self.feed.match_by;
        let existing = match match_by.value(&item) {
            Some(key) => match self.repos.products.find_by_key(match_by, key).await {
                Ok(existing) => existing,
                Err(err) => {
                    self.progress
                        .item_log(LogLevel::Error, format!("Item error ({title}): {err}"))
                        .await;
                    return ItemOutcome::Failed;
                }
            },
            None => None,
        };
        if let Some(existing) = &existing {
            if fingerprint.matches(existing.fingerprint.as_deref()) {
                return ItemOutcome::Skipped;
            }
        }
        let mode = self.feed.import_mode;
        let id = match &existing {
            Some(_) if !mode.updates() => return ItemOutcome::Skipped,
            None if !mode.creates() => return ItemOutcome::Skipped,
            Some(existing) => existing.id,
            None => Uuid::new_v4(),
        };
        let category_id = match item.category_path.as_deref() {
            Some(path) => match self.categories.resolve(path).await {
                Ok(id) => id,
                Err(err) => {
                    self.progress
                        .item_log(
                            LogLevel::Warning,
                            format!("Unable to resolve category {path} for {title}: {err}"),
                        )
                        .await;
                    None
                }
            },
            None => None,
        };
        let product = Product::from_item(
            id,
            self.feed.id,
            product_slug(&item.title),
            item,
            category_id,
            fingerprint.into_inner(),
            self.feed.import_images,
        );
        match self.repos.products.save(product).await {
            Ok(()) if existing.is_some() => ItemOutcome::Updated,
            Ok(()) => ItemOutcome::Created,
            Err(err) => {
                self.progress
                    .item_log(LogLevel::Error, format!("Item error ({title}): {err}"))
                    .await;
                ItemOutcome::Failed
            }
        }
    }

    async fn finish(&mut self, outcome: Result<(), ImportError>) {
        self.run.finished_at = Some(OffsetDateTime::now_utc());
        let elapsed = self.started.elapsed();
        let (feed_status, level, message) = match outcome {
            Ok(()) => {
                self.run.status = ImportStatus::Completed;
                (
                    FeedStatus::Active,
                    LogLevel::Info,
                    format!(
                        "Import completed in {}s: {} created, {} updated, {} skipped, {} errors",
                        elapsed.as_secs(),
                        self.run.created,
                        self.run.updated,
                        self.run.skipped,
                        self.run.errors
                    ),
                )
            }
            Err(ImportError::Cancelled) => {
                self.run.status = ImportStatus::Cancelled;
                (
                    FeedStatus::Active,
                    LogLevel::Warning,
                    format!("Import cancelled after {} items", self.run.processed),
                )
            }
            Err(err) => {
                self.run.status = ImportStatus::Failed;
                self.run.error_message = Some(err.to_string());
                (
                    FeedStatus::Error,
                    LogLevel::Error,
                    format!("Import failed: {err}"),
                )
            }
        };
        if self.run.status != ImportStatus::Failed {
            self.repos
                .categories
                .recount_products()
                .await
                .log_error("Unable to recount category products");
        }
        let error = self.run.error_message.clone();
        self.save_feed_state(feed_status, error).await;
        self.repos
            .history
            .save(self.run.clone())
            .await
            .log_error("Unable to save import history");
        self.progress.log(level, message.clone()).await;
        self.progress
            .update(&self.run, elapsed, message, self.current_item.clone())
            .await;
    }

    async fn publish(&self, message: &str) {
        self.progress
            .update(
                &self.run,
                self.started.elapsed(),
                message,
                self.current_item.clone(),
            )
            .await;
    }

    async fn save_feed_state(&self, status: FeedStatus, last_error: Option<String>) {
        let total_products = self
            .repos
            .products
            .count_by_feed(&self.feed.id)
            .await
            .log_error("Unable to count feed products")
            .unwrap_or_default();
        self.repos
            .feeds
            .save(FeedState {
                id: self.feed.id,
                status,
                last_run_at: Some(self.run.started_at),
                last_error,
                total_products,
            })
            .await
            .log_error("Unable to save feed state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::memory_catalog;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use feed_types::history::ImportProgress;
    use feed_types::product::{ExistingProduct, ProductRepository};
    use feed_types::{ImportMode, MatchKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::RwLock;
    use typesafe_repository::async_ops::Get;
    use typesafe_repository::prelude::*;

    struct StaticSource(Mutex<Vec<u8>>);

    impl StaticSource {
        fn new(body: &str) -> Self {
            Self(Mutex::new(body.as_bytes().to_vec()))
        }

        fn replace(&self, body: &str) {
            *self.0.lock().unwrap() = body.as_bytes().to_vec();
        }
    }

    #[async_trait]
    impl FeedSource for StaticSource {
        async fn fetch(&self, _: &FeedConfig) -> Result<Bytes, FetchError> {
            Ok(Bytes::from(self.0.lock().unwrap().clone()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl FeedSource for Unreachable {
        async fn fetch(&self, feed: &FeedConfig) -> Result<Bytes, FetchError> {
            Err(FetchError::Status {
                status: 404,
                url: feed.url.clone(),
            })
        }
    }

    /// Cancels the run once `after` products have been written.
    struct CancelAfter {
        inner: Arc<dyn ProductRepository>,
        token: CancellationToken,
        after: usize,
        saved: AtomicUsize,
    }

    impl Repository<Product> for CancelAfter {
        type Error = anyhow::Error;
    }

    #[async_trait]
    impl Save<Product> for CancelAfter {
        async fn save(&self, p: Product) -> Result<(), Self::Error> {
            self.inner.save(p).await?;
            if self.saved.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
                self.token.cancel();
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Get<Product> for CancelAfter {
        async fn get_one(&self, id: &IdentityOf<Product>) -> Result<Option<Product>, Self::Error> {
            self.inner.get_one(id).await
        }
    }

    #[async_trait]
    impl ProductRepository for CancelAfter {
        async fn find_by_key(
            &self,
            key: MatchKey,
            value: &str,
        ) -> Result<Option<ExistingProduct>, Self::Error> {
            self.inner.find_by_key(key, value).await
        }
        async fn count_by_feed(&self, feed: &IdentityOf<FeedConfig>) -> Result<usize, Self::Error> {
            self.inner.count_by_feed(feed).await
        }
    }

    fn catalog_json(prices: &[&str]) -> String {
        let items: Vec<String> = prices
            .iter()
            .enumerate()
            .map(|(i, price)| {
                format!(
                    r#"{{"title": "Item {i}", "price": "{price}", "ean": "{}", "category": "Home|Kitchen"}}"#,
                    8590000000000u64 + i as u64
                )
            })
            .collect();
        format!(r#"{{"products": [{}]}}"#, items.join(","))
    }

    fn settings() -> ImporterSettings {
        ImporterSettings {
            progress_every: 2,
            ..Default::default()
        }
    }

    async fn import(
        feed: &FeedConfig,
        repos: &Repositories,
        source: Arc<dyn FeedSource>,
        token: CancellationToken,
    ) -> (ImportRun, ImportProgress) {
        let run = ImportRun::start(Uuid::new_v4(), feed.id, "test".to_string());
        let progress = Arc::new(RwLock::new(ImportProgress::starting(&run)));
        let run = ImportJob::new(
            feed.clone(),
            run,
            repos.clone(),
            source,
            settings(),
            token,
            progress.clone(),
        )
        .run()
        .await;
        let snapshot = progress.read().await.clone();
        (run, snapshot)
    }

    #[tokio::test]
    async fn reimport_of_unchanged_feed_is_skipped() {
        let repos = memory_catalog().await;
        let feed = FeedConfig::new("shop", "https://example.com/feed.json");
        let source = Arc::new(StaticSource::new(&catalog_json(&["10.50", "20", "30,5"])));

        let (first, progress) =
            import(&feed, &repos, source.clone(), CancellationToken::new()).await;
        assert_eq!(first.status, ImportStatus::Completed);
        assert_eq!((first.total_items, first.created, first.updated), (3, 3, 0));
        assert_eq!(progress.percent, 100);
        assert_eq!(progress.created, 3);

        let (second, _) = import(&feed, &repos, source.clone(), CancellationToken::new()).await;
        assert_eq!(second.status, ImportStatus::Completed);
        assert_eq!((second.created, second.updated, second.skipped), (0, 0, 3));

        source.replace(&catalog_json(&["11", "20", "30,5"]));
        let (third, _) = import(&feed, &repos, source, CancellationToken::new()).await;
        assert_eq!((third.created, third.updated, third.skipped), (0, 1, 2));

        let state = repos.feeds.get_one(&feed.id).await.unwrap().unwrap();
        assert_eq!(state.status, FeedStatus::Active);
        assert_eq!(state.total_products, 3);
        let categories = repos.categories.list().await.unwrap();
        let kitchen = categories.iter().find(|c| c.name == "Kitchen").unwrap();
        assert_eq!(kitchen.product_count, 3);
    }

    #[tokio::test]
    async fn create_only_leaves_existing_products_alone() {
        let repos = memory_catalog().await;
        let mut feed = FeedConfig::new("shop", "https://example.com/feed.json");
        let source = Arc::new(StaticSource::new(&catalog_json(&["10", "20"])));
        import(&feed, &repos, source.clone(), CancellationToken::new()).await;

        feed.import_mode = ImportMode::CreateOnly;
        source.replace(&catalog_json(&["15", "25", "35"]));
        let (run, _) = import(&feed, &repos, source, CancellationToken::new()).await;
        assert_eq!((run.created, run.updated, run.skipped), (1, 0, 2));
    }

    #[tokio::test]
    async fn update_only_never_creates() {
        let repos = memory_catalog().await;
        let mut feed = FeedConfig::new("shop", "https://example.com/feed.json");
        feed.import_mode = ImportMode::UpdateOnly;
        let source = Arc::new(StaticSource::new(&catalog_json(&["10", "20"])));
        let (run, _) = import(&feed, &repos, source, CancellationToken::new()).await;
        assert_eq!(run.status, ImportStatus::Completed);
        assert_eq!((run.created, run.skipped), (0, 2));
        assert_eq!(repos.products.count_by_feed(&feed.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_only_refreshes_existing_products() {
        let repos = memory_catalog().await;
        let mut feed = FeedConfig::new("shop", "https://example.com/feed.json");
        let source = Arc::new(StaticSource::new(&catalog_json(&["10", "20"])));
        import(&feed, &repos, source.clone(), CancellationToken::new()).await;

        feed.import_mode = ImportMode::UpdateOnly;
        source.replace(&catalog_json(&["10", "25", "30"]));
        let (run, _) = import(&feed, &repos, source, CancellationToken::new()).await;
        assert_eq!(run.status, ImportStatus::Completed);
        assert_eq!((run.created, run.updated, run.skipped), (0, 1, 2));
        assert_eq!(repos.products.count_by_feed(&feed.id).await.unwrap(), 2);
        let existing = repos
            .products
            .find_by_key(MatchKey::Ean, "8590000000001")
            .await
            .unwrap()
            .unwrap();
        let updated = repos.products.get_one(&existing.id).await.unwrap().unwrap();
        assert_eq!(updated.price, Decimal::from(25));
    }

    #[tokio::test]
    async fn malformed_json_elements_count_towards_total() {
        let repos = memory_catalog().await;
        let feed = FeedConfig::new("shop", "https://example.com/feed.json");
        let source = Arc::new(StaticSource::new(
            r#"[{"title": "Lamp", "price": "12", "ean": "1"}, 42, "x", {"title": "Desk", "price": "30", "ean": "2"}]"#,
        ));
        let (run, progress) = import(&feed, &repos, source, CancellationToken::new()).await;
        assert_eq!(run.status, ImportStatus::Completed);
        assert_eq!((run.total_items, run.processed), (4, 4));
        assert_eq!((run.created, run.errors), (2, 2));
        assert_eq!(progress.percent, 100);
    }

    #[tokio::test]
    async fn zero_price_counts_as_error() {
        let repos = memory_catalog().await;
        let feed = FeedConfig::new("shop", "https://example.com/feed.json");
        let source = Arc::new(StaticSource::new(&catalog_json(&["0", "n/a", "12"])));
        let (run, progress) = import(&feed, &repos, source, CancellationToken::new()).await;
        assert_eq!(run.status, ImportStatus::Completed);
        assert_eq!((run.created, run.errors), (1, 2));
        assert_eq!(run.processed, 3);
        assert!(progress
            .logs
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.contains("Item 0")));
    }

    #[tokio::test]
    async fn fetch_failure_marks_feed_as_error() {
        let repos = memory_catalog().await;
        let feed = FeedConfig::new("shop", "https://example.com/missing.json");
        let (run, progress) =
            import(&feed, &repos, Arc::new(Unreachable), CancellationToken::new()).await;
        assert_eq!(run.status, ImportStatus::Failed);
        assert!(run.error_message.unwrap().contains("404"));
        assert_eq!(progress.status, ImportStatus::Failed);

        let state = repos.feeds.get_one(&feed.id).await.unwrap().unwrap();
        assert_eq!(state.status, FeedStatus::Error);
        assert!(state.last_error.is_some());
        let stored = repos.history.get_one(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_item() {
        let mut repos = memory_catalog().await;
        let token = CancellationToken::new();
        repos.products = Arc::new(CancelAfter {
            inner: repos.products.clone(),
            token: token.clone(),
            after: 3,
            saved: AtomicUsize::new(0),
        });
        let feed = FeedConfig::new("shop", "https://example.com/feed.json");
        let prices = ["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"];
        let source = Arc::new(StaticSource::new(&catalog_json(&prices)));

        let (run, _) = import(&feed, &repos, source, token).await;
        assert_eq!(run.status, ImportStatus::Cancelled);
        assert_eq!((run.total_items, run.processed, run.created), (10, 3, 3));
        assert!(run.error_message.is_none());
        let state = repos.feeds.get_one(&feed.id).await.unwrap().unwrap();
        assert_eq!(state.status, FeedStatus::Active);
        assert_eq!(state.total_products, 3);
    }
}
