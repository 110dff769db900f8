use actix::prelude::*;
use feed_import::catalog::SqliteCatalog;
use feed_import::config::{read_feeds, ImporterSettings};
use feed_import::import::source::{http_client, HttpFeedSource};
use feed_import::import::{GetHistory, GetProgress, ImportService, RequestStop, StartRun};
use feed_types::feed::FeedConfig;
use std::env;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tokio_rusqlite::Connection;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[actix_rt::main]
async fn main() -> Result<(), anyhow::Error> {
    if let Err(env::VarError::NotPresent) = env::var("RUST_LOG") {
        env::set_var("RUST_LOG", "INFO");
    }
    pretty_env_logger::formatted_timed_builder()
        .parse_default_env()
        .init();

    match std::fs::File::open(".env") {
        Ok(_) => envmnt::load_file(".env")?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
        Err(err) => {
            return Err(anyhow::anyhow!("Unable to open .env file: {err}"));
        }
    }

    let settings = ImporterSettings::from_env();
    let storage_path = envmnt::get_or("STORAGE_PATH", "storage/catalog.db");
    if let Some(dir) = std::path::Path::new(&storage_path).parent() {
        std::fs::create_dir_all(dir)?;
    }
    let feeds = read_feeds(envmnt::get_or("FEEDS_PATH", "feeds.yaml"))?;
    if feeds.is_empty() {
        log::warn!("No feeds configured");
        return Ok(());
    }

    let conn = Connection::open(&storage_path).await?;
    let repos = SqliteCatalog::init(conn).await?.repositories();
    let client = http_client()?;
    let source = Arc::new(HttpFeedSource::new(client.clone(), settings.clone()));
    let service = ImportService::new(repos, source, client, settings).start();

    let mut started = Vec::new();
    for feed in feeds {
        match service.send(StartRun(feed.clone(), "cli".to_string())).await? {
            Ok(run_id) => {
                log::info!("Started run {run_id} for {}", feed.name);
                started.push(feed);
            }
            Err(err) => log::error!("Unable to start {}: {err}", feed.name),
        }
    }
    let feeds = started;

    loop {
        tokio::select! {
            _ = sleep(POLL_INTERVAL) => (),
            res = tokio::signal::ctrl_c() => {
                res?;
                log::warn!("Interrupted, stopping imports");
                for feed in &feeds {
                    service.send(RequestStop(feed.id)).await?;
                }
            }
        }
        if all_finished(&service, &feeds).await? {
            break;
        }
    }

    for feed in &feeds {
        let history = service.send(GetHistory(feed.id, Some(1))).await??;
        for run in history {
            println!(
                "{}: {} in {}s, {} items ({} created, {} updated, {} skipped, {} errors){}",
                feed.name,
                run.status,
                run.duration().map(|d| d.whole_seconds()).unwrap_or_default(),
                run.total_items,
                run.created,
                run.updated,
                run.skipped,
                run.errors,
                run.error_message
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default(),
            );
        }
    }
    Ok(())
}

async fn all_finished(
    service: &Addr<ImportService>,
    feeds: &[FeedConfig],
) -> Result<bool, MailboxError> {
    for feed in feeds {
        let progress = service.send(GetProgress(feed.id)).await?;
        log::debug!("{}: {}% ({})", feed.name, progress.percent, progress.message);
        if !progress.status.is_terminal() {
            return Ok(false);
        }
    }
    Ok(true)
}
