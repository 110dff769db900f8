use crate::feed::FeedConfig;
use crate::{FeedStatus, ImportStatus};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use time::OffsetDateTime;
use typesafe_repository::async_ops::{Get, Save, Select};
use typesafe_repository::macros::Id;
use typesafe_repository::prelude::*;
use typesafe_repository::{SelectBy, Selector};
use uuid::Uuid;

/// One execution of an import. Owned and mutated by the run task only.
#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImportRun {
    #[id]
    pub id: Uuid,
    pub feed_id: IdentityOf<FeedConfig>,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub status: ImportStatus,
    pub total_items: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub triggered_by: String,
    pub error_message: Option<String>,
}

impl ImportRun {
    pub fn start(id: Uuid, feed_id: IdentityOf<FeedConfig>, triggered_by: String) -> Self {
        Self {
            id,
            feed_id,
            started_at: OffsetDateTime::now_utc(),
            finished_at: None,
            status: ImportStatus::Running,
            total_items: 0,
            processed: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            triggered_by,
            error_message: None,
        }
    }

    pub fn duration(&self) -> Option<time::Duration> {
        self.finished_at.map(|f| f - self.started_at)
    }
}

/// Most recent runs of a feed, newest first.
pub struct RecentRuns {
    pub feed_id: IdentityOf<FeedConfig>,
    pub limit: usize,
}

impl Selector for RecentRuns {}
impl SelectBy<RecentRuns> for ImportRun {}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[display("info")]
    Info,
    #[display("warning")]
    Warning,
    #[display("error")]
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub time: OffsetDateTime,
    pub level: LogLevel,
    pub message: String,
}

/// Snapshot of a run as seen by status pollers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImportProgress {
    pub feed_id: IdentityOf<FeedConfig>,
    pub run_id: Option<IdentityOf<ImportRun>>,
    pub status: ImportStatus,
    pub percent: u8,
    pub total: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub message: String,
    pub current_item: Option<String>,
    pub elapsed_secs: u64,
    pub eta_secs: u64,
    /// Items per second
    pub speed: f64,
    pub logs: VecDeque<LogEntry>,
}

impl ImportProgress {
    pub fn idle(feed_id: IdentityOf<FeedConfig>) -> Self {
        Self {
            feed_id,
            run_id: None,
            status: ImportStatus::Idle,
            percent: 0,
            total: 0,
            processed: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            message: String::new(),
            current_item: None,
            elapsed_secs: 0,
            eta_secs: 0,
            speed: 0.,
            logs: VecDeque::new(),
        }
    }

    pub fn starting(run: &ImportRun) -> Self {
        Self {
            run_id: Some(run.id),
            status: ImportStatus::Running,
            message: "Starting import".to_string(),
            ..Self::idle(run.feed_id)
        }
    }

    /// Pushes `entry`, dropping the oldest entries beyond `capacity`.
    pub fn push_log(&mut self, entry: LogEntry, capacity: usize) {
        self.logs.push_back(entry);
        while self.logs.len() > capacity {
            self.logs.pop_front();
        }
    }

    pub fn copy_counters(&mut self, run: &ImportRun) {
        self.status = run.status;
        self.total = run.total_items;
        self.processed = run.processed;
        self.created = run.created;
        self.updated = run.updated;
        self.skipped = run.skipped;
        self.errors = run.errors;
    }
}

/// Aggregate state of a feed kept by the catalog.
#[derive(Id, Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeedState {
    #[id]
    pub id: IdentityOf<FeedConfig>,
    pub status: FeedStatus,
    pub last_run_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
    pub total_products: usize,
}

pub trait HistoryRepository:
    Repository<ImportRun, Error = anyhow::Error>
    + Save<ImportRun>
    + Get<ImportRun>
    + Select<ImportRun, RecentRuns>
    + Send
    + Sync
{
}

pub trait FeedRepository:
    Repository<FeedState, Error = anyhow::Error> + Save<FeedState> + Get<FeedState> + Send + Sync
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_buffer_keeps_most_recent_entries() {
        let mut progress = ImportProgress::idle(Uuid::new_v4());
        for i in 0..5 {
            progress.push_log(
                LogEntry {
                    time: OffsetDateTime::now_utc(),
                    level: LogLevel::Info,
                    message: i.to_string(),
                },
                3,
            );
        }
        let messages: Vec<_> = progress.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["2", "3", "4"]);
    }

    #[test]
    fn starting_progress_reflects_run() {
        let run = ImportRun::start(Uuid::new_v4(), Uuid::new_v4(), "manual".to_string());
        let progress = ImportProgress::starting(&run);
        assert_eq!(progress.run_id, Some(run.id));
        assert_eq!(progress.status, ImportStatus::Running);
        assert_eq!(run.duration(), None);
    }
}
