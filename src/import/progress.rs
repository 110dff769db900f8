use feed_types::history::{ImportProgress, ImportRun, LogEntry, LogLevel};
use feed_types::ImportStatus;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;

pub type ProgressHandle = Arc<RwLock<ImportProgress>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub percent: u8,
    pub eta: Duration,
    pub speed: f64,
}

/// ETA is `remaining / (processed / elapsed)`; zero while nothing can be extrapolated.
pub fn estimate(processed: usize, total: usize, elapsed: Duration) -> Estimate {
    let percent = if total == 0 {
        0
    } else {
        (processed.min(total) * 100 / total) as u8
    };
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0. { processed as f64 / secs } else { 0. };
    let eta = if speed > 0. {
        Duration::from_secs_f64(total.saturating_sub(processed) as f64 / speed)
    } else {
        Duration::ZERO
    };
    Estimate {
        percent,
        eta,
        speed,
    }
}

/// Write side of a run's progress snapshot.
#[derive(Clone)]
pub struct ProgressTracker {
    state: ProgressHandle,
    capacity: usize,
}

impl ProgressTracker {
    pub fn new(state: ProgressHandle, capacity: usize) -> Self {
        Self { state, capacity }
    }

    pub async fn update(
        &self,
        run: &ImportRun,
        elapsed: Duration,
        message: impl Into<String>,
        current_item: Option<String>,
    ) {
        let estimate = estimate(run.processed, run.total_items, elapsed);
        let mut p = self.state.write().await;
        p.copy_counters(run);
        p.percent = if run.status == ImportStatus::Completed {
            100
        } else {
            estimate.percent
        };
        p.elapsed_secs = elapsed.as_secs();
        p.eta_secs = estimate.eta.as_secs();
        p.speed = estimate.speed;
        p.message = message.into();
        p.current_item = current_item;
    }

    pub async fn snapshot(&self) -> ImportProgress {
        self.state.read().await.clone()
    }

    /// Adds to the rolling log and mirrors the entry to the process logger.
    pub async fn log(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => log::info!("{message}"),
            LogLevel::Warning => log::warn!("{message}"),
            LogLevel::Error => log::error!("{message}"),
        }
        self.push(level, message).await;
    }

    /// Per-item entries reach the process logger at debug level only.
    pub async fn item_log(&self, level: LogLevel, message: String) {
        log::debug!("{message}");
        self.push(level, message).await;
    }

    async fn push(&self, level: LogLevel, message: String) {
        let entry = LogEntry {
            time: OffsetDateTime::now_utc(),
            level,
            message,
        };
        self.state.write().await.push_log(entry, self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn estimate_extrapolates_from_speed() {
        let e = estimate(50, 200, Duration::from_secs(10));
        assert_eq!(e.percent, 25);
        assert_eq!(e.speed, 5.);
        assert_eq!(e.eta, Duration::from_secs(30));
    }

    #[test]
    fn estimate_is_zero_without_elapsed_time() {
        let e = estimate(10, 100, Duration::ZERO);
        assert_eq!(e.eta, Duration::ZERO);
        assert_eq!(e.speed, 0.);
        assert_eq!(estimate(0, 0, Duration::from_secs(1)).percent, 0);
        assert_eq!(estimate(12, 10, Duration::from_secs(1)).percent, 100);
    }

    #[tokio::test]
    async fn tracker_updates_snapshot_and_log() {
        let run = ImportRun::start(Uuid::new_v4(), Uuid::new_v4(), "test".to_string());
        let state = Arc::new(RwLock::new(ImportProgress::starting(&run)));
        let tracker = ProgressTracker::new(state.clone(), 2);
        let mut run = run;
        run.total_items = 10;
        run.processed = 5;
        tracker
            .update(&run, Duration::from_secs(5), "Processing", Some("Lamp".to_string()))
            .await;
        for i in 0..3 {
            tracker.item_log(LogLevel::Warning, format!("w{i}")).await;
        }
        let snapshot = state.read().await.clone();
        assert_eq!(snapshot.percent, 50);
        assert_eq!(snapshot.eta_secs, 5);
        assert_eq!(snapshot.current_item.as_deref(), Some("Lamp"));
        assert_eq!(snapshot.logs.len(), 2);
        assert_eq!(snapshot.logs[0].message, "w1");
    }
}
