//! Recurring ingestion loop and its shutdown handle.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio::task::JoinHandle;

use crate::IngestionScheduler;

#[derive(Debug)]
pub struct IngestionSchedulerHandle {
    enabled: bool,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl IngestionSchedulerHandle {
    fn disabled() -> Self {
        Self {
            enabled: false,
            shutdown_tx: None,
            task: None,
        }
    }

    fn running(shutdown_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            enabled: true,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the loop. A pass already running completes first.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Spawns the recurring pass loop. The first pass runs immediately.
pub fn start_ingestion_scheduler(
    scheduler: Arc<IngestionScheduler>,
) -> Result<IngestionSchedulerHandle> {
    if !scheduler.config().enabled {
        tracing::info!("ingestion scheduler disabled");
        return Ok(IngestionSchedulerHandle::disabled());
    }
    if scheduler.config().interval.is_zero() {
        anyhow::bail!("ingestion scheduler interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("ingestion scheduler requires an active Tokio runtime")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tracing::info!(
        interval_secs = scheduler.config().interval.as_secs(),
        "ingestion scheduler started"
    );
    let task = handle.spawn(async move {
        run_ingestion_loop(scheduler, shutdown_rx).await;
    });
    Ok(IngestionSchedulerHandle::running(shutdown_tx, task))
}

/// Ticks are rescheduled one period after each pass ends, so ticks that
/// would fire during a pass are dropped and `next_run_at` is the real deadline.
async fn run_ingestion_loop(
    scheduler: Arc<IngestionScheduler>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let period = scheduler.config().interval;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    scheduler.update_status(|status| status.next_run_at = Some(Utc::now()));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                scheduler.run_pass().await;
                let deadline = Instant::now() + period;
                interval.reset_at(deadline);
                let next_run_at = wall_clock_at(deadline);
                scheduler.update_status(|status| status.next_run_at = next_run_at);
            }
            _ = &mut shutdown_rx => {
                scheduler.update_status(|status| status.next_run_at = None);
                tracing::info!("ingestion scheduler stopped");
                break;
            }
        }
    }
}

fn wall_clock_at(deadline: Instant) -> Option<DateTime<Utc>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    chrono::Duration::from_std(remaining)
        .ok()
        .and_then(|remaining| Utc::now().checked_add_signed(remaining))
}

#[cfg(test)]
mod tests {
    use super::start_ingestion_scheduler;
    use crate::test_support::{MemoryGateway, ScriptedAnalyzer};
    use crate::{IngestionConfig, IngestionScheduler};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use wolf_store::SqliteReportStore;

    fn scheduler(
        gateway: Arc<MemoryGateway>,
        store_dir: &std::path::Path,
        interval: Duration,
        enabled: bool,
    ) -> Arc<IngestionScheduler> {
        let reports =
            Arc::new(SqliteReportStore::new(store_dir.join("reports.sqlite")).expect("store"));
        Arc::new(IngestionScheduler::new(
            gateway,
            reports,
            Arc::new(ScriptedAnalyzer::default()),
            IngestionConfig {
                interval,
                remote_timeout: Duration::from_secs(2),
                store_timeout: Duration::from_secs(2),
                enabled,
            },
        ))
    }

    async fn wait_for_passes(scheduler: &IngestionScheduler, passes: u64, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if scheduler.status().total_passes >= passes {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for ingestion passes"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn integration_ingestion_loop_runs_first_pass_immediately_and_stops() {
        let temp = tempdir().expect("tempdir");
        let gateway = Arc::new(MemoryGateway::default());
        gateway.add_inbox_file("report_2024W10.txt", "weekly");
        let scheduler = scheduler(gateway.clone(), temp.path(), Duration::from_secs(3600), true);

        let mut handle = start_ingestion_scheduler(scheduler.clone()).expect("start scheduler");
        assert!(handle.enabled());
        assert!(handle.is_running());
        wait_for_passes(&scheduler, 1, Duration::from_secs(2)).await;
        assert_eq!(gateway.archive_names(), vec!["report_2024W10.txt".to_string()]);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let status = loop {
            let status = scheduler.status();
            let finished_at = status.last_pass.as_ref().map(|pass| pass.finished_at);
            match (status.next_run_at, finished_at) {
                (Some(next), Some(finished)) if next > finished => break status,
                _ => {
                    assert!(tokio::time::Instant::now() < deadline, "next run never scheduled");
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        };
        let finished_at = status.last_pass.expect("last pass").finished_at;
        let gap = status.next_run_at.expect("next run") - finished_at;
        assert!(gap >= chrono::Duration::seconds(3590), "gap {gap}");
        assert!(gap <= chrono::Duration::seconds(3610), "gap {gap}");

        handle.shutdown().await;
        assert!(!handle.is_running());
        assert!(scheduler.status().next_run_at.is_none());
    }

    #[tokio::test]
    async fn functional_ingestion_loop_keeps_ticking() {
        let temp = tempdir().expect("tempdir");
        let gateway = Arc::new(MemoryGateway::default());
        let scheduler = scheduler(gateway, temp.path(), Duration::from_millis(20), true);
        let mut handle = start_ingestion_scheduler(scheduler.clone()).expect("start scheduler");
        wait_for_passes(&scheduler, 3, Duration::from_secs(2)).await;
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn regression_disabled_scheduler_spawns_no_task() {
        let temp = tempdir().expect("tempdir");
        let gateway = Arc::new(MemoryGateway::default());
        let scheduler = scheduler(gateway.clone(), temp.path(), Duration::from_secs(60), false);
        let mut handle = start_ingestion_scheduler(scheduler).expect("start scheduler");
        assert!(!handle.enabled());
        assert!(!handle.is_running());
        handle.shutdown().await;
        assert_eq!(gateway.call_count(), 0);
    }

    #[test]
    fn regression_scheduler_requires_tokio_runtime_and_positive_interval() {
        let temp = tempdir().expect("tempdir");
        let gateway = Arc::new(MemoryGateway::default());
        let zero = scheduler(gateway.clone(), temp.path(), Duration::ZERO, true);
        let error = start_ingestion_scheduler(zero).expect_err("zero interval");
        assert!(error.to_string().contains("greater than zero"));

        let other = tempdir().expect("tempdir");
        let no_runtime = scheduler(gateway, other.path(), Duration::from_secs(1), true);
        let error = start_ingestion_scheduler(no_runtime).expect_err("no runtime");
        assert!(error.to_string().contains("Tokio runtime"));
    }
}
