use std::time::Duration;

use chrono::NaiveDateTime;
use diesel::SqliteConnection;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::blob::{delete_best_effort, BlobFailure, BlobStore};
use crate::db;
use crate::errors::Result;

pub const SWEEP_PERIOD: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Default)]
pub struct SweepReport {
    pub sessions: usize,
    pub invite_codes: usize,
    pub tags: usize,
    pub files: usize,
    pub blob_failures: Vec<BlobFailure>,
    /// steps that errored, the others still ran
    pub failed_steps: Vec<&'static str>,
}

fn logged<T>(report: &mut SweepReport, step: &'static str, res: Result<T>) -> Option<T> {
    match res {
        Ok(x) => Some(x),
        Err(err) => {
            log::error!("Failed to {step}: {err}");
            report.failed_steps.push(step);
            None
        }
    }
}

/// Removes expired sessions, expired invite codes, orphaned tags and expired
/// files, in that order.
pub fn sweep_once(conn: &mut SqliteConnection, blobs: &dyn BlobStore) -> SweepReport {
    sweep_at(conn, blobs, db::now())
}

/// `now` is the single cutoff for the whole run.
pub fn sweep_at(conn: &mut SqliteConnection, blobs: &dyn BlobStore, now: NaiveDateTime) -> SweepReport {
    let mut report = SweepReport::default();

    log::info!("Starting clean up of expired sessions");
    if let Some(n) = logged(
        &mut report,
        "clean up expired sessions",
        db::delete_expired_session_tokens(conn, now),
    ) {
        log::info!("Cleaned up {n} expired sessions");
        report.sessions = n;
    }

    log::info!("Starting clean up of expired invite codes");
    if let Some(n) = logged(
        &mut report,
        "clean up expired invite codes",
        db::delete_expired_invite_codes(conn, now),
    ) {
        log::info!("Cleaned up {n} expired invite codes");
        report.invite_codes = n;
    }

    log::info!("Starting clean up of orphaned tags");
    if let Some(n) = logged(
        &mut report,
        "clean up orphaned tags",
        db::cleanup_orphaned_tags(conn),
    ) {
        log::info!("Cleaned up {n} orphaned tags");
        report.tags = n;
    }

    log::info!("Starting clean up of expired files");
    let expired = match logged(
        &mut report,
        "list expired files",
        db::find_expired_files(conn, now),
    ) {
        Some(files) => files,
        None => return report,
    };
    if expired.is_empty() {
        log::info!("No expired files");
        return report;
    }

    for file in &expired {
        log::info!("Removing expired file {} of account {}", file.file_name, file.uploader_id);
        if let Err(failure) = delete_best_effort(blobs, &file.file_name) {
            report.blob_failures.push(failure);
        }
    }
    if let Some(n) = logged(
        &mut report,
        "delete expired file entries",
        db::delete_expired_files(conn, now),
    ) {
        log::info!("Cleaned up {n} expired files");
        report.files = n;
    }

    report
}

/// Runs a job right away and then periodically, until stopped.
pub struct Sweeper {
    period: Duration,
}

pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl Sweeper {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// A run is awaited before the next tick is considered, so two runs never
    /// overlap. Ticks missed while a run was going on are not caught up.
    pub fn spawn<F>(self, mut job: F) -> SweeperHandle
    where
        F: FnMut() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let (tx, mut rx) = oneshot::channel();
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut rx => break,
                    _ = interval.tick() => job().await,
                }
            }
            log::info!("sweeper stopped");
        });
        SweeperHandle {
            stop: Some(tx),
            task,
        }
    }
}

impl SweeperHandle {
    /// Waits for an ongoing run to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await {
            log::error!("sweeper task failed: {err}");
        }
    }
}
