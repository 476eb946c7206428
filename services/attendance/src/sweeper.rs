//! Scheduled absence backfill for finished sessions

use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::attendance::AttendanceRecorder;
use crate::clock::Clock;
use crate::repositories::Store;

/// Totals of one sweep run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub absences: u64,
}

#[derive(Clone)]
pub struct AbsenceSweeper {
    store: Arc<dyn Store>,
    recorder: Arc<AttendanceRecorder>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl AbsenceSweeper {
    pub fn new(
        store: Arc<dyn Store>,
        recorder: Arc<AttendanceRecorder>,
        clock: Arc<dyn Clock>,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            recorder,
            clock,
            batch_size,
        }
    }

    /// Backfill one batch of finished sessions that still have gaps
    ///
    /// A failing session is logged and skipped.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let pending = self
            .store
            .list_sessions_pending_backfill(self.clock.now(), self.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for session in pending {
            match self.recorder.backfill_session(&session).await {
                Ok(written) => {
                    report.sessions += 1;
                    report.absences += written;
                }
                Err(e) => warn!("Absence sweep failed for session {}: {}", session.id, e),
            }
        }
        Ok(report)
    }

    /// Run the sweep on a cron schedule; the returned scheduler must be kept
    /// alive for the job to keep firing
    pub async fn start(&self, schedule: &str) -> Result<JobScheduler> {
        let sweeper = self.clone();
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                match sweeper.sweep_once().await {
                    Ok(report) if report.absences > 0 => info!(
                        "Absence sweep recorded {} absences across {} sessions",
                        report.absences, report.sessions
                    ),
                    Ok(_) => {}
                    Err(e) => error!("Absence sweep failed: {}", e),
                }
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started absence sweeper with schedule: {}", schedule);
        Ok(scheduler)
    }
}
