use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{task, time::interval};
use tracing::{error, info};

use crate::{
    engine::routing::{check_timeouts, TimeoutSweepReport},
    jobs::requeue_stale_jobs,
    state::AppState,
};

/// Jobs stuck in `processing` this long are assumed orphaned by a dead worker.
const STALE_JOB_MINUTES: i64 = 30;

/// Periodically escalates or auto-approves signoffs past their deadline.
pub struct TimeoutSweeper {
    state: Arc<AppState>,
    every: Duration,
}

impl TimeoutSweeper {
    pub fn new(state: Arc<AppState>, every: Duration) -> Self {
        Self { state, every }
    }

    pub async fn run(&self) {
        info!(interval_secs = self.every.as_secs(), "timeout sweeper started");
        let mut ticker = interval(self.every);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(report) if report != TimeoutSweepReport::default() => {
                    info!(
                        escalated = report.escalated,
                        auto_approved = report.auto_approved,
                        overdue = report.overdue,
                        failed = report.failed,
                        "timeout sweep finished"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "timeout sweep failed"),
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<TimeoutSweepReport, String> {
        let state = self.state.clone();
        task::spawn_blocking(move || {
            let mut conn = state.db().map_err(|err| err.to_string())?;
            let now = Utc::now().naive_utc();

            let requeued = requeue_stale_jobs(
                &mut conn,
                now - chrono::Duration::minutes(STALE_JOB_MINUTES),
            )
            .map_err(|err| err.to_string())?;
            if requeued > 0 {
                info!(requeued, "requeued stale jobs");
            }

            check_timeouts(&mut conn, now).map_err(|err| err.to_string())
        })
        .await
        .map_err(|err| format!("sweep task panicked: {err}"))?
    }
}
