use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use diesel::PgConnection;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{mark_job_failed, mark_job_succeeded, reserve_job, retry_job_after, JobQueueError},
    models::Job,
    state::AppState,
};

pub mod convert;
pub mod sweep;

pub use sweep::TimeoutSweeper;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(
            job_types = ?self.handlers.keys().collect::<Vec<_>>(),
            "worker started"
        );
        loop {
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Processes at most one job. Returns whether a job was found.
    pub async fn run_once(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let job = {
            let mut conn = match self.state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    error!(error = %err, "worker could not get a database connection");
                    return Ok(false);
                }
            };
            reserve_job(&mut conn, &job_types)?
        };
        let Some(job) = job else {
            return Ok(false);
        };

        let outcome = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => handler.handle(self.state.clone(), job.clone()).await,
            None => JobExecution::Failed {
                error: "no handler registered".to_string(),
            },
        };

        match self.state.db() {
            Ok(mut conn) => record_outcome(&mut conn, &job, outcome)?,
            Err(err) => error!(job_id = %job.id, error = %err, "could not record job outcome"),
        }
        Ok(true)
    }
}

fn record_outcome(
    conn: &mut PgConnection,
    job: &Job,
    outcome: JobExecution,
) -> Result<(), JobQueueError> {
    match outcome {
        JobExecution::Success => {
            mark_job_succeeded(conn, job.id)?;
            info!(job_id = %job.id, job_type = %job.job_type, "job completed");
        }
        JobExecution::Retry { delay, error } => {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                retry_in_secs = delay.as_secs(),
                %error,
                "job will retry"
            );
            retry_job_after(conn, job.id, delay, &error)?;
        }
        JobExecution::Failed { error } => {
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                %error,
                "job failed"
            );
            mark_job_failed(conn, job.id, &error)?;
        }
    }
    Ok(())
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(convert::ConvertDocumentJob::new())]
}
