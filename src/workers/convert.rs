use std::sync::Arc;

use async_trait::async_trait;
use tokio::task;
use tracing::{info, warn};

use crate::{
    engine::conversion::{apply_conversion, conversion_source, ConversionPayload},
    jobs::{retry_delay, JOB_CONVERT_DOCUMENT, MAX_JOB_ATTEMPTS},
    models::Job,
    state::AppState,
};

use super::{JobExecution, JobHandler};

/// Sends a document's original text to the conversion provider and stores
/// the result. No database connection is held while the provider works.
#[derive(Default)]
pub struct ConvertDocumentJob;

impl ConvertDocumentJob {
    pub fn new() -> Self {
        Self
    }
}

fn retry_or_fail(job: &Job, error: String) -> JobExecution {
    if job.attempts < MAX_JOB_ATTEMPTS {
        JobExecution::Retry {
            delay: retry_delay(job.attempts),
            error,
        }
    } else {
        JobExecution::Failed { error }
    }
}

#[async_trait]
impl JobHandler for ConvertDocumentJob {
    fn job_type(&self) -> &'static str {
        JOB_CONVERT_DOCUMENT
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: ConversionPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid conversion payload: {err}"),
                }
            }
        };

        let state_clone = state.clone();
        let source = task::spawn_blocking(move || {
            let mut conn = state_clone.db().map_err(|err| err.to_string())?;
            conversion_source(&mut conn, payload.document_id).map_err(|err| err.to_string())
        })
        .await;

        let text = match source {
            Ok(Ok(Some(text))) => text,
            Ok(Ok(None)) => {
                info!(
                    job_id = %job.id,
                    document_id = %payload.document_id,
                    "document already converted or removed; nothing to do"
                );
                return JobExecution::Success;
            }
            Ok(Err(err)) => return retry_or_fail(&job, err),
            Err(err) => return retry_or_fail(&job, format!("conversion task panicked: {err}")),
        };

        let result = match state.converter.convert(&text, payload.direction).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    job_id = %job.id,
                    document_id = %payload.document_id,
                    attempt = job.attempts,
                    error = %err,
                    "conversion provider failed"
                );
                return retry_or_fail(&job, format!("conversion provider failed: {err:#}"));
            }
        };

        let stored = task::spawn_blocking(move || {
            let mut conn = state.db().map_err(|err| err.to_string())?;
            apply_conversion(&mut conn, payload.document_id, &result).map_err(|err| err.to_string())
        })
        .await;

        match stored {
            Ok(Ok(true)) => {
                info!(
                    job_id = %job.id,
                    document_id = %payload.document_id,
                    direction = %payload.direction.as_str(),
                    "document converted"
                );
                JobExecution::Success
            }
            Ok(Ok(false)) => {
                info!(
                    job_id = %job.id,
                    document_id = %payload.document_id,
                    "conversion result discarded; document already converted"
                );
                JobExecution::Success
            }
            Ok(Err(err)) => retry_or_fail(&job, err),
            Err(err) => retry_or_fail(&job, format!("conversion task panicked: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn job(attempts: i32) -> Job {
        let now = Utc::now().naive_utc();
        Job {
            id: Uuid::new_v4(),
            job_type: JOB_CONVERT_DOCUMENT.to_string(),
            payload: json!({}),
            status: "processing".to_string(),
            attempts,
            run_after: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn retries_with_backoff_until_attempts_run_out() {
        match retry_or_fail(&job(1), "boom".into()) {
            JobExecution::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(30)),
            other => panic!("expected retry, got {other:?}"),
        }
        match retry_or_fail(&job(2), "boom".into()) {
            JobExecution::Retry { delay, .. } => assert_eq!(delay, Duration::from_secs(60)),
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(matches!(
            retry_or_fail(&job(MAX_JOB_ATTEMPTS), "boom".into()),
            JobExecution::Failed { .. }
        ));
    }
}
