use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::access::{ensure_unlocked_for, ensure_write, Viewer};
use super::audit::{self, AuditEvent, RESOURCE_DOCUMENT};
use super::documents::refresh_search_index;
use super::{now, ConversionDirection, DocumentStatus, EngineError, EngineResult};
use crate::converter::ConversionResult;
use crate::jobs::{enqueue_job, JobQueueError, JOB_CONVERT_DOCUMENT};
use crate::models::Document;
use crate::schema::{credit_balances, document_versions, documents};

impl From<JobQueueError> for EngineError {
    fn from(value: JobQueueError) -> Self {
        match value {
            JobQueueError::Database(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConversionPayload {
    pub document_id: Uuid,
    pub direction: ConversionDirection,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionTicket {
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub direction: ConversionDirection,
}

/// Reads the billing-maintained gate. A user without a balance row is closed.
pub fn credits_available(conn: &mut PgConnection, user_id: Uuid) -> EngineResult<bool> {
    let can_proceed: Option<bool> = credit_balances::table
        .find(user_id)
        .select(credit_balances::can_proceed)
        .first(conn)
        .optional()?;
    Ok(can_proceed.unwrap_or(false))
}

pub fn request_conversion(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    direction: ConversionDirection,
) -> EngineResult<ConversionTicket> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table.find(document_id).first(conn)?;
        ensure_write(viewer, &document)?;
        ensure_unlocked_for(viewer, &document)?;
        if document.status == DocumentStatus::Deleted.as_str() {
            return Err(EngineError::NotFound);
        }
        if !document.is_latest_version {
            return Err(EngineError::invalid_state(
                "only the latest version can be converted",
            ));
        }
        if document.converted_content.is_some() {
            return Err(EngineError::invalid_state("document is already converted"));
        }
        if !credits_available(conn, viewer.user_id)? {
            return Err(EngineError::PaymentRequired);
        }

        let payload = ConversionPayload {
            document_id,
            direction,
        };
        let job = enqueue_job(conn, JOB_CONVERT_DOCUMENT, json!(payload), None)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: document.organization_id,
                actor: Some(viewer.user_id),
                action: "document.conversion_requested",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({ "job_id": job.id, "direction": direction }),
            },
        );
        info!(document_id = %document_id, job_id = %job.id, "conversion queued");
        Ok(ConversionTicket {
            job_id: job.id,
            document_id,
            direction,
        })
    })
}

/// Text to send to the provider, or `None` when there is nothing left to do.
pub fn conversion_source(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> EngineResult<Option<String>> {
    let document: Option<Document> = documents::table
        .find(document_id)
        .first(conn)
        .optional()?;
    Ok(document
        .filter(|document| {
            document.converted_content.is_none()
                && document.status != DocumentStatus::Deleted.as_str()
        })
        .map(|document| document.original_content))
}

/// Stores a provider result. Converted content is written once; a late or
/// duplicate result leaves the existing value in place and returns `false`.
pub fn apply_conversion(
    conn: &mut PgConnection,
    document_id: Uuid,
    result: &ConversionResult,
) -> EngineResult<bool> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let updated = diesel::update(
            documents::table
                .filter(documents::id.eq(document_id))
                .filter(documents::converted_content.is_null()),
        )
        .set((
            documents::converted_content.eq(Some(result.converted_text.clone())),
            documents::key_terms.eq(result.key_terms.clone()),
            documents::summary.eq(result.summary.clone()),
            documents::updated_at.eq(now()),
        ))
        .execute(conn)?;
        if updated == 0 {
            return Ok(false);
        }

        diesel::update(
            document_versions::table
                .filter(document_versions::document_row_id.eq(document_id))
                .filter(document_versions::converted_content.is_null()),
        )
        .set(document_versions::converted_content.eq(Some(result.converted_text.clone())))
        .execute(conn)?;

        let document = refresh_search_index(conn, document_id)?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: document.organization_id,
                actor: None,
                action: "document.converted",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({ "key_terms": result.key_terms.len() }),
            },
        );
        info!(document_id = %document_id, "conversion stored");
        Ok(true)
    })
}
