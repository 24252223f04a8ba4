use chrono::{Duration, NaiveDateTime};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::access::{ensure_unlocked_for, ensure_write, Viewer};
use super::audit::{self, AuditEvent, RESOURCE_DOCUMENT};
use super::documents::{has_active_approval, list_documents, DocumentFilter};
use super::{now, EngineError, EngineResult, Page, PageRequest};
use crate::models::Document;
use crate::schema::documents;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct ArchiveRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub auto_delete_at: Option<NaiveDateTime>,
}

/// Caller-resolved permissions and defaults for an archive call.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArchivePolicy {
    pub override_recall: bool,
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub document_id: Uuid,
    pub archived_at: Option<NaiveDateTime>,
    pub archived_by: Option<Uuid>,
    pub archive_reason: Option<String>,
    pub auto_delete_at: Option<NaiveDateTime>,
    pub can_recall: bool,
}

impl From<&Document> for ArchiveRecord {
    fn from(document: &Document) -> Self {
        Self {
            document_id: document.id,
            archived_at: document.archived_at,
            archived_by: document.archived_by,
            archive_reason: document.archive_reason.clone(),
            auto_delete_at: document.auto_delete_at,
            can_recall: document.can_recall,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveDecision {
    AlreadyArchived,
    Archive,
}

pub fn decide_archive(
    is_archived: bool,
    can_recall: bool,
    override_recall: bool,
) -> EngineResult<ArchiveDecision> {
    if is_archived {
        return Ok(ArchiveDecision::AlreadyArchived);
    }
    if !can_recall && !override_recall {
        return Err(EngineError::invalid_state(
            "document cannot be archived while recall is disabled",
        ));
    }
    Ok(ArchiveDecision::Archive)
}

/// An elapsed purge deadline wins over the recall flag.
pub fn decide_recall(
    is_archived: bool,
    can_recall: bool,
    auto_delete_at: Option<NaiveDateTime>,
    at: NaiveDateTime,
) -> EngineResult<()> {
    if !is_archived {
        return Err(EngineError::invalid_state("document is not archived"));
    }
    if matches!(auto_delete_at, Some(deadline) if deadline <= at) {
        return Err(EngineError::RecallWindowExpired);
    }
    if !can_recall {
        return Err(EngineError::invalid_state("document cannot be recalled"));
    }
    Ok(())
}

pub fn archive_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    request: &ArchiveRequest,
    policy: ArchivePolicy,
) -> EngineResult<ArchiveRecord> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_write(viewer, &document)?;

        if decide_archive(document.is_archived, document.can_recall, policy.override_recall)?
            == ArchiveDecision::AlreadyArchived
        {
            return Ok(ArchiveRecord::from(&document));
        }
        ensure_unlocked_for(viewer, &document)?;
        if !document.is_latest_version {
            return Err(EngineError::invalid_state(
                "only the latest version can be archived",
            ));
        }
        if has_active_approval(conn, document_id)? {
            return Err(EngineError::invalid_state(
                "document is under active approval",
            ));
        }

        let archived_at = now();
        let auto_delete_at = request.auto_delete_at.or(document.auto_delete_at).or_else(|| {
            policy
                .retention_days
                .map(|days| archived_at + Duration::days(days))
        });

        let archived: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::is_archived.eq(true),
                documents::archived_at.eq(Some(archived_at)),
                documents::archived_by.eq(Some(viewer.user_id)),
                documents::archive_reason.eq(request.reason.clone()),
                documents::auto_delete_at.eq(auto_delete_at),
                documents::updated_at.eq(archived_at),
            ))
            .get_result(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: archived.organization_id,
                actor: Some(viewer.user_id),
                action: "document.archived",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({
                    "reason": archived.archive_reason,
                    "auto_delete_at": archived.auto_delete_at,
                    "override": !document.can_recall,
                }),
            },
        );
        info!(document_id = %document_id, user_id = %viewer.user_id, "document archived");
        Ok(ArchiveRecord::from(&archived))
    })
}

pub fn recall_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
) -> EngineResult<Document> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_write(viewer, &document)?;
        let at = now();
        decide_recall(
            document.is_archived,
            document.can_recall,
            document.auto_delete_at,
            at,
        )?;

        let recalled: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::is_archived.eq(false),
                documents::archived_at.eq(None::<NaiveDateTime>),
                documents::archived_by.eq(None::<Uuid>),
                documents::archive_reason.eq(None::<String>),
                documents::auto_delete_at.eq(None::<NaiveDateTime>),
                documents::updated_at.eq(at),
            ))
            .get_result(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: recalled.organization_id,
                actor: Some(viewer.user_id),
                action: "document.recalled",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({
                    "archived_at": document.archived_at,
                    "archived_by": document.archived_by,
                }),
            },
        );
        info!(document_id = %document_id, user_id = %viewer.user_id, "document recalled");
        Ok(recalled)
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecallPolicy {
    pub can_recall: bool,
    #[serde(default)]
    pub auto_delete_at: Option<NaiveDateTime>,
}

/// Owners and organization admins only.
pub fn set_recall_policy(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    policy: &RecallPolicy,
) -> EngineResult<Document> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_write(viewer, &document)?;
        let is_admin = document
            .organization_id
            .map(|org| viewer.is_admin_of(org))
            .unwrap_or(false);
        if document.user_id != viewer.user_id && !is_admin {
            return Err(EngineError::Forbidden);
        }

        let updated: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::can_recall.eq(policy.can_recall),
                documents::auto_delete_at.eq(policy.auto_delete_at),
                documents::updated_at.eq(now()),
            ))
            .get_result(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: updated.organization_id,
                actor: Some(viewer.user_id),
                action: "document.recall_policy_changed",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({
                    "can_recall": policy.can_recall,
                    "auto_delete_at": policy.auto_delete_at,
                }),
            },
        );
        Ok(updated)
    })
}

pub fn list_archived(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    page: PageRequest,
) -> EngineResult<Page<Document>> {
    viewer.require_member(organization_id)?;
    let filter = DocumentFilter {
        organization_id: Some(organization_id),
        archived: true,
        ..Default::default()
    };
    list_documents(conn, viewer, &filter, page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at() -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    #[test]
    fn archiving_twice_is_a_no_op() {
        assert_eq!(
            decide_archive(true, false, false).unwrap(),
            ArchiveDecision::AlreadyArchived
        );
    }

    #[test]
    fn archive_requires_recall_or_override() {
        assert!(matches!(
            decide_archive(false, false, false),
            Err(EngineError::InvalidState(_))
        ));
        assert_eq!(
            decide_archive(false, false, true).unwrap(),
            ArchiveDecision::Archive
        );
        assert_eq!(
            decide_archive(false, true, false).unwrap(),
            ArchiveDecision::Archive
        );
    }

    #[test]
    fn recall_of_active_document_is_invalid() {
        assert!(matches!(
            decide_recall(false, true, None, at()),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[test]
    fn recall_after_purge_deadline_expires_even_when_recallable() {
        let now = at();
        let result = decide_recall(true, true, Some(now - Duration::minutes(1)), now);
        assert!(matches!(result, Err(EngineError::RecallWindowExpired)));
    }

    #[test]
    fn recall_before_deadline_succeeds() {
        let now = at();
        assert!(decide_recall(true, true, Some(now + Duration::days(1)), now).is_ok());
        assert!(decide_recall(true, true, None, now).is_ok());
    }

    #[test]
    fn recall_disabled_is_invalid_state() {
        assert!(matches!(
            decide_recall(true, false, None, at()),
            Err(EngineError::InvalidState(_))
        ));
    }
}
