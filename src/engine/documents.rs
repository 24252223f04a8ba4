use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use diesel::dsl::{count_star, exists};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::sql_types::Bool;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::access::{ensure_read, ensure_unlocked_for, ensure_write, Viewer};
use super::audit::{self, AuditEvent, RESOURCE_DOCUMENT};
use super::notifications::{notify, Notice};
use super::search::{self, IndexSource};
use super::{
    now, ApprovalStatus, DocumentStatus, DocumentType, EngineError, EngineResult,
    NotificationKind, Page, PageRequest, Priority, Visibility,
};
use crate::models::{Document, NewDocument, NewDocumentVersion};
use crate::schema::{document_approvals, document_versions, documents, teams};

/// Upper bound on rows scored in memory for a free-text search.
const MAX_SEARCH_CANDIDATES: i64 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub original_content: String,
    #[serde(default)]
    pub converted_content: Option<String>,
    #[serde(default)]
    pub document_type: Option<DocumentType>,
    #[serde(default)]
    pub specialty: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub team_id: Option<Uuid>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
    #[serde(default)]
    pub can_recall: Option<bool>,
}

/// Metadata edit; content changes go through a new version. `Some(None)`
/// clears a nullable field.
#[derive(Debug, Default)]
pub struct DocumentUpdate {
    pub description: Option<Option<String>>,
    pub specialty: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub team_id: Option<Option<Uuid>>,
    pub document_type: Option<DocumentType>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub visibility: Option<Visibility>,
}

#[derive(AsChangeset)]
#[diesel(table_name = documents)]
struct DocumentChangeset {
    description: Option<Option<String>>,
    specialty: Option<Option<String>>,
    category: Option<Option<String>>,
    team_id: Option<Option<Uuid>>,
    document_type: Option<String>,
    priority: Option<String>,
    tags: Option<Vec<String>>,
    visibility: Option<String>,
    updated_at: NaiveDateTime,
}

#[derive(Debug, Default, Clone)]
pub struct DocumentFilter {
    pub organization_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
    pub tags: Vec<String>,
    pub archived: bool,
    pub include_deleted: bool,
    pub all_versions: bool,
    pub query: Option<String>,
    pub created_from: Option<NaiveDateTime>,
    pub created_to: Option<NaiveDateTime>,
}

pub(crate) fn normalize_tags(tags: &[String]) -> Vec<String> {
    let unique: BTreeSet<String> = tags
        .iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    unique.into_iter().collect()
}

pub(crate) fn index_for(document: &Document) -> serde_json::Value {
    search::index_value(&IndexSource {
        title: &document.title,
        description: document.description.as_deref(),
        category: document.category.as_deref(),
        tags: &document.tags,
        original_content: &document.original_content,
        converted_content: document.converted_content.as_deref(),
    })
}

/// Recomputes the weighted term map from the stored row.
pub(crate) fn refresh_search_index(
    conn: &mut PgConnection,
    document_id: Uuid,
) -> EngineResult<Document> {
    let document: Document = documents::table.find(document_id).first(conn)?;
    Ok(diesel::update(documents::table.find(document_id))
        .set(documents::search_index.eq(index_for(&document)))
        .get_result(conn)?)
}

pub(crate) fn has_active_approval(conn: &mut PgConnection, document_id: Uuid) -> EngineResult<bool> {
    Ok(diesel::select(exists(
        document_approvals::table
            .filter(document_approvals::document_id.eq(document_id))
            .filter(document_approvals::status.eq_any(ApprovalStatus::active_strs())),
    ))
    .get_result(conn)?)
}

fn ensure_team_in_organization(
    conn: &mut PgConnection,
    organization_id: Option<Uuid>,
    team_id: Uuid,
) -> EngineResult<()> {
    let Some(organization_id) = organization_id else {
        return Err(EngineError::validation(
            "team documents must belong to an organization",
        ));
    };
    let found: bool = diesel::select(exists(
        teams::table
            .filter(teams::id.eq(team_id))
            .filter(teams::organization_id.eq(organization_id)),
    ))
    .get_result(conn)?;
    if found {
        Ok(())
    } else {
        Err(EngineError::validation("team does not belong to the organization"))
    }
}

/// Shared guard for in-place writes: latest version, writable, not locked
/// by someone else, not archived or deleted.
fn ensure_editable(viewer: &Viewer, document: &Document) -> EngineResult<()> {
    ensure_write(viewer, document)?;
    ensure_unlocked_for(viewer, document)?;
    if !document.is_latest_version {
        return Err(EngineError::invalid_state(
            "only the latest version can be modified",
        ));
    }
    if document.is_archived {
        return Err(EngineError::invalid_state("document is archived"));
    }
    if document.status == DocumentStatus::Deleted.as_str() {
        return Err(EngineError::invalid_state("document is deleted"));
    }
    Ok(())
}

pub fn create_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    input: DocumentInput,
) -> EngineResult<Document> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(EngineError::validation("title must not be empty"));
    }
    if input.original_content.trim().is_empty() {
        return Err(EngineError::validation("content must not be empty"));
    }
    if let Some(org) = input.organization_id {
        viewer.require_member(org)?;
    }

    let visibility = input.visibility.unwrap_or(if input.organization_id.is_some() {
        Visibility::Organization
    } else {
        Visibility::Private
    });

    conn.transaction::<_, EngineError, _>(|conn| {
        if let Some(team_id) = input.team_id {
            ensure_team_in_organization(conn, input.organization_id, team_id)?;
        }

        let id = Uuid::new_v4();
        let tags = normalize_tags(&input.tags);
        let search_index = search::index_value(&IndexSource {
            title: &title,
            description: input.description.as_deref(),
            category: input.category.as_deref(),
            tags: &tags,
            original_content: &input.original_content,
            converted_content: input.converted_content.as_deref(),
        });

        let row = NewDocument {
            id,
            user_id: viewer.user_id,
            organization_id: input.organization_id,
            team_id: input.team_id,
            title: title.clone(),
            description: input.description.clone(),
            original_content: input.original_content.clone(),
            converted_content: input.converted_content.clone(),
            document_type: input
                .document_type
                .unwrap_or(DocumentType::Other)
                .as_str()
                .to_string(),
            specialty: input.specialty.clone(),
            category: input.category.clone(),
            priority: input.priority.unwrap_or(Priority::Normal).as_str().to_string(),
            status: DocumentStatus::Draft.as_str().to_string(),
            tags,
            version_number: 1,
            is_latest_version: true,
            parent_document_id: None,
            root_document_id: id,
            version_notes: None,
            can_recall: input.can_recall.unwrap_or(true),
            visibility: visibility.as_str().to_string(),
            shared_with: Vec::new(),
            locked_by: None,
            locked_at: None,
            search_index,
        };
        let document: Document = diesel::insert_into(documents::table)
            .values(&row)
            .get_result(conn)?;

        diesel::insert_into(document_versions::table)
            .values(&NewDocumentVersion {
                id: Uuid::new_v4(),
                document_id: id,
                version_number: 1,
                document_row_id: id,
                title: document.title.clone(),
                original_content: document.original_content.clone(),
                converted_content: document.converted_content.clone(),
                version_notes: None,
                created_by: viewer.user_id,
            })
            .execute(conn)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: document.organization_id,
                actor: Some(viewer.user_id),
                action: "document.created",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document.id),
                details: json!({ "title": document.title, "document_type": document.document_type }),
            },
        );
        info!(document_id = %document.id, user_id = %viewer.user_id, "document created");
        Ok(document)
    })
}

pub fn get_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
) -> EngineResult<Document> {
    let document: Document = documents::table.find(document_id).first(conn)?;
    ensure_read(viewer, &document)?;
    Ok(document)
}

type DocumentPredicate = Box<dyn BoxableExpression<documents::table, Pg, SqlType = Bool>>;

/// SQL rendition of `access::can_read`.
fn visible_to(viewer: &Viewer) -> DocumentPredicate {
    let organizations: Vec<Uuid> = viewer.organizations.keys().copied().collect();
    let teams: Vec<Uuid> = viewer.teams.iter().copied().collect();
    Box::new(
        documents::user_id
            .eq(viewer.user_id)
            .or(documents::visibility.eq(Visibility::Public.as_str()))
            .or(documents::shared_with.contains(vec![viewer.user_id]))
            .or(documents::visibility
                .eq(Visibility::Organization.as_str())
                .and(documents::organization_id.assume_not_null().eq_any(organizations)))
            .or(documents::visibility
                .eq(Visibility::Team.as_str())
                .and(documents::team_id.assume_not_null().eq_any(teams))),
    )
}

fn like_pattern(query: &str) -> String {
    let escaped = query
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn filtered_documents(viewer: &Viewer, filter: &DocumentFilter) -> documents::BoxedQuery<'static, Pg> {
    let mut query = documents::table.filter(visible_to(viewer)).into_boxed();

    if !filter.all_versions {
        query = query.filter(documents::is_latest_version.eq(true));
    }
    query = query.filter(documents::is_archived.eq(filter.archived));
    if !filter.include_deleted {
        query = query.filter(documents::status.ne(DocumentStatus::Deleted.as_str()));
    }
    if let Some(org) = filter.organization_id {
        query = query.filter(documents::organization_id.eq(org));
    }
    if let Some(team) = filter.team_id {
        query = query.filter(documents::team_id.eq(team));
    }
    if let Some(ty) = filter.document_type {
        query = query.filter(documents::document_type.eq(ty.as_str()));
    }
    if let Some(status) = filter.status {
        query = query.filter(documents::status.eq(status.as_str()));
    }
    if !filter.tags.is_empty() {
        query = query.filter(documents::tags.contains(normalize_tags(&filter.tags)));
    }
    if let Some(from) = filter.created_from {
        query = query.filter(documents::created_at.ge(from));
    }
    if let Some(to) = filter.created_to {
        query = query.filter(documents::created_at.lt(to));
    }
    if let Some(text) = filter.query.as_deref().filter(|q| !q.trim().is_empty()) {
        let pattern = like_pattern(text);
        query = query.filter(
            documents::title
                .ilike(pattern.clone())
                .or(documents::original_content.ilike(pattern.clone()))
                .or(documents::converted_content.assume_not_null().ilike(pattern)),
        );
    }
    query
}

/// Ranked searches only page through the scored candidates.
fn reachable_total(matching: i64, ranked: bool) -> i64 {
    if ranked {
        matching.min(MAX_SEARCH_CANDIDATES)
    } else {
        matching
    }
}

pub fn list_documents(
    conn: &mut PgConnection,
    viewer: &Viewer,
    filter: &DocumentFilter,
    page: PageRequest,
) -> EngineResult<Page<Document>> {
    let search_text = filter
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());

    let matching: i64 = filtered_documents(viewer, filter)
        .select(count_star())
        .first(conn)?;
    let total = reachable_total(matching, search_text.is_some());

    let items = match search_text {
        None => filtered_documents(viewer, filter)
            .order((documents::created_at.desc(), documents::id.desc()))
            .limit(page.limit)
            .offset(page.offset)
            .load::<Document>(conn)?,
        Some(text) => {
            let mut candidates = filtered_documents(viewer, filter)
                .order(documents::created_at.desc())
                .limit(MAX_SEARCH_CANDIDATES)
                .load::<Document>(conn)?;
            // Stable sort keeps newest-first among equal scores.
            candidates.sort_by_key(|doc| std::cmp::Reverse(search::score(&doc.search_index, text)));
            candidates
                .into_iter()
                .skip(page.offset as usize)
                .take(page.limit as usize)
                .collect()
        }
    };

    Ok(Page::new(items, total, page))
}

pub fn update_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    update: DocumentUpdate,
) -> EngineResult<Document> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_editable(viewer, &document)?;

        if let Some(Some(team_id)) = update.team_id {
            ensure_team_in_organization(conn, document.organization_id, team_id)?;
        }

        let changes = DocumentChangeset {
            description: update.description.clone(),
            specialty: update.specialty.clone(),
            category: update.category.clone(),
            team_id: update.team_id,
            document_type: update.document_type.map(|ty| ty.as_str().to_string()),
            priority: update.priority.map(|p| p.as_str().to_string()),
            tags: update.tags.as_deref().map(normalize_tags),
            visibility: update.visibility.map(|v| v.as_str().to_string()),
            updated_at: now(),
        };
        diesel::update(documents::table.find(document_id))
            .set(&changes)
            .execute(conn)?;
        let updated = refresh_search_index(conn, document_id)?;

        audit::record_event(
            conn,
            AuditEvent {
                organization_id: updated.organization_id,
                actor: Some(viewer.user_id),
                action: "document.updated",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({}),
            },
        );
        Ok(updated)
    })
}

pub fn lock_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
) -> EngineResult<Document> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_editable(viewer, &document)?;
        if document.locked_by == Some(viewer.user_id) {
            return Ok(document);
        }

        let locked: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::locked_by.eq(Some(viewer.user_id)),
                documents::locked_at.eq(Some(now())),
            ))
            .get_result(conn)?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: locked.organization_id,
                actor: Some(viewer.user_id),
                action: "document.locked",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({}),
            },
        );
        Ok(locked)
    })
}

pub fn unlock_document(
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
        match document.locked_by {
            None => return Ok(document),
            Some(holder) if holder != viewer.user_id => return Err(EngineError::Locked),
            Some(_) => {}
        }

        let unlocked: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::locked_by.eq(None::<Uuid>),
                documents::locked_at.eq(None::<NaiveDateTime>),
            ))
            .get_result(conn)?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: unlocked.organization_id,
                actor: Some(viewer.user_id),
                action: "document.unlocked",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({}),
            },
        );
        Ok(unlocked)
    })
}

/// Editor status changes. `approved` and `rejected` belong to approval
/// routing, and nothing changes while an approval is active.
pub fn set_status(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    status: DocumentStatus,
) -> EngineResult<Document> {
    if !status.is_editor_settable() {
        return Err(EngineError::invalid_state(format!(
            "status `{status}` cannot be set directly"
        )));
    }

    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_editable(viewer, &document)?;
        if has_active_approval(conn, document_id)? {
            return Err(EngineError::invalid_state(
                "document is under active approval",
            ));
        }

        let updated: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(status.as_str()),
                documents::updated_at.eq(now()),
            ))
            .get_result(conn)?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: updated.organization_id,
                actor: Some(viewer.user_id),
                action: "document.status_changed",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({ "from": document.status, "to": status }),
            },
        );
        info!(document_id = %document_id, from = %document.status, to = %status, "document status changed");
        Ok(updated)
    })
}

/// Logical delete; the row stays for audit and version history.
pub fn delete_document(
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
        ensure_unlocked_for(viewer, &document)?;
        if document.status == DocumentStatus::Deleted.as_str() {
            return Ok(document);
        }
        if has_active_approval(conn, document_id)? {
            return Err(EngineError::invalid_state(
                "document is under active approval",
            ));
        }

        let deleted: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::status.eq(DocumentStatus::Deleted.as_str()),
                documents::updated_at.eq(now()),
            ))
            .get_result(conn)?;
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: deleted.organization_id,
                actor: Some(viewer.user_id),
                action: "document.deleted",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({ "previous_status": document.status }),
            },
        );
        info!(document_id = %document_id, "document deleted");
        Ok(deleted)
    })
}

pub fn share_document(
    conn: &mut PgConnection,
    viewer: &Viewer,
    document_id: Uuid,
    user_ids: &[Uuid],
) -> EngineResult<Document> {
    conn.transaction::<_, EngineError, _>(|conn| {
        let document: Document = documents::table
            .find(document_id)
            .for_update()
            .first(conn)?;
        ensure_write(viewer, &document)?;

        let mut shared = document.shared_with.clone();
        let mut added = Vec::new();
        for user_id in user_ids {
            if *user_id != document.user_id && !shared.contains(user_id) {
                shared.push(*user_id);
                added.push(*user_id);
            }
        }
        if added.is_empty() {
            return Ok(document);
        }

        let updated: Document = diesel::update(documents::table.find(document_id))
            .set((
                documents::shared_with.eq(shared.clone()),
                documents::updated_at.eq(now()),
            ))
            .get_result(conn)?;

        for user_id in &added {
            notify(
                conn,
                Notice {
                    user_id: *user_id,
                    kind: NotificationKind::DocumentShared,
                    title: "Document shared with you".to_string(),
                    message: format!("\"{}\" was shared with you", updated.title),
                    document_id: Some(document_id),
                    approval_id: None,
                },
            )?;
        }
        audit::record_event(
            conn,
            AuditEvent {
                organization_id: updated.organization_id,
                actor: Some(viewer.user_id),
                action: "document.shared",
                resource_type: RESOURCE_DOCUMENT,
                resource_id: Some(document_id),
                details: json!({ "user_ids": added }),
            },
        );
        Ok(updated)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_search_total_stops_at_candidate_cap() {
        assert_eq!(reachable_total(5000, false), 5000);
        assert_eq!(reachable_total(5000, true), MAX_SEARCH_CANDIDATES);
        assert_eq!(reachable_total(12, true), 12);

        let last_page = PageRequest::new(Some(100), Some(MAX_SEARCH_CANDIDATES - 100));
        let page: Page<()> = Page::new(Vec::new(), reachable_total(5000, true), last_page);
        assert!(!page.has_more);
    }

    #[test]
    fn tags_are_trimmed_deduplicated_and_sorted() {
        let tags = normalize_tags(&[
            " nda ".to_string(),
            "lease".to_string(),
            "".to_string(),
            "nda".to_string(),
        ]);
        assert_eq!(tags, vec!["lease".to_string(), "nda".to_string()]);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" 50%_off "), "%50\\%\\_off%");
    }
}
