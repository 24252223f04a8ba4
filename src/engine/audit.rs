use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Date, Text, Timestamp, Uuid as SqlUuid};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use super::access::Viewer;
use super::{ApprovalStatus, DocumentStatus, EngineResult, Page, PageRequest};
use crate::models::{AuditLog, NewAuditLog};
use crate::schema::{audit_logs, document_approvals, documents, organization_members, teams};

pub const RESOURCE_DOCUMENT: &str = "document";
pub const RESOURCE_WORKFLOW: &str = "workflow";
pub const RESOURCE_APPROVAL: &str = "approval";
pub const RESOURCE_SIGNOFF: &str = "signoff";
pub const RESOURCE_TEAM: &str = "team";
pub const RESOURCE_ORGANIZATION: &str = "organization";

#[derive(Debug)]
pub struct AuditEvent<'a> {
    pub organization_id: Option<Uuid>,
    pub actor: Option<Uuid>,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: Option<Uuid>,
    pub details: Value,
}

/// Appends an event. Runs in its own savepoint so a failed insert leaves
/// the caller's transaction usable; failures are logged and swallowed.
pub fn record_event(conn: &mut PgConnection, event: AuditEvent<'_>) {
    let row = NewAuditLog {
        id: Uuid::new_v4(),
        organization_id: event.organization_id,
        user_id: event.actor,
        action: event.action.to_string(),
        resource_type: event.resource_type.to_string(),
        resource_id: event.resource_id,
        details: event.details,
    };

    let result = conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(audit_logs::table)
            .values(&row)
            .execute(conn)
    });

    if let Err(err) = result {
        warn!(
            action = %row.action,
            resource_type = %row.resource_type,
            resource_id = ?row.resource_id,
            error = %err,
            "failed to record audit event"
        );
    }
}

#[derive(Debug, Default)]
pub struct AuditFilter {
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub action: Option<String>,
}

pub fn list_audit_events(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    filter: &AuditFilter,
    page: PageRequest,
) -> EngineResult<Page<AuditLog>> {
    viewer.require_admin(organization_id)?;

    let build = || {
        let mut query = audit_logs::table
            .filter(audit_logs::organization_id.eq(organization_id))
            .into_boxed();
        if let Some(resource_type) = filter.resource_type.clone() {
            query = query.filter(audit_logs::resource_type.eq(resource_type));
        }
        if let Some(resource_id) = filter.resource_id {
            query = query.filter(audit_logs::resource_id.eq(resource_id));
        }
        if let Some(action) = filter.action.clone() {
            query = query.filter(audit_logs::action.eq(action));
        }
        query
    };

    let total: i64 = build().select(count_star()).first(conn)?;
    let items = build()
        .order((audit_logs::created_at.desc(), audit_logs::id.desc()))
        .limit(page.limit)
        .offset(page.offset)
        .load::<AuditLog>(conn)?;

    Ok(Page::new(items, total, page))
}

#[derive(Debug, Serialize, PartialEq, Eq, QueryableByName)]
pub struct ActivityBucket {
    #[diesel(sql_type = Date)]
    pub date: NaiveDate,
    #[diesel(sql_type = Text)]
    pub action: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

const ACTIVITY_BY_DATE_SQL: &str = "\
    SELECT created_at::date AS date, action, COUNT(*) AS count \
    FROM audit_logs \
    WHERE organization_id = $1 AND created_at >= $2 AND created_at < $3 \
    GROUP BY 1, 2 \
    ORDER BY 1, 2";

/// Daily event counts per action within `[from, to)`.
pub fn activity_by_date(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> EngineResult<Vec<ActivityBucket>> {
    viewer.require_admin(organization_id)?;

    Ok(sql_query(ACTIVITY_BY_DATE_SQL)
        .bind::<SqlUuid, _>(organization_id)
        .bind::<Timestamp, _>(from)
        .bind::<Timestamp, _>(to)
        .load(conn)?)
}

#[derive(Debug, Serialize)]
pub struct TeamStats {
    pub team_id: Uuid,
    pub name: String,
    pub document_count: i64,
}

#[derive(Debug, Serialize)]
pub struct OrganizationReport {
    pub organization_id: Uuid,
    pub total_documents: i64,
    pub by_type: BTreeMap<String, i64>,
    pub by_status: BTreeMap<String, i64>,
    pub pending_approvals: i64,
    pub archived_documents: i64,
    pub member_count: i64,
    pub teams: Vec<TeamStats>,
}

/// Counts cover the latest version of each non-deleted document.
pub fn organization_report(
    conn: &mut PgConnection,
    viewer: &Viewer,
    organization_id: Uuid,
) -> EngineResult<OrganizationReport> {
    viewer.require_admin(organization_id)?;

    let live = || {
        documents::organization_id
            .eq(organization_id)
            .and(documents::is_latest_version.eq(true))
            .and(documents::status.ne(DocumentStatus::Deleted.as_str()))
    };

    let total_documents: i64 = documents::table
        .filter(live())
        .select(count_star())
        .first(conn)?;

    let by_type: BTreeMap<String, i64> = documents::table
        .filter(live())
        .group_by(documents::document_type)
        .select((documents::document_type, count_star()))
        .load::<(String, i64)>(conn)?
        .into_iter()
        .collect();

    let by_status: BTreeMap<String, i64> = documents::table
        .filter(live())
        .group_by(documents::status)
        .select((documents::status, count_star()))
        .load::<(String, i64)>(conn)?
        .into_iter()
        .collect();

    let archived_documents: i64 = documents::table
        .filter(live())
        .filter(documents::is_archived.eq(true))
        .select(count_star())
        .first(conn)?;

    let pending_approvals: i64 = document_approvals::table
        .inner_join(documents::table)
        .filter(documents::organization_id.eq(organization_id))
        .filter(document_approvals::status.eq_any(ApprovalStatus::active_strs()))
        .select(count_star())
        .first(conn)?;

    let member_count: i64 = organization_members::table
        .filter(organization_members::organization_id.eq(organization_id))
        .select(count_star())
        .first(conn)?;

    let team_rows: Vec<(Uuid, String)> = teams::table
        .filter(teams::organization_id.eq(organization_id))
        .order(teams::name.asc())
        .select((teams::id, teams::name))
        .load(conn)?;
    let team_counts: BTreeMap<Uuid, i64> = documents::table
        .filter(live())
        .filter(documents::team_id.is_not_null())
        .group_by(documents::team_id)
        .select((documents::team_id, count_star()))
        .load::<(Option<Uuid>, i64)>(conn)?
        .into_iter()
        .filter_map(|(team_id, count)| team_id.map(|id| (id, count)))
        .collect();

    let teams = team_rows
        .into_iter()
        .map(|(team_id, name)| TeamStats {
            team_id,
            name,
            document_count: team_counts.get(&team_id).copied().unwrap_or(0),
        })
        .collect();

    Ok(OrganizationReport {
        organization_id,
        total_documents,
        by_type,
        by_status,
        pending_approvals,
        archived_documents,
        member_count,
        teams,
    })
}
