use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::engine::audit::{self, ActivityBucket, AuditFilter, OrganizationReport};
use crate::engine::{Page, PageRequest};
use crate::error::{AppError, AppResult};
use crate::models::AuditLog;
use crate::state::AppState;

const DEFAULT_ACTIVITY_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub organization_id: Uuid,
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    pub action: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_audit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<Page<AuditLog>>> {
    let filter = AuditFilter {
        resource_type: query.resource_type,
        resource_id: query.resource_id,
        action: query.action,
    };
    let mut conn = state.db()?;
    let page = audit::list_audit_events(
        &mut conn,
        &user.viewer(),
        query.organization_id,
        &filter,
        PageRequest::new(query.limit, query.offset),
    )?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub organization_id: Uuid,
    /// Inclusive first day.
    pub from: Option<NaiveDate>,
    /// Inclusive last day.
    pub to: Option<NaiveDate>,
}

fn activity_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), AppError> {
    let to = to.unwrap_or(today);
    let from = from.unwrap_or(to - Duration::days(DEFAULT_ACTIVITY_DAYS - 1));
    if from > to {
        return Err(AppError::bad_request("from must not be after to"));
    }
    Ok((from, to))
}

pub async fn activity(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<ActivityBucket>>> {
    let (from, to) = activity_window(query.from, query.to, Utc::now().date_naive())?;
    let start = from.and_time(NaiveTime::MIN);
    let end = (to + Duration::days(1)).and_time(NaiveTime::MIN);

    let mut conn = state.db()?;
    let buckets =
        audit::activity_by_date(&mut conn, &user.viewer(), query.organization_id, start, end)?;
    Ok(Json(buckets))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationReportQuery {
    pub organization_id: Uuid,
}

pub async fn organization(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<OrganizationReportQuery>,
) -> AppResult<Json<OrganizationReport>> {
    let mut conn = state.db()?;
    let report = audit::organization_report(&mut conn, &user.viewer(), query.organization_id)?;
    Ok(Json(report))
}
