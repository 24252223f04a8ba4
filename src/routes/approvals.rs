use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::engine::delegation::{self, DelegationOutcome, DelegationRequest};
use crate::engine::routing::{
    self, ApprovalDetail, ApprovalFilter, PendingSignoff, SignoffDecision, SignoffOutcome,
};
use crate::engine::{ApprovalStatus, Page, PageRequest};
use crate::error::AppResult;
use crate::models::DocumentApproval;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApprovalListQuery {
    pub organization_id: Uuid,
    pub document_id: Option<Uuid>,
    pub status: Option<ApprovalStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_approvals(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ApprovalListQuery>,
) -> AppResult<Json<Page<DocumentApproval>>> {
    let filter = ApprovalFilter {
        organization_id: query.organization_id,
        document_id: query.document_id,
        status: query.status,
    };
    let mut conn = state.db()?;
    let page = routing::list_approvals(
        &mut conn,
        &user.viewer(),
        &filter,
        PageRequest::new(query.limit, query.offset),
    )?;
    Ok(Json(page))
}

pub async fn get_approval(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(approval_id): Path<Uuid>,
) -> AppResult<Json<ApprovalDetail>> {
    let mut conn = state.db()?;
    let detail = routing::get_approval(&mut conn, &user.viewer(), approval_id)?;
    Ok(Json(detail))
}

pub async fn cancel_approval(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(approval_id): Path<Uuid>,
) -> AppResult<Json<DocumentApproval>> {
    let mut conn = state.db()?;
    let approval = routing::cancel_approval(&mut conn, &user.viewer(), approval_id)?;
    Ok(Json(approval))
}

pub async fn pending_signoffs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<PendingSignoff>>> {
    let mut conn = state.db()?;
    let pending = routing::pending_signoffs_for(&mut conn, &user.viewer())?;
    Ok(Json(pending))
}

pub async fn submit_decision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(signoff_id): Path<Uuid>,
    Json(payload): Json<SignoffDecision>,
) -> AppResult<Json<SignoffOutcome>> {
    let mut conn = state.db()?;
    let outcome = routing::submit_signoff(&mut conn, &user.viewer(), signoff_id, &payload)?;
    Ok(Json(outcome))
}

pub async fn delegate_signoff(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(signoff_id): Path<Uuid>,
    Json(payload): Json<DelegationRequest>,
) -> AppResult<Json<DelegationOutcome>> {
    let mut conn = state.db()?;
    let outcome = delegation::delegate(&mut conn, &user.viewer(), signoff_id, &payload)?;
    Ok(Json(outcome))
}
