use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::engine::workflows::{self, StepInput, WorkflowDetail, WorkflowInput, WorkflowUpdate};
use crate::engine::DocumentType;
use crate::error::AppResult;
use crate::models::ApprovalWorkflow;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WorkflowListQuery {
    pub organization_id: Uuid,
    pub document_type: Option<DocumentType>,
    #[serde(default)]
    pub include_inactive: bool,
}

pub async fn list_workflows(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<WorkflowListQuery>,
) -> AppResult<Json<Vec<ApprovalWorkflow>>> {
    let mut conn = state.db()?;
    let workflows = workflows::list_workflows(
        &mut conn,
        &user.viewer(),
        query.organization_id,
        query.document_type,
        query.include_inactive,
    )?;
    Ok(Json(workflows))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub organization_id: Uuid,
    #[serde(flatten)]
    pub workflow: WorkflowInput,
}

pub async fn create_workflow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateWorkflowRequest>,
) -> AppResult<(StatusCode, Json<WorkflowDetail>)> {
    let mut conn = state.db()?;
    let detail = workflows::create_workflow(
        &mut conn,
        &user.viewer(),
        payload.organization_id,
        payload.workflow,
    )?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<WorkflowDetail>> {
    let mut conn = state.db()?;
    let detail = workflows::get_workflow(&mut conn, &user.viewer(), workflow_id)?;
    Ok(Json(detail))
}

pub async fn update_workflow(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<WorkflowUpdate>,
) -> AppResult<Json<WorkflowDetail>> {
    let mut conn = state.db()?;
    let detail = workflows::update_workflow(&mut conn, &user.viewer(), workflow_id, payload)?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct ReplaceStepsRequest {
    pub steps: Vec<StepInput>,
}

pub async fn replace_steps(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<ReplaceStepsRequest>,
) -> AppResult<Json<WorkflowDetail>> {
    let mut conn = state.db()?;
    let detail =
        workflows::replace_steps(&mut conn, &user.viewer(), workflow_id, payload.steps)?;
    Ok(Json(detail))
}

pub async fn set_default(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
) -> AppResult<Json<ApprovalWorkflow>> {
    let mut conn = state.db()?;
    let workflow = workflows::set_default(&mut conn, &user.viewer(), workflow_id)?;
    Ok(Json(workflow))
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub active: bool,
}

pub async fn set_active(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(workflow_id): Path<Uuid>,
    Json(payload): Json<ActiveRequest>,
) -> AppResult<Json<ApprovalWorkflow>> {
    let mut conn = state.db()?;
    let workflow =
        workflows::set_active(&mut conn, &user.viewer(), workflow_id, payload.active)?;
    Ok(Json(workflow))
}
