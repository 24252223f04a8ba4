use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::engine::organizations::{self, TeamInput};
use crate::engine::{OrganizationRole, TeamRole};
use crate::error::AppResult;
use crate::models::{OrganizationMember, Team, TeamMember};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TeamListQuery {
    pub organization_id: Uuid,
}

pub async fn list_teams(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<TeamListQuery>,
) -> AppResult<Json<Vec<Team>>> {
    let mut conn = state.db()?;
    let teams = organizations::list_teams(&mut conn, &user.viewer(), query.organization_id)?;
    Ok(Json(teams))
}

#[derive(Debug, Deserialize)]
pub struct CreateTeamRequest {
    pub organization_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub specialty: Option<String>,
}

pub async fn create_team(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTeamRequest>,
) -> AppResult<(StatusCode, Json<Team>)> {
    let mut conn = state.db()?;
    let team = organizations::create_team(
        &mut conn,
        &user.viewer(),
        payload.organization_id,
        TeamInput {
            name: payload.name,
            description: payload.description,
            specialty: payload.specialty,
        },
    )?;
    Ok((StatusCode::CREATED, Json(team)))
}

pub async fn list_team_members(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(team_id): Path<Uuid>,
) -> AppResult<Json<Vec<TeamMember>>> {
    let mut conn = state.db()?;
    let members = organizations::list_team_members(&mut conn, &user.viewer(), team_id)?;
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
pub struct TeamMemberRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<TeamRole>,
}

pub async fn add_team_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(team_id): Path<Uuid>,
    Json(payload): Json<TeamMemberRequest>,
) -> AppResult<(StatusCode, Json<TeamMember>)> {
    let mut conn = state.db()?;
    let member = organizations::add_team_member(
        &mut conn,
        &user.viewer(),
        team_id,
        payload.user_id,
        payload.role.unwrap_or(TeamRole::Member),
    )?;
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn list_organization_members(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(organization_id): Path<Uuid>,
) -> AppResult<Json<Vec<OrganizationMember>>> {
    let mut conn = state.db()?;
    let members =
        organizations::list_organization_members(&mut conn, &user.viewer(), organization_id)?;
    Ok(Json(members))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationMemberRequest {
    pub user_id: Uuid,
    pub role: OrganizationRole,
}

pub async fn upsert_organization_member(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<OrganizationMemberRequest>,
) -> AppResult<Json<OrganizationMember>> {
    let mut conn = state.db()?;
    let member = organizations::upsert_organization_member(
        &mut conn,
        &user.viewer(),
        organization_id,
        payload.user_id,
        payload.role,
    )?;
    Ok(Json(member))
}
