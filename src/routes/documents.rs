use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::engine::archive::{self, ArchivePolicy, ArchiveRecord, ArchiveRequest, RecallPolicy};
use crate::engine::conversion::{self, ConversionTicket};
use crate::engine::documents::{self, DocumentFilter, DocumentInput, DocumentUpdate};
use crate::engine::routing::{self, ApprovalDetail, StartApproval};
use crate::engine::versions::{self, VersionInput, VersionOutcome};
use crate::engine::{ConversionDirection, DocumentStatus, DocumentType, Page, PageRequest};
use crate::error::{AppError, AppResult};
use crate::models::{Document, DocumentVersion};
use crate::state::AppState;
use crate::utils::json::patch_field;

#[derive(Debug, Default, Deserialize)]
pub struct DocumentListQuery {
    pub organization_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub document_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
    /// Comma separated; a document must carry all of them.
    pub tags: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default)]
    pub all_versions: bool,
    pub q: Option<String>,
    pub created_from: Option<NaiveDateTime>,
    pub created_to: Option<NaiveDateTime>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl DocumentListQuery {
    fn filter(&self) -> DocumentFilter {
        DocumentFilter {
            organization_id: self.organization_id,
            team_id: self.team_id,
            document_type: self.document_type,
            status: self.status,
            tags: self
                .tags
                .as_deref()
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|tag| !tag.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            archived: self.archived,
            include_deleted: self.include_deleted,
            all_versions: self.all_versions,
            query: self.q.clone(),
            created_from: self.created_from,
            created_to: self.created_to,
        }
    }
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DocumentListQuery>,
) -> AppResult<Json<Page<Document>>> {
    let mut conn = state.db()?;
    let page = documents::list_documents(
        &mut conn,
        &user.viewer(),
        &query.filter(),
        PageRequest::new(query.limit, query.offset),
    )?;
    Ok(Json(page))
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DocumentInput>,
) -> AppResult<(StatusCode, Json<Document>)> {
    let mut conn = state.db()?;
    let document = documents::create_document(&mut conn, &user.viewer(), payload)?;
    Ok((StatusCode::CREATED, Json(document)))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Document>> {
    let mut conn = state.db()?;
    let document = documents::get_document(&mut conn, &user.viewer(), document_id)?;
    Ok(Json(document))
}

fn parse_update(body: &Value) -> Result<DocumentUpdate, String> {
    if !body.is_object() {
        return Err("expected a JSON object".to_string());
    }
    Ok(DocumentUpdate {
        description: patch_field(body, "description")?.into_patch(),
        specialty: patch_field(body, "specialty")?.into_patch(),
        category: patch_field(body, "category")?.into_patch(),
        team_id: patch_field(body, "team_id")?.into_patch(),
        document_type: patch_field(body, "document_type")?.into_required("document_type")?,
        priority: patch_field(body, "priority")?.into_required("priority")?,
        tags: patch_field(body, "tags")?.into_required("tags")?,
        visibility: patch_field(body, "visibility")?.into_required("visibility")?,
    })
}

pub async fn update_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<Document>> {
    if body.get("original_content").is_some() || body.get("title").is_some() {
        return Err(AppError::bad_request(
            "title and content changes create a new version",
        ));
    }
    let update = parse_update(&body).map_err(AppError::bad_request)?;
    let mut conn = state.db()?;
    let document = documents::update_document(&mut conn, &user.viewer(), document_id, update)?;
    Ok(Json(document))
}

pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    documents::delete_document(&mut conn, &user.viewer(), document_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_versions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentVersion>>> {
    let mut conn = state.db()?;
    let versions = versions::list_versions(&mut conn, &user.viewer(), document_id)?;
    Ok(Json(versions))
}

pub async fn create_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<VersionInput>,
) -> AppResult<(StatusCode, Json<VersionOutcome>)> {
    let mut conn = state.db()?;
    let outcome = versions::create_version(&mut conn, &user.viewer(), document_id, &payload)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn lock_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Document>> {
    let mut conn = state.db()?;
    let document = documents::lock_document(&mut conn, &user.viewer(), document_id)?;
    Ok(Json(document))
}

pub async fn unlock_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Document>> {
    let mut conn = state.db()?;
    let document = documents::unlock_document(&mut conn, &user.viewer(), document_id)?;
    Ok(Json(document))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: DocumentStatus,
}

pub async fn set_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> AppResult<Json<Document>> {
    let mut conn = state.db()?;
    let document =
        documents::set_status(&mut conn, &user.viewer(), document_id, payload.status)?;
    Ok(Json(document))
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    pub user_ids: Vec<Uuid>,
}

pub async fn share_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<ShareRequest>,
) -> AppResult<Json<Document>> {
    if payload.user_ids.is_empty() {
        return Err(AppError::bad_request("user_ids must not be empty"));
    }
    let mut conn = state.db()?;
    let document =
        documents::share_document(&mut conn, &user.viewer(), document_id, &payload.user_ids)?;
    Ok(Json(document))
}

pub async fn archive_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    payload: Option<Json<ArchiveRequest>>,
) -> AppResult<Json<ArchiveRecord>> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let viewer = user.viewer();
    let mut conn = state.db()?;

    // Organization admins may archive documents whose recall is disabled.
    let organization_id = documents::get_document(&mut conn, &viewer, document_id)?.organization_id;
    let policy = ArchivePolicy {
        override_recall: organization_id
            .map(|org| viewer.is_admin_of(org))
            .unwrap_or(false),
        retention_days: state.config.archive_retention_days,
    };
    let record = archive::archive_document(&mut conn, &viewer, document_id, &request, policy)?;
    Ok(Json(record))
}

pub async fn recall_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<Document>> {
    let mut conn = state.db()?;
    let document = archive::recall_document(&mut conn, &user.viewer(), document_id)?;
    Ok(Json(document))
}

pub async fn set_recall_policy(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<RecallPolicy>,
) -> AppResult<Json<Document>> {
    let mut conn = state.db()?;
    let document =
        archive::set_recall_policy(&mut conn, &user.viewer(), document_id, &payload)?;
    Ok(Json(document))
}

#[derive(Debug, Deserialize)]
pub struct ArchiveListQuery {
    pub organization_id: Uuid,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_archived(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ArchiveListQuery>,
) -> AppResult<Json<Page<Document>>> {
    let mut conn = state.db()?;
    let page = archive::list_archived(
        &mut conn,
        &user.viewer(),
        query.organization_id,
        PageRequest::new(query.limit, query.offset),
    )?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub direction: ConversionDirection,
}

pub async fn request_conversion(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<ConvertRequest>,
) -> AppResult<(StatusCode, Json<ConversionTicket>)> {
    let mut conn = state.db()?;
    let ticket = conversion::request_conversion(
        &mut conn,
        &user.viewer(),
        document_id,
        payload.direction,
    )?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

pub async fn start_approval(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    payload: Option<Json<StartApproval>>,
) -> AppResult<(StatusCode, Json<ApprovalDetail>)> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let mut conn = state.db()?;
    let detail = routing::start_approval(&mut conn, &user.viewer(), document_id, &request)?;
    Ok((StatusCode::CREATED, Json(detail)))
}
