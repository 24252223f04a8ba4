use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::engine::notifications;
use crate::engine::{Page, PageRequest};
use crate::error::AppResult;
use crate::models::Notification;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Json<Page<Notification>>> {
    let mut conn = state.db()?;
    let page = notifications::list_notifications(
        &mut conn,
        &user.viewer(),
        query.unread,
        PageRequest::new(query.limit, query.offset),
    )?;
    Ok(Json(page))
}

pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<Notification>> {
    let mut conn = state.db()?;
    let notification =
        notifications::mark_notification_read(&mut conn, &user.viewer(), notification_id)?;
    Ok(Json(notification))
}
