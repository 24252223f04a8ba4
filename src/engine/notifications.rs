use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use super::access::Viewer;
use super::{now, EngineError, EngineResult, NotificationKind, Page, PageRequest};
use crate::models::{NewNotification, Notification};
use crate::schema::notifications;

/// A notification request; delivery is handled outside this service.
#[derive(Debug)]
pub struct Notice {
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub document_id: Option<Uuid>,
    pub approval_id: Option<Uuid>,
}

pub fn notify(conn: &mut PgConnection, notice: Notice) -> EngineResult<()> {
    let row = NewNotification {
        id: Uuid::new_v4(),
        user_id: notice.user_id,
        kind: notice.kind.as_str().to_string(),
        title: notice.title,
        message: notice.message,
        related_document_id: notice.document_id,
        related_approval_id: notice.approval_id,
    };
    diesel::insert_into(notifications::table)
        .values(&row)
        .execute(conn)?;
    Ok(())
}

pub fn list_notifications(
    conn: &mut PgConnection,
    viewer: &Viewer,
    unread_only: bool,
    page: PageRequest,
) -> EngineResult<Page<Notification>> {
    let build = || {
        let mut query = notifications::table
            .filter(notifications::user_id.eq(viewer.user_id))
            .into_boxed();
        if unread_only {
            query = query.filter(notifications::is_read.eq(false));
        }
        query
    };

    let total: i64 = build().select(count_star()).first(conn)?;
    let items = build()
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .limit(page.limit)
        .offset(page.offset)
        .load::<Notification>(conn)?;
    Ok(Page::new(items, total, page))
}

pub fn mark_notification_read(
    conn: &mut PgConnection,
    viewer: &Viewer,
    notification_id: Uuid,
) -> EngineResult<Notification> {
    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(viewer.user_id)),
    )
    .set((
        notifications::is_read.eq(true),
        notifications::read_at.eq(Some(now())),
    ))
    .get_result::<Notification>(conn)
    .optional()?;

    updated.ok_or(EngineError::NotFound)
}
