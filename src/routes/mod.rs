use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod approvals;
pub mod documents;
pub mod health;
pub mod notifications;
pub mod organizations;
pub mod reports;
pub mod workflows;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        let headers: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(headers)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state.config.cors_origins());

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route(
            "/:id/versions",
            get(documents::list_versions).post(documents::create_version),
        )
        .route(
            "/:id/lock",
            post(documents::lock_document).delete(documents::unlock_document),
        )
        .route("/:id/status", post(documents::set_status))
        .route("/:id/share", post(documents::share_document))
        .route("/:id/archive", post(documents::archive_document))
        .route("/:id/recall", post(documents::recall_document))
        .route("/:id/recall-policy", post(documents::set_recall_policy))
        .route("/:id/convert", post(documents::request_conversion))
        .route("/:id/approvals", post(documents::start_approval));

    let workflows_routes = Router::new()
        .route(
            "/",
            get(workflows::list_workflows).post(workflows::create_workflow),
        )
        .route(
            "/:id",
            get(workflows::get_workflow).patch(workflows::update_workflow),
        )
        .route("/:id/steps", post(workflows::replace_steps))
        .route("/:id/default", post(workflows::set_default))
        .route("/:id/active", post(workflows::set_active));

    let approvals_routes = Router::new()
        .route("/", get(approvals::list_approvals))
        .route("/:id", get(approvals::get_approval))
        .route("/:id/cancel", post(approvals::cancel_approval));

    let signoffs_routes = Router::new()
        .route("/pending", get(approvals::pending_signoffs))
        .route("/:id/decision", post(approvals::submit_decision))
        .route("/:id/delegate", post(approvals::delegate_signoff));

    let teams_routes = Router::new()
        .route(
            "/",
            get(organizations::list_teams).post(organizations::create_team),
        )
        .route(
            "/:id/members",
            get(organizations::list_team_members).post(organizations::add_team_member),
        );

    let organizations_routes = Router::new().route(
        "/:id/members",
        get(organizations::list_organization_members)
            .put(organizations::upsert_organization_member),
    );

    let notifications_routes = Router::new()
        .route("/", get(notifications::list_notifications))
        .route("/:id/read", post(notifications::mark_read));

    let reports_routes = Router::new()
        .route("/activity", get(reports::activity))
        .route("/organization", get(reports::organization));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .route("/api/archive", get(documents::list_archived))
        .nest("/api/workflows", workflows_routes)
        .nest("/api/approvals", approvals_routes)
        .nest("/api/signoffs", signoffs_routes)
        .nest("/api/teams", teams_routes)
        .nest("/api/organizations", organizations_routes)
        .nest("/api/notifications", notifications_routes)
        .route("/api/audit", get(reports::list_audit))
        .nest("/api/reports", reports_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
