mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, id_of, TestApp};
use legalease::engine::OrganizationRole;
use serde_json::{json, Value};
use uuid::Uuid;

struct Setup {
    admin_token: String,
    approval_id: Uuid,
    signoff_id: Uuid,
    users: Vec<(Uuid, String)>,
}

/// One-step workflow bound to the first of three members, with an approval
/// already started.
async fn setup(app: &TestApp, can_delegate: bool) -> Result<Setup> {
    let organization_id = Uuid::new_v4();
    let admin = Uuid::new_v4();
    app.add_member(organization_id, admin, OrganizationRole::Owner)
        .await?;
    let admin_token = app.token(admin, &[(organization_id, OrganizationRole::Owner)], &[])?;

    let mut users = Vec::new();
    for _ in 0..3 {
        let user = Uuid::new_v4();
        app.add_member(organization_id, user, OrganizationRole::Member)
            .await?;
        let token = app.token(user, &[(organization_id, OrganizationRole::Member)], &[])?;
        users.push((user, token));
    }

    let (status, body) = app
        .post(
            "/api/workflows",
            &json!({
                "organization_id": organization_id,
                "name": "Single reviewer",
                "document_types": ["contract"],
                "is_default": true,
                "steps": [{
                    "step_order": 1,
                    "name": "Review",
                    "approver": { "kind": "user", "user_id": users[0].0 },
                    "can_delegate": can_delegate
                }]
            }),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (_, document) = app
        .post(
            "/api/documents",
            &json!({
                "title": "Lease",
                "original_content": "Tenant shall pay rent monthly.",
                "document_type": "contract",
                "organization_id": organization_id,
            }),
            &admin_token,
        )
        .await?;
    let document_id = id_of(&document, "id")?;

    let (status, detail) = app
        .post(
            &format!("/api/documents/{document_id}/approvals"),
            &json!({}),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{detail}");
    let approval_id = id_of(&detail, "id")?;
    let signoff_id = id_of(&detail["signoffs"][0], "id")?;

    Ok(Setup {
        admin_token,
        approval_id,
        signoff_id,
        users,
    })
}

async fn delegate(
    app: &TestApp,
    signoff_id: Uuid,
    to: Uuid,
    token: &str,
) -> Result<(StatusCode, Value)> {
    app.post(
        &format!("/api/signoffs/{signoff_id}/delegate"),
        &json!({ "to_user_id": to, "reason": "out of office" }),
        token,
    )
    .await
}

#[tokio::test]
async fn delegated_signoff_can_be_completed_by_delegate() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let setup = setup(&app, true).await?;
    let (first, first_token) = &setup.users[0];
    let (second, second_token) = &setup.users[1];

    let (status, outcome) = delegate(&app, setup.signoff_id, *second, first_token).await?;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["signoff"]["approver_id"], json!(second));
    assert_eq!(outcome["signoff"]["delegated_from"], json!(setup.signoff_id));
    assert_eq!(outcome["delegation"]["from_user_id"], json!(first));
    let new_signoff = id_of(&outcome["signoff"], "id")?;

    // The original is no longer actionable.
    let (status, _) = app
        .post(
            &format!("/api/signoffs/{}/decision", setup.signoff_id),
            &json!({ "decision": "approve" }),
            first_token,
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, outcome) = app
        .post(
            &format!("/api/signoffs/{new_signoff}/decision"),
            &json!({ "decision": "approve" }),
            second_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["approval"]["status"], "approved");

    let (_, detail) = app
        .get(
            &format!("/api/approvals/{}", setup.approval_id),
            &setup.admin_token,
        )
        .await?;
    let delegations = detail["delegations"].as_array().cloned().unwrap_or_default();
    assert_eq!(delegations.len(), 1);
    assert!(delegations[0]["accepted_at"].is_string());
    Ok(())
}

#[tokio::test]
async fn delegation_back_along_the_chain_is_a_cycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };
    let setup = setup(&app, true).await?;
    let (first, first_token) = &setup.users[0];
    let (second, second_token) = &setup.users[1];
    let (third, _) = &setup.users[2];

    let (status, _) = delegate(&app, setup.signoff_id, *first, first_token).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, outcome) = delegate(&app, setup.signoff_id, *second, first_token).await?;
    let hop = id_of(&outcome["signoff"], "id")?;

    let (status, body) = delegate(&app, hop, *first, second_token).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(body["code"], "delegation_cycle");

    let (status, outcome) = delegate(&app, hop, *third, second_token).await?;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    Ok(())
}

#[tokio::test]
async fn delegation_respects_step_and_membership_rules() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let locked_step = setup(&app, false).await?;
    let (_, first_token) = &locked_step.users[0];
    let (second, _) = &locked_step.users[1];
    let (status, _) = delegate(&app, locked_step.signoff_id, *second, first_token).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let open_step = setup(&app, true).await?;
    let (_, first_token) = &open_step.users[0];
    let outsider = Uuid::new_v4();
    let (status, _) = delegate(&app, open_step.signoff_id, outsider, first_token).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Only the assigned approver may hand the signoff on.
    let (_, bystander_token) = &open_step.users[1];
    let (third, _) = &open_step.users[2];
    let (status, _) = delegate(&app, open_step.signoff_id, *third, bystander_token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}
