mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, id_of, TestApp};
use legalease::engine::OrganizationRole;
use serde_json::{json, Value};
use uuid::Uuid;

fn contract_workflow(org: Uuid, name: &str, approver: Uuid, is_default: bool) -> Value {
    json!({
        "organization_id": org,
        "name": name,
        "document_types": ["contract", "nda"],
        "is_default": is_default,
        "steps": [{
            "step_order": 1,
            "name": "Counsel review",
            "approver": { "kind": "user", "user_id": approver }
        }]
    })
}

#[tokio::test]
async fn workflow_definitions_are_validated() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = Uuid::new_v4();
    let admin = Uuid::new_v4();
    app.add_member(org, admin, OrganizationRole::Admin).await?;
    let admin_token = app.token(admin, &[(org, OrganizationRole::Admin)], &[])?;
    let member_token = app.token(Uuid::new_v4(), &[(org, OrganizationRole::Member)], &[])?;

    let (status, _) = app
        .post(
            "/api/workflows",
            &contract_workflow(org, "Standard", admin, false),
            &member_token,
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut gapped = contract_workflow(org, "Gapped", admin, false);
    gapped["steps"][0]["step_order"] = json!(2);
    let (status, body) = app.post("/api/workflows", &gapped, &admin_token).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["code"], "invalid_workflow");

    let mut untyped = contract_workflow(org, "Untyped", admin, false);
    untyped["document_types"] = json!([]);
    let (status, _) = app.post("/api/workflows", &untyped, &admin_token).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Approvers must resolve to organization members.
    let stranger = contract_workflow(org, "Stranger", Uuid::new_v4(), false);
    let (status, _) = app.post("/api/workflows", &stranger, &admin_token).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let mut settings = contract_workflow(org, "Bad settings", admin, false);
    settings["settings"] = json!({ "escalate_after_hours": 0 });
    let (status, _) = app.post("/api/workflows", &settings, &admin_token).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, created) = app
        .post(
            "/api/workflows",
            &contract_workflow(org, "Standard", admin, false),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["document_types"], json!(["contract", "nda"]));
    assert_eq!(created["steps"].as_array().map(Vec::len), Some(1));
    assert_eq!(created["steps"][0]["can_delegate"], true);
    let workflow_id = id_of(&created, "id")?;

    let (status, updated) = app
        .patch(
            &format!("/api/workflows/{workflow_id}"),
            &json!({ "name": "Standard review", "document_types": ["lease"] }),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["name"], "Standard review");
    assert_eq!(updated["document_types"], json!(["lease"]));

    let (status, replaced) = app
        .post(
            &format!("/api/workflows/{workflow_id}/steps"),
            &json!({ "steps": [
                {
                    "step_order": 2,
                    "name": "Partner sign-off",
                    "approver": { "kind": "role", "role": "admin" },
                    "timeout_hours": 24
                },
                {
                    "step_order": 1,
                    "name": "Counsel review",
                    "approver": { "kind": "user", "user_id": admin }
                }
            ]}),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{replaced}");
    assert_eq!(replaced["steps"][0]["step_order"], 1);
    assert_eq!(replaced["steps"][1]["approver_role"], "admin");

    let (status, fetched) = app
        .get(&format!("/api/workflows/{workflow_id}"), &member_token)
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["steps"].as_array().map(Vec::len), Some(2));
    Ok(())
}

#[tokio::test]
async fn one_default_per_document_type() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = Uuid::new_v4();
    let admin = Uuid::new_v4();
    app.add_member(org, admin, OrganizationRole::Admin).await?;
    let token = app.token(admin, &[(org, OrganizationRole::Admin)], &[])?;

    let (_, first) = app
        .post(
            "/api/workflows",
            &contract_workflow(org, "A first", admin, true),
            &token,
        )
        .await?;
    assert_eq!(first["is_default"], true);
    let first_id = id_of(&first, "id")?;
    let (_, second) = app
        .post(
            "/api/workflows",
            &contract_workflow(org, "B second", admin, false),
            &token,
        )
        .await?;
    let second_id = id_of(&second, "id")?;

    let (status, promoted) = app
        .post(&format!("/api/workflows/{second_id}/default"), &json!({}), &token)
        .await?;
    assert_eq!(status, StatusCode::OK, "{promoted}");
    assert_eq!(promoted["is_default"], true);
    let (_, first) = app.get(&format!("/api/workflows/{first_id}"), &token).await?;
    assert_eq!(first["is_default"], false);

    let (status, deactivated) = app
        .post(
            &format!("/api/workflows/{second_id}/active"),
            &json!({ "active": false }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deactivated["is_active"], false);
    assert_eq!(deactivated["is_default"], false);

    let (status, _) = app
        .post(&format!("/api/workflows/{second_id}/default"), &json!({}), &token)
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, listed) = app
        .get(&format!("/api/workflows?organization_id={org}"), &token)
        .await?;
    assert_eq!(status, StatusCode::OK, "{listed}");
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    let (_, listed) = app
        .get(
            &format!("/api/workflows?organization_id={org}&include_inactive=true"),
            &token,
        )
        .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(2));
    let (_, listed) = app
        .get(
            &format!("/api/workflows?organization_id={org}&document_type=lease"),
            &token,
        )
        .await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(0));
    Ok(())
}

#[tokio::test]
async fn teams_and_members_back_team_bindings() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = Uuid::new_v4();
    let admin = Uuid::new_v4();
    app.add_member(org, admin, OrganizationRole::Admin).await?;
    let token = app.token(admin, &[(org, OrganizationRole::Admin)], &[])?;
    let reviewer = Uuid::new_v4();

    let (status, team) = app
        .post(
            "/api/teams",
            &json!({ "organization_id": org, "name": "Litigation", "specialty": "disputes" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{team}");
    let team_id = id_of(&team, "id")?;

    let (status, _) = app
        .post(
            "/api/teams",
            &json!({ "organization_id": org, "name": "Litigation" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let team_binding = json!({
        "organization_id": org,
        "name": "Team review",
        "document_types": ["contract"],
        "steps": [{
            "step_order": 1,
            "name": "Litigation review",
            "approver": { "kind": "team", "team_id": team_id }
        }]
    });
    let (status, _) = app.post("/api/workflows", &team_binding, &token).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let members_path = format!("/api/teams/{team_id}/members");
    let (status, _) = app
        .post(&members_path, &json!({ "user_id": reviewer }), &token)
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, member) = app
        .request(
            axum::http::Method::PUT,
            &format!("/api/organizations/{org}/members"),
            Some(&json!({ "user_id": reviewer, "role": "member" })),
            Some(&token),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{member}");
    assert_eq!(member["role"], "member");

    let (status, member) = app
        .post(&members_path, &json!({ "user_id": reviewer, "role": "lead" }), &token)
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{member}");
    let (_, members) = app.get(&members_path, &token).await?;
    assert_eq!(members.as_array().map(Vec::len), Some(1));

    let (status, created) = app.post("/api/workflows", &team_binding, &token).await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["steps"][0]["approver_team_id"], json!(team_id));

    // Only owners may mint owners.
    let (status, _) = app
        .request(
            axum::http::Method::PUT,
            &format!("/api/organizations/{org}/members"),
            Some(&json!({ "user_id": reviewer, "role": "owner" })),
            Some(&token),
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, teams) = app.get(&format!("/api/teams?organization_id={org}"), &token).await?;
    assert_eq!(teams.as_array().map(Vec::len), Some(1));
    let (_, members) = app
        .get(&format!("/api/organizations/{org}/members"), &token)
        .await?;
    assert_eq!(members.as_array().map(Vec::len), Some(2));
    Ok(())
}
