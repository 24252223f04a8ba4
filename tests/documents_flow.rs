mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, id_of, TestApp};
use legalease::engine::versions::verify_all_chains;
use legalease::engine::OrganizationRole;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn create_patch_and_list_documents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let token = app.token(owner, &[(org, OrganizationRole::Member)], &[])?;

    let (status, created) = app
        .post(
            "/api/documents",
            &json!({
                "title": "Employment agreement",
                "description": "Offer for new associate",
                "original_content": "The employee shall observe a non-compete covenant.",
                "document_type": "employment",
                "category": "hr",
                "tags": ["offer", "associate"],
                "organization_id": org,
            }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["status"], "draft");
    assert_eq!(created["version_number"], 1);
    assert_eq!(created["is_latest_version"], true);
    assert_eq!(created["visibility"], "organization");
    assert!(created.get("search_index").is_none());
    let document_id = id_of(&created, "id")?;

    let (status, _) = app
        .post(
            "/api/documents",
            &json!({ "title": "  ", "original_content": "x" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, patched) = app
        .patch(
            &format!("/api/documents/{document_id}"),
            &json!({ "description": null, "priority": "high" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{patched}");
    assert!(patched["description"].is_null());
    assert_eq!(patched["category"], "hr");
    assert_eq!(patched["priority"], "high");

    let (status, _) = app
        .patch(
            &format!("/api/documents/{document_id}"),
            &json!({ "original_content": "rewritten" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .patch(
            &format!("/api/documents/{document_id}"),
            &json!({ "priority": null }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let colleague = app.token(Uuid::new_v4(), &[(org, OrganizationRole::Viewer)], &[])?;
    let (status, listed) = app
        .get(
            &format!("/api/documents?organization_id={org}&q=non-compete"),
            &colleague,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{listed}");
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["items"][0]["id"], json!(document_id));

    let (_, listed) = app
        .get("/api/documents?tags=offer,associate&document_type=employment", &token)
        .await?;
    assert_eq!(listed["total"], 1);
    let (_, listed) = app.get("/api/documents?tags=lease", &token).await?;
    assert_eq!(listed["total"], 0);

    // Viewers read but cannot edit.
    let (status, _) = app
        .patch(
            &format!("/api/documents/{document_id}"),
            &json!({ "category": "legal" }),
            &colleague,
        )
        .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let outsider = app.token(Uuid::new_v4(), &[], &[])?;
    let (status, _) = app
        .get(&format!("/api/documents/{document_id}"), &outsider)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            axum::http::Method::GET,
            &format!("/api/documents/{document_id}"),
            None,
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn versions_form_a_single_chain() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let owner = Uuid::new_v4();
    let token = app.token(owner, &[], &[])?;
    let (_, created) = app
        .post(
            "/api/documents",
            &json!({ "title": "Will", "original_content": "I leave everything to my cat." }),
            &token,
        )
        .await?;
    let first = id_of(&created, "id")?;

    let (status, outcome) = app
        .post(
            &format!("/api/documents/{first}/versions"),
            &json!({
                "original_content": "I leave everything to my dog.",
                "version_notes": "changed beneficiary"
            }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED, "{outcome}");
    assert_eq!(outcome["document"]["version_number"], 2);
    assert_eq!(outcome["document"]["parent_document_id"], json!(first));
    assert_eq!(outcome["document"]["root_document_id"], json!(first));
    assert_eq!(outcome["document"]["title"], "Will");
    let second = id_of(&outcome["document"], "id")?;

    // The superseded row is read-only.
    let (status, _) = app
        .post(
            &format!("/api/documents/{first}/versions"),
            &json!({ "original_content": "stale edit" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, old) = app.get(&format!("/api/documents/{first}"), &token).await?;
    assert_eq!(old["is_latest_version"], false);

    let (status, versions) = app
        .get(&format!("/api/documents/{second}/versions"), &token)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let numbers: Vec<i64> = versions
        .as_array()
        .map(|rows| rows.iter().filter_map(|row| row["version_number"].as_i64()).collect())
        .unwrap_or_default();
    assert_eq!(numbers, vec![2, 1]);

    let (_, listed) = app.get("/api/documents", &token).await?;
    assert_eq!(listed["total"], 1);
    let (_, listed) = app.get("/api/documents?all_versions=true", &token).await?;
    assert_eq!(listed["total"], 2);

    let mut conn = app.state.pool.get()?;
    assert!(verify_all_chains(&mut conn)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn editor_lock_blocks_other_writers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = Uuid::new_v4();
    let author = app.token(Uuid::new_v4(), &[(org, OrganizationRole::Member)], &[])?;
    let manager = app.token(Uuid::new_v4(), &[(org, OrganizationRole::Manager)], &[])?;
    let (_, created) = app
        .post(
            "/api/documents",
            &json!({
                "title": "Partnership deed",
                "original_content": "Profits are shared equally.",
                "organization_id": org,
            }),
            &author,
        )
        .await?;
    let document_id = id_of(&created, "id")?;
    let lock_path = format!("/api/documents/{document_id}/lock");

    let (status, locked) = app.post(&lock_path, &json!({}), &author).await?;
    assert_eq!(status, StatusCode::OK, "{locked}");
    assert!(locked["locked_by"].is_string());

    let (status, body) = app.post(&lock_path, &json!({}), &manager).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "locked");
    let (status, _) = app
        .post(
            &format!("/api/documents/{document_id}/versions"),
            &json!({ "original_content": "Profits follow capital." }),
            &manager,
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = app.delete(&lock_path, &manager).await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, unlocked) = app.delete(&lock_path, &author).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(unlocked["locked_by"].is_null());

    let (status, _) = app
        .post(
            &format!("/api/documents/{document_id}/versions"),
            &json!({ "original_content": "Profits follow capital." }),
            &manager,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    Ok(())
}

#[tokio::test]
async fn status_share_and_delete() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let owner = Uuid::new_v4();
    let token = app.token(owner, &[], &[])?;
    let reader = Uuid::new_v4();
    let reader_token = app.token(reader, &[], &[])?;
    let (_, created) = app
        .post(
            "/api/documents",
            &json!({ "title": "Policy", "original_content": "Remote work is allowed." }),
            &token,
        )
        .await?;
    let document_id = id_of(&created, "id")?;

    let (status, updated) = app
        .post(
            &format!("/api/documents/{document_id}/status"),
            &json!({ "status": "in_review" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "in_review");
    let (status, _) = app
        .post(
            &format!("/api/documents/{document_id}/status"),
            &json!({ "status": "approved" }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .get(&format!("/api/documents/{document_id}"), &reader_token)
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, shared) = app
        .post(
            &format!("/api/documents/{document_id}/share"),
            &json!({ "user_ids": [reader] }),
            &token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shared["shared_with"], json!([reader]));
    let (status, _) = app
        .get(&format!("/api/documents/{document_id}"), &reader_token)
        .await?;
    assert_eq!(status, StatusCode::OK);
    let (_, notifications) = app.get("/api/notifications?unread=true", &reader_token).await?;
    assert_eq!(notifications["total"], 1);
    let notification_id = id_of(&notifications["items"][0], "id")?;
    let (status, read) = app
        .post(
            &format!("/api/notifications/{notification_id}/read"),
            &json!({}),
            &reader_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(read["is_read"], true);

    let (status, _) = app
        .delete(&format!("/api/documents/{document_id}"), &token)
        .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, listed) = app.get("/api/documents", &token).await?;
    assert_eq!(listed["total"], 0);
    let (_, listed) = app.get("/api/documents?include_deleted=true", &token).await?;
    assert_eq!(listed["total"], 1);
    Ok(())
}
