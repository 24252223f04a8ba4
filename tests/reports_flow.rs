mod common;

use std::collections::HashSet;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{acquire_db_lock, id_of, TestApp};
use legalease::engine::OrganizationRole;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn audit_trail_and_reports_are_admin_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = Uuid::new_v4();
    let admin = Uuid::new_v4();
    app.add_member(org, admin, OrganizationRole::Admin).await?;
    let admin_token = app.token(admin, &[(org, OrganizationRole::Admin)], &[])?;
    let member_token = app.token(Uuid::new_v4(), &[(org, OrganizationRole::Member)], &[])?;

    for (title, ty) in [("Supply contract", "contract"), ("Office lease", "lease")] {
        let (status, _) = app
            .post(
                "/api/documents",
                &json!({
                    "title": title,
                    "original_content": "Terms apply.",
                    "document_type": ty,
                    "organization_id": org,
                }),
                &member_token,
            )
            .await?;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (_, listed) = app
        .get(
            &format!("/api/documents?organization_id={org}&document_type=lease"),
            &member_token,
        )
        .await?;
    let lease_id = id_of(&listed["items"][0], "id")?;
    let (status, _) = app
        .post(
            &format!("/api/documents/{lease_id}/archive"),
            &json!({}),
            &member_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let audit_path = format!("/api/audit?organization_id={org}");
    let (status, _) = app.get(&audit_path, &member_token).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, events) = app
        .get(&format!("{audit_path}&action=document.created"), &admin_token)
        .await?;
    assert_eq!(status, StatusCode::OK, "{events}");
    assert_eq!(events["total"], 2);
    let (_, events) = app
        .get(&format!("{audit_path}&resource_id={lease_id}"), &admin_token)
        .await?;
    assert_eq!(events["items"][0]["action"], "document.archived");

    let today = Utc::now().date_naive();
    let (status, buckets) = app
        .get(
            &format!(
                "/api/reports/activity?organization_id={org}&from={}&to={}",
                today - Duration::days(1),
                today + Duration::days(1)
            ),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{buckets}");
    let created: i64 = buckets
        .as_array()
        .map(|rows| {
            rows.iter()
                .filter(|row| row["action"] == "document.created")
                .filter_map(|row| row["count"].as_i64())
                .sum()
        })
        .unwrap_or_default();
    assert_eq!(created, 2);
    let rows = buckets.as_array().cloned().unwrap_or_default();
    let keys: HashSet<(String, String)> = rows
        .iter()
        .map(|row| (row["date"].to_string(), row["action"].to_string()))
        .collect();
    assert_eq!(keys.len(), rows.len());

    let (status, _) = app
        .get(
            &format!(
                "/api/reports/activity?organization_id={org}&from={today}&to={}",
                today - Duration::days(2)
            ),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = app
        .get(
            &format!("/api/reports/organization?organization_id={org}"),
            &admin_token,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["total_documents"], 2);
    assert_eq!(report["by_type"], json!({ "contract": 1, "lease": 1 }));
    assert_eq!(report["by_status"], json!({ "draft": 2 }));
    assert_eq!(report["archived_documents"], 1);
    assert_eq!(report["pending_approvals"], 0);
    assert_eq!(report["member_count"], 1);
    Ok(())
}
