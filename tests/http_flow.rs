mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{body_to_json, TestApp};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn health_is_public_and_deletions_require_a_token() -> Result<()> {
    let app = TestApp::new()?;

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let (document_id, _) = app.fixture.document(1)?;
    let response = app
        .get(&format!("/api/documents/{document_id}/deletion-preview"), None)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .delete(&format!("/api/documents/{document_id}"), Some("not-a-token"))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn blocked_document_reports_options_until_forced() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token()?;
    let (document_id, revisions) = app.fixture.document(2)?;
    let reference_id = app.fixture.reference(document_id, revisions[1], None, None)?;

    let response = app
        .get(
            &format!("/api/documents/{document_id}/deletion-preview"),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let preview = body_to_json(response.into_body()).await?;
    assert_eq!(preview["can_delete"], false);
    assert_eq!(preview["application_count"], 1);

    let response = app
        .delete(&format!("/api/documents/{document_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(
        body["details"]["options"],
        json!(["force_delete", "reassign", "cancel"])
    );
    assert_eq!(body["details"]["reasons"][0]["reason"], "referenced_document");

    let response = app
        .delete(
            &format!("/api/documents/{document_id}?force=true&dry_run=true"),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let dry_run = body_to_json(response.into_body()).await?;
    assert_eq!(dry_run["can_delete"], true);
    assert!(app.fixture.snapshot()?.documents.contains_key(&document_id));

    let response = app
        .delete(
            &format!("/api/documents/{document_id}?force=true"),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_to_json(response.into_body()).await?;
    let deleted = result["deleted"].as_array().cloned().unwrap_or_default();
    assert!(deleted.contains(&json!({ "kind": "reference", "id": reference_id })));
    assert!(deleted.contains(&json!({ "kind": "document", "id": document_id })));

    let snapshot = app.fixture.snapshot()?;
    assert!(!snapshot.documents.contains_key(&document_id));
    assert!(!snapshot.references.contains_key(&reference_id));
    Ok(())
}

#[tokio::test]
async fn other_owners_see_not_found() -> Result<()> {
    let app = TestApp::new()?;
    let (document_id, _) = app.fixture.document(1)?;
    let stranger = app.token_for(Uuid::new_v4())?;

    let response = app
        .get(
            &format!("/api/documents/{document_id}/deletion-preview"),
            Some(&stranger),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .delete(&format!("/api/documents/{document_id}"), Some(&stranger))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.fixture.snapshot()?.documents.contains_key(&document_id));
    Ok(())
}

#[tokio::test]
async fn unknown_collection_is_rejected() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token()?;

    let response = app
        .delete(&format!("/api/folders/{}", Uuid::new_v4()), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn bulk_endpoint_returns_a_report() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token()?;
    let (document_id, revisions) = app.fixture.document(1)?;
    let first = app.fixture.reference(document_id, revisions[0], None, None)?;
    let second = app.fixture.reference(document_id, revisions[0], None, None)?;

    let response = app
        .post_json(
            "/api/bulk/references/delete",
            &json!({ "ids": [] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/bulk/references/delete",
            &json!({ "ids": [first, second], "dry_run": true }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_to_json(response.into_body()).await?;
    assert_eq!(report["total"], 2);
    assert_eq!(report["deleted"], 2);
    assert_eq!(report["items"][0]["status"], "previewed");
    assert_eq!(app.fixture.snapshot()?.references.len(), 2);

    let response = app
        .post_json(
            "/api/bulk/references/delete",
            &json!({ "ids": [first, second, Uuid::new_v4()] }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_to_json(response.into_body()).await?;
    assert_eq!(report["deleted"], 2);
    assert_eq!(report["items"][2]["status"], "not_found");
    assert!(app.fixture.snapshot()?.references.is_empty());
    Ok(())
}

#[tokio::test]
async fn reassign_then_delete_source() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token()?;
    let (source_id, source_revisions) = app.fixture.document(1)?;
    let (target_id, target_revisions) = app.fixture.document(1)?;
    let reference_id = app
        .fixture
        .reference(source_id, source_revisions[0], None, None)?;

    let response = app
        .post_json(
            &format!("/api/revisions/{}/reassign", source_revisions[0]),
            &json!({ "target_document_id": target_id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/api/documents/{source_id}/reassign"),
            &json!({ "target_document_id": target_id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_to_json(response.into_body()).await?;
    assert_eq!(result["reassigned"], json!([reference_id]));
    assert_eq!(result["target_revision_id"], json!(target_revisions[0]));
    assert_eq!(result["source_remaining_references"], 0);

    let response = app
        .delete(&format!("/api/documents/{source_id}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = app.fixture.snapshot()?;
    assert!(!snapshot.documents.contains_key(&source_id));
    assert_eq!(snapshot.references[&reference_id].document_id, target_id);
    Ok(())
}
