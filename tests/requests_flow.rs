mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn requests_reach_the_admin_queue() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let plant = app.insert_plant("North").await?;
    let department = app.insert_department("Quality").await?;
    let document_type = app.insert_document_type("Drawing").await?;
    let admin_id = app.insert_user("root", "s3cret", "admin", &[], &[]).await?;
    app.insert_user("op", "pw", "user", &[plant], &[department])
        .await?;
    let document = app
        .insert_document("pump", admin_id, document_type, &[plant], &[department])
        .await?;
    let admin = app.login_token("root", "s3cret").await?;
    let token = app.login_token("op", "pw").await?;

    let response = app
        .post_json(
            "/request-document",
            &json!({ "document_description": "Wiring diagram", "requested_format": "pdf" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/request-document",
            &json!({
                "document_description": "Wiring diagram",
                "document_type_id": document_type,
                "requested_format": "pdf",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .post_json(
            &format!("/document/{document}/request_format"),
            &json!({ "requested_format": "dwg" }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            &format!("/document/{document}/request_format"),
            &json!({ "requested_format": "x".repeat(51) }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/admin/requests", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/admin/requests", Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let queue = json_body(response).await?;
    let requests = queue["requests"].as_array().cloned().unwrap_or_default();
    let notifications = queue["notifications"].as_array().cloned().unwrap_or_default();
    assert_eq!(requests.len(), 2);
    assert_eq!(notifications.len(), 2);

    let format_request = &requests[0];
    assert_eq!(format_request["document_title"], "pump");
    assert_eq!(format_request["status"], "pending");
    let new_request = &requests[1];
    assert_eq!(new_request["document_type"], "Drawing");
    assert_eq!(new_request["username"], "op");
    assert_eq!(
        notifications[1]["message"],
        "User op requested a new document: 'Wiring diagram' (Type: Drawing) in format 'pdf'."
    );
    assert_eq!(
        notifications[0]["message"],
        format!("User op requested format 'dwg' for document ID: {document}.")
    );

    let request_id = format_request["id"].as_i64().unwrap_or_default();
    let response = app
        .post_json(
            &format!("/admin/requests/{request_id}/update"),
            &json!({ "status": "pending" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            &format!("/admin/requests/{request_id}/update"),
            &json!({ "status": "fulfilled" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/admin/requests/999999/update",
            &json!({ "status": "rejected" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let other_id = new_request["id"].as_i64().unwrap_or_default();
    let response = app
        .post_empty(&format!("/admin/requests/{other_id}/delete"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let notification_id = notifications[0]["id"].as_i64().unwrap_or_default();
    let path = format!("/admin/notifications/{notification_id}/mark-read");
    let response = app.post_empty(&path, Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.post_empty(&path, Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.get("/admin/requests", Some(&admin)).await?;
    let queue = json_body(response).await?;
    assert_eq!(queue["requests"].as_array().map(Vec::len), Some(1));
    assert_eq!(queue["requests"][0]["status"], "fulfilled");
    assert_eq!(queue["notifications"].as_array().map(Vec::len), Some(1));

    assert_eq!(app.audit_count("new_document_request").await?, 1);
    assert_eq!(app.audit_count("document_format_request").await?, 1);
    assert_eq!(app.audit_count("document_request_update").await?, 1);
    assert_eq!(app.audit_count("document_request_delete").await?, 1);
    assert_eq!(app.audit_count("admin_notification_delete").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reference_data_admin_lifecycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let plant = app.insert_plant("North").await?;
    app.insert_user("root", "s3cret", "admin", &[], &[]).await?;
    let admin = app.login_token("root", "s3cret").await?;

    let response = app
        .post_json("/admin/departments/add", &json!({ "name": "Welding" }), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let welding = json_body(response).await?["id"].as_i64().unwrap_or_default() as i32;

    let response = app
        .post_json("/admin/departments/add", &json!({ "name": "Welding" }), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .post_json("/admin/departments/add", &json!({ "name": "  " }), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json("/admin/departments/add", &json!({ "name": "Assembly" }), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    app.insert_user("welder", "pw", "user", &[plant], &[welding])
        .await?;
    let token = app.login_token("welder", "pw").await?;

    let response = app.get("/api/departments", Some(&token)).await?;
    assert_eq!(
        json_body(response).await?,
        json!([
            { "id": welding + 1, "name": "Assembly" },
            { "id": welding, "name": "Welding" },
        ])
    );

    let response = app
        .post_empty(&format!("/admin/departments/{welding}/delete"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let assembly = welding + 1;
    let response = app
        .post_empty(&format!("/admin/departments/{assembly}/delete"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .post_empty(&format!("/admin/departments/{assembly}/delete"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_json(
            "/admin/document-types/add",
            &json!({ "name": "Checklist" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let response = app.get("/admin/document-types", Some(&admin)).await?;
    assert_eq!(json_body(response).await?[0]["name"], "Checklist");

    assert_eq!(app.audit_count("add_department").await?, 2);
    assert_eq!(app.audit_count("delete_department").await?, 1);
    assert_eq!(app.audit_count("add_document_type").await?, 1);

    app.cleanup().await?;
    Ok(())
}
