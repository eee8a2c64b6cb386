mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use common::{acquire_db_lock, json_body, TestApp};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Deserialize)]
struct Profile {
    username: String,
    role: String,
    plants: Vec<NamedRef>,
    departments: Vec<NamedRef>,
}

#[tokio::test]
async fn login_and_profile_roundtrip() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let plant = app.insert_plant("North").await?;
    let department = app.insert_department("Maintenance").await?;
    app.insert_user("alice", "s3cret", "user", &[plant], &[department])
        .await?;

    let response = app
        .post_json(
            "/login",
            &json!({ "username": "alice", "password": "s3cret" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));

    let body = json_body(response).await?;
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["plant_ids"], json!([plant]));
    assert_eq!(body["user"]["department_ids"], json!([department]));
    let token = body["access_token"].as_str().unwrap_or_default().to_string();

    let response = app.get("/api/user/profile", Some(&token)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let profile: Profile = serde_json::from_value(json_body(response).await?)?;
    assert_eq!(profile.username, "alice");
    assert_eq!(profile.role, "user");
    assert_eq!(profile.plants[0].name, "North");
    assert_eq!(profile.departments[0].name, "Maintenance");

    assert_eq!(app.audit_count("login").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn wrong_password_and_unknown_user_are_rejected_alike() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("root", "s3cret", "admin", &[], &[]).await?;

    let wrong = app
        .post_json(
            "/login",
            &json!({ "username": "root", "password": "nope" }),
            None,
        )
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let wrong_body = json_body(wrong).await?;

    let unknown = app
        .post_json(
            "/login",
            &json!({ "username": "ghost", "password": "nope" }),
            None,
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(unknown).await?, wrong_body);

    assert_eq!(app.audit_count("login").await?, 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn deactivated_accounts_cannot_log_in() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let plant = app.insert_plant("North").await?;
    let department = app.insert_department("Quality").await?;
    app.insert_user("root", "s3cret", "admin", &[], &[]).await?;
    let user_id = app
        .insert_user("bob", "hunter2", "user", &[plant], &[department])
        .await?;
    let admin = app.login_token("root", "s3cret").await?;

    let response = app
        .post_empty(&format!("/admin/users/{user_id}/deactivate"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/login",
            &json!({ "username": "bob", "password": "hunter2" }),
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_empty(&format!("/admin/users/{user_id}/activate"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    app.login_token("bob", "hunter2").await?;

    assert_eq!(app.audit_count("user_deactivate").await?, 1);
    assert_eq!(app.audit_count("user_activate").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn gates_distinguish_anonymous_and_non_admin_callers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let plant = app.insert_plant("North").await?;
    let department = app.insert_department("Quality").await?;
    app.insert_user("carol", "pw", "user", &[plant], &[department])
        .await?;
    let token = app.login_token("carol", "pw").await?;

    let anonymous = app.get("/documents", None).await?;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    assert!(json_body(anonymous).await?["error"].is_string());

    let forged = app.get("/documents", Some("not-a-token")).await?;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let forbidden = app.get("/admin/users", Some(&token)).await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let allowed = app.get("/documents", Some(&token)).await?;
    assert_eq!(allowed.status(), StatusCode::OK);

    let health = app.get("/api/health", None).await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(json_body(health).await?, json!({ "status": "ok" }));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn logout_expires_the_session_cookie() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/logout", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("session=;"));
    assert!(cookie.contains("Max-Age=0"));

    app.cleanup().await?;
    Ok(())
}
