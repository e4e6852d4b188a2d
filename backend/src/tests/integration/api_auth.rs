use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::auth::password::hash_reset_token;
use crate::tests::helpers::*;

#[tokio::test]
async fn test_me_requires_token() {
    let app = test_app(lazy_state());

    let response = send(&app, json_request(Method::GET, "/api/auth/me", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, json_request(Method::GET, "/api/auth/me", Some("not-a-jwt"), None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = read_json(response).await;
    assert_eq!(body["statusCode"], 401);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let app = test_app(lazy_state());
    let response = send(&app, json_request(Method::GET, "/api/nothing-here", None, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["error"], "Route not found");
}

#[tokio::test]
async fn test_register_rejects_invalid_input() {
    let app = test_app(lazy_state());
    let body = json!({
        "email": "not-an-email",
        "password": "short",
        "firstName": "Ada",
        "lastName": "L",
        "companyName": "Acme",
        "companyEmail": "billing@acme.test",
    });
    let response = send(&app, json_request(Method::POST, "/api/auth/register", None, Some(body))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    let details = body["details"].as_object().unwrap();
    assert!(details.contains_key("email"));
    assert!(details.contains_key("password"));
    assert!(details.contains_key("last_name"));
}

#[tokio::test]
async fn test_register_login_and_me() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));

    let (token, registered) = register_tenant(&app).await;
    assert_eq!(registered["message"], "Registration successful");
    assert_eq!(registered["user"]["role"], "ADMIN");
    assert!(registered["user"].get("passwordHash").is_none());
    let email = registered["user"]["email"].as_str().unwrap().to_string();

    let response = send(&app, json_request(Method::GET, "/api/auth/me", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let me = read_json(response).await;
    assert_eq!(me["user"]["email"], email.as_str());
    assert_eq!(me["user"]["tenant"]["id"], registered["tenant"]["id"]);

    let login = json!({ "email": email.to_uppercase(), "password": "correct horse battery" });
    let response = send(&app, json_request(Method::POST, "/api/auth/login", None, Some(login))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(read_json(response).await["token"].is_string());

    // Same email again
    let again = json!({
        "email": email,
        "password": "correct horse battery",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "companyName": "Other",
        "companyEmail": format!("other-{}@tally.test", Uuid::new_v4().simple()),
    });
    let response = send(&app, json_request(Method::POST, "/api/auth/register", None, Some(again))).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_with_wrong_password() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (_, registered) = register_tenant(&app).await;

    let login = json!({ "email": registered["user"]["email"], "password": "wrong password" });
    let response = send(&app, json_request(Method::POST, "/api/auth/login", None, Some(login))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["error"], "Invalid credentials");

    let unknown = json!({ "email": "nobody@tally.test", "password": "whatever" });
    let response = send(&app, json_request(Method::POST, "/api/auth/forgot-password", None, Some(unknown))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reset_token_is_single_use() {
    let ctx = require_db!();
    let pool = ctx.db_pool.clone();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (_, registered) = register_tenant(&app).await;
    let user_id: Uuid = registered["user"]["id"].as_str().unwrap().parse().unwrap();

    let insert = |token: &'static str, expires_in: Duration| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                "INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(hash_reset_token(token))
            .bind(Utc::now() + expires_in)
            .execute(&pool)
            .await
            .unwrap();
        }
    };
    insert("fresh-token", Duration::hours(1)).await;
    insert("stale-token", Duration::hours(-1)).await;

    let reset = |token: &str| json!({ "token": token, "password": "a brand new secret" });

    let response = send(&app, json_request(Method::POST, "/api/auth/reset-password", None, Some(reset("fresh-token")))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, json_request(Method::POST, "/api/auth/reset-password", None, Some(reset("fresh-token")))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "Invalid or expired reset token");

    let response = send(&app, json_request(Method::POST, "/api/auth/reset-password", None, Some(reset("stale-token")))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let login = json!({ "email": registered["user"]["email"], "password": "a brand new secret" });
    let response = send(&app, json_request(Method::POST, "/api/auth/login", None, Some(login))).await;
    assert_eq!(response.status(), StatusCode::OK);
}
