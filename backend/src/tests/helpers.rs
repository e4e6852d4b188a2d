use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::auth::jwt::Claims;
use crate::config::Config;
use crate::AppState;
use tally_shared::UserRole;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn test_config() -> Config {
    let mut config = Config::for_tests("postgres://localhost/tally_test");
    config.stripe.webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
    config
}

/// App state whose pool never connects; for routes that answer before any query.
pub fn lazy_state() -> Arc<AppState> {
    let pool = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/tally_test")
        .expect("lazy pool");
    state_with_pool(pool)
}

pub fn state_with_pool(pool: PgPool) -> Arc<AppState> {
    Arc::new(AppState::new(pool, test_config()).expect("test state"))
}

/// App state whose Stripe client talks to `api_base`, usually a wiremock server.
pub fn state_with_stripe(pool: PgPool, api_base: &str) -> Arc<AppState> {
    let mut config = test_config();
    config.stripe.secret_key = Some("sk_test_tally".to_string());
    config.stripe.api_base = api_base.to_string();
    Arc::new(AppState::new(pool, config).expect("test state"))
}

pub fn test_app(state: Arc<AppState>) -> Router {
    crate::app(state)
}

pub fn create_test_jwt(user_id: Uuid, tenant_id: Uuid, role: UserRole) -> String {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id,
        tenant_id,
        email: "user@tally.test".to_string(),
        role,
        iat: now.timestamp(),
        exp: (now + Duration::hours(1)).timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(test_config().jwt_secret.as_bytes()),
    )
    .expect("Failed to create test JWT")
}

pub fn json_request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn read_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Registers a fresh tenant and returns `(token, register response body)`.
pub async fn register_tenant(app: &Router) -> (String, Value) {
    let suffix = Uuid::new_v4().simple().to_string();
    let body = json!({
        "email": format!("owner-{}@tally.test", suffix),
        "password": "correct horse battery",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "companyName": format!("Company {}", suffix),
        "companyEmail": format!("billing-{}@tally.test", suffix),
    });
    let response = send(app, json_request(Method::POST, "/api/auth/register", None, Some(body))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = read_json(response).await;
    (json["token"].as_str().unwrap().to_string(), json)
}

pub async fn post_json(app: &Router, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let response = send(app, json_request(Method::POST, uri, Some(token), Some(body))).await;
    let status = response.status();
    (status, read_json(response).await)
}

/// The stored email is lower-cased to `ap@globex.test`.
pub async fn create_customer(app: &Router, token: &str) -> Value {
    let (status, customer) = post_json(
        app,
        "/api/customers",
        token,
        json!({ "name": "Globex Corporation", "email": "AP@Globex.test", "city": "Springfield" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    customer
}

pub async fn create_invoice(app: &Router, token: &str, customer_id: &Value) -> Value {
    let (status, invoice) = post_json(
        app,
        "/api/invoices",
        token,
        json!({
            "customerId": customer_id,
            "dueDate": "2030-01-31",
            "items": [
                { "description": "Consulting", "quantity": 10, "unitPrice": 150 },
                { "description": "Hosting", "quantity": 1.5, "unitPrice": 40 }
            ],
            "tax": 156,
            "discount": 16,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{invoice}");
    invoice
}
