use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use chrono::Utc;
use serde_json::json;

use crate::services::stripe::sign_payload;
use crate::tests::helpers::*;

fn webhook_request(payload: &[u8], signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(payload.to_vec())).unwrap()
}

fn event(kind: &str) -> Vec<u8> {
    json!({
        "id": "evt_test",
        "type": kind,
        "data": { "object": { "id": "in_test", "amount_paid": 1000 } }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn test_missing_signature_header() {
    let app = test_app(lazy_state());
    let response = send(&app, webhook_request(&event("invoice.paid"), None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "Missing stripe-signature header");
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let app = test_app(lazy_state());
    let payload = event("invoice.paid");
    let forged = sign_payload(&payload, "whsec_someone_else", Utc::now().timestamp());
    let response = send(&app, webhook_request(&payload, Some(forged))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unhandled_event_is_acknowledged() {
    let app = test_app(lazy_state());
    let payload = event("customer.created");
    let signature = sign_payload(&payload, TEST_WEBHOOK_SECRET, Utc::now().timestamp());
    let response = send(&app, webhook_request(&payload, Some(signature))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, json!({ "received": true }));
}

#[tokio::test]
async fn test_webhook_health() {
    let app = test_app(lazy_state());
    let response = send(&app, json_request(Method::GET, "/api/webhooks/health", None, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["service"], "webhooks");
}

fn signed(payload: &[u8]) -> Request<Body> {
    let signature = sign_payload(payload, TEST_WEBHOOK_SECRET, Utc::now().timestamp());
    webhook_request(payload, Some(signature))
}

fn invoice_event(kind: &str, stripe_invoice_id: &str, amount_paid: i64, payment_intent: &str) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": kind,
        "data": { "object": {
            "id": stripe_invoice_id,
            "amount_paid": amount_paid,
            "payment_intent": payment_intent,
        } }
    })
    .to_string()
    .into_bytes()
}

/// Creates an invoice for a fresh tenant and links it to a Stripe invoice id.
async fn linked_invoice(app: &axum::Router, pool: &sqlx::PgPool) -> (String, String, String) {
    let (token, _) = register_tenant(app).await;
    let customer = create_customer(app, &token).await;
    let invoice = create_invoice(app, &token, &customer["id"]).await;
    let invoice_id: uuid::Uuid = invoice["id"].as_str().unwrap().parse().unwrap();
    let stripe_id = format!("in_{}", invoice_id.simple());

    sqlx::query("UPDATE invoices SET stripe_invoice_id = $2, status = 'SENT' WHERE id = $1")
        .bind(invoice_id)
        .bind(&stripe_id)
        .execute(pool)
        .await
        .unwrap();
    (token, invoice_id.to_string(), stripe_id)
}

#[tokio::test]
async fn test_invoice_paid_records_stripe_payment_once() {
    let ctx = require_db!();
    let pool = ctx.db_pool.clone();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, invoice_id, stripe_id) = linked_invoice(&app, &pool).await;

    let payload = invoice_event("invoice.paid", &stripe_id, 170_000, "pi_paid");
    let response = send(&app, signed(&payload)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Stripe redelivers the same payment
    let redelivered = invoice_event("invoice.paid", &stripe_id, 170_000, "pi_paid");
    let response = send(&app, signed(&redelivered)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["received"], true);

    let uri = format!("/api/invoices/{invoice_id}");
    let detail = read_json(send(&app, json_request(Method::GET, &uri, Some(&token), None)).await).await;
    assert_eq!(detail["status"], "PAID");
    let payments = detail["payments"].as_array().unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0]["paymentMethod"], "STRIPE");
    assert_eq!(payments[0]["transactionId"], "pi_paid");
    assert_eq!(payments[0]["amount"], 1700.0);
}

#[tokio::test]
async fn test_payment_failed_marks_overdue() {
    let ctx = require_db!();
    let pool = ctx.db_pool.clone();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, invoice_id, stripe_id) = linked_invoice(&app, &pool).await;

    let payload = invoice_event("invoice.payment_failed", &stripe_id, 0, "pi_failed");
    let response = send(&app, signed(&payload)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/api/invoices/{invoice_id}");
    let detail = read_json(send(&app, json_request(Method::GET, &uri, Some(&token), None)).await).await;
    assert_eq!(detail["status"], "OVERDUE");
}

#[tokio::test]
async fn test_event_for_unknown_stripe_invoice_is_acknowledged() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let payload = invoice_event("invoice.paid", "in_nobody", 1_000, "pi_nobody");
    let response = send(&app, signed(&payload)).await;
    assert_eq!(response.status(), StatusCode::OK);
}
