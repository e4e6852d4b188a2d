use axum::http::{Method, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::tests::helpers::*;
use tally_shared::UserRole;

async fn get(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let response = send(app, json_request(Method::GET, uri, Some(token), None)).await;
    let status = response.status();
    (status, read_json(response).await)
}

async fn delete(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let response = send(app, json_request(Method::DELETE, uri, Some(token), None)).await;
    let status = response.status();
    (status, read_json(response).await)
}

#[tokio::test]
async fn test_invoices_require_auth() {
    let app = test_app(lazy_state());
    let response = send(&app, json_request(Method::GET, "/api/invoices", None, None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_overdue_check_is_admin_only() {
    let app = test_app(lazy_state());
    let token = create_test_jwt(Uuid::new_v4(), Uuid::new_v4(), UserRole::User);
    let response = send(&app, json_request(Method::POST, "/api/invoices/check-overdue", Some(&token), None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invoice_rejects_empty_items() {
    let app = test_app(lazy_state());
    let token = create_test_jwt(Uuid::new_v4(), Uuid::new_v4(), UserRole::Admin);
    let (status, body) = post_json(
        &app,
        "/api/invoices",
        &token,
        json!({ "customerId": Uuid::new_v4(), "dueDate": "2030-01-31", "items": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_malformed_bodies_get_json_errors() {
    let app = test_app(lazy_state());
    let token = create_test_jwt(Uuid::new_v4(), Uuid::new_v4(), UserRole::Admin);

    let (status, body) = post_json(
        &app,
        "/api/payments",
        &token,
        json!({ "invoiceId": Uuid::new_v4(), "amount": 10, "paymentMethod": "BITCOIN" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(body["statusCode"], 400);

    let (status, body) = get(&app, "/api/invoices?status=LOST", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = get(&app, "/api/invoices/INV-2024-00001", &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_invoice_payment_lifecycle() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, _) = register_tenant(&app).await;

    let customer = create_customer(&app, &token).await;
    assert_eq!(customer["email"], "ap@globex.test");

    let invoice = create_invoice(&app, &token, &customer["id"]).await;
    let invoice_id = invoice["id"].as_str().unwrap().to_string();
    assert_eq!(invoice["status"], "DRAFT");
    assert_eq!(invoice["subtotal"], 1560.0);
    assert_eq!(invoice["total"], 1700.0);
    assert_eq!(invoice["items"].as_array().unwrap().len(), 2);
    assert_eq!(invoice["customer"]["id"], customer["id"]);
    let number = invoice["invoiceNumber"].as_str().unwrap();
    assert!(number.starts_with("INV-"), "{number}");

    let payment = |amount: f64| {
        json!({ "invoiceId": invoice_id, "amount": amount, "paymentMethod": "BANK_TRANSFER", "transactionId": format!("tx-{amount}") })
    };

    let (status, first) = post_json(&app, "/api/payments", &token, payment(700.0)).await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["invoice"]["status"], "DRAFT");

    let (status, _) = post_json(&app, "/api/payments", &token, payment(700.0)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, over) = post_json(&app, "/api/payments", &token, payment(1500.0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(over["error"], "Payment amount exceeds invoice total");

    let (status, _) = post_json(&app, "/api/payments", &token, payment(0.0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, last) = post_json(&app, "/api/payments", &token, payment(1000.0)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(last["invoice"]["status"], "PAID");

    let (status, detail) = get(&app, &format!("/api/invoices/{invoice_id}"), &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["amountPaid"], 1700.0);
    assert_eq!(detail["balanceDue"], 0.0);
    assert_eq!(detail["payments"].as_array().unwrap().len(), 2);

    let (status, _) = post_json(&app, &format!("/api/invoices/{invoice_id}/send"), &token, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = delete(&app, &format!("/api/invoices/{invoice_id}"), &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot delete invoice with existing payments");

    let customer_uri = format!("/api/customers/{}", customer["id"].as_str().unwrap());
    let (status, body) = delete(&app, &customer_uri, &token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot delete customer with existing invoices");

    let (status, stats) = get(&app, "/api/dashboard/stats", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalCustomers"], 1);
    assert_eq!(stats["paidInvoices"], 1);
    assert_eq!(stats["totalRevenue"], 1700.0);
}

#[tokio::test]
async fn test_invoice_numbers_increase_and_status_edits_are_checked() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, _) = register_tenant(&app).await;
    let customer = create_customer(&app, &token).await;

    let first = create_invoice(&app, &token, &customer["id"]).await;
    let second = create_invoice(&app, &token, &customer["id"]).await;
    let sequence = |invoice: &Value| -> u32 {
        invoice["invoiceNumber"].as_str().unwrap().rsplit('-').next().unwrap().parse().unwrap()
    };
    assert_eq!(sequence(&second), sequence(&first) + 1);

    let uri = format!("/api/invoices/{}", first["id"].as_str().unwrap());
    let cancel = json!({ "status": "CANCELLED" });
    let response = send(&app, json_request(Method::PUT, &uri, Some(&token), Some(cancel))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let reopen = json!({ "status": "SENT" });
    let response = send(&app, json_request(Method::PUT, &uri, Some(&token), Some(reopen))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, list) = get(&app, "/api/invoices?status=CANCELLED&limit=5", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["pagination"]["total"], 1);
    assert_eq!(list["pagination"]["limit"], 5);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (owner, registered) = register_tenant(&app).await;
    let (intruder, _) = register_tenant(&app).await;

    let customer = create_customer(&app, &owner).await;
    let invoice = create_invoice(&app, &owner, &customer["id"]).await;

    let uri = format!("/api/invoices/{}", invoice["id"].as_str().unwrap());
    let (status, _) = get(&app, &uri, &intruder).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, list) = get(&app, "/api/customers", &intruder).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 0);

    let tenant_uri = format!("/api/tenants/{}", registered["tenant"]["id"].as_str().unwrap());
    let (status, _) = get(&app, &tenant_uri, &intruder).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_discount_down_to_paid_amount_marks_paid() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, _) = register_tenant(&app).await;
    let customer = create_customer(&app, &token).await;
    let invoice = create_invoice(&app, &token, &customer["id"]).await;
    let invoice_id = invoice["id"].as_str().unwrap().to_string();
    let uri = format!("/api/invoices/{invoice_id}");

    let response = send(&app, json_request(Method::PUT, &uri, Some(&token), Some(json!({ "status": "SENT" })))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = post_json(
        &app,
        "/api/payments",
        &token,
        json!({ "invoiceId": invoice_id, "amount": 1600, "paymentMethod": "CASH" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // 1560 + 156 - 116 = 1600, exactly what has been paid
    let response = send(&app, json_request(Method::PUT, &uri, Some(&token), Some(json!({ "discount": 116 })))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await;
    assert_eq!(updated["total"], 1600.0);
    assert_eq!(updated["status"], "PAID");
    assert_eq!(updated["balanceDue"], 0.0);

    // Below the paid amount is refused
    let response = send(&app, json_request(Method::PUT, &uri, Some(&token), Some(json!({ "discount": 117 })))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancelled_invoice_refuses_payments() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, _) = register_tenant(&app).await;
    let customer = create_customer(&app, &token).await;
    let invoice = create_invoice(&app, &token, &customer["id"]).await;
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let uri = format!("/api/invoices/{invoice_id}");
    let response = send(&app, json_request(Method::PUT, &uri, Some(&token), Some(json!({ "status": "CANCELLED" })))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = post_json(
        &app,
        "/api/payments",
        &token,
        json!({ "invoiceId": invoice_id, "amount": 10, "paymentMethod": "CASH" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Cannot record payment for a cancelled invoice");
}

#[tokio::test]
async fn test_dashboard_aggregates() {
    let ctx = require_db!();
    let app = test_app(state_with_pool(ctx.db_pool));
    let (token, _) = register_tenant(&app).await;
    let customer = create_customer(&app, &token).await;
    create_customer(&app, &token).await;

    let paid = create_invoice(&app, &token, &customer["id"]).await;
    let open = create_invoice(&app, &token, &customer["id"]).await;
    let cancelled = create_invoice(&app, &token, &customer["id"]).await;

    let (status, _) = post_json(
        &app,
        "/api/payments",
        &token,
        json!({ "invoiceId": paid["id"], "amount": 1700, "paymentMethod": "CASH" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let open_uri = format!("/api/invoices/{}", open["id"].as_str().unwrap());
    send(&app, json_request(Method::PUT, &open_uri, Some(&token), Some(json!({ "status": "SENT" })))).await;
    let cancel_uri = format!("/api/invoices/{}", cancelled["id"].as_str().unwrap());
    send(&app, json_request(Method::PUT, &cancel_uri, Some(&token), Some(json!({ "status": "CANCELLED" })))).await;

    let (status, stats) = get(&app, "/api/dashboard/stats", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["totalCustomers"], 2);
    assert_eq!(stats["totalInvoices"], 3);
    assert_eq!(stats["paidInvoices"], 1);
    assert_eq!(stats["overdueInvoices"], 0);
    assert_eq!(stats["totalRevenue"], 1700.0);
    // cancelled invoices are not pending
    assert_eq!(stats["pendingRevenue"], 1700.0);
}

async fn mount_stripe_basics(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_globex" })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/invoices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "in_draft" })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_stripe_push_sends_tax_and_discount() {
    let ctx = require_db!();
    let server = MockServer::start().await;
    mount_stripe_basics(&server).await;
    for (fragment, id) in [
        ("unit_amount=15000", "ii_hours"),
        ("amount=6000", "ii_travel"),
        ("amount=15600", "ii_tax"),
        ("amount=-1600", "ii_discount"),
    ] {
        Mock::given(method("POST"))
            .and(path("/v1/invoiceitems"))
            .and(body_string_contains(fragment))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": id })))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/v1/invoices/in_draft/finalize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "in_draft" })))
        .expect(1)
        .mount(&server)
        .await;

    let app = test_app(state_with_stripe(ctx.db_pool, &server.uri()));
    let (token, _) = register_tenant(&app).await;
    let customer = create_customer(&app, &token).await;
    let invoice = create_invoice(&app, &token, &customer["id"]).await;

    let uri = format!("/api/invoices/{}/stripe", invoice["id"].as_str().unwrap());
    let (status, pushed) = post_json(&app, &uri, &token, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pushed["stripeInvoiceId"], "in_draft");
}

#[tokio::test]
async fn test_failed_stripe_push_discards_draft() {
    let ctx = require_db!();
    let server = MockServer::start().await;
    mount_stripe_basics(&server).await;
    Mock::given(method("POST"))
        .and(path("/v1/invoiceitems"))
        .respond_with(
            ResponseTemplate::new(402).set_body_json(json!({ "error": { "message": "Card declined" } })),
        )
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/invoices/in_draft"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "in_draft", "deleted": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/invoices/in_draft/finalize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "in_draft" })))
        .expect(0)
        .mount(&server)
        .await;

    let app = test_app(state_with_stripe(ctx.db_pool, &server.uri()));
    let (token, _) = register_tenant(&app).await;
    let customer = create_customer(&app, &token).await;
    let invoice = create_invoice(&app, &token, &customer["id"]).await;
    let invoice_uri = format!("/api/invoices/{}", invoice["id"].as_str().unwrap());

    let (status, body) = post_json(&app, &format!("{invoice_uri}/stripe"), &token, json!({})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "EXTERNAL_SERVICE_ERROR");

    let (_, detail) = get(&app, &invoice_uri, &token).await;
    assert!(detail["stripeInvoiceId"].is_null());
}
