use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::StripeConfig;
use crate::services::stripe::{
    invoice_adjustment_params, invoice_item_params, sign_payload, to_cents, verify_signature_at, SignatureError, StripeClient,
    StripeError, SIGNATURE_TOLERANCE_SECS,
};
use crate::tests::fixtures;

const SECRET: &str = "whsec_unit";
const NOW: i64 = 1_717_000_000;

fn payload() -> Vec<u8> {
    json!({ "id": "evt_1", "type": "invoice.paid", "data": { "object": { "id": "in_1" } } })
        .to_string()
        .into_bytes()
}

#[test]
fn valid_signature_is_accepted() {
    let body = payload();
    let header = sign_payload(&body, SECRET, NOW);
    assert_eq!(verify_signature_at(&body, &header, SECRET, NOW + 10), Ok(()));
}

#[test]
fn tampered_payload_is_rejected() {
    let body = payload();
    let header = sign_payload(&body, SECRET, NOW);
    let mut tampered = body.clone();
    tampered.extend_from_slice(b" ");
    assert_eq!(
        verify_signature_at(&tampered, &header, SECRET, NOW),
        Err(SignatureError::Mismatch)
    );
    assert_eq!(
        verify_signature_at(&body, &header, "whsec_other", NOW),
        Err(SignatureError::Mismatch)
    );
}

#[test]
fn stale_signature_is_rejected() {
    let body = payload();
    let header = sign_payload(&body, SECRET, NOW);
    assert_eq!(
        verify_signature_at(&body, &header, SECRET, NOW + SIGNATURE_TOLERANCE_SECS + 1),
        Err(SignatureError::Expired)
    );
}

#[test]
fn malformed_headers_are_rejected() {
    let body = payload();
    assert_eq!(
        verify_signature_at(&body, "v1=abcdef", SECRET, NOW),
        Err(SignatureError::MissingTimestamp)
    );
    assert_eq!(
        verify_signature_at(&body, &format!("t={}", NOW), SECRET, NOW),
        Err(SignatureError::MissingSignature)
    );
    assert_eq!(
        verify_signature_at(&body, &format!("t={},v1=not-hex", NOW), SECRET, NOW),
        Err(SignatureError::Mismatch)
    );
}

#[test]
fn any_matching_v1_signature_is_enough() {
    let body = payload();
    let good = sign_payload(&body, SECRET, NOW);
    let signature = good.split("v1=").nth(1).unwrap();
    let header = format!("t={},v1={},v1={}", NOW, "00".repeat(32), signature);
    assert_eq!(verify_signature_at(&body, &header, SECRET, NOW), Ok(()));
}

#[test]
fn amounts_convert_to_cents() {
    assert_eq!(to_cents(Decimal::new(12_345, 2)).unwrap(), 12_345);
    assert_eq!(to_cents(Decimal::new(1, 3)).unwrap(), 0);
}

#[test]
fn fractional_quantities_are_sent_as_a_single_amount() {
    let mut items = fixtures::items(uuid::Uuid::new_v4(), 1);
    let item = &mut items[0];
    item.quantity = Decimal::new(15, 1);
    item.unit_price = Decimal::new(4_000, 2);
    item.amount = Decimal::new(6_000, 2);

    let params = invoice_item_params("cus_1", "in_1", item).unwrap();
    assert!(params.contains(&("amount".to_string(), "6000".to_string())));
    assert!(!params.iter().any(|(k, _)| k == "quantity"));

    item.quantity = Decimal::from(3);
    let params = invoice_item_params("cus_1", "in_1", item).unwrap();
    assert!(params.contains(&("quantity".to_string(), "3".to_string())));
    assert!(params.contains(&("unit_amount".to_string(), "4000".to_string())));
}

fn client(base: &str, key: Option<&str>) -> StripeClient {
    StripeClient::new(&StripeConfig {
        secret_key: key.map(str::to_string),
        webhook_secret: None,
        api_base: base.to_string(),
    })
}

#[tokio::test]
async fn create_customer_returns_stripe_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("metadata%5BcustomerId%5D"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let customer = fixtures::customer(uuid::Uuid::new_v4());
    let id = client(&server.uri(), Some("sk_test_123"))
        .create_customer(&customer)
        .await
        .unwrap();
    assert_eq!(id, "cus_abc");
}

#[tokio::test]
async fn api_errors_carry_stripe_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/invoices/in_missing/finalize"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "error": { "message": "No such invoice" } })),
        )
        .mount(&server)
        .await;

    let err = client(&server.uri(), Some("sk_test_123"))
        .finalize_invoice("in_missing")
        .await
        .unwrap_err();
    match err {
        StripeError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "No such invoice");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unconfigured_client_refuses_requests() {
    let stripe = client("http://127.0.0.1:9", None);
    assert!(!stripe.is_configured());
    assert!(matches!(
        stripe.finalize_invoice("in_1").await,
        Err(StripeError::NotConfigured)
    ));
}

fn line_cents(params: &[(String, String)]) -> i64 {
    let value = |key: &str| {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.parse::<i64>().unwrap())
    };
    match value("amount") {
        Some(amount) => amount,
        None => value("quantity").unwrap() * value("unit_amount").unwrap(),
    }
}

#[test]
fn pushed_lines_add_up_to_invoice_total() {
    let mut invoice = fixtures::invoice(uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
    let items = fixtures::items(invoice.id, 3);
    invoice.subtotal = items.iter().map(|i| i.amount).sum();
    invoice.tax = Decimal::new(15_600, 2);
    invoice.discount = Decimal::new(1_650, 2);
    invoice.total = invoice.subtotal + invoice.tax - invoice.discount;

    let mut cents = 0;
    for item in &items {
        cents += line_cents(&invoice_item_params("cus_1", "in_1", item).unwrap());
    }
    let adjustments = invoice_adjustment_params("cus_1", "in_1", &invoice).unwrap();
    assert_eq!(adjustments.len(), 2);
    assert!(adjustments[0].contains(&("amount".to_string(), "15600".to_string())));
    assert!(adjustments[1].contains(&("amount".to_string(), "-1650".to_string())));
    for line in &adjustments {
        cents += line_cents(line);
    }

    assert_eq!(cents, to_cents(invoice.total).unwrap());
}

#[test]
fn zero_tax_and_discount_add_no_lines() {
    let mut invoice = fixtures::invoice(uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
    invoice.tax = Decimal::ZERO;
    invoice.discount = Decimal::ZERO;
    assert!(invoice_adjustment_params("cus_1", "in_1", &invoice).unwrap().is_empty());

    invoice.discount = Decimal::new(500, 2);
    let lines = invoice_adjustment_params("cus_1", "in_1", &invoice).unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&("description".to_string(), "Discount".to_string())));
}

#[tokio::test]
async fn adjustments_are_posted_as_invoice_items() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/invoiceitems"))
        .and(body_string_contains("description=Tax"))
        .and(body_string_contains("amount=3000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ii_tax" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/invoiceitems"))
        .and(body_string_contains("description=Discount"))
        .and(body_string_contains("amount=-1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ii_discount" })))
        .expect(1)
        .mount(&server)
        .await;

    let mut invoice = fixtures::invoice(uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
    invoice.discount = Decimal::new(1_000, 2);
    client(&server.uri(), Some("sk_test_123"))
        .add_invoice_adjustments("cus_1", "in_1", &invoice)
        .await
        .unwrap();
}

#[tokio::test]
async fn draft_invoices_can_be_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/invoices/in_draft"))
        .and(header("authorization", "Bearer sk_test_123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "in_draft", "deleted": true })))
        .expect(1)
        .mount(&server)
        .await;

    let id = client(&server.uri(), Some("sk_test_123"))
        .delete_draft_invoice("in_draft")
        .await
        .unwrap();
    assert_eq!(id, "in_draft");
}
