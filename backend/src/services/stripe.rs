//! Stripe REST client and webhook signature verification.
//!
//! Only the handful of endpoints needed to push an invoice to Stripe are
//! wrapped; requests are form-encoded as the Stripe API expects.

use chrono::{NaiveDate, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::config::StripeConfig;
use tally_shared::{Customer, Invoice, InvoiceItem};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook timestamp, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("Stripe is not configured")]
    NotConfigured,
    #[error("Stripe request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("signature timestamp is outside the tolerance window")]
    Expired,
    #[error("signature does not match payload")]
    Mismatch,
}

/// Verify a `Stripe-Signature` header (`t=...,v1=...`) against the raw body.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str) -> Result<(), SignatureError> {
    verify_signature_at(payload, header, secret, Utc::now().timestamp())
}

pub fn verify_signature_at(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok().map(|t| (t, value)),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let (timestamp, raw_timestamp) = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(SignatureError::MissingSignature);
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return Err(SignatureError::Mismatch);
        };
        mac.update(raw_timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        // verify_slice compares in constant time
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

/// Builds a valid header for `payload`; used by tests and local tooling.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ============================================
// Webhook payloads
// ============================================

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeInvoiceObject {
    pub id: String,
    #[serde(default)]
    pub amount_paid: i64,
    pub payment_intent: Option<String>,
}

impl StripeInvoiceObject {
    pub fn amount_paid_decimal(&self) -> Decimal {
        Decimal::new(self.amount_paid, 2)
    }

    /// Identifier used to recognise redelivered events.
    pub fn transaction_id(&self) -> String {
        self.payment_intent.clone().unwrap_or_else(|| self.id.clone())
    }
}

// ============================================
// REST client
// ============================================

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

pub fn to_cents(amount: Decimal) -> Result<i64, StripeError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or(StripeError::InvalidAmount(amount))
}

/// Form fields for one invoice item. Fractional quantities are sent as a
/// single pre-multiplied amount since Stripe only accepts whole quantities.
pub fn invoice_item_params(
    customer_id: &str,
    stripe_invoice_id: &str,
    item: &InvoiceItem,
) -> Result<Vec<(String, String)>, StripeError> {
    let mut params = vec![
        ("customer".to_string(), customer_id.to_string()),
        ("invoice".to_string(), stripe_invoice_id.to_string()),
        ("description".to_string(), item.description.clone()),
    ];
    match item.quantity.to_i64().filter(|_| item.quantity.fract().is_zero()) {
        Some(quantity) => {
            params.push(("quantity".to_string(), quantity.to_string()));
            params.push(("unit_amount".to_string(), to_cents(item.unit_price)?.to_string()));
        }
        None => {
            params.push(("amount".to_string(), to_cents(item.amount)?.to_string()));
        }
    }
    Ok(params)
}

/// Tax and discount lines that bring the Stripe total in line with
/// `invoice.total`. The discount is sent as a negative amount.
pub fn invoice_adjustment_params(
    customer_id: &str,
    stripe_invoice_id: &str,
    invoice: &Invoice,
) -> Result<Vec<Vec<(String, String)>>, StripeError> {
    let adjustments = [("Tax", invoice.tax), ("Discount", -invoice.discount)];
    let mut lines = Vec::new();
    for (description, amount) in adjustments {
        if amount.is_zero() {
            continue;
        }
        lines.push(vec![
            ("customer".to_string(), customer_id.to_string()),
            ("invoice".to_string(), stripe_invoice_id.to_string()),
            ("description".to_string(), description.to_string()),
            ("amount".to_string(), to_cents(amount)?.to_string()),
        ]);
    }
    Ok(lines)
}

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: Option<String>,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            http: Client::new(),
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret_key.is_some()
    }

    async fn post_form(&self, path: &str, params: &[(String, String)]) -> Result<String, StripeError> {
        let key = self.secret_key.as_deref().ok_or(StripeError::NotConfigured)?;
        let url = format!("{}{}", self.api_base, path);
        debug!("POST {}", url);

        let response = self.http.post(&url).bearer_auth(key).form(params).send().await?;
        Self::object_id(response).await
    }

    async fn delete(&self, path: &str) -> Result<String, StripeError> {
        let key = self.secret_key.as_deref().ok_or(StripeError::NotConfigured)?;
        let url = format!("{}{}", self.api_base, path);
        debug!("DELETE {}", url);

        let response = self.http.delete(&url).bearer_auth(key).send().await?;
        Self::object_id(response).await
    }

    async fn object_id(response: reqwest::Response) -> Result<String, StripeError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<StripeObject>().await?.id)
    }

    pub async fn create_customer(&self, customer: &Customer) -> Result<String, StripeError> {
        let mut params = vec![
            ("email".to_string(), customer.email.clone()),
            ("name".to_string(), customer.name.clone()),
        ];
        let optional = [
            ("phone", &customer.phone),
            ("address[line1]", &customer.address),
            ("address[city]", &customer.city),
            ("address[state]", &customer.state),
            ("address[postal_code]", &customer.zip_code),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                params.push((key.to_string(), v.clone()));
            }
        }
        params.push((
            "address[country]".to_string(),
            customer.country.clone().unwrap_or_else(|| "US".to_string()),
        ));
        params.push(("metadata[customerId]".to_string(), customer.id.to_string()));

        self.post_form("/v1/customers", &params).await
    }

    pub async fn create_invoice(
        &self,
        stripe_customer_id: &str,
        invoice: &Invoice,
        today: NaiveDate,
    ) -> Result<String, StripeError> {
        let days_until_due = (invoice.due_date - today).num_days().max(1);
        let params = vec![
            ("customer".to_string(), stripe_customer_id.to_string()),
            ("auto_advance".to_string(), "false".to_string()),
            ("collection_method".to_string(), "send_invoice".to_string()),
            ("days_until_due".to_string(), days_until_due.to_string()),
            ("metadata[invoiceId]".to_string(), invoice.id.to_string()),
            ("metadata[invoiceNumber]".to_string(), invoice.invoice_number.clone()),
        ];
        self.post_form("/v1/invoices", &params).await
    }

    pub async fn add_invoice_item(
        &self,
        stripe_customer_id: &str,
        stripe_invoice_id: &str,
        item: &InvoiceItem,
    ) -> Result<String, StripeError> {
        let params = invoice_item_params(stripe_customer_id, stripe_invoice_id, item)?;
        self.post_form("/v1/invoiceitems", &params).await
    }

    /// Add the tax and discount lines for `invoice`.
    pub async fn add_invoice_adjustments(
        &self,
        stripe_customer_id: &str,
        stripe_invoice_id: &str,
        invoice: &Invoice,
    ) -> Result<(), StripeError> {
        for params in invoice_adjustment_params(stripe_customer_id, stripe_invoice_id, invoice)? {
            self.post_form("/v1/invoiceitems", &params).await?;
        }
        Ok(())
    }

    /// Drafts can be deleted outright; finalized invoices cannot.
    pub async fn delete_draft_invoice(&self, stripe_invoice_id: &str) -> Result<String, StripeError> {
        self.delete(&format!("/v1/invoices/{}", stripe_invoice_id)).await
    }

    pub async fn finalize_invoice(&self, stripe_invoice_id: &str) -> Result<String, StripeError> {
        self.post_form(&format!("/v1/invoices/{}/finalize", stripe_invoice_id), &[])
            .await
    }
}
