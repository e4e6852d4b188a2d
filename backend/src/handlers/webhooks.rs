use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ApiResult, AppError};
use crate::services::payments::CreatePayment;
use crate::services::stripe::{verify_signature, StripeEvent, StripeInvoiceObject};
use crate::services::PaymentService;
use crate::AppState;
use tally_shared::{Invoice, InvoiceStatus, PaymentMethod};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

pub fn webhook_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stripe", post(stripe_webhook))
        .route("/health", get(webhook_health))
}

async fn webhook_health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "webhooks" }))
}

/// Stripe retries anything that is not a 2xx, so only signature problems and
/// infrastructure failures are reported as errors. Events that cannot be
/// applied are logged and acknowledged.
async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request("Missing stripe-signature header"))?;

    let secret = state
        .config
        .stripe
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::bad_request("Stripe webhooks are not configured"))?;

    verify_signature(&body, signature, secret).map_err(|e| {
        warn!("Rejected Stripe webhook: {}", e);
        AppError::bad_request(format!("Webhook signature verification failed: {}", e))
    })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("Invalid webhook payload: {}", e)))?;
    info!("Received Stripe event {} ({})", event.event_type, event.id);

    match event.event_type.as_str() {
        "invoice.paid" => invoice_paid(&state, &event).await?,
        "invoice.payment_failed" => invoice_payment_failed(&state, &event).await?,
        "payment_intent.succeeded" => info!("Payment intent succeeded ({})", event.id),
        other => info!("Ignoring unhandled Stripe event type {}", other),
    }

    Ok(Json(json!({ "received": true })))
}

fn invoice_object(event: &StripeEvent) -> Option<StripeInvoiceObject> {
    match serde_json::from_value(event.data.object.clone()) {
        Ok(object) => Some(object),
        Err(e) => {
            warn!("Stripe event {} has no usable invoice object: {}", event.id, e);
            None
        }
    }
}

async fn local_invoice(state: &AppState, stripe_invoice_id: &str) -> ApiResult<Option<Invoice>> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE stripe_invoice_id = $1")
        .bind(stripe_invoice_id)
        .fetch_optional(&state.db_pool)
        .await?;
    if invoice.is_none() {
        warn!("No invoice linked to Stripe invoice {}", stripe_invoice_id);
    }
    Ok(invoice)
}

async fn invoice_paid(state: &AppState, event: &StripeEvent) -> ApiResult<()> {
    let Some(object) = invoice_object(event) else {
        return Ok(());
    };
    let Some(invoice) = local_invoice(state, &object.id).await? else {
        return Ok(());
    };

    let payment = CreatePayment {
        invoice_id: invoice.id,
        amount: object.amount_paid_decimal(),
        payment_method: PaymentMethod::Stripe,
        payment_date: None,
        transaction_id: Some(object.transaction_id()),
        notes: Some(format!("Stripe invoice {}", object.id)),
    };

    let service = PaymentService::new(state.db_pool.clone(), state.events.clone());
    match service.record(invoice.tenant_id, payment).await {
        Ok(recorded) => {
            info!(
                "Recorded Stripe payment of {} for invoice {}",
                recorded.payment.amount, recorded.invoice.invoice_number
            );
            Ok(())
        }
        Err(e @ (AppError::Conflict(_) | AppError::BadRequest(_) | AppError::ValidationError { .. })) => {
            warn!("Stripe payment for invoice {} not applied: {}", invoice.invoice_number, e.message());
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn invoice_payment_failed(state: &AppState, event: &StripeEvent) -> ApiResult<()> {
    let Some(object) = invoice_object(event) else {
        return Ok(());
    };
    let Some(invoice) = local_invoice(state, &object.id).await? else {
        return Ok(());
    };

    if invoice.status == InvoiceStatus::Overdue || !invoice.status.can_transition_to(InvoiceStatus::Overdue) {
        info!(
            "Payment failed for invoice {}; leaving status {}",
            invoice.invoice_number, invoice.status
        );
        return Ok(());
    }

    sqlx::query("UPDATE invoices SET status = 'OVERDUE', updated_at = NOW() WHERE id = $1")
        .bind(invoice.id)
        .execute(&state.db_pool)
        .await?;
    warn!("Payment failed for invoice {}; marked overdue", invoice.invoice_number);
    Ok(())
}
