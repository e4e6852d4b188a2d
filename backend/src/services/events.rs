use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::billing::days_overdue;
use crate::config::EventWebhooks;
use tally_shared::{Customer, Invoice, Payment};

#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub event: &'static str,
    pub timestamp: String,
    pub data: Value,
}

/// Posts automation events to the configured hook URLs.
/// Delivery failures are logged and never surface to the caller.
#[derive(Clone)]
pub struct EventDispatcher {
    http: Client,
    hooks: EventWebhooks,
}

impl EventDispatcher {
    pub fn new(hooks: EventWebhooks) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, hooks }
    }

    async fn dispatch(&self, url: &str, event: &'static str, data: Value) {
        if url.is_empty() {
            debug!("No webhook configured for {}, skipping", event);
            return;
        }

        let envelope = EventEnvelope {
            event,
            timestamp: Utc::now().to_rfc3339(),
            data,
        };

        match self.http.post(url).json(&envelope).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Delivered {} webhook", event);
            }
            Ok(response) => warn!("{} webhook returned {}", event, response.status()),
            Err(e) => error!("Failed to deliver {} webhook: {}", event, e),
        }
    }

    pub async fn invoice_created(&self, invoice: &Invoice, customer: &Customer) {
        let data = json!({
            "invoiceId": invoice.id,
            "invoiceNumber": invoice.invoice_number,
            "customerId": invoice.customer_id,
            "customerName": customer.name,
            "customerEmail": customer.email,
            "total": invoice.total,
            "dueDate": invoice.due_date,
            "status": invoice.status,
        });
        self.dispatch(&self.hooks.invoice_created, "invoice.created", data).await;
    }

    pub async fn invoice_overdue(&self, invoice: &Invoice, customer: &Customer, today: NaiveDate) {
        let data = json!({
            "invoiceId": invoice.id,
            "invoiceNumber": invoice.invoice_number,
            "customerId": invoice.customer_id,
            "customerName": customer.name,
            "customerEmail": customer.email,
            "total": invoice.total,
            "dueDate": invoice.due_date,
            "daysOverdue": days_overdue(invoice.due_date, today),
        });
        self.dispatch(&self.hooks.invoice_overdue, "invoice.overdue", data).await;
    }

    pub async fn payment_received(&self, payment: &Payment, invoice: &Invoice, customer: &Customer) {
        let data = json!({
            "paymentId": payment.id,
            "invoiceId": payment.invoice_id,
            "invoiceNumber": invoice.invoice_number,
            "customerId": invoice.customer_id,
            "customerName": customer.name,
            "customerEmail": customer.email,
            "amount": payment.amount,
            "paymentMethod": payment.payment_method,
            "paymentDate": payment.payment_date,
        });
        self.dispatch(&self.hooks.payment_received, "payment.received", data).await;
    }
}
