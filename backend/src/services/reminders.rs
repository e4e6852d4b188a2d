use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::email::{reminder_email, Mailer};
use tally_shared::{Currency, Customer, Invoice, ReminderLog, ReminderType, Tenant};

/// An unpaid invoice together with what is needed to email its customer.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub invoice: Invoice,
    pub customer: Customer,
    pub company_name: String,
    pub currency: Currency,
    /// Reminder types already logged for this invoice.
    pub sent: Vec<ReminderType>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Invoices in `SENT` or `OVERDUE`.
    async fn unpaid_invoices(&self) -> Result<Vec<ReminderCandidate>, sqlx::Error>;

    /// Returns `false` when the reminder had already been logged.
    async fn record(&self, invoice_id: Uuid, kind: ReminderType) -> Result<bool, sqlx::Error>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReminderReport {
    pub checked: usize,
    pub sent: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Send at most one reminder per offset per invoice. The log entry is only
/// written after a successful send, so a failed send is retried on the next
/// run that falls on the same offset day.
pub async fn run_reminder_sweep(
    store: &dyn ReminderStore,
    mailer: &dyn Mailer,
    today: NaiveDate,
) -> Result<ReminderReport, sqlx::Error> {
    let candidates = store.unpaid_invoices().await?;
    let mut report = ReminderReport {
        checked: candidates.len(),
        ..Default::default()
    };
    info!("Reminder sweep: {} unpaid invoices to check", report.checked);

    for candidate in candidates {
        let invoice = &candidate.invoice;
        let offset = (today - invoice.due_date).num_days();
        let Some(kind) = ReminderType::for_offset(offset) else {
            continue;
        };

        if candidate.sent.contains(&kind) {
            info!("Skipping {} for {}: already sent", kind, invoice.invoice_number);
            report.skipped += 1;
            continue;
        }

        let email = reminder_email(
            &candidate.company_name,
            invoice,
            &candidate.customer,
            candidate.currency,
            kind,
        );
        if let Err(e) = mailer.send(email).await {
            error!("Failed to send {} reminder for {}: {}", kind, invoice.invoice_number, e);
            report.errors += 1;
            continue;
        }

        match store.record(invoice.id, kind).await {
            Ok(true) => {}
            Ok(false) => warn!("{} reminder for {} was logged by a concurrent sweep", kind, invoice.invoice_number),
            Err(e) => {
                error!("Sent {} reminder for {} but failed to log it: {}", kind, invoice.invoice_number, e);
                report.errors += 1;
                continue;
            }
        }
        report.sent += 1;
    }

    info!(
        "Reminder sweep complete: {} checked, {} sent, {} skipped, {} errors",
        report.checked, report.sent, report.skipped, report.errors
    );
    Ok(report)
}

pub struct PgReminderStore {
    pool: PgPool,
}

impl PgReminderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn unpaid_invoices(&self) -> Result<Vec<ReminderCandidate>, sqlx::Error> {
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE status IN ('SENT', 'OVERDUE') ORDER BY due_date",
        )
        .fetch_all(&self.pool)
        .await?;
        if invoices.is_empty() {
            return Ok(Vec::new());
        }

        let invoice_ids: Vec<Uuid> = invoices.iter().map(|i| i.id).collect();
        let customer_ids: Vec<Uuid> = invoices.iter().map(|i| i.customer_id).collect();
        let tenant_ids: Vec<Uuid> = invoices.iter().map(|i| i.tenant_id).collect();

        let customers: HashMap<Uuid, Customer> =
            sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ANY($1)")
                .bind(&customer_ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect();

        let tenants: HashMap<Uuid, Tenant> =
            sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = ANY($1)")
                .bind(&tenant_ids)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|t| (t.id, t))
                .collect();

        let mut sent: HashMap<Uuid, Vec<ReminderType>> = HashMap::new();
        let logs = sqlx::query_as::<_, ReminderLog>(
            "SELECT * FROM reminder_logs WHERE invoice_id = ANY($1)",
        )
        .bind(&invoice_ids)
        .fetch_all(&self.pool)
        .await?;
        for log in logs {
            match log.reminder_type.parse::<ReminderType>() {
                Ok(kind) => sent.entry(log.invoice_id).or_default().push(kind),
                Err(e) => warn!("Ignoring reminder log {}: {}", log.id, e),
            }
        }

        let candidates = invoices
            .into_iter()
            .filter_map(|invoice| {
                let customer = customers.get(&invoice.customer_id)?.clone();
                let tenant = tenants.get(&invoice.tenant_id)?;
                Some(ReminderCandidate {
                    sent: sent.remove(&invoice.id).unwrap_or_default(),
                    company_name: tenant.name.clone(),
                    currency: tenant.currency,
                    customer,
                    invoice,
                })
            })
            .collect();
        Ok(candidates)
    }

    async fn record(&self, invoice_id: Uuid, kind: ReminderType) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO reminder_logs (id, invoice_id, reminder_type, sent_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (invoice_id, reminder_type) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Reminder history for an invoice of the given tenant, newest first.
pub async fn reminder_history(
    pool: &PgPool,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<Vec<ReminderLog>, sqlx::Error> {
    sqlx::query_as::<_, ReminderLog>(
        "SELECT r.* FROM reminder_logs r
         JOIN invoices i ON i.id = r.invoice_id
         WHERE r.invoice_id = $1 AND i.tenant_id = $2
         ORDER BY r.sent_at DESC",
    )
    .bind(invoice_id)
    .bind(tenant_id)
    .fetch_all(pool)
    .await
}
