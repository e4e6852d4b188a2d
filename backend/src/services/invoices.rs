use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, warn};
use uuid::Uuid;
use validator::Validate;

use super::customers::CustomerService;
use super::email::{invoice_email, MailError, Mailer};
use super::events::EventDispatcher;
use super::pdf::{pdf_file_name, render_invoice, store_pdf, InvoiceDocument};
use super::stripe::{StripeClient, StripeError};
use crate::billing::{
    compute_totals, de_date, de_opt_date, ensure_total_covers_paid, ensure_transition, invoice_number,
    resolve_date_range, DateFilter, LineItemInput, Totals,
};
use crate::error::{ApiResult, AppError};
use crate::pagination::{search_pattern, PaginatedResponse, PaginationParams};
use tally_shared::{Customer, Invoice, InvoiceItem, InvoiceStatus, Payment, Tenant};

// ============================================
// Request types
// ============================================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoice {
    pub customer_id: Uuid,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub issue_date: Option<NaiveDate>,
    #[serde(deserialize_with = "de_date")]
    pub due_date: NaiveDate,
    #[validate(length(min = 1, message = "Invoice must have at least one item"), nested)]
    pub items: Vec<LineItemInput>,
    pub tax: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoice {
    pub customer_id: Option<Uuid>,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub issue_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub due_date: Option<NaiveDate>,
    pub status: Option<InvoiceStatus>,
    #[validate(length(min = 1, message = "Invoice must have at least one item"), nested)]
    pub items: Option<Vec<LineItemInput>>,
    pub tax: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub notes: Option<String>,
}

impl UpdateInvoice {
    fn changes_amounts(&self) -> bool {
        self.items.is_some() || self.tax.is_some() || self.discount.is_some()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    pub search: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub end_date: Option<NaiveDate>,
    pub date_filter: Option<DateFilter>,
}

// ============================================
// Response types
// ============================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceWithRelations {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub customer: Customer,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub customer: Customer,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub invoice: Invoice,
    pub email_sent: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OverdueReport {
    pub marked: usize,
}

pub struct RenderedPdf {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

// ============================================
// Helpers shared with the payment service
// ============================================

pub(crate) async fn items_for(pool: &PgPool, invoice_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<InvoiceItem>>, sqlx::Error> {
    let mut grouped: HashMap<Uuid, Vec<InvoiceItem>> = HashMap::new();
    if invoice_ids.is_empty() {
        return Ok(grouped);
    }
    let items = sqlx::query_as::<_, InvoiceItem>(
        "SELECT * FROM invoice_items WHERE invoice_id = ANY($1) ORDER BY position",
    )
    .bind(invoice_ids)
    .fetch_all(pool)
    .await?;
    for item in items {
        grouped.entry(item.invoice_id).or_default().push(item);
    }
    Ok(grouped)
}

pub(crate) async fn customers_by_id(pool: &PgPool, ids: &[Uuid]) -> Result<HashMap<Uuid, Customer>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let customers = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(pool)
        .await?;
    Ok(customers.into_iter().map(|c| (c.id, c)).collect())
}

pub(crate) async fn amount_paid(
    executor: impl sqlx::PgExecutor<'_>,
    invoice_id: Uuid,
) -> Result<Decimal, sqlx::Error> {
    sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1")
        .bind(invoice_id)
        .fetch_one(executor)
        .await
}

async fn next_invoice_number(tx: &mut Transaction<'_, Postgres>, tenant_id: Uuid, year: i32) -> Result<String, sqlx::Error> {
    let sequence: i32 = sqlx::query_scalar(
        "INSERT INTO invoice_sequences (tenant_id, year, last_value) VALUES ($1, $2, 1)
         ON CONFLICT (tenant_id, year)
         DO UPDATE SET last_value = invoice_sequences.last_value + 1
         RETURNING last_value",
    )
    .bind(tenant_id)
    .bind(year)
    .fetch_one(&mut **tx)
    .await?;
    Ok(invoice_number(year, sequence))
}

async fn insert_items(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    items: &[LineItemInput],
) -> Result<(), sqlx::Error> {
    for (position, item) in items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO invoice_items (id, invoice_id, description, quantity, unit_price, amount, position)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(Uuid::new_v4())
        .bind(invoice_id)
        .bind(item.description.trim())
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.amount())
        .bind(position as i32)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Items, then tax and discount, then finalize. The Stripe total ends up
/// equal to `invoice.total`.
async fn fill_stripe_invoice(
    stripe: &StripeClient,
    stripe_customer: &str,
    stripe_invoice: &str,
    full: &InvoiceWithRelations,
) -> Result<(), StripeError> {
    for item in &full.items {
        stripe.add_invoice_item(stripe_customer, stripe_invoice, item).await?;
    }
    stripe
        .add_invoice_adjustments(stripe_customer, stripe_invoice, &full.invoice)
        .await?;
    stripe.finalize_invoice(stripe_invoice).await?;
    Ok(())
}

/// An edit that lowers the total to exactly what has been paid settles the invoice.
fn settled_by_edit(status: InvoiceStatus, total: Decimal, paid: Decimal) -> bool {
    !status.is_terminal() && paid > Decimal::ZERO && paid == total
}

fn as_line_items(items: &[InvoiceItem]) -> Vec<LineItemInput> {
    items
        .iter()
        .map(|i| LineItemInput {
            description: i.description.clone(),
            quantity: i.quantity,
            unit_price: i.unit_price,
        })
        .collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &InvoiceQuery, today: NaiveDate) {
    qb.push(" WHERE i.tenant_id = ").push_bind(tenant_id);
    if let Some(status) = query.status {
        qb.push(" AND i.status = ").push_bind(status);
    }
    if let Some(customer_id) = query.customer_id {
        qb.push(" AND i.customer_id = ").push_bind(customer_id);
    }
    if let Some(pattern) = search_pattern(&query.search) {
        qb.push(" AND (i.invoice_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(min) = query.min_amount {
        qb.push(" AND i.total >= ").push_bind(min);
    }
    if let Some(max) = query.max_amount {
        qb.push(" AND i.total <= ").push_bind(max);
    }
    let (start, end) = resolve_date_range(query.date_filter, query.start_date, query.end_date, today);
    if let Some(start) = start {
        qb.push(" AND i.issue_date >= ").push_bind(start);
    }
    if let Some(end) = end {
        qb.push(" AND i.issue_date <= ").push_bind(end);
    }
}

// ============================================
// Service
// ============================================

pub struct InvoiceService {
    pool: PgPool,
    events: EventDispatcher,
}

impl InvoiceService {
    pub fn new(pool: PgPool, events: EventDispatcher) -> Self {
        Self { pool, events }
    }

    async fn find(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Invoice> {
        sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Invoice"))
    }

    async fn tenant_customer(&self, tenant_id: Uuid, customer_id: Uuid) -> ApiResult<Customer> {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1 AND tenant_id = $2")
            .bind(customer_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Customer"))
    }

    async fn tenant(&self, tenant_id: Uuid) -> ApiResult<Tenant> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Tenant"))
    }

    async fn with_relations(&self, invoice: Invoice) -> ApiResult<InvoiceWithRelations> {
        let customer = self.tenant_customer(invoice.tenant_id, invoice.customer_id).await?;
        let items = items_for(&self.pool, &[invoice.id])
            .await?
            .remove(&invoice.id)
            .unwrap_or_default();
        Ok(InvoiceWithRelations {
            invoice,
            customer,
            items,
        })
    }

    pub async fn create(&self, tenant_id: Uuid, input: CreateInvoice) -> ApiResult<InvoiceWithRelations> {
        input.validate()?;
        let customer = self.tenant_customer(tenant_id, input.customer_id).await?;
        let Totals {
            subtotal,
            tax,
            discount,
            total,
        } = compute_totals(
            &input.items,
            input.tax.unwrap_or(Decimal::ZERO),
            input.discount.unwrap_or(Decimal::ZERO),
        )?;
        let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());

        let mut tx = self.pool.begin().await?;
        let number = next_invoice_number(&mut tx, tenant_id, issue_date.year()).await?;
        let invoice = sqlx::query_as::<_, Invoice>(
            "INSERT INTO invoices
                (id, tenant_id, customer_id, invoice_number, status, issue_date, due_date,
                 subtotal, tax, discount, total, notes)
             VALUES ($1, $2, $3, $4, 'DRAFT', $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(customer.id)
        .bind(&number)
        .bind(issue_date)
        .bind(input.due_date)
        .bind(subtotal)
        .bind(tax)
        .bind(discount)
        .bind(total)
        .bind(input.notes)
        .fetch_one(&mut *tx)
        .await?;
        insert_items(&mut tx, invoice.id, &input.items).await?;
        tx.commit().await?;

        info!("Created invoice {} for tenant {}", number, tenant_id);

        let events = self.events.clone();
        let (event_invoice, event_customer) = (invoice.clone(), customer.clone());
        tokio::spawn(async move {
            events.invoice_created(&event_invoice, &event_customer).await;
        });

        self.with_relations(invoice).await
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        query: &InvoiceQuery,
        today: NaiveDate,
    ) -> ApiResult<PaginatedResponse<InvoiceWithRelations>> {
        let pagination = PaginationParams {
            page: query.page,
            limit: query.limit,
        };
        let page = pagination.page();
        let limit = pagination.limit();
        let from = " FROM invoices i JOIN customers c ON c.id = i.customer_id";

        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*){}", from));
        push_filters(&mut count, tenant_id, query, today);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT i.*{}", from));
        push_filters(&mut select, tenant_id, query, today);
        select
            .push(" ORDER BY i.created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset_for(limit));
        let invoices = select.build_query_as::<Invoice>().fetch_all(&self.pool).await?;

        let ids: Vec<Uuid> = invoices.iter().map(|i| i.id).collect();
        let customer_ids: Vec<Uuid> = invoices.iter().map(|i| i.customer_id).collect();
        let mut items = items_for(&self.pool, &ids).await?;
        let customers = customers_by_id(&self.pool, &customer_ids).await?;

        let data = invoices
            .into_iter()
            .filter_map(|invoice| {
                let customer = customers.get(&invoice.customer_id)?.clone();
                Some(InvoiceWithRelations {
                    items: items.remove(&invoice.id).unwrap_or_default(),
                    customer,
                    invoice,
                })
            })
            .collect();

        Ok(PaginatedResponse::new(data, page, limit, total))
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<InvoiceDetail> {
        let invoice = self.find(tenant_id, id).await?;
        let InvoiceWithRelations {
            invoice,
            customer,
            items,
        } = self.with_relations(invoice).await?;
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY payment_date DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let amount_paid: Decimal = payments.iter().map(|p| p.amount).sum();
        Ok(InvoiceDetail {
            balance_due: invoice.total - amount_paid,
            invoice,
            customer,
            items,
            payments,
            amount_paid,
        })
    }

    pub async fn update(&self, tenant_id: Uuid, id: Uuid, input: UpdateInvoice) -> ApiResult<InvoiceDetail> {
        input.validate()?;

        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Invoice"))?;

        if let Some(customer_id) = input.customer_id.filter(|c| *c != current.customer_id) {
            self.tenant_customer(tenant_id, customer_id).await?;
        }
        if let Some(next) = input.status {
            ensure_transition(current.status, next)?;
        }

        let mut status = input.status.unwrap_or(current.status);
        let mut totals = Totals {
            subtotal: current.subtotal,
            tax: current.tax,
            discount: current.discount,
            total: current.total,
        };
        if input.changes_amounts() {
            if current.status.is_terminal() {
                return Err(AppError::bad_request("Cannot modify a paid or cancelled invoice"));
            }
            let items = match &input.items {
                Some(items) => items.clone(),
                None => {
                    let existing = sqlx::query_as::<_, InvoiceItem>(
                        "SELECT * FROM invoice_items WHERE invoice_id = $1 ORDER BY position",
                    )
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await?;
                    as_line_items(&existing)
                }
            };
            totals = compute_totals(
                &items,
                input.tax.unwrap_or(current.tax),
                input.discount.unwrap_or(current.discount),
            )?;
            let paid = amount_paid(&mut *tx, id).await?;
            ensure_total_covers_paid(totals.total, paid)?;
            if settled_by_edit(status, totals.total, paid) {
                ensure_transition(status, InvoiceStatus::Paid)?;
                info!("Invoice {} is now covered by existing payments", current.invoice_number);
                status = InvoiceStatus::Paid;
            }

            if let Some(items) = &input.items {
                sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                insert_items(&mut tx, id, items).await?;
            }
        }

        sqlx::query(
            "UPDATE invoices SET
                customer_id = $2, issue_date = $3, due_date = $4, status = $5,
                subtotal = $6, tax = $7, discount = $8, total = $9, notes = $10,
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(input.customer_id.unwrap_or(current.customer_id))
        .bind(input.issue_date.unwrap_or(current.issue_date))
        .bind(input.due_date.unwrap_or(current.due_date))
        .bind(status)
        .bind(totals.subtotal)
        .bind(totals.tax)
        .bind(totals.discount)
        .bind(totals.total)
        .bind(input.notes.or(current.notes))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("Updated invoice {}", current.invoice_number);
        self.get(tenant_id, id).await
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<()> {
        let invoice = self.find(tenant_id, id).await?;
        let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE invoice_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if payments > 0 {
            return Err(AppError::bad_request("Cannot delete invoice with existing payments"));
        }
        sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!("Deleted invoice {}", invoice.invoice_number);
        Ok(())
    }

    async fn document_parts(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<(Tenant, InvoiceWithRelations)> {
        let invoice = self.find(tenant_id, id).await?;
        let tenant = self.tenant(tenant_id).await?;
        Ok((tenant, self.with_relations(invoice).await?))
    }

    /// Render the PDF, keep a copy on disk and remember where it went.
    pub async fn pdf(&self, tenant_id: Uuid, id: Uuid, storage: &Path) -> ApiResult<RenderedPdf> {
        let (tenant, full) = self.document_parts(tenant_id, id).await?;
        let bytes = render_invoice(&InvoiceDocument {
            tenant: &tenant,
            customer: &full.customer,
            invoice: &full.invoice,
            items: &full.items,
        })?;

        let path = store_pdf(storage, &full.invoice.invoice_number, &bytes).await?;
        sqlx::query("UPDATE invoices SET pdf_url = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(path.to_string_lossy().to_string())
            .execute(&self.pool)
            .await?;

        Ok(RenderedPdf {
            file_name: pdf_file_name(&full.invoice.invoice_number),
            bytes,
        })
    }

    /// Mark the invoice sent and email it with the PDF attached. The status
    /// change stands even when the email cannot be delivered.
    pub async fn send(&self, tenant_id: Uuid, id: Uuid, mailer: &dyn Mailer) -> ApiResult<SendOutcome> {
        let (tenant, full) = self.document_parts(tenant_id, id).await?;
        let InvoiceWithRelations {
            mut invoice,
            customer,
            items,
        } = full;

        match invoice.status {
            InvoiceStatus::Paid | InvoiceStatus::Cancelled => {
                return Err(AppError::bad_request(format!(
                    "Cannot send an invoice with status {}",
                    invoice.status
                )));
            }
            InvoiceStatus::Draft => {
                invoice = sqlx::query_as::<_, Invoice>(
                    "UPDATE invoices SET status = 'SENT', updated_at = NOW() WHERE id = $1 RETURNING *",
                )
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            }
            InvoiceStatus::Sent | InvoiceStatus::Overdue => {}
        }

        let pdf = render_invoice(&InvoiceDocument {
            tenant: &tenant,
            customer: &customer,
            invoice: &invoice,
            items: &items,
        })?;
        let email = invoice_email(&tenant.name, &invoice, &customer, tenant.currency, pdf);

        let email_sent = match mailer.send(email).await {
            Ok(()) => true,
            Err(MailError::NotConfigured) => {
                warn!("SMTP not configured; invoice {} marked sent without email", invoice.invoice_number);
                false
            }
            Err(e) => {
                error!("Failed to email invoice {}: {}", invoice.invoice_number, e);
                false
            }
        };

        Ok(SendOutcome { invoice, email_sent })
    }

    /// Create the invoice in Stripe, reusing the customer's Stripe record when present.
    pub async fn push_to_stripe(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        stripe: &StripeClient,
        today: NaiveDate,
    ) -> ApiResult<Invoice> {
        if !stripe.is_configured() {
            return Err(StripeError::NotConfigured.into());
        }
        let (_, full) = self.document_parts(tenant_id, id).await?;
        if full.invoice.stripe_invoice_id.is_some() {
            return Err(AppError::bad_request("Invoice has already been sent to Stripe"));
        }
        if full.invoice.status.is_terminal() {
            return Err(AppError::bad_request(format!(
                "Cannot send an invoice with status {} to Stripe",
                full.invoice.status
            )));
        }

        let stripe_customer = match &full.customer.stripe_customer_id {
            Some(existing) => existing.clone(),
            None => {
                let created = stripe.create_customer(&full.customer).await?;
                CustomerService::new(self.pool.clone())
                    .set_stripe_customer_id(full.customer.id, &created)
                    .await?;
                created
            }
        };

        let stripe_invoice = stripe.create_invoice(&stripe_customer, &full.invoice, today).await?;
        if let Err(e) = fill_stripe_invoice(stripe, &stripe_customer, &stripe_invoice, &full).await {
            warn!(
                "Stripe push for invoice {} failed; discarding draft {}",
                full.invoice.invoice_number, stripe_invoice
            );
            if let Err(cleanup) = stripe.delete_draft_invoice(&stripe_invoice).await {
                warn!("Could not delete Stripe draft {}: {}", stripe_invoice, cleanup);
            }
            return Err(e.into());
        }

        let invoice = sqlx::query_as::<_, Invoice>(
            "UPDATE invoices SET stripe_invoice_id = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&stripe_invoice)
        .fetch_one(&self.pool)
        .await?;
        info!("Pushed invoice {} to Stripe as {}", invoice.invoice_number, stripe_invoice);
        Ok(invoice)
    }

    /// Flip every `SENT` invoice past its due date to `OVERDUE`, optionally
    /// limited to one tenant, and announce each one.
    pub async fn mark_overdue(&self, today: NaiveDate, tenant_id: Option<Uuid>) -> ApiResult<OverdueReport> {
        let overdue = sqlx::query_as::<_, Invoice>(
            "UPDATE invoices SET status = 'OVERDUE', updated_at = NOW()
             WHERE status = 'SENT' AND due_date < $1 AND ($2::uuid IS NULL OR tenant_id = $2)
             RETURNING *",
        )
        .bind(today)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let customer_ids: Vec<Uuid> = overdue.iter().map(|i| i.customer_id).collect();
        let customers = customers_by_id(&self.pool, &customer_ids).await?;
        for invoice in &overdue {
            info!("Invoice {} is now overdue", invoice.invoice_number);
            match customers.get(&invoice.customer_id) {
                Some(customer) => self.events.invoice_overdue(invoice, customer, today).await,
                None => warn!("Customer missing for overdue invoice {}", invoice.invoice_number),
            }
        }

        Ok(OverdueReport { marked: overdue.len() })
    }
}
