use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::events::EventDispatcher;
use super::invoices::{amount_paid, customers_by_id};
use crate::billing::{check_payment, de_opt_date, de_opt_datetime, resolve_date_range, DateFilter, PaymentOutcome};
use crate::error::{ApiResult, AppError};
use crate::pagination::{search_pattern, PaginatedResponse, PaginationParams};
use tally_shared::{Customer, Invoice, InvoiceStatus, Payment, PaymentMethod};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayment {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    #[serde(default, deserialize_with = "de_opt_datetime")]
    pub payment_date: Option<DateTime<Utc>>,
    #[validate(length(max = 255, message = "Transaction id is too long"))]
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub invoice_id: Option<Uuid>,
    pub search: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "de_opt_date")]
    pub end_date: Option<NaiveDate>,
    pub date_filter: Option<DateFilter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    pub invoice: Invoice,
    pub customer: Customer,
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &PaymentQuery, today: NaiveDate) {
    qb.push(" WHERE p.tenant_id = ").push_bind(tenant_id);
    if let Some(invoice_id) = query.invoice_id {
        qb.push(" AND p.invoice_id = ").push_bind(invoice_id);
    }
    if let Some(pattern) = search_pattern(&query.search) {
        qb.push(" AND (i.invoice_number ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR c.name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.transaction_id ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(method) = query.payment_method {
        qb.push(" AND p.payment_method = ").push_bind(method);
    }
    if let Some(min) = query.min_amount {
        qb.push(" AND p.amount >= ").push_bind(min);
    }
    if let Some(max) = query.max_amount {
        qb.push(" AND p.amount <= ").push_bind(max);
    }
    let (start, end) = resolve_date_range(query.date_filter, query.start_date, query.end_date, today);
    if let Some(start) = start {
        qb.push(" AND p.payment_date::date >= ").push_bind(start);
    }
    if let Some(end) = end {
        qb.push(" AND p.payment_date::date <= ").push_bind(end);
    }
}

pub struct PaymentService {
    pool: PgPool,
    events: EventDispatcher,
}

impl PaymentService {
    pub fn new(pool: PgPool, events: EventDispatcher) -> Self {
        Self { pool, events }
    }

    /// Record a payment and settle the invoice when it is covered in full.
    /// The invoice row stays locked for the whole check-and-insert.
    pub async fn record(&self, tenant_id: Uuid, input: CreatePayment) -> ApiResult<PaymentDetail> {
        input.validate()?;

        let mut tx = self.pool.begin().await?;
        let invoice = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
        )
        .bind(input.invoice_id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Invoice"))?;

        if invoice.status == InvoiceStatus::Cancelled {
            return Err(AppError::bad_request("Cannot record payment for a cancelled invoice"));
        }

        if let Some(transaction_id) = input.transaction_id.as_deref().filter(|t| !t.is_empty()) {
            let duplicate: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM payments WHERE invoice_id = $1 AND transaction_id = $2)",
            )
            .bind(invoice.id)
            .bind(transaction_id)
            .fetch_one(&mut *tx)
            .await?;
            if duplicate {
                return Err(AppError::Conflict(format!(
                    "Payment with transaction id {} already recorded",
                    transaction_id
                )));
            }
        }

        let paid = amount_paid(&mut *tx, invoice.id).await?;
        let outcome = check_payment(invoice.total, paid, input.amount)?;

        let payment = sqlx::query_as::<_, Payment>(
            "INSERT INTO payments
                (id, tenant_id, invoice_id, amount, payment_method, payment_date, transaction_id, notes)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(invoice.id)
        .bind(input.amount)
        .bind(input.payment_method)
        .bind(input.payment_date.unwrap_or_else(Utc::now))
        .bind(input.transaction_id)
        .bind(input.notes)
        .fetch_one(&mut *tx)
        .await?;

        let invoice = match outcome {
            PaymentOutcome::Settled => {
                sqlx::query_as::<_, Invoice>(
                    "UPDATE invoices SET status = 'PAID', updated_at = NOW() WHERE id = $1 RETURNING *",
                )
                .bind(invoice.id)
                .fetch_one(&mut *tx)
                .await?
            }
            PaymentOutcome::Partial { balance_due } => {
                info!("Invoice {} has {} outstanding", invoice.invoice_number, balance_due);
                invoice
            }
        };
        tx.commit().await?;

        info!(
            "Recorded payment {} of {} for invoice {}",
            payment.id, payment.amount, invoice.invoice_number
        );

        let customer = sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1")
            .bind(invoice.customer_id)
            .fetch_one(&self.pool)
            .await?;

        let events = self.events.clone();
        let (p, i, c) = (payment.clone(), invoice.clone(), customer.clone());
        tokio::spawn(async move {
            events.payment_received(&p, &i, &c).await;
        });

        Ok(PaymentDetail {
            payment,
            invoice,
            customer,
        })
    }

    async fn attach(&self, payments: Vec<Payment>) -> ApiResult<Vec<PaymentDetail>> {
        let invoice_ids: Vec<Uuid> = payments.iter().map(|p| p.invoice_id).collect();
        let invoices: Vec<Invoice> = if invoice_ids.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = ANY($1)")
                .bind(&invoice_ids)
                .fetch_all(&self.pool)
                .await?
        };
        let customer_ids: Vec<Uuid> = invoices.iter().map(|i| i.customer_id).collect();
        let customers = customers_by_id(&self.pool, &customer_ids).await?;
        let invoices: std::collections::HashMap<Uuid, Invoice> =
            invoices.into_iter().map(|i| (i.id, i)).collect();

        Ok(payments
            .into_iter()
            .filter_map(|payment| {
                let invoice = invoices.get(&payment.invoice_id)?.clone();
                let customer = customers.get(&invoice.customer_id)?.clone();
                Some(PaymentDetail {
                    payment,
                    invoice,
                    customer,
                })
            })
            .collect())
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        query: &PaymentQuery,
        today: NaiveDate,
    ) -> ApiResult<PaginatedResponse<PaymentDetail>> {
        let pagination = PaginationParams {
            page: query.page,
            limit: query.limit,
        };
        let page = pagination.page();
        let limit = pagination.limit();
        let from = " FROM payments p
                     JOIN invoices i ON i.id = p.invoice_id
                     JOIN customers c ON c.id = i.customer_id";

        let mut count = QueryBuilder::<Postgres>::new(format!("SELECT COUNT(*){}", from));
        push_filters(&mut count, tenant_id, query, today);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT p.*{}", from));
        push_filters(&mut select, tenant_id, query, today);
        select
            .push(" ORDER BY p.payment_date DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset_for(limit));
        let payments = select.build_query_as::<Payment>().fetch_all(&self.pool).await?;

        Ok(PaginatedResponse::new(self.attach(payments).await?, page, limit, total))
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<PaymentDetail> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Payment"))?;
        self.attach(vec![payment])
            .await?
            .pop()
            .ok_or_else(|| AppError::not_found("Payment"))
    }
}
