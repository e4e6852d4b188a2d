use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::error::{ApiResult, AppError};
use crate::pagination::{search_pattern, PaginatedResponse, PaginationParams};
use tally_shared::{Customer, Invoice};

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomer {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCustomer {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl CustomerQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetail {
    #[serde(flatten)]
    pub customer: Customer,
    /// Ten most recent invoices
    pub invoices: Vec<Invoice>,
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &CustomerQuery) {
    qb.push(" WHERE tenant_id = ").push_bind(tenant_id);
    if let Some(pattern) = search_pattern(&query.search) {
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR phone ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    for (column, value) in [("city", &query.city), ("state", &query.state), ("country", &query.country)] {
        if let Some(pattern) = search_pattern(value) {
            qb.push(format!(" AND {} ILIKE ", column)).push_bind(pattern);
        }
    }
}

pub struct CustomerService {
    pool: PgPool,
}

impl CustomerService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, tenant_id: Uuid, input: CreateCustomer) -> ApiResult<Customer> {
        input.validate()?;
        let now = Utc::now();
        let customer = sqlx::query_as::<_, Customer>(
            "INSERT INTO customers
                (id, tenant_id, name, email, phone, address, city, state, zip_code, country, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(input.name.trim())
        .bind(input.email.trim().to_lowercase())
        .bind(input.phone)
        .bind(input.address)
        .bind(input.city)
        .bind(input.state)
        .bind(input.zip_code)
        .bind(input.country)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Created customer {} for tenant {}", customer.id, tenant_id);
        Ok(customer)
    }

    pub async fn list(&self, tenant_id: Uuid, query: &CustomerQuery) -> ApiResult<PaginatedResponse<Customer>> {
        let pagination = query.pagination();
        let page = pagination.page();
        let limit = pagination.limit();

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM customers");
        push_filters(&mut count, tenant_id, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM customers");
        push_filters(&mut select, tenant_id, query);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset_for(limit));
        let customers = select.build_query_as::<Customer>().fetch_all(&self.pool).await?;

        Ok(PaginatedResponse::new(customers, page, limit, total))
    }

    pub async fn find(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Customer> {
        sqlx::query_as::<_, Customer>("SELECT * FROM customers WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Customer"))
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<CustomerDetail> {
        let customer = self.find(tenant_id, id).await?;
        let invoices = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE customer_id = $1 AND tenant_id = $2
             ORDER BY created_at DESC LIMIT 10",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(CustomerDetail { customer, invoices })
    }

    pub async fn update(&self, tenant_id: Uuid, id: Uuid, input: UpdateCustomer) -> ApiResult<Customer> {
        input.validate()?;
        sqlx::query_as::<_, Customer>(
            "UPDATE customers SET
                name = COALESCE($3, name),
                email = COALESCE($4, email),
                phone = COALESCE($5, phone),
                address = COALESCE($6, address),
                city = COALESCE($7, city),
                state = COALESCE($8, state),
                zip_code = COALESCE($9, zip_code),
                country = COALESCE($10, country),
                updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2
             RETURNING *",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(input.name.map(|n| n.trim().to_string()))
        .bind(input.email.map(|e| e.trim().to_lowercase()))
        .bind(input.phone)
        .bind(input.address)
        .bind(input.city)
        .bind(input.state)
        .bind(input.zip_code)
        .bind(input.country)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Customer"))
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<()> {
        self.find(tenant_id, id).await?;

        let invoices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE customer_id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if invoices > 0 {
            return Err(AppError::bad_request("Cannot delete customer with existing invoices"));
        }

        sqlx::query("DELETE FROM customers WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        tracing::info!("Deleted customer {} for tenant {}", id, tenant_id);
        Ok(())
    }

    /// Remember the Stripe customer created for this customer.
    pub async fn set_stripe_customer_id(&self, id: Uuid, stripe_id: &str) -> ApiResult<()> {
        sqlx::query("UPDATE customers SET stripe_customer_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(stripe_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
