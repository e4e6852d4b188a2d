use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::billing::has_cent_precision;
use crate::error::{ApiResult, AppError, ValidationBuilder};
use crate::pagination::{search_pattern, PaginatedResponse, PaginationParams};
use tally_shared::Product;

/// Product lists are longer by default than other resources.
pub const PRODUCT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProduct {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub unit: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProduct {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub unit: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

fn check_price(price: Option<Decimal>) -> ApiResult<()> {
    ValidationBuilder::new()
        .check(
            price.map_or(true, |p| p >= Decimal::ZERO),
            "price",
            "Price cannot be negative",
        )
        .check(
            price.map_or(true, has_cent_precision),
            "price",
            "Price can have at most two decimal places",
        )
        .build()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &ProductQuery) {
    qb.push(" WHERE tenant_id = ").push_bind(tenant_id);
    if let Some(pattern) = search_pattern(&query.search) {
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(active) = query.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
}

pub struct ProductService {
    pool: PgPool,
}

impl ProductService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, tenant_id: Uuid, query: &ProductQuery) -> ApiResult<PaginatedResponse<Product>> {
        let pagination = PaginationParams {
            page: query.page,
            limit: query.limit,
        };
        let page = pagination.page();
        let limit = pagination.limit_or(PRODUCT_PAGE_SIZE);

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM products");
        push_filters(&mut count, tenant_id, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new("SELECT * FROM products");
        push_filters(&mut select, tenant_id, query);
        select
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(pagination.offset_for(limit));
        let products = select.build_query_as::<Product>().fetch_all(&self.pool).await?;

        Ok(PaginatedResponse::new(products, page, limit, total))
    }

    pub async fn active(&self, tenant_id: Uuid) -> ApiResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE tenant_id = $1 AND is_active = TRUE ORDER BY name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(products)
    }

    pub async fn get(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<Product> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Product"))
    }

    pub async fn create(&self, tenant_id: Uuid, input: CreateProduct) -> ApiResult<Product> {
        input.validate()?;
        check_price(Some(input.price))?;

        let product = sqlx::query_as::<_, Product>(
            "INSERT INTO products (id, tenant_id, name, description, price, unit, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(input.name.trim())
        .bind(input.description)
        .bind(input.price.round_dp(2))
        .bind(input.unit.filter(|u| !u.trim().is_empty()).unwrap_or_else(|| "item".to_string()))
        .bind(input.is_active.unwrap_or(true))
        .fetch_one(&self.pool)
        .await?;

        tracing::info!("Created product {} for tenant {}", product.id, tenant_id);
        Ok(product)
    }

    pub async fn update(&self, tenant_id: Uuid, id: Uuid, input: UpdateProduct) -> ApiResult<Product> {
        input.validate()?;
        check_price(input.price)?;

        sqlx::query_as::<_, Product>(
            "UPDATE products SET
                name = COALESCE($3, name),
                description = COALESCE($4, description),
                price = COALESCE($5, price),
                unit = COALESCE($6, unit),
                is_active = COALESCE($7, is_active),
                updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2
             RETURNING *",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(input.name.map(|n| n.trim().to_string()))
        .bind(input.description)
        .bind(input.price.map(|p| p.round_dp(2)))
        .bind(input.unit)
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Product"))
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> ApiResult<()> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Product"));
        }
        Ok(())
    }
}
