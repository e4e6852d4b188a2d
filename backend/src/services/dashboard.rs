use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_customers: i64,
    pub total_invoices: i64,
    pub paid_invoices: i64,
    pub overdue_invoices: i64,
    /// Sum of `PAID` invoice totals
    pub total_revenue: Decimal,
    /// Sum of totals still expected (not paid, not cancelled)
    pub pending_revenue: Decimal,
}

pub async fn stats(pool: &PgPool, tenant_id: Uuid) -> Result<DashboardStats, sqlx::Error> {
    sqlx::query_as::<_, DashboardStats>(
        "SELECT
            (SELECT COUNT(*) FROM customers WHERE tenant_id = $1) AS total_customers,
            COUNT(i.id) AS total_invoices,
            COUNT(i.id) FILTER (WHERE i.status = 'PAID') AS paid_invoices,
            COUNT(i.id) FILTER (WHERE i.status = 'OVERDUE') AS overdue_invoices,
            COALESCE(SUM(i.total) FILTER (WHERE i.status = 'PAID'), 0) AS total_revenue,
            COALESCE(SUM(i.total) FILTER (WHERE i.status NOT IN ('PAID', 'CANCELLED')), 0) AS pending_revenue
         FROM invoices i
         WHERE i.tenant_id = $1",
    )
    .bind(tenant_id)
    .fetch_one(pool)
    .await
}
