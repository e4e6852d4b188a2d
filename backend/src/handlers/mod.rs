use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::database;
use crate::error::AppError;
use crate::AppState;

pub mod customers;
pub mod dashboard;
pub mod invoices;
pub mod payments;
pub mod products;
pub mod tenants;
pub mod webhooks;

pub use customers::customer_routes;
pub use dashboard::dashboard_routes;
pub use invoices::invoice_routes;
pub use payments::payment_routes;
pub use products::product_routes;
pub use tenants::{tenant_routes, user_routes};
pub use webhooks::webhook_routes;

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let database = database::health_check(&state.db_pool).await;
    let status = if database { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
}

pub async fn not_found() -> AppError {
    AppError::NotFound("Route".to_string())
}
