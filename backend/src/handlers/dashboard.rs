use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;

use crate::auth::middleware::AuthUser;
use crate::error::ApiResult;
use crate::services::dashboard::{self, DashboardStats};
use crate::AppState;

pub fn dashboard_routes() -> Router<Arc<AppState>> {
    Router::new().route("/stats", get(stats))
}

async fn stats(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<Json<DashboardStats>> {
    Ok(Json(dashboard::stats(&state.db_pool, auth.tenant_id()).await?))
}
