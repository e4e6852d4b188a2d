use axum::{
    extract::State,
    response::Json,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::extract::{ApiJson, ApiPath};
use crate::error::ApiResult;
use crate::services::tenants::{UpdateTenant, UpdateUser};
use crate::services::TenantService;
use crate::AppState;
use tally_shared::{Tenant, User};

pub fn tenant_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id", get(get_tenant).put(update_tenant))
}

pub fn user_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:id", put(update_user))
}

async fn get_tenant(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Tenant>> {
    Ok(Json(TenantService::new(state.db_pool.clone()).get(&auth, id).await?))
}

async fn update_tenant(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateTenant>,
) -> ApiResult<Json<Tenant>> {
    let tenant = TenantService::new(state.db_pool.clone()).update(&auth, id, req).await?;
    Ok(Json(tenant))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateUser>,
) -> ApiResult<Json<User>> {
    let user = TenantService::new(state.db_pool.clone())
        .update_user(&auth, id, req)
        .await?;
    Ok(Json(user))
}
