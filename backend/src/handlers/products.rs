use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::error::ApiResult;
use crate::pagination::PaginatedResponse;
use crate::services::products::{CreateProduct, ProductQuery, UpdateProduct};
use crate::services::ProductService;
use crate::AppState;
use tally_shared::Product;

pub fn product_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/active", get(active_products))
        .route("/:id", get(get_product).put(update_product).delete(delete_product))
}

fn service(state: &AppState) -> ProductService {
    ProductService::new(state.db_pool.clone())
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> ApiResult<Json<PaginatedResponse<Product>>> {
    Ok(Json(service(&state).list(auth.tenant_id(), &query).await?))
}

async fn active_products(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(service(&state).active(auth.tenant_id()).await?))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Product>> {
    Ok(Json(service(&state).get(auth.tenant_id(), id).await?))
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let product = service(&state).create(auth.tenant_id(), req).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateProduct>,
) -> ApiResult<Json<Product>> {
    Ok(Json(service(&state).update(auth.tenant_id(), id, req).await?))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    service(&state).delete(auth.tenant_id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
