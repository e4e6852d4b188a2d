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
use crate::services::customers::{CreateCustomer, CustomerDetail, CustomerQuery, UpdateCustomer};
use crate::services::CustomerService;
use crate::AppState;
use tally_shared::Customer;

pub fn customer_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_customers).post(create_customer))
        .route("/:id", get(get_customer).put(update_customer).delete(delete_customer))
}

fn service(state: &AppState) -> CustomerService {
    CustomerService::new(state.db_pool.clone())
}

async fn list_customers(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<CustomerQuery>,
) -> ApiResult<Json<PaginatedResponse<Customer>>> {
    Ok(Json(service(&state).list(auth.tenant_id(), &query).await?))
}

async fn create_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateCustomer>,
) -> ApiResult<(StatusCode, Json<Customer>)> {
    let customer = service(&state).create(auth.tenant_id(), req).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn get_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<CustomerDetail>> {
    Ok(Json(service(&state).get(auth.tenant_id(), id).await?))
}

async fn update_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateCustomer>,
) -> ApiResult<Json<Customer>> {
    Ok(Json(service(&state).update(auth.tenant_id(), id, req).await?))
}

async fn delete_customer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    service(&state).delete(auth.tenant_id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
