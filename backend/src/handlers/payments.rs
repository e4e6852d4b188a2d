use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::error::ApiResult;
use crate::pagination::PaginatedResponse;
use crate::services::payments::{CreatePayment, PaymentDetail, PaymentQuery};
use crate::services::PaymentService;
use crate::AppState;

pub fn payment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_payments).post(create_payment))
        .route("/:id", get(get_payment))
}

fn service(state: &AppState) -> PaymentService {
    PaymentService::new(state.db_pool.clone(), state.events.clone())
}

async fn create_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreatePayment>,
) -> ApiResult<(StatusCode, Json<PaymentDetail>)> {
    let payment = service(&state).record(auth.tenant_id(), req).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<PaymentQuery>,
) -> ApiResult<Json<PaginatedResponse<PaymentDetail>>> {
    let today = Utc::now().date_naive();
    Ok(Json(service(&state).list(auth.tenant_id(), &query, today).await?))
}

async fn get_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<PaymentDetail>> {
    Ok(Json(service(&state).get(auth.tenant_id(), id).await?))
}
