use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::middleware::{AuthUser, RequireAdmin};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::error::ApiResult;
use crate::pagination::PaginatedResponse;
use crate::services::invoices::{
    CreateInvoice, InvoiceDetail, InvoiceQuery, InvoiceWithRelations, OverdueReport, SendOutcome,
    UpdateInvoice,
};
use crate::services::reminders::reminder_history;
use crate::services::InvoiceService;
use crate::AppState;
use tally_shared::{Invoice, ReminderLog};

pub fn invoice_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/check-overdue", post(check_overdue))
        .route("/:id", get(get_invoice).put(update_invoice).delete(delete_invoice))
        .route("/:id/send", post(send_invoice))
        .route("/:id/pdf", get(invoice_pdf))
        .route("/:id/reminders", get(invoice_reminders))
        .route("/:id/stripe", post(push_to_stripe))
}

fn service(state: &AppState) -> InvoiceService {
    InvoiceService::new(state.db_pool.clone(), state.events.clone())
}

async fn list_invoices(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<InvoiceQuery>,
) -> ApiResult<Json<PaginatedResponse<InvoiceWithRelations>>> {
    let today = Utc::now().date_naive();
    Ok(Json(service(&state).list(auth.tenant_id(), &query, today).await?))
}

async fn create_invoice(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<CreateInvoice>,
) -> ApiResult<(StatusCode, Json<InvoiceWithRelations>)> {
    let invoice = service(&state).create(auth.tenant_id(), req).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<InvoiceDetail>> {
    Ok(Json(service(&state).get(auth.tenant_id(), id).await?))
}

async fn update_invoice(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateInvoice>,
) -> ApiResult<Json<InvoiceDetail>> {
    Ok(Json(service(&state).update(auth.tenant_id(), id, req).await?))
}

async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<StatusCode> {
    service(&state).delete(auth.tenant_id(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_invoice(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<SendOutcome>> {
    let outcome = service(&state).send(auth.tenant_id(), id, &state.email).await?;
    Ok(Json(outcome))
}

async fn invoice_pdf(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let pdf = service(&state)
        .pdf(auth.tenant_id(), id, &state.config.pdf_storage_path)
        .await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", pdf.file_name),
            ),
        ],
        pdf.bytes,
    ))
}

async fn invoice_reminders(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Vec<ReminderLog>>> {
    // 404 for invoices outside the caller's tenant
    service(&state).get(auth.tenant_id(), id).await?;
    Ok(Json(reminder_history(&state.db_pool, auth.tenant_id(), id).await?))
}

async fn push_to_stripe(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<Invoice>> {
    let today = Utc::now().date_naive();
    let invoice = service(&state)
        .push_to_stripe(auth.tenant_id(), id, &state.stripe, today)
        .await?;
    Ok(Json(invoice))
}

async fn check_overdue(
    State(state): State<Arc<AppState>>,
    RequireAdmin(admin): RequireAdmin,
) -> ApiResult<Json<OverdueReport>> {
    let today = Utc::now().date_naive();
    let report = service(&state).mark_overdue(today, Some(admin.tenant_id())).await?;
    tracing::info!("Manual overdue check marked {} invoices", report.marked);
    Ok(Json(report))
}
