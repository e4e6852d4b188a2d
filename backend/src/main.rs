use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod auth;
mod billing;
mod config;
mod database;
mod error;
mod extract;
mod handlers;
mod jobs;
mod pagination;
mod services;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};

#[cfg(test)]
mod tests;

use config::Config;
use services::{EmailService, EventDispatcher, StripeClient};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub config: Arc<Config>,
    pub email: EmailService,
    pub stripe: StripeClient,
    pub events: EventDispatcher,
}

impl AppState {
    pub fn new(db_pool: sqlx::PgPool, config: Config) -> anyhow::Result<Self> {
        Ok(Self {
            email: EmailService::new(&config.smtp)?,
            stripe: StripeClient::new(&config.stripe),
            events: EventDispatcher::new(config.events.clone()),
            config: Arc::new(config),
            db_pool,
        })
    }
}

fn cors_layer(origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origin.trim() == "*" {
        return cors.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origin
        .split(',')
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    cors.allow_origin(origins).allow_credentials(true)
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.cors_origin);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api/auth", auth::auth_routes())
        .nest("/api/customers", handlers::customer_routes())
        .nest("/api/products", handlers::product_routes())
        .nest("/api/invoices", handlers::invoice_routes())
        .nest("/api/payments", handlers::payment_routes())
        .nest("/api/tenants", handlers::tenant_routes())
        .nest("/api/users", handlers::user_routes())
        .nest("/api/dashboard", handlers::dashboard_routes())
        .nest("/api/webhooks", handlers::webhook_routes())
        .fallback(handlers::not_found)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tally_backend=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let state = Arc::new(AppState::new(db_pool, config)?);

    let mut scheduler = jobs::JobScheduler::new(
        state.db_pool.clone(),
        state.email.clone(),
        state.events.clone(),
        jobs::JobConfig::from_config(&state.config),
    )
    .await?;
    scheduler.start().await?;

    let addr = state.config.server_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::error!("Scheduler shutdown failed: {}", e);
    }
    tracing::info!("Server stopped");

    Ok(())
}
