pub mod jwt;
pub mod middleware;
pub mod password;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::extract::ApiJson;
use crate::error::{ApiResult, AppError};
use crate::services::email::{password_reset_email, Mailer};
use crate::AppState;
use middleware::AuthUser;
use password::{hash_password, hash_reset_token, reset_link, verify_password, ResetToken};
use tally_shared::{Tenant, User};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 2, message = "First name must be at least 2 characters"))]
    pub first_name: String,
    #[validate(length(min = 2, message = "Last name must be at least 2 characters"))]
    pub last_name: String,
    #[validate(length(min = 1, message = "Company name is required"))]
    pub company_name: String,
    #[validate(email(message = "Invalid company email address"))]
    pub company_email: String,
    pub company_phone: Option<String>,
    pub company_address: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: &'static str,
    pub token: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub message: &'static str,
    pub token: String,
    pub user: User,
    pub tenant: Tenant,
}

#[derive(Debug, Serialize)]
pub struct UserWithTenant {
    #[serde(flatten)]
    pub user: User,
    pub tenant: Tenant,
}

pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let email = req.email.trim().to_lowercase();
    let company_email = req.company_email.trim().to_lowercase();

    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(&email)
        .fetch_one(&state.db_pool)
        .await?;
    if user_exists {
        return Err(AppError::Conflict("User already exists".to_string()));
    }

    let tenant_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE email = $1)")
        .bind(&company_email)
        .fetch_one(&state.db_pool)
        .await?;
    if tenant_exists {
        return Err(AppError::Conflict("Company email already registered".to_string()));
    }

    let password_hash = hash_password(&req.password).await?;

    let mut tx = state.db_pool.begin().await?;
    let tenant = sqlx::query_as::<_, Tenant>(
        "INSERT INTO tenants (id, name, email, phone, address)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(req.company_name.trim())
    .bind(&company_email)
    .bind(req.company_phone)
    .bind(req.company_address)
    .fetch_one(&mut *tx)
    .await?;

    // The first user of a tenant administers it
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, tenant_id, email, password_hash, first_name, last_name, role)
         VALUES ($1, $2, $3, $4, $5, $6, 'ADMIN')
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(tenant.id)
    .bind(&email)
    .bind(&password_hash)
    .bind(req.first_name.trim())
    .bind(req.last_name.trim())
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!("Registered tenant {} with admin {}", tenant.id, user.id);

    let token = jwt::create_jwt(&user, &state.config.jwt_secret, state.config.jwt_expires_in_hours)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful",
            token: token.token,
            user,
            tenant,
        }),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    req.validate()?;

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(req.email.trim().to_lowercase())
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&req.password, &user.password_hash).await? {
        tracing::warn!("Failed login for user {}", user.id);
        return Err(AppError::InvalidCredentials);
    }

    let token = jwt::create_jwt(&user, &state.config.jwt_secret, state.config.jwt_expires_in_hours)?;
    Ok(Json(LoginResponse {
        message: "Login successful",
        token: token.token,
        user,
    }))
}

async fn me(State(state): State<Arc<AppState>>, auth: AuthUser) -> ApiResult<impl IntoResponse> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(auth.user_id())
        .fetch_optional(&state.db_pool)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
        .bind(user.tenant_id)
        .fetch_one(&state.db_pool)
        .await?;

    Ok(Json(json!({ "user": UserWithTenant { user, tenant } })))
}

/// Always answers 200 so the endpoint cannot be used to discover which emails have accounts.
async fn forgot_password(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ForgotPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let response = Json(json!({
        "message": "If an account exists for that email, a password reset link has been sent"
    }));

    let Some(user) = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(req.email.trim().to_lowercase())
        .fetch_optional(&state.db_pool)
        .await?
    else {
        return Ok(response);
    };

    let reset = ResetToken::generate(Utc::now());
    sqlx::query(
        "INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(&reset.hash)
    .bind(reset.expires_at)
    .execute(&state.db_pool)
    .await?;

    let link = reset_link(&state.config.frontend_url, &reset.token);
    let email = password_reset_email(&state.config.company_name, &user.email, &user.full_name(), &link);
    if let Err(e) = state.email.send(email).await {
        tracing::error!("Failed to send password reset email to user {}: {}", user.id, e);
    }

    Ok(response)
}

async fn reset_password(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;
    let token_hash = hash_reset_token(req.token.trim());

    let mut tx = state.db_pool.begin().await?;
    let user_id: Option<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM password_reset_tokens
         WHERE token_hash = $1 AND used_at IS NULL AND expires_at > NOW()
         FOR UPDATE",
    )
    .bind(&token_hash)
    .fetch_optional(&mut *tx)
    .await?;
    let user_id = user_id.ok_or_else(|| AppError::bad_request("Invalid or expired reset token"))?;

    let password_hash = hash_password(&req.password).await?;
    sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .bind(&password_hash)
        .execute(&mut *tx)
        .await?;

    // Consumes this token and any other outstanding ones for the user
    sqlx::query("UPDATE password_reset_tokens SET used_at = NOW() WHERE user_id = $1 AND used_at IS NULL")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!("Password reset for user {}", user_id);
    Ok(Json(json!({ "message": "Password has been reset successfully" })))
}
