use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiResult, AppError};
use tally_shared::{Currency, Tenant, User};

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTenant {
    #[validate(length(min = 1, message = "Company name is required"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub currency: Option<Currency>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[validate(length(min = 2, message = "First name must be at least 2 characters"))]
    pub first_name: Option<String>,
    #[validate(length(min = 2, message = "Last name must be at least 2 characters"))]
    pub last_name: Option<String>,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
}

/// Callers may only read or change their own tenant and their own profile.
fn ensure_owner(owner: Uuid, requested: Uuid) -> ApiResult<()> {
    if owner == requested {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

pub struct TenantService {
    pool: PgPool,
}

impl TenantService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, caller: &AuthUser, id: Uuid) -> ApiResult<Tenant> {
        ensure_owner(caller.tenant_id(), id)?;
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Tenant"))
    }

    pub async fn update(&self, caller: &AuthUser, id: Uuid, input: UpdateTenant) -> ApiResult<Tenant> {
        ensure_owner(caller.tenant_id(), id)?;
        input.validate()?;

        let email = input.email.map(|e| e.trim().to_lowercase());
        if let Some(email) = &email {
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE email = $1 AND id <> $2)")
                    .bind(email)
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;
            if taken {
                return Err(AppError::Conflict("Email already in use".to_string()));
            }
        }

        let tenant = sqlx::query_as::<_, Tenant>(
            "UPDATE tenants SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                address = COALESCE($5, address),
                currency = COALESCE($6, currency),
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(input.name.map(|n| n.trim().to_string()))
        .bind(email)
        .bind(input.phone)
        .bind(input.address)
        .bind(input.currency)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Tenant"))?;

        tracing::info!("Updated tenant {}", tenant.id);
        Ok(tenant)
    }

    pub async fn update_user(&self, caller: &AuthUser, id: Uuid, input: UpdateUser) -> ApiResult<User> {
        ensure_owner(caller.user_id(), id)?;
        input.validate()?;

        let email = input.email.map(|e| e.trim().to_lowercase());
        if let Some(email) = &email {
            let taken: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id <> $2)")
                    .bind(email)
                    .bind(id)
                    .fetch_one(&self.pool)
                    .await?;
            if taken {
                return Err(AppError::Conflict("Email already in use".to_string()));
            }
        }

        sqlx::query_as::<_, User>(
            "UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                email = COALESCE($4, email),
                updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(input.first_name.map(|n| n.trim().to_string()))
        .bind(input.last_name.map(|n| n.trim().to_string()))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
    }
}
