use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{ApiResult, AppError};

/// Reset links stay valid for one hour.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

/// Hashing runs on tokio's blocking pool.
pub async fn hash_password(password: &str) -> ApiResult<String> {
    hash_with_cost(password, bcrypt::DEFAULT_COST).await
}

async fn hash_with_cost(password: &str, cost: u32) -> ApiResult<String> {
    let password = password.to_owned();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::InternalError(format!("Password hashing task failed: {}", e)))??;
    Ok(hash)
}

/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> ApiResult<bool> {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| AppError::InternalError(format!("Password check task failed: {}", e)))
}

/// A freshly issued reset token. Only `hash` is persisted.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub token: String,
    pub hash: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        let hash = hash_reset_token(&token);
        Self {
            token,
            hash,
            expires_at: now + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
        }
    }
}

pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn reset_link(frontend_url: &str, token: &str) -> String {
    format!("{}/reset-password?token={}", frontend_url.trim_end_matches('/'), token)
}
