use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub jwt_secret: String,
    pub jwt_expires_in_hours: i64,
    pub cors_origin: String,
    pub frontend_url: String,
    pub pdf_storage_path: PathBuf,
    pub company_name: String,
    pub smtp: SmtpConfig,
    pub stripe: StripeConfig,
    pub events: EventWebhooks,
    pub overdue_cron: String,
    pub reminder_cron: String,
}

/// SMTP configuration for sending emails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub use_tls: bool,
}

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_base: String,
}

/// Outbound automation hooks; an empty URL disables that event.
#[derive(Debug, Clone, Default)]
pub struct EventWebhooks {
    pub invoice_created: String,
    pub invoice_overdue: String,
    pub payment_received: String,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            server_addr: var_or("SERVER_ADDR", "0.0.0.0:3000"),
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_expires_in_hours: var_or("JWT_EXPIRES_IN_HOURS", "168").parse().unwrap_or(168),
            cors_origin: var_or("CORS_ORIGIN", "http://localhost:5173"),
            frontend_url: var_or("FRONTEND_URL", "http://localhost:5173"),
            pdf_storage_path: PathBuf::from(var_or("PDF_STORAGE_PATH", "./storage/invoices")),
            company_name: var_or("COMPANY_NAME", "Invoice CRM"),
            smtp: SmtpConfig {
                host: env::var("SMTP_HOST").unwrap_or_default(),
                port: var_or("SMTP_PORT", "587").parse().unwrap_or(587),
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from_email: var_or("SMTP_FROM_EMAIL", "billing@example.com"),
                from_name: var_or("SMTP_FROM_NAME", "Invoice CRM"),
                use_tls: var_or("SMTP_USE_TLS", "true").parse().unwrap_or(true),
            },
            stripe: StripeConfig {
                secret_key: optional_var("STRIPE_SECRET_KEY"),
                webhook_secret: optional_var("STRIPE_WEBHOOK_SECRET"),
                api_base: var_or("STRIPE_API_BASE", "https://api.stripe.com"),
            },
            events: EventWebhooks {
                invoice_created: env::var("N8N_INVOICE_CREATED_WEBHOOK").unwrap_or_default(),
                invoice_overdue: env::var("N8N_INVOICE_OVERDUE_WEBHOOK").unwrap_or_default(),
                payment_received: env::var("N8N_PAYMENT_RECEIVED_WEBHOOK").unwrap_or_default(),
            },
            // tokio-cron-scheduler expressions carry a leading seconds field
            overdue_cron: var_or("OVERDUE_CRON", "0 0 8 * * *"),
            reminder_cron: var_or("REMINDER_CRON", "0 0 9 * * *"),
        })
    }

    /// Configuration for tests; no external services.
    #[cfg(test)]
    pub fn for_tests(database_url: &str) -> Self {
        Config {
            database_url: database_url.to_string(),
            server_addr: "127.0.0.1:0".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_expires_in_hours: 1,
            cors_origin: "http://localhost:5173".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            pdf_storage_path: env::temp_dir().join("tally-invoices"),
            company_name: "Invoice CRM".to_string(),
            smtp: SmtpConfig {
                host: String::new(),
                port: 587,
                username: String::new(),
                password: String::new(),
                from_email: "billing@example.com".to_string(),
                from_name: "Invoice CRM".to_string(),
                use_tls: false,
            },
            stripe: StripeConfig {
                secret_key: None,
                webhook_secret: None,
                api_base: "https://api.stripe.com".to_string(),
            },
            events: EventWebhooks::default(),
            overdue_cron: "0 0 8 * * *".to_string(),
            reminder_cron: "0 0 9 * * *".to_string(),
        }
    }
}

impl SmtpConfig {
    /// Check if SMTP is properly configured
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && !self.username.is_empty() && !self.password.is_empty()
    }
}
