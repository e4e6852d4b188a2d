use sqlx::{migrate::MigrateDatabase, postgres::PgPoolOptions, PgPool, Postgres};
use std::time::Duration;

/// Connection pool settings, read from the `DB_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections, shared by request handlers and the
    /// scheduled overdue/reminder jobs (`DB_MAX_CONNECTIONS`).
    pub max_connections: u32,
    /// Connections kept open while idle (`DB_MIN_CONNECTIONS`). Never above
    /// `max_connections`.
    pub min_connections: u32,
    /// How long a request waits for a free connection before failing with a
    /// database error (`DB_ACQUIRE_TIMEOUT`, seconds).
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed (`DB_IDLE_TIMEOUT`, seconds).
    pub idle_timeout: Duration,
    /// Connections are recycled after this long regardless of use
    /// (`DB_MAX_LIFETIME`, seconds).
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let seconds = |key: &str, fallback: Duration| number(key).map_or(fallback, Duration::from_secs);
        let defaults = Self::default();

        let max_connections = number("DB_MAX_CONNECTIONS")
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);
        let min_connections = number("DB_MIN_CONNECTIONS")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(defaults.min_connections)
            .min(max_connections);

        Self {
            max_connections,
            min_connections,
            acquire_timeout: seconds("DB_ACQUIRE_TIMEOUT", defaults.acquire_timeout),
            idle_timeout: seconds("DB_IDLE_TIMEOUT", defaults.idle_timeout),
            max_lifetime: seconds("DB_MAX_LIFETIME", defaults.max_lifetime),
        }
    }

    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
    }
}

/// Connect to the Tally database, creating it first on a fresh server.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let config = PoolConfig::from_env();

    if !Postgres::database_exists(database_url).await? {
        Postgres::create_database(database_url).await?;
        tracing::info!("Database created successfully");
    }

    let pool = config.options().connect(database_url).await?;
    tracing::info!(
        "Database pool created: max={}, min={}, acquire_timeout={}s",
        config.max_connections,
        config.min_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

/// Reported by `/health`.
pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
