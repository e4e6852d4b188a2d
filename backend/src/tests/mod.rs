use sqlx::PgPool;

/// Skip the current test when no database is configured.
macro_rules! require_db {
    () => {
        match $crate::tests::TestContext::from_env().await {
            Some(ctx) => ctx,
            None => {
                eprintln!("TEST_DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}

pub mod helpers;
pub mod unit;

/// Live database for tests that need one. Those tests return early unless
/// `TEST_DATABASE_URL` points at a disposable Postgres database.
pub struct TestContext {
    pub db_pool: PgPool,
}

impl TestContext {
    pub async fn from_env() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test database");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        Some(Self { db_pool: pool })
    }
}
