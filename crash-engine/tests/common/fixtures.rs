//! Test fixtures for integration tests.

use sqlx::PgPool;
use testcontainers_modules::postgres::Postgres;
use testcontainers_modules::testcontainers::ContainerAsync;
use testcontainers_modules::testcontainers::runners::AsyncRunner;

use crash_engine::store::PostgresStore;

/// A test database instance with pool and container.
///
/// The container is kept alive as long as this struct exists. When dropped,
/// the container is stopped.
pub struct TestDb {
    /// The connection pool to the test database.
    pub pool: PgPool,
    /// The `PostgresStore` wrapping the pool.
    pub store: PostgresStore,
    /// The container (kept alive for the duration of the test).
    _container: ContainerAsync<Postgres>,
}

impl TestDb {
    /// Start a fresh Postgres container, connect, and run every migration.
    ///
    /// # Panics
    ///
    /// Panics if container startup, connection, or migrations fail.
    pub async fn new() -> Self {
        let container = Postgres::default().start().await.expect("failed to start postgres container");

        let host = container.get_host().await.expect("failed to get host");
        let port = container.get_host_port_ipv4(5432).await.expect("failed to get port");
        let connection_string = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = connect_with_retries(&connection_string, 30).await.expect("failed to connect to database");

        let store = PostgresStore::new(pool.clone());
        store.run_migrations().await.expect("failed to run migrations");

        Self { pool, store, _container: container }
    }
}

/// The official Postgres image's `WaitFor` already gates on the server
/// logging readiness, but the port isn't always immediately acceptable
/// right after — retry the first real connection a few times rather than
/// let an exact-retry-count assumption cause flakiness.
async fn connect_with_retries(url: &str, max_attempts: u32) -> Result<PgPool, sqlx::Error> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match PgPool::connect(url).await {
            Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                Ok(_) => return Ok(pool),
                Err(e) if attempts < max_attempts => {
                    tracing::debug!("connection verify failed (attempt {attempts}): {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
                Err(e) => return Err(e),
            },
            Err(e) if attempts < max_attempts => {
                tracing::debug!("connection failed (attempt {attempts}): {e}");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
