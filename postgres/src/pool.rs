use config::shared::{IntoConnectOptions, PgConnectionConfig, PoolConfig};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Connects a pool to the database described by `config`.
///
/// No connection is kept idle at startup so that a node can boot while one of
/// the two databases is unreachable and report it instead of failing.
pub async fn connect_pool(
    config: &PgConnectionConfig,
    pool_config: &PoolConfig,
) -> Result<PgPool, sqlx::Error> {
    let options = config.with_db();

    let pool = PgPoolOptions::new()
        .min_connections(0)
        .max_connections(pool_config.max_connections)
        .acquire_timeout(pool_config.acquire_timeout())
        .connect_lazy_with(options);

    Ok(pool)
}

/// Runs a trivial query to check that `pool` can reach its database.
pub async fn check_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("select 1").execute(pool).await?;

    Ok(())
}
