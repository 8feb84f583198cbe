pub mod lock;
pub mod log;
pub mod pool;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod state;

/// Runs the switchover schema migrations against `pool`.
///
/// The migrations metadata table is kept inside the `switchover` schema so the
/// application schema of either database is left untouched.
pub async fn migrate_switchover_schema(
    pool: &sqlx::PgPool,
) -> Result<(), sqlx::migrate::MigrateError> {
    let mut connection = pool.acquire().await?;

    sqlx::query("create schema if not exists switchover")
        .execute(&mut *connection)
        .await?;
    sqlx::query("set search_path = 'switchover'")
        .execute(&mut *connection)
        .await?;

    sqlx::migrate!("./migrations").run(&mut *connection).await?;

    // The connection goes back to a shared pool, the search path must not leak.
    sqlx::query("reset search_path")
        .execute(&mut *connection)
        .await?;

    Ok(())
}
