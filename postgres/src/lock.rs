//! Session level advisory lock guarding the switchover execution.
//!
//! The lock belongs to the session that took it, so it lives exactly as long
//! as the connection unless released explicitly.

use sqlx::PgConnection;

/// Advisory lock key reserved for the switchover execution.
pub const SWITCHOVER_EXEC_LOCK_KEY: i64 = 0x5357_4F45_5845_4321;

/// Tries to take the execution lock without waiting.
///
/// Returns `false` if another session holds it.
pub async fn try_exec_lock(connection: &mut PgConnection) -> Result<bool, sqlx::Error> {
    let acquired: bool = sqlx::query_scalar("select pg_try_advisory_lock($1)")
        .bind(SWITCHOVER_EXEC_LOCK_KEY)
        .fetch_one(connection)
        .await?;

    Ok(acquired)
}

/// Releases every advisory lock held by the session of `connection`.
pub async fn unlock_all(connection: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query("select pg_advisory_unlock_all()")
        .execute(connection)
        .await?;

    Ok(())
}
