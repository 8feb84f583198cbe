use sqlx::{PgPool, prelude::FromRow};

/// A row of the `switchover.log` table.
#[derive(Debug, FromRow)]
pub struct LogRow {
    pub id: i64,
    pub data: serde_json::Value,
}

/// Appends `data` to the switchover log and returns its id.
///
/// The table lock makes commit order equal id order, so a reader that saw id
/// `n` will never later discover a smaller id.
pub async fn append_log_row(pool: &PgPool, data: serde_json::Value) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("lock table switchover.log in exclusive mode")
        .execute(&mut *tx)
        .await?;

    let id: i64 = sqlx::query_scalar("insert into switchover.log (data) values ($1) returning id")
        .bind(data)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(id)
}

/// Fetches at most `limit` rows with an id greater than `after`, oldest first.
pub async fn fetch_log_rows(
    pool: &PgPool,
    after: i64,
    limit: i64,
) -> Result<Vec<LogRow>, sqlx::Error> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        select id, data
        from switchover.log
        where id > $1
        order by id
        limit $2
        "#,
    )
    .bind(after)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the id of the newest row, or `0` for an empty log.
pub async fn latest_log_id(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let id: Option<i64> = sqlx::query_scalar("select max(id) from switchover.log")
        .fetch_one(pool)
        .await?;

    Ok(id.unwrap_or(0))
}
