use std::fmt;
use std::str::FromStr;

use sqlx::{PgConnection, PgPool};
use thiserror::Error;

/// Persisted switchover progress of one database.
///
/// The value stored in the old database decides where application traffic is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchoverState {
    Idle,
    InProgress,
    UseNextDb,
}

impl SwitchoverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchoverState::Idle => "idle",
            SwitchoverState::InProgress => "in_progress",
            SwitchoverState::UseNextDb => "use_next_db",
        }
    }
}

impl fmt::Display for SwitchoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown switchover state `{0}`")]
pub struct UnknownSwitchoverState(String);

impl FromStr for SwitchoverState {
    type Err = UnknownSwitchoverState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SwitchoverState::Idle),
            "in_progress" => Ok(SwitchoverState::InProgress),
            "use_next_db" => Ok(SwitchoverState::UseNextDb),
            other => Err(UnknownSwitchoverState(other.to_owned())),
        }
    }
}

fn decode_state(raw: Option<String>) -> Result<SwitchoverState, sqlx::Error> {
    match raw {
        // A missing row means the migration seed was removed, treat as untouched.
        None => Ok(SwitchoverState::Idle),
        Some(raw) => raw.parse().map_err(|err| sqlx::Error::Decode(Box::new(err))),
    }
}

/// Reads the switchover state through a dedicated connection.
pub async fn read_state(connection: &mut PgConnection) -> Result<SwitchoverState, sqlx::Error> {
    let raw: Option<String> =
        sqlx::query_scalar("select current_state from switchover.state where ok")
            .fetch_optional(connection)
            .await?;

    decode_state(raw)
}

/// Reads the switchover state through any pooled connection.
pub async fn read_state_pooled(pool: &PgPool) -> Result<SwitchoverState, sqlx::Error> {
    let raw: Option<String> =
        sqlx::query_scalar("select current_state from switchover.state where ok")
            .fetch_optional(pool)
            .await?;

    decode_state(raw)
}

/// Stores `state` as the current switchover state.
pub async fn write_state(
    connection: &mut PgConnection,
    state: SwitchoverState,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        insert into switchover.state (ok, current_state)
        values (true, $1)
        on conflict (ok) do update set current_state = excluded.current_state
        "#,
    )
    .bind(state.as_str())
    .execute(connection)
    .await?;

    Ok(())
}
