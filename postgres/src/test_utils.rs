use config::shared::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
use secrecy::SecretString;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

/// Builds a connection config for a fresh, uniquely named test database.
///
/// Reads `TESTS_DATABASE_HOST`, `TESTS_DATABASE_PORT`, `TESTS_DATABASE_USERNAME`
/// and optionally `TESTS_DATABASE_PASSWORD`.
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: std::env::var("TESTS_DATABASE_HOST").expect("TESTS_DATABASE_HOST must be set"),
        port: std::env::var("TESTS_DATABASE_PORT")
            .expect("TESTS_DATABASE_PORT must be set")
            .parse()
            .expect("TESTS_DATABASE_PORT must be a valid port number"),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .expect("TESTS_DATABASE_USERNAME must be set"),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(SecretString::new),
        tls: TlsConfig {
            trusted_root_certs: String::new(),
            enabled: false,
        },
    }
}

/// Creates the database described by `config` and returns a pool connected to it.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> PgPool {
    let mut connection = PgConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"create database "{}";"#, config.name))
        .await
        .expect("Failed to create database");

    PgPool::connect_with(config.with_db())
        .await
        .expect("Failed to connect to Postgres")
}

/// Terminates remaining sessions and drops the database described by `config`.
///
/// Never panics, cleanup failures are only reported.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db()).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("warning: failed to connect to Postgres for cleanup: {e}");
            return;
        }
    };

    if let Err(e) = connection
        .execute(&*format!(
            r#"
            select pg_terminate_backend(pg_stat_activity.pid)
            from pg_stat_activity
            where pg_stat_activity.datname = '{}'
            and pid <> pg_backend_pid();"#,
            config.name
        ))
        .await
    {
        eprintln!(
            "warning: failed to terminate connections for database {}: {}",
            config.name, e
        );
    }

    if let Err(e) = connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        eprintln!("warning: failed to drop database {}: {}", config.name, e);
    }
}
