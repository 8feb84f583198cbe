use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::shared::ValidationError;

/// Application name reported by every switchover connection.
pub const SWITCHOVER_APPLICATION_NAME: &str = "switchover";

/// Session settings applied to every connection opened by a switchover node.
///
/// Keeps the lock and log sessions from being killed by server defaults tuned
/// for application traffic.
pub fn default_session_options() -> Vec<(&'static str, &'static str)> {
    vec![
        ("client_encoding", "UTF8"),
        ("idle_in_transaction_session_timeout", "60000"),
        ("lock_timeout", "5000"),
    ]
}

/// Configuration for connecting to a Postgres database.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Name of the database.
    pub name: String,
    pub username: String,
    /// Password for `username`, redacted in debug output.
    #[serde(default)]
    pub password: Option<SecretString>,
    pub tls: TlsConfig,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }

    /// Returns `true` when both configs address the same database on the same server.
    pub fn same_database(&self, other: &PgConnectionConfig) -> bool {
        self.host == other.host && self.port == other.port && self.name == other.name
    }
}

/// TLS settings for Postgres connections.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    #[serde(default)]
    pub trusted_root_certs: String,
    pub enabled: bool,
}

impl TlsConfig {
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled but no certificates are provided.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }
}

/// Converts a connection config into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Options for the server without selecting a database, used to create or drop databases.
    fn without_db(&self) -> Output;

    /// Options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<PgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            PgSslMode::VerifyFull
        } else {
            PgSslMode::Prefer
        };
        let mut options = PgConnectOptions::new_without_pgpass()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .application_name(SWITCHOVER_APPLICATION_NAME)
            .ssl_mode(ssl_mode)
            .options(default_session_options());

        if self.tls.enabled {
            options = options.ssl_root_cert_from_pem(self.tls.trusted_root_certs.clone().into_bytes());
        }
        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }

        options
    }

    fn with_db(&self) -> PgConnectOptions {
        let options: PgConnectOptions = self.without_db();
        options.database(&self.name)
    }
}
