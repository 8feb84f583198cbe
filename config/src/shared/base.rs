use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A duration or size field was zero.
    #[error("`{0}` cannot be zero")]
    Zero(&'static str),
    /// A field violates a constraint relative to another field.
    #[error("Invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: &'static str,
    },
    /// Old and new database point at the same place.
    #[error("`old_database` and `new_database` must refer to different databases")]
    SameDatabase,
}
