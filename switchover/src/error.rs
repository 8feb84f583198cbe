//! Error types and result definitions for switchover operations.
//!
//! [`SwoError`] carries an [`ErrorKind`] used by callers to decide how to react
//! (retry, reset first, fix the configuration), a static description, optional
//! dynamic detail and source, and the callsite that created it. Failures on
//! both databases at once are aggregated into a single error.

use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Convenient result type for switchover operations.
pub type SwoResult<T> = Result<T, SwoError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
}

/// Main error type of the switchover core.
#[derive(Debug, Clone)]
pub struct SwoError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Errors collected from independent attempts, e.g. one per database.
    Many {
        errors: Vec<SwoError>,
        location: &'static Location<'static>,
    },
}

/// Classification of switchover failures.
///
/// Kinds are serialisable because a failure on the executing node is shipped
/// through the message log and raised again on the node that issued the command.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Pool exhausted or database unreachable. Retryable.
    ConnectionFailed,
    /// The execution lock is held by another session. Retryable by the caller.
    LockBusy,
    /// Execute was requested while the cluster is not ready.
    NotReady,
    /// The cluster does not have exactly one node allowed to execute.
    Misconfigured,
    /// The lifecycle capability was never attached.
    NotInitialized,
    /// A node did not acknowledge a command in time.
    AckTimeout,
    QueryFailed,
    InvalidState,
    SerializationError,
    DeserializationError,
    /// The physical cutover failed.
    ExecutionFailed,
    ConfigError,
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for failures that may go away on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionFailed | ErrorKind::LockBusy | ErrorKind::AckTimeout
        )
    }
}

impl SwoError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// Aggregates report the kind of their first error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => errors.iter().flat_map(|err| err.kinds()).collect(),
        }
    }

    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "multiple errors",
        }
    }

    /// Returns the dynamic detail of the error, or of the first aggregated error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// One line description without location, suitable for status reports.
    pub fn summary(&self) -> String {
        match &self.repr {
            ErrorRepr::Single(payload) => match &payload.detail {
                Some(detail) => format!("{}: {}", payload.description, detail),
                None => payload.description.to_string(),
            },
            ErrorRepr::Many { errors, .. } => errors
                .iter()
                .map(|e| e.summary())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// Attaches the originating error. Has no effect on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SwoError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
            }),
        }
    }
}

impl PartialEq for SwoError {
    fn eq(&self, other: &SwoError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for SwoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;
                if let Some(detail) = &payload.detail {
                    for line in detail.lines() {
                        write!(f, "\n  {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} errors aggregated @ {}:{}:{}",
                    errors.len(),
                    location.file(),
                    location.line(),
                    location.column()
                )?;
                for (index, error) in errors.iter().enumerate() {
                    for (line_index, line) in error.to_string().lines().enumerate() {
                        if line_index == 0 {
                            write!(f, "\n  {}. {line}", index + 1)?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for SwoError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SwoError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SwoError {
        SwoError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for SwoError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SwoError {
        SwoError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for SwoError
where
    E: Into<SwoError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SwoError {
        let location = Location::caller();
        let mut errors: Vec<SwoError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        SwoError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Maps driver failures: anything about reaching the server is a connection
/// failure, everything else is a failed query.
impl From<sqlx::Error> for SwoError {
    #[track_caller]
    fn from(err: sqlx::Error) -> SwoError {
        let (kind, description) = match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                (ErrorKind::ConnectionFailed, "Connection pool exhausted or closed")
            }
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => {
                (ErrorKind::ConnectionFailed, "Database connection failed")
            }
            sqlx::Error::Configuration(_) => (ErrorKind::ConfigError, "Invalid database configuration"),
            sqlx::Error::Decode(_) | sqlx::Error::ColumnDecode { .. } => {
                (ErrorKind::DeserializationError, "Failed to decode database value")
            }
            sqlx::Error::Database(db_err) if db_err.code().is_some_and(|code| code.starts_with("08")) => {
                (ErrorKind::ConnectionFailed, "Database connection failed")
            }
            _ => (ErrorKind::QueryFailed, "Database query failed"),
        };

        let detail = err.to_string();
        SwoError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<sqlx::migrate::MigrateError> for SwoError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> SwoError {
        let detail = err.to_string();
        SwoError::from_components(
            ErrorKind::QueryFailed,
            Cow::Borrowed("Switchover schema migration failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<serde_json::Error> for SwoError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SwoError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON serialization failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => {
                (ErrorKind::DeserializationError, "JSON deserialization failed")
            }
        };

        let detail = err.to_string();
        SwoError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<config::shared::ValidationError> for SwoError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> SwoError {
        let detail = err.to_string();
        SwoError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid switchover configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
