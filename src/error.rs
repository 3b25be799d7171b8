//! Error types for pgvictoria.

use thiserror::Error;

/// Result type for pgvictoria operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Parsed fields of a PostgreSQL `ErrorResponse` or `NoticeResponse`.
///
/// Also used to build outbound error/notice frames when pgvictoria is
/// answering a client directly (auth failure, config rejection) rather
/// than relaying a backend response.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    pub severity: Option<String>,
    pub severity_non_localized: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<u32>,
    pub internal_position: Option<u32>,
    pub internal_query: Option<String>,
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub routine: Option<String>,
}

/// Alias kept for readability at call sites that treat this purely as
/// "the error the backend sent us", as opposed to one we are building.
pub type ServerError = ErrorFields;

impl ErrorFields {
    pub fn severity(&self) -> &str {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
            .unwrap_or_default()
    }

    pub fn code(&self) -> &str {
        self.code.as_deref().unwrap_or_default()
    }

    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Build a minimal fields set for a synthetic error pgvictoria raises itself
    /// (as opposed to one relayed from a backend).
    pub fn fatal(code: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Some("FATAL".to_string()),
            severity_non_localized: Some("FATAL".to_string()),
            code: Some(code.to_string()),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} (SQLSTATE {})",
            self.severity(),
            self.message(),
            self.code()
        )
    }
}

/// Config load/parse/validation failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    NotFoundOrParse,
    MasterKeyMissing,
    UserCountExceeded,
    ValidationFailed,
}

impl std::fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfigErrorKind::NotFoundOrParse => "file not found or unparseable",
            ConfigErrorKind::MasterKeyMissing => "master key unavailable",
            ConfigErrorKind::UserCountExceeded => "user count exceeds NUMBER_OF_USERS",
            ConfigErrorKind::ValidationFailed => "validation failed",
        };
        f.write_str(s)
    }
}

/// Error type for pgvictoria.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport read/write failed unrecoverably.
    #[error("transport error: {0}")]
    Transport(String),

    /// No data arrived within the caller's timeout window; retryable.
    #[error("transport timed out")]
    TransportTimeout,

    /// A frame was malformed, or an unexpected message arrived.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend sent an `ErrorResponse`.
    #[error("backend error: {0}")]
    Backend(ErrorFields),

    /// Cipher init/update/final failed, or key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Configuration loading, parsing, or validation failed.
    #[error("config error ({kind}): {message}")]
    Config {
        kind: ConfigErrorKind,
        message: String,
    },

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Connection is broken and cannot be reused.
    #[error("connection is broken")]
    ConnectionBroken,

    /// Invalid usage of the API.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config {
            kind,
            message: message.into(),
        }
    }

    /// True if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Transport(_) | Error::ConnectionBroken => true,
            Error::Backend(fields) => matches!(fields.severity(), "FATAL" | "PANIC"),
            _ => false,
        }
    }

    /// The SQLSTATE code, if this is a backend error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Backend(fields) => Some(fields.code()),
            _ => None,
        }
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized> From<zerocopy::error::CastError<Src, Dst>>
    for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Error::Crypto(err.to_string())
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}
