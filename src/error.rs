//! Error handling for jukebot.
//!
//! Provides a unified error type based on gRPC status codes, with mapping
//! from the underlying library errors to the appropriate category.
//!
//! # Error Categories
//!
//! * Authentication/authorization failures (401, 403)
//! * Resource state (404, 409)
//! * Client errors (400, 429)
//! * Server errors (500, 501, 503)
//! * Timeouts and cancellation (499, 504)
//!
//! Backend and network errors never cross the resolver or session boundary:
//! they are classified there (see [`ErrorKind::is_transient`]) and turned
//! into a "not found" result or an automatic skip.

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for jukebot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories based on gRPC status codes.
///
/// See [gRPC status codes](https://github.com/googleapis/googleapis/blob/master/google/rpc/code.proto)
/// for the original definitions.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u32)]
pub enum ErrorKind {
    /// HTTP Mapping: 499 Client Closed Request
    #[error("operation was cancelled")]
    Cancelled = 1,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unknown error")]
    Unknown = 2,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid argument specified")]
    InvalidArgument = 3,

    /// HTTP Mapping: 504 Gateway Timeout
    #[error("operation timed out")]
    DeadlineExceeded = 4,

    /// HTTP Mapping: 404 Not Found
    #[error("not found")]
    NotFound = 5,

    /// HTTP Mapping: 409 Conflict
    #[error("attempt to create what already exists")]
    AlreadyExists = 6,

    /// HTTP Mapping: 403 Forbidden
    #[error("permission denied")]
    PermissionDenied = 7,

    /// HTTP Mapping: 401 Unauthorized
    #[error("no valid authentication credentials")]
    Unauthenticated = 16,

    /// HTTP Mapping: 429 Too Many Requests
    #[error("resource has been exhausted")]
    ResourceExhausted = 8,

    /// HTTP Mapping: 400 Bad Request
    #[error("invalid state")]
    FailedPrecondition = 9,

    /// HTTP Mapping: 409 Conflict
    #[error("operation aborted")]
    Aborted = 10,

    /// HTTP Mapping: 400 Bad Request
    #[error("out of range")]
    OutOfRange = 11,

    /// HTTP Mapping: 501 Not Implemented
    #[error("not implemented")]
    Unimplemented = 12,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("internal error")]
    Internal = 13,

    /// HTTP Mapping: 503 Service Unavailable
    #[error("service unavailable")]
    Unavailable = 14,

    /// HTTP Mapping: 500 Internal Server Error
    #[error("unrecoverable data loss or corruption")]
    DataLoss = 15,
}

impl ErrorKind {
    /// Whether a backend failing with this kind should be retried elsewhere
    /// with a search hint: the backend is down, throttled or too slow, as
    /// opposed to simply not knowing the requested item.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Unavailable
                | Self::ResourceExhausted
                | Self::DeadlineExceeded
                | Self::Aborted
                | Self::Unauthenticated
                | Self::FailedPrecondition
        )
    }
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident => $kind:ident) => {
        $(#[$doc])*
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self {
                kind: ErrorKind::$kind,
                error: error.into(),
            }
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor!(
        /// Operation interrupted mid-execution (409).
        aborted => Aborted
    );
    constructor!(
        /// Operation cancelled before completion (499).
        cancelled => Cancelled
    );
    constructor!(
        /// Data corrupted or undecodable (500).
        data_loss => DataLoss
    );
    constructor!(
        /// Time-bound operation exceeded its limit (504).
        deadline_exceeded => DeadlineExceeded
    );
    constructor!(
        /// Operation cannot proceed in the current state (400).
        failed_precondition => FailedPrecondition
    );
    constructor!(
        /// Unexpected internal error (500).
        internal => Internal
    );
    constructor!(
        /// Provided arguments do not validate (400).
        invalid_argument => InvalidArgument
    );
    constructor!(
        /// Requested resource does not exist (404).
        not_found => NotFound
    );
    constructor!(
        /// Value exceeds its allowed bounds (400).
        out_of_range => OutOfRange
    );
    constructor!(
        /// Caller lacks necessary permissions (403).
        permission_denied => PermissionDenied
    );
    constructor!(
        /// Quota or rate limit reached (429).
        resource_exhausted => ResourceExhausted
    );
    constructor!(
        /// Credentials missing, invalid or expired (401).
        unauthenticated => Unauthenticated
    );
    constructor!(
        /// Service temporarily unavailable (503).
        unavailable => Unavailable
    );
    constructor!(
        /// Operation not implemented (501).
        unimplemented => Unimplemented
    );
    constructor!(
        /// Error that fits no other category (500).
        unknown => Unknown
    );

    /// Maps a non-success HTTP status onto an error kind.
    pub fn from_status<E>(status: reqwest::StatusCode, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        use reqwest::StatusCode;
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Self::not_found(error),
            StatusCode::TOO_MANY_REQUESTS => Self::resource_exhausted(error),
            StatusCode::UNAUTHORIZED => Self::unauthenticated(error),
            StatusCode::FORBIDDEN => Self::permission_denied(error),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::invalid_argument(error)
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                Self::deadline_exceeded(error)
            }
            status if status.is_server_error() => Self::unavailable(error),
            _ => Self::unknown(error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

/// Format: "{kind}: {details}"
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::not_found(err),
            PermissionDenied => Self::permission_denied(err),
            AddrInUse | AlreadyExists => Self::already_exists(err),
            AddrNotAvailable | ConnectionRefused | NotConnected => Self::unavailable(err),
            BrokenPipe | ConnectionReset | ConnectionAborted => Self::aborted(err),
            Interrupted | WouldBlock => Self::cancelled(err),
            UnexpectedEof => Self::data_loss(err),
            TimedOut => Self::deadline_exceeded(err),
            InvalidInput | InvalidData => Self::invalid_argument(err),
            WriteZero => Self::resource_exhausted(err),
            _ => Self::unknown(err),
        }
    }
}

impl Error {
    constructor!(
        /// Resource already exists (409).
        already_exists => AlreadyExists
    );
}

/// Maps HTTP client errors based on their nature:
/// * Body errors -> `DataLoss`
/// * Decode errors -> `InvalidArgument`
/// * Connect errors -> `Unavailable`
/// * Timeout errors -> `DeadlineExceeded`
/// * Status errors -> by status code
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::deadline_exceeded(err);
        }

        if err.is_body() {
            return Self::data_loss(err);
        }

        if err.is_decode() {
            return Self::invalid_argument(err);
        }

        if err.is_builder() {
            return Self::internal(err);
        }

        if err.is_connect() {
            return Self::unavailable(err);
        }

        if err.is_redirect() {
            return Self::resource_exhausted(err);
        }

        if let Some(status) = err.status() {
            return Self::from_status(status, err);
        }

        Self::unknown(err)
    }
}

/// Converts JSON errors through IO error mapping.
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        std::io::Error::from(err).into()
    }
}

/// Converts configuration parse errors to `InvalidArgument`.
impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts URL parsing errors to `InvalidArgument`.
impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts invalid header errors to `Internal`.
impl From<reqwest::header::InvalidHeaderValue> for Error {
    fn from(e: reqwest::header::InvalidHeaderValue) -> Self {
        Self::internal(e.to_string())
    }
}

/// Converts integer parsing errors to `InvalidArgument`.
impl From<std::num::ParseIntError> for Error {
    fn from(e: std::num::ParseIntError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts float parsing errors to `InvalidArgument`.
impl From<std::num::ParseFloatError> for Error {
    fn from(e: std::num::ParseFloatError) -> Self {
        Self::invalid_argument(e.to_string())
    }
}

/// Converts timeout errors to `DeadlineExceeded`.
impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Self::deadline_exceeded(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_shows_kind_and_details() {
        let err = Error::not_found("track does not exist");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.to_string(), "not found: track does not exist");
    }

    #[test]
    fn status_codes_map_to_kinds() {
        use reqwest::StatusCode;
        let kind = |status| Error::from_status(status, "x").kind;
        assert_eq!(kind(StatusCode::TOO_MANY_REQUESTS), ErrorKind::ResourceExhausted);
        assert_eq!(kind(StatusCode::NOT_FOUND), ErrorKind::NotFound);
        assert_eq!(kind(StatusCode::BAD_GATEWAY), ErrorKind::Unavailable);
        assert_eq!(kind(StatusCode::UNAUTHORIZED), ErrorKind::Unauthenticated);
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Unavailable.is_transient());
        assert!(ErrorKind::ResourceExhausted.is_transient());
        assert!(ErrorKind::DeadlineExceeded.is_transient());
        assert!(!ErrorKind::NotFound.is_transient());
        assert!(!ErrorKind::DataLoss.is_transient());
    }
}
