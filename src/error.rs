//! Error types for the harness.
//!
//! Defines [`HarnessError`] for configuration and run-level failures and
//! [`RequestError`] for transport errors encountered while driving the
//! quota service.

/// Errors that occur during suite configuration parsing, validation, or file I/O.
///
/// All of these are fatal: they abort the run before any traffic is generated.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure -- the config parsed successfully but
    /// contains invalid values (e.g., empty suite, zero-duration stage).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// The target quota-service address is missing or malformed.
    #[error("Invalid target address: {message}")]
    Address { message: String },
}

/// Transport errors encountered while issuing a single request.
///
/// Each variant is a distinct category the metrics pipeline counts and
/// reports separately. A transport error is a harness-level failure: the
/// body is not parsed and the request is never retried.
#[derive(Debug, thiserror::Error, Clone)]
pub enum RequestError {
    /// The request exceeded the configured per-request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Connection-level failure (DNS resolution, TCP connect, TLS handshake).
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The service answered with a non-200 HTTP status. Domain failures are
    /// signaled inside a 200 body, so any non-200 is a transport fault.
    #[error("HTTP {status}")]
    Http { status: u16 },
}

impl RequestError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"timeout"`, `"connection"`, `"http"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection { .. } => "connection",
            Self::Http { .. } => "http",
        }
    }

    /// Classify a [`reqwest::Error`] into the appropriate [`RequestError`] variant.
    pub fn classify_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection {
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else {
            Self::Connection {
                message: err.to_string(),
            }
        }
    }
}
