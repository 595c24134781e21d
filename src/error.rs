//! Error types for the chat relay.
//!
//! One error type covers both sides of the relay: the server that holds the
//! credential and the client session that consumes its replies. Server-side
//! variants know which HTTP status they surface as and how their JSON error
//! body looks; none of them ever carries the secret key.

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

use serde_json::{Value, json};

/// Body `error` string for an unconfigured relay.
pub const NOT_CONFIGURED: &str = "Chat service not configured";

/// The main error type for the chat relay.
#[derive(Clone, Debug)]
pub enum Error {
    /// The secret key is absent or still set to a placeholder.
    Configuration {
        /// Human-readable error message.
        message: String,
    },

    /// The inbound request body is malformed.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Field that failed validation.
        param: Option<String>,
    },

    /// The endpoint does not accept this HTTP method.
    MethodNotAllowed {
        /// The method that was used.
        method: String,
    },

    /// The calling identity exhausted its request window.
    RateLimit {
        /// Human-readable error message.
        message: String,
        /// Time to wait before retrying, in seconds.
        retry_after: Option<u64>,
    },

    /// Talking to the upstream API failed at the transport level.
    UpstreamTransport {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// The upstream (or the relay, seen from the client) answered non-2xx.
    UpstreamStatus {
        /// HTTP status code, passed through verbatim.
        status_code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// A single event frame could not be decoded.
    StreamFrame {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A streaming error occurred while reading a body.
    Streaming {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// Error during JSON serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// HTTP client error.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// Encoding/decoding error.
    Encoding {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new method-not-allowed error.
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Error::MethodNotAllowed {
            method: method.into(),
        }
    }

    /// Creates a new rate limit error.
    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a new upstream transport error.
    pub fn upstream_transport(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::UpstreamTransport {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new upstream status error.
    pub fn upstream_status(status_code: u16, message: impl Into<String>) -> Self {
        Error::UpstreamStatus {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a new stream frame error.
    pub fn stream_frame(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::StreamFrame {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new streaming error.
    pub fn streaming(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Streaming {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new encoding error.
    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Returns true if this error is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if this error is related to rate limiting.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimit { .. })
    }

    /// Returns true if this error is an upstream transport failure.
    pub fn is_upstream_transport(&self) -> bool {
        matches!(self, Error::UpstreamTransport { .. })
    }

    /// Returns true if this error is a non-2xx upstream answer.
    pub fn is_upstream_status(&self) -> bool {
        matches!(self, Error::UpstreamStatus { .. })
    }

    /// Returns the status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::UpstreamStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// The HTTP status the relay answers with when this error reaches a caller.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Configuration { .. } => 503,
            Error::Validation { .. } => 400,
            Error::MethodNotAllowed { .. } => 405,
            Error::RateLimit { .. } => 429,
            Error::UpstreamStatus { status_code, .. } => *status_code,
            _ => 500,
        }
    }

    /// The JSON body the relay answers with when this error reaches a caller.
    pub fn response_body(&self) -> Value {
        match self {
            Error::Configuration { message } if message.is_empty() => {
                json!({ "error": NOT_CONFIGURED })
            }
            Error::Configuration { message } => {
                json!({ "error": NOT_CONFIGURED, "message": message })
            }
            Error::Validation { message, .. } => {
                json!({ "error": format!("Invalid request: {message}") })
            }
            Error::MethodNotAllowed { .. } => json!({ "error": "Method not allowed" }),
            Error::RateLimit { message, .. } => {
                json!({ "error": "Rate limit exceeded", "message": message })
            }
            Error::UpstreamTransport { message, .. } => {
                json!({ "error": format!("API request failed: {message}") })
            }
            Error::UpstreamStatus { message, .. } => json!({ "error": message }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { message } => {
                if message.is_empty() {
                    write!(f, "Configuration error: {NOT_CONFIGURED}")
                } else {
                    write!(f, "Configuration error: {message}")
                }
            }
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (parameter: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
            Error::MethodNotAllowed { method } => {
                write!(f, "Method not allowed: {method}")
            }
            Error::RateLimit {
                message,
                retry_after,
            } => {
                if let Some(retry_after) = retry_after {
                    write!(
                        f,
                        "Rate limit exceeded: {message} (retry after {retry_after} seconds)"
                    )
                } else {
                    write!(f, "Rate limit exceeded: {message}")
                }
            }
            Error::UpstreamTransport { message, .. } => {
                write!(f, "API request failed: {message}")
            }
            Error::UpstreamStatus {
                status_code,
                message,
            } => {
                write!(f, "API error ({status_code}): {message}")
            }
            Error::StreamFrame { message, .. } => {
                write!(f, "Malformed stream frame: {message}")
            }
            Error::Streaming { message, .. } => {
                write!(f, "Streaming error: {message}")
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Encoding { message, .. } => {
                write!(f, "Encoding error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::UpstreamTransport { source, .. }
            | Error::StreamFrame { source, .. }
            | Error::Streaming { source, .. }
            | Error::Serialization { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Encoding { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::encoding(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
