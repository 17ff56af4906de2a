//! Error types for the APK agent
//!
//! Errors carry enough context (endpoint, resource kind, member name) to debug a
//! failed sync from the log line alone. `is_retryable` separates transient I/O
//! from malformed input and terminal rejections.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for agent operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// HTTP transport error talking to the control plane or CR generator
    #[error("http error: {source}")]
    Http {
        /// The underlying reqwest error
        #[from]
        source: reqwest::Error,
    },

    /// Non-success response from the control plane
    #[error("control plane returned {status} for {endpoint}: {message}")]
    ControlPlane {
        /// HTTP status code
        status: u16,
        /// Resource path that was called
        endpoint: String,
        /// Response body or reason
        message: String,
    },

    /// CR generation service failure
    #[error("CR generation failed: {message}")]
    CrGeneration {
        /// Description of what failed
        message: String,
        /// HTTP status code, if a response was received
        status: Option<u16>,
    },

    /// Malformed API archive
    #[error("archive error: {message}")]
    Archive {
        /// Description of what's wrong
        message: String,
        /// Archive member involved (if known)
        member: Option<String>,
    },

    /// Malformed broker envelope or payload
    #[error("envelope error: {message}")]
    Envelope {
        /// Description of what's wrong
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Invalid agent configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Fetch queue is at capacity
    #[error("fetch queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Broker connection or channel error
    #[error("broker error [{exchange}]: {message}")]
    Broker {
        /// Exchange being consumed
        exchange: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "grpc", "http", "pool")
        context: String,
    },
}

impl Error {
    /// Create a control-plane error for a non-success status
    pub fn control_plane(status: u16, endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ControlPlane {
            status,
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a CR generation error without a response status
    pub fn cr_generation(msg: impl Into<String>) -> Self {
        Self::CrGeneration {
            message: msg.into(),
            status: None,
        }
    }

    /// Create a CR generation error for a non-success status
    pub fn cr_generation_status(status: u16, msg: impl Into<String>) -> Self {
        Self::CrGeneration {
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Create an archive error
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive {
            message: msg.into(),
            member: None,
        }
    }

    /// Create an archive error naming the offending member
    pub fn archive_member(member: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Archive {
            message: msg.into(),
            member: Some(member.into()),
        }
    }

    /// Create an envelope error
    pub fn envelope(msg: impl Into<String>) -> Self {
        Self::Envelope {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a broker error
    pub fn broker(exchange: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Broker {
            exchange: exchange.into(),
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Create an internal error without specific context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::internal_with_context(msg, UNKNOWN_CONTEXT)
    }

    /// Whether the operation that produced this error may succeed if repeated
    ///
    /// Transport failures and 5xx responses are transient. 4xx responses,
    /// malformed input and configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source } => source.status().map_or(true, |s| s.is_server_error()),
            // a 2xx surfaced as an error carried an unusable (empty) body
            Self::ControlPlane { status, .. } => *status >= 500 || (200..300).contains(status),
            Self::Kube { source } => match source {
                kube::Error::Api(resp) => resp.code >= 500 || resp.code == 409 || resp.code == 429,
                _ => true,
            },
            Self::Broker { .. } => true,
            _ => false,
        }
    }

    /// Whether this is a Kubernetes 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube { source: kube::Error::Api(resp) } if resp.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(e: zip::result::ZipError) -> Self {
        Self::archive(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::internal_with_context(e.to_string(), "io")
    }
}
