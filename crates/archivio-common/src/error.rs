//! Error types for ArchivIO
//!
//! This module defines the common error types used throughout the system.

use crate::types::{IdError, ProviderNameError};
use thiserror::Error;

/// Common result type for ArchivIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ArchivIO
#[derive(Debug, Error)]
pub enum Error {
    // Registration errors
    #[error("registration not found: {0}")]
    RegistrationNotFound(String),

    #[error("registration already exists: {0}")]
    RegistrationAlreadyExists(String),

    #[error("registration is already archiving: {0}")]
    AlreadyArchiving(String),

    #[error("registration has been deleted: {0}")]
    RegistrationDeleted(String),

    #[error("provider {provider} not tracked on registration {registration}")]
    ProviderNotFound {
        registration: String,
        provider: String,
    },

    #[error("provider is not archivable: {0}")]
    ProviderNotArchivable(String),

    #[error("registration has no providers to archive")]
    NoProviders,

    #[error("provider {provider} on registration {registration} already finished as {status}")]
    TerminalStatus {
        registration: String,
        provider: String,
        status: String,
    },

    #[error("archive size {usage} bytes exceeds the configured limit of {max} bytes")]
    SizeExceeded { usage: u64, max: u64 },

    // Validation errors
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    #[error("invalid provider name: {0}")]
    InvalidProviderName(#[from] ProviderNameError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Callback token errors
    #[error("invalid callback token: {0}")]
    InvalidToken(String),

    #[error("callback token signature mismatch")]
    TokenSignatureMismatch,

    // Gateway errors
    #[error("gateway returned {status}: {message}")]
    GatewayResponse { status: u16, message: String },

    #[error("gateway response decode error: {0}")]
    Decode(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("request timeout")]
    Timeout,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    // Storage errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("registry store error: {0}")]
    Store(String),

    // Notification errors
    #[error("notification error: {0}")]
    Notify(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an invalid callback token error
    pub fn invalid_token(msg: impl Into<String>) -> Self {
        Self::InvalidToken(msg.into())
    }

    /// Create a registry store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a notification error
    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }

    /// Create a gateway response error
    pub fn gateway_response(status: u16, message: impl Into<String>) -> Self {
        Self::GatewayResponse {
            status,
            message: message.into(),
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::ServiceUnavailable(_) | Self::ConnectionFailed(_) => true,
            Self::GatewayResponse { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RegistrationNotFound(_) | Self::ProviderNotFound { .. }
        )
    }

    /// Get HTTP status code for the archive API
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidId(_)
            | Self::InvalidProviderName(_)
            | Self::InvalidRequest(_)
            | Self::InvalidToken(_)
            | Self::NoProviders
            | Self::ProviderNotArchivable(_) => 400,

            // 403 Forbidden
            Self::TokenSignatureMismatch => 403,

            // 404 Not Found
            Self::RegistrationNotFound(_) | Self::ProviderNotFound { .. } => 404,

            // 409 Conflict
            Self::RegistrationAlreadyExists(_)
            | Self::AlreadyArchiving(_)
            | Self::RegistrationDeleted(_)
            | Self::TerminalStatus { .. } => 409,

            // 413 Payload Too Large
            Self::SizeExceeded { .. } => 413,

            // 500 Internal Server Error
            Self::Internal(_)
            | Self::DiskIo(_)
            | Self::Store(_)
            | Self::Notify(_)
            | Self::Decode(_)
            | Self::Serialization(_) => 500,

            // 502 Bad Gateway
            Self::GatewayResponse { .. } => 502,

            // 503 Service Unavailable
            Self::ServiceUnavailable(_)
            | Self::Timeout
            | Self::ConnectionFailed(_)
            | Self::Configuration(_) => 503,
        }
    }
}
