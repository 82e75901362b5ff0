// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy for the device gateway

use std::time::Duration;

use crate::session::SessionState;

/// All errors that can occur in the aircon-lan-bridge library.
#[derive(Debug, thiserror::Error)]
pub enum AirconError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown property: {name}")]
    UnknownProperty { name: String },

    #[error("Invalid value {value:?} for property {name}: {reason}")]
    Validation {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Property {name} is read-only")]
    ReadOnly { name: String },

    #[error("Crypto error: {details}")]
    Crypto { details: String },

    #[error("Key id mismatch: configured {configured}, device advertised {advertised}")]
    KeyMismatch { configured: u32, advertised: u32 },

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Socket disconnected")]
    Disconnected,

    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },

    #[error("Session not ready (state: {state})")]
    NotReady { state: SessionState },

    #[error("Command {name}={value} failed after {attempts} retries")]
    CommandTimeout {
        name: String,
        value: String,
        attempts: u32,
    },

    #[error("Invalid credentials: {details}")]
    Credentials { details: String },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Unknown device: {id}")]
    UnknownDevice { id: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Channel closed")]
    ChannelClosed,
}

impl AirconError {
    /// Whether this error is a transient session failure that the reconnect
    /// loop should absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AirconError::Io(_)
                | AirconError::Timeout(_)
                | AirconError::Disconnected
                | AirconError::Crypto { .. }
                | AirconError::InvalidResponse { .. }
                | AirconError::Json(_)
        )
    }

    /// Whether this error was raised at the command boundary, before any
    /// network I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AirconError::UnknownProperty { .. }
                | AirconError::Validation { .. }
                | AirconError::ReadOnly { .. }
        )
    }

    pub(crate) fn crypto(details: impl Into<String>) -> Self {
        AirconError::Crypto {
            details: details.into(),
        }
    }

    pub(crate) fn invalid_response(details: impl Into<String>) -> Self {
        AirconError::InvalidResponse {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AirconError>;
