//! Error Types
//!
//! Construction-time configuration errors, channel-level send errors, and the
//! crate-wide error enum used at module boundaries.

use thiserror::Error;

/// Invalid dispatch setup, detected before any message is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("variations are enabled but no non-blank text variant was provided")]
    NoTextVariants,

    #[error("variations are disabled, so exactly one text variant is required (got {count})")]
    SingleVariantRequired { count: usize },

    #[error("message text is empty and no media is attached")]
    EmptyMessage,

    #[error("media mode is enabled but no media variant was provided")]
    NoMediaVariants,

    #[error("at most {max} media variants are allowed (got {count})")]
    TooManyMediaVariants { count: usize, max: usize },

    #[error("media variant '{file_name}' has no content")]
    EmptyMedia { file_name: String },

    #[error("inter-message delay must be at least 1 second (got {0})")]
    InvalidDelay(u64),

    #[error("consecutive failure limit must be at least 1")]
    InvalidFailureLimit,
}

/// Failure reported by a messaging channel for a single send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum WacrmError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Stable machine-readable codes for [`WacrmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Configuration,
    Channel,
    Io,
    Serialization,
    InvalidInput,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Configuration => "E_CONFIG",
            ErrorCode::Channel => "E_CHANNEL",
            ErrorCode::Io => "E_IO",
            ErrorCode::Serialization => "E_SERDE",
            ErrorCode::InvalidInput => "E_INPUT",
        }
    }
}

impl WacrmError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WacrmError::Configuration(_) => ErrorCode::Configuration,
            WacrmError::Channel(_) => ErrorCode::Channel,
            WacrmError::Io(_) => ErrorCode::Io,
            WacrmError::Serialization(_) => ErrorCode::Serialization,
            WacrmError::InvalidInput(_) => ErrorCode::InvalidInput,
        }
    }
}

pub type Result<T> = std::result::Result<T, WacrmError>;
