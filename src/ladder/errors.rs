//! Ladder-specific error types

use thiserror::Error;

use super::types::OrderRef;

/// Errors that can occur while constructing or driving a ladder
#[derive(Error, Debug, Clone)]
pub enum LadderError {
    #[error("Invalid ladder configuration: {0}")]
    InvalidConfig(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Order {order_ref} rejected: {reason}")]
    OrderRejected { order_ref: OrderRef, reason: String },

    #[error("Ladder is in invalid state for operation: {current_state}")]
    InvalidState { current_state: String },

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Channel receive error: {0}")]
    ChannelRecv(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Settings error: {0}")]
    Settings(String),
}

impl From<serde_json::Error> for LadderError {
    fn from(err: serde_json::Error) -> Self {
        LadderError::JsonParse(err.to_string())
    }
}

impl From<std::io::Error> for LadderError {
    fn from(err: std::io::Error) -> Self {
        LadderError::Io(err.to_string())
    }
}

impl From<config::ConfigError> for LadderError {
    fn from(err: config::ConfigError) -> Self {
        LadderError::Settings(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LadderError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LadderError::ChannelSend(err.to_string())
    }
}

/// Result type for ladder operations
pub type LadderResult<T> = std::result::Result<T, LadderError>;
