//! Error types for repair-intake.

use std::time::Duration;

use crate::intake::Stage;

/// Errors that stop the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Operator delivery errors. Never fatal to a conversation.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Notifier {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },

    #[error("Notifier {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("Notifier {name} gave up after {attempts} attempts: {last}")]
    Exhausted {
        name: String,
        attempts: u32,
        last: String,
    },
}

/// Rejections detected by the stage machine.
///
/// All of these are resolved inside the conversation: the user gets the
/// current prompt again, or (for an unknown category) the conversation ends.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Selection {value:?} is not offered at stage {stage}")]
    InvalidSelection { stage: Stage, value: String },

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Contact details are empty")]
    EmptyContacts,

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(String),
}
