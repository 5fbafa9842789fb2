//! Shared error plumbing for the Skycast crates.
//!
//! Each crate owns a typed error enum. They all implement [`UserMessage`] so
//! the façade can show something actionable without inspecting internals,
//! while `Display` keeps the full context for logs.

use thiserror::Error;

/// UI-facing description of an error.
pub trait UserMessage {
    /// Returns a user-friendly message suitable for display in the UI.
    ///
    /// These messages are designed to be actionable and non-technical.
    fn user_message(&self) -> &'static str;
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl UserMessage for ConfigError {
    fn user_message(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "Configuration not found. Using defaults.",
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}
