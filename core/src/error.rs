//! Error types for the portward-core library.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for portward operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing tunnels and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to launch the forwarding process.
    #[error("Failed to launch forwarding process: {reason}")]
    Launch { reason: String },

    /// A tunnel with the same identity is already registered.
    #[error("Tunnel already exists: {id}")]
    DuplicateTunnel { id: Uuid },

    /// No tunnel with the given identity is registered.
    #[error("Tunnel not found: {id}")]
    TunnelNotFound { id: Uuid },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
