//! Error types for navdata decoding and the relay pipeline.
//!
//! All errors implement `std::error::Error` and carry enough context to tell
//! which stage of the pipeline produced them.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: socket bind, send or receive failures other than
//!   "would block". Fatal to the multiplexer.
//! - **Decode Errors**: truncated headers or malformed option records. Scoped to
//!   a single datagram; the datagram is dropped and the loop continues.
//! - **Configuration Errors**: invalid or unreadable link configuration.
//! - **Worker Errors**: a pipeline component could not be started or joined.
//!
//! Shutdown is not an error: a stopped multiplexer returns its statistics.
//!
//! ```rust
//! use dronewire::TelemetryError;
//!
//! let error = TelemetryError::decode("navdata header", "need 16 bytes, have 3");
//! assert!(!error.is_fatal());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for dronewire operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Main error type for dronewire operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Transport failure during {operation}")]
    Transport {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Invalid configuration: {details}")]
    Config { details: String },

    #[error("Configuration file error: {path}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Channel '{channel}' closed")]
    ChannelClosed { channel: String },

    #[error("Pipeline worker failed: {reason}")]
    Worker { reason: String },
}

impl TelemetryError {
    /// Returns whether this error ends the component that hit it.
    ///
    /// Decode errors only cost a single datagram; everything else stops the
    /// owning loop.
    pub fn is_fatal(&self) -> bool {
        match self {
            TelemetryError::Transport { .. } => true,
            TelemetryError::Decode { .. } => false,
            TelemetryError::Config { .. } => true,
            TelemetryError::ConfigFile { .. } => true,
            TelemetryError::Timeout { .. } => false,
            TelemetryError::ChannelClosed { .. } => true,
            TelemetryError::Worker { .. } => true,
        }
    }

    /// Returns whether reconnecting (a fresh `DroneLink`) may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Transport { .. } => true,
            TelemetryError::Timeout { .. } => true,
            TelemetryError::Worker { .. } => true,
            TelemetryError::ChannelClosed { .. } => true,
            TelemetryError::Decode { .. } => false,
            TelemetryError::Config { .. } => false,
            TelemetryError::ConfigFile { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::Transport { .. } => vec![
                "Check that the drone's WiFi network is joined",
                "Make sure no other process holds UDP ports 5554/5555",
                "Verify the drone address in the link configuration",
            ],
            TelemetryError::Decode { .. } => vec![
                "Check that the sender speaks the navdata wire format",
                "Ignore isolated failures; the next datagram replaces this one",
            ],
            TelemetryError::Config { .. } => vec![
                "Check port numbers and poll interval are non-zero",
                "Compare against LinkConfig::default()",
            ],
            TelemetryError::ConfigFile { .. } => vec![
                "Check the file exists and is readable",
                "Validate the YAML syntax",
            ],
            TelemetryError::Timeout { .. } => vec![
                "Increase the timeout",
                "Check the drone is powered and streaming",
            ],
            TelemetryError::ChannelClosed { .. } => vec![
                "The producing side has exited; inspect its shutdown result",
                "Reconnect to restart the pipeline",
            ],
            TelemetryError::Worker { .. } => vec![
                "Check system thread limits",
                "Reconnect to restart the pipeline",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(operation: impl Into<String>, source: std::io::Error) -> Self {
        TelemetryError::Transport { operation: operation.into(), source }
    }

    /// Helper constructor for decode errors.
    pub fn decode(context: impl Into<String>, details: impl Into<String>) -> Self {
        TelemetryError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        TelemetryError::Config { details: details.into() }
    }

    /// Helper constructor for configuration file errors.
    pub fn config_file(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TelemetryError::ConfigFile { path: path.into(), source: source.into() }
    }

    /// Helper constructor for closed channel errors.
    pub fn channel_closed(channel: impl Into<String>) -> Self {
        TelemetryError::ChannelClosed { channel: channel.into() }
    }

    /// Helper constructor for worker errors.
    pub fn worker(reason: impl Into<String>) -> Self {
        TelemetryError::Worker { reason: reason.into() }
    }
}

impl From<std::io::Error> for TelemetryError {
    fn from(err: std::io::Error) -> Self {
        TelemetryError::Transport { operation: "socket operation".to_string(), source: err }
    }
}
