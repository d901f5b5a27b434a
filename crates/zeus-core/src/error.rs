//! Error types for Zeus gateway operations.
//!
//! This module defines [`ZeusError`], the error enum shared across the Zeus
//! crates. Errors are designed for visibility: no silent failures, and any
//! failure that originates from a client request is surfaced back to that
//! client as an `error` event rather than crashing the gateway.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`ZeusError`].
pub type Result<T> = std::result::Result<T, ZeusError>;

/// Error type for all Zeus gateway operations.
#[derive(Debug, Error)]
pub enum ZeusError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Unknown provider tag
    #[error("Unknown provider: {provider}")]
    UnknownProvider { provider: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error with context
    #[error("I/O error {operation}: {path}")]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Workspace directory not found
    #[error("Workspace not found: {path}")]
    WorkspaceNotFound { path: PathBuf },

    /// Directory creation failed
    #[error("Failed to create directory: {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Malformed wire frame
    #[error("Malformed frame: {message}")]
    MalformedFrame { message: String },

    /// Envelope is missing a required field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Command type not recognized
    #[error("Unknown command: {command}")]
    UnknownCommand { command: String },

    // =========================================================================
    // Port Allocation Errors
    // =========================================================================
    /// The allocator's range is exhausted
    #[error("No free ports in range [{low}, {high})")]
    NoPortsAvailable { low: u16, high: u16 },

    /// Requested port already owned or bound
    #[error("Port {port} is not available: {reason}")]
    PortUnavailable { port: u16, reason: String },

    // =========================================================================
    // Worker Errors
    // =========================================================================
    /// Worker not found
    #[error("Worker not found: {worker_id}")]
    WorkerNotFound { worker_id: String },

    /// No healthy worker available for a provider
    #[error("No healthy workers for provider: {provider}")]
    NoHealthyWorkers { provider: String },

    /// Worker launch failed
    #[error("Failed to launch worker {worker_id}: {message}")]
    WorkerLaunch { worker_id: String, message: String },

    /// Worker never became ready
    #[error("Worker {worker_id} did not become ready within {deadline_secs}s")]
    WorkerReadyTimeout {
        worker_id: String,
        deadline_secs: u64,
    },

    /// Health probe failed
    #[error("Health probe failed for {worker_id}: {reason}")]
    ProbeFailed { worker_id: String, reason: String },

    // =========================================================================
    // Stream Errors
    // =========================================================================
    /// Outbound worker stream is not open
    #[error("Worker {worker_id} stream is not connected")]
    StreamNotConnected { worker_id: String },

    /// Worker stream connect failed
    #[error("Failed to connect to worker {worker_id}: {message}")]
    StreamConnect { worker_id: String, message: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal error (bug in Zeus)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ZeusError {
    /// Create an I/O error with context.
    pub fn io(
        operation: impl Into<String>,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }

    /// Create a malformed-frame error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Create a missing-field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create a worker-launch error.
    pub fn launch(worker_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerLaunch {
            worker_id: worker_id.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error was caused by client input and should be
    /// reported back without touching gateway state.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. }
                | Self::MissingField { .. }
                | Self::UnknownCommand { .. }
                | Self::UnknownProvider { .. }
        )
    }

    /// Returns true if this error is transient and the operation may succeed
    /// if retried (the worker involved is degraded, not removed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StreamNotConnected { .. }
                | Self::ProbeFailed { .. }
                | Self::NoHealthyWorkers { .. }
        )
    }

    /// Returns true if this is a worker lifecycle error.
    pub fn is_worker_error(&self) -> bool {
        matches!(
            self,
            Self::WorkerNotFound { .. }
                | Self::WorkerLaunch { .. }
                | Self::WorkerReadyTimeout { .. }
                | Self::NoHealthyWorkers { .. }
        )
    }

    /// Short hint attached to `error` events where one helps the client.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::StreamNotConnected { .. } => Some("worker may still be starting"),
            Self::NoHealthyWorkers { .. } => Some("spawn a worker first or enable auto-spawn"),
            Self::WorkerReadyTimeout { .. } => Some("check the worker's logs"),
            _ => None,
        }
    }
}
