//! Error handling types for title-bridge
//!
//! `BridgeError` is what the host sees when a bridge cannot be constructed.
//! `NativeError` is what the native boundary reports for a single call.

use std::sync::PoisonError;
use thiserror::Error;

/// Failure reported by a call across the native boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {detail}")]
pub struct NativeError {
    pub operation: &'static str,
    pub detail: String,
}

impl NativeError {
    pub fn new(operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            operation,
            detail: detail.into(),
        }
    }

    /// Failure identified only by a native status code.
    pub fn code(operation: &'static str, code: i32) -> Self {
        Self::new(operation, format!("status {code:#010x}"))
    }
}

/// Result type for calls across the native boundary
pub type NativeResult<T> = Result<T, NativeError>;

/// Errors surfaced while constructing or operating a bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No resolution path produced the native component
    #[error("{component} cannot be instantiated")]
    Instantiation {
        component: String,
        #[source]
        source: Option<NativeError>,
    },

    /// The component was created but a required sub-interface was not
    #[error("Session setup failed: {0}")]
    Session(#[source] NativeError),

    /// Process-wide native subsystem could not be initialized
    #[error("Subsystem initialization failed: {0}")]
    Subsystem(#[source] NativeError),

    /// The event sink could not be attached to the client
    #[error("Event sink could not be attached: {0}")]
    Sink(#[source] NativeError),

    /// Install path too shallow to derive a module root
    #[error("Install path {path} has fewer than {required} segments")]
    InstallPath { path: String, required: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Helper trait to recover a guard from a poisoned lock
pub trait LockResultExt<T> {
    /// Recover the guard from a poisoned lock, logging which operation hit it.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        self.unwrap_or_else(|poisoned| {
            log::warn!(
                target: "title_bridge::lock_recovery",
                "Recovered from poisoned lock in {}",
                context
            );
            poisoned.into_inner()
        })
    }
}

impl BridgeError {
    /// Create an instantiation error, optionally carrying the last native failure
    pub fn instantiation(component: impl Into<String>, source: Option<NativeError>) -> Self {
        BridgeError::Instantiation {
            component: component.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }
}
