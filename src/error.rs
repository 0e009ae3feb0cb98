/// Unified error handling for pasarela
///
/// This module covers the error scenarios of the coordination subsystem:
/// XA protocol violations, routing failures, configuration problems and
/// backend/network faults.
use std::io;
use std::net::AddrParseError;
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for pasarela operations
#[derive(Debug, Error)]
pub enum PasarelaError {
    /// XA transaction protocol errors
    #[error("XA error: {0}")]
    Xa(#[from] XaError),

    /// All configured endpoints were unhealthy or unreachable at connect time
    #[error("no healthy node available after {attempts} attempt(s)")]
    NoHealthyNode { attempts: u32 },

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// Health probe timed out; only affects routing, never the query path
    #[error("health probe timed out for {address}")]
    ProbeTimeout { address: String },

    /// Backend connection errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Unknown logical session id
    #[error("no logical session registered for id {session_id}")]
    SessionNotFound { session_id: String },

    /// Address parsing errors
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] AddrParseError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// XA transaction-branch protocol errors
///
/// These surface synchronously to the caller as standard XA error codes.
#[derive(Debug, Error)]
pub enum XaError {
    /// A flag other than NOFLAGS was passed on the new-branch path
    #[error("invalid XA flag {flag} for xid {xid}: no existing branch to join or resume")]
    InvalidFlag { xid: String, flag: String },

    /// A NOFLAGS start found an already-registered branch for the xid
    #[error("duplicate transaction branch for xid {xid}")]
    DuplicateTransaction { xid: String },

    /// JOIN/RESUME with no prior NOFLAGS start for the xid
    #[error("no existing transaction context for xid {xid}")]
    NoExistingContext { xid: String },

    /// Operation attempted against a branch in the wrong state
    #[error("xid {xid} is {actual}, expected {expected}")]
    WrongState {
        xid: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// The backend resource rejected an operation (e.g. end without start)
    #[error("backend protocol error: {message}")]
    BackendProtocol { message: String },
}

/// Result type alias for pasarela operations
pub type PasarelaResult<T> = Result<T, PasarelaError>;

impl PasarelaError {
    /// Create a backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        PasarelaError::Backend {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        PasarelaError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (worth retrying on another node)
    pub fn is_recoverable(&self) -> bool {
        match self {
            PasarelaError::Network(_) => true,
            PasarelaError::Backend { .. } => true,
            PasarelaError::ProbeTimeout { .. } => true,
            _ => false,
        }
    }
}

impl XaError {
    pub fn backend_protocol<S: Into<String>>(message: S) -> Self {
        XaError::BackendProtocol {
            message: message.into(),
        }
    }
}
