// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for engines, the coordinator and the isolation harness
//!
//! Per-participant failures during coordinated, saga and eventual execution are
//! never returned as `Err`; they are captured in a
//! [`CoordinationResult`](crate::coordinator::CoordinationResult). The types in
//! this module cover everything else:
//! - [`EngineError`] - failures reported by an engine handle or its connections
//! - [`CoordinatorError`] - programmer misuse of the coordinator
//! - [`HarnessError`] - provisioning and sandbox failures
//! - [`ConfigError`] - invalid configuration values

use thiserror::Error;

/// Result type for engine handle operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Result type for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// Errors raised by an engine handle, a leased connection or a session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Could not establish or keep a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement or document operation failed
    #[error("Query error: {0}")]
    Query(String),

    /// Begin/commit/rollback failed
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Database, table or collection does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database, table or collection already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation is not valid in the handle's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The engine does not provide the requested capability
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Failure that may succeed when retried
    #[error("Transient error: {0}")]
    Transient(String),
}

impl EngineError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}

/// Coordinator misuse. Ordinary participant failures never surface here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    /// A participant lacks a capability the caller demanded
    #[error("Participant '{participant}' does not support {capability}")]
    UnsupportedCapability {
        participant: String,
        capability: String,
    },

    /// Configuration handed to the coordinator is invalid
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The active transaction registry is in an impossible state
    #[error("Registry corrupted: {0}")]
    RegistryCorrupted(String),
}

/// Errors raised while provisioning, sandboxing or tearing down test databases
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HarnessError {
    /// Creating, preparing or dropping an ephemeral database failed
    #[error("Provisioning failed for '{database}': {message}")]
    Provisioning { database: String, message: String },

    /// `setup` was called while a lease is still outstanding
    #[error("Sandbox already holds a leased connection")]
    LeaseOutstanding,

    /// An operation needed a lease but none is held
    #[error("Sandbox has no leased connection; call setup first")]
    NoLease,

    /// Underlying engine failure
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Invalid harness configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl HarnessError {
    pub(crate) fn provisioning(database: impl Into<String>, err: impl std::fmt::Display) -> Self {
        HarnessError::Provisioning {
            database: database.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while parsing or validating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Duration string could not be parsed
    #[error("Invalid duration '{0}': expected forms like 250ms, 5s, 2m, 1h")]
    InvalidDuration(String),

    /// Identifier does not satisfy database naming rules
    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A field holds an unusable value
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Configuration document could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}
