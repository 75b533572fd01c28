// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction and harness configuration
//!
//! This module provides:
//! - [`TransactionConfig`] applied by the coordinator at prepare time
//! - [`IsolationLevel`] and [`RetryPolicy`]
//! - Duration string parsing (`250ms`, `5s`, `2m`, `1h`)
//! - Identifier validation for generated database names
//! - [`HarnessConfig`], the validated settings handed over by an external resolver

mod connection;

pub use connection::{EngineConnectionConfig, EnvironmentPreset, HarnessConfig};

use crate::engine::Capabilities;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum identifier length accepted by the relational engines we target
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Transaction isolation level requested at prepare time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    /// Document-store snapshot read concern
    Snapshot,
}

impl IsolationLevel {
    /// SQL spelling used in `BEGIN ISOLATION LEVEL ...`
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead | IsolationLevel::Snapshot => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_'], " ").as_str() {
            "read uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "read committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            "snapshot" => Ok(IsolationLevel::Snapshot),
            _ => Err(ConfigError::InvalidValue {
                field: "isolation_level".to_string(),
                message: format!("unknown isolation level '{}'", s),
            }),
        }
    }
}

/// Fixed-delay retry settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Per-call transaction settings
///
/// Fields an engine cannot honour are dropped by [`TransactionConfig::effective_for`]
/// before they reach the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionConfig {
    pub isolation_level: IsolationLevel,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// Refuse participants that cannot open a native transaction instead of
    /// committing them as a no-op
    #[serde(default)]
    pub require_native_transactions: bool,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the timeout from a human duration string such as `"5s"`
    pub fn with_timeout_str(self, timeout: &str) -> Result<Self, ConfigError> {
        Ok(self.with_timeout(parse_duration(timeout)?))
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = Some(RetryPolicy::new(attempts, delay));
        self
    }

    pub fn strict(mut self) -> Self {
        self.require_native_transactions = true;
        self
    }

    /// Settings that survive the participant's capability set.
    ///
    /// Unsupported isolation falls back to the default level and an unsupported
    /// timeout is dropped. Retry is handled by the coordinator and always kept.
    pub fn effective_for(&self, capabilities: &Capabilities) -> TransactionConfig {
        TransactionConfig {
            isolation_level: if capabilities.isolation_levels {
                self.isolation_level
            } else {
                IsolationLevel::default()
            },
            timeout: if capabilities.timeouts {
                self.timeout
            } else {
                None
            },
            retry: self.retry,
            require_native_transactions: self.require_native_transactions,
        }
    }
}

/// Parse `250ms`, `5s`, `2m`, `1h` or a bare number of milliseconds
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split_at);
    if digits.is_empty() {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        "h" => value
            .checked_mul(3600)
            .map(Duration::from_secs)
            .ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

/// Validate a database/table identifier before it is interpolated into SQL
pub fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidIdentifier(name.to_string());

    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid());
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid());
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 40 ").unwrap(), Duration::from_millis(40));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "s", "5x", "-1s", "1.5s", "ten seconds"] {
            assert!(
                matches!(parse_duration(bad), Err(ConfigError::InvalidDuration(_))),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_effective_config_drops_unsupported_fields() {
        let config = TransactionConfig::new()
            .with_isolation(IsolationLevel::Serializable)
            .with_timeout(Duration::from_secs(3))
            .with_retry(2, Duration::from_millis(5));

        let bare = Capabilities {
            transactions: true,
            isolation_levels: false,
            timeouts: false,
        };
        let effective = config.effective_for(&bare);
        assert_eq!(effective.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(effective.timeout, None);
        assert_eq!(effective.retry, config.retry);

        let full = Capabilities::full();
        assert_eq!(config.effective_for(&full), config);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("w1_ab12cd34").is_ok());
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("drop table;").is_err());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_isolation_level_from_str() {
        assert_eq!(
            "repeatable_read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "SERIALIZABLE".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Serializable
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }
}
