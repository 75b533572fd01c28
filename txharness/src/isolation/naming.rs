// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Unique names for ephemeral databases

use crate::config::{validate_identifier, MAX_IDENTIFIER_LEN};
use crate::error::ConfigError;

/// Hex digits in a per-test suffix (64 bits)
const TEST_SUFFIX_LEN: usize = 16;

/// `{prefix}_{16 hex digits}`
pub fn test_database_name(prefix: &str) -> Result<String, ConfigError> {
    suffixed(prefix, format!("{:016x}", fastrand::u64(..)))
}

/// `w{worker_id}_{8 hex digits}`
pub fn worker_database_name(worker_id: u32) -> String {
    format!("w{}_{:08x}", worker_id, fastrand::u32(..))
}

fn suffixed(prefix: &str, suffix: String) -> Result<String, ConfigError> {
    validate_identifier(prefix)?;
    if prefix.len() + 1 + TEST_SUFFIX_LEN > MAX_IDENTIFIER_LEN {
        return Err(ConfigError::InvalidValue {
            field: "database_prefix".to_string(),
            message: format!(
                "prefix '{}' leaves no room for a unique suffix",
                prefix
            ),
        });
    }
    Ok(format!("{}_{}", prefix, suffix))
}
