// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Logging setup for test binaries
//!
//! Library code only talks to the `log` facade. Test suites call
//! [`init_test_logging`] to route those records through `env_logger`.

use std::sync::Once;

static INIT: Once = Once::new();

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "warn";

/// Install `env_logger` once per process.
///
/// The filter comes from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
/// Output goes through the test harness capture. Repeated calls are no-ops,
/// and a logger installed by someone else is left in place.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(DEFAULT_FILTER);
        if env_logger::Builder::from_env(env)
            .is_test(true)
            .try_init()
            .is_err()
        {
            log::debug!("a logger was already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_init_is_idempotent() {
        init_test_logging();
        init_test_logging();
        assert!(INIT.is_completed());
        log::warn!("logging initialised");
    }
}
