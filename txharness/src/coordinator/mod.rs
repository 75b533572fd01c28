// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Multi-engine transaction coordinator
//!
//! This module provides:
//! - Coordinated execution: prepare every participant, run the work, then commit
//!   all or roll back all
//! - Saga execution with reverse-order compensation
//! - Eventually consistent fan-out bounded by a timeout
//! - Timed consistency checks and a view of in-flight calls
//!
//! Per-participant failures are recorded in the returned [`CoordinationResult`].
//! Only misuse of the coordinator itself returns [`CoordinatorError`].

mod coordinated;
mod eventual;
pub mod operation;
mod registry;
pub mod result;
mod saga;

pub use eventual::TimeoutPolicy;
pub use operation::{
    DatabaseOperation, DeleteDocuments, InsertDocument, Statement, UnitOfWork, WorkFuture,
};
pub use registry::{ActiveTransaction, TransactionMode};
pub use result::{
    ConsistencyReport, CoordinationResult, FailureKind, ParticipantError, TransactionId,
};

use crate::config::{HarnessConfig, TransactionConfig};
use crate::engine::Participant;
use crate::error::{ConfigError, CoordinatorError};
use registry::Registry;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Eventual-mode timeout when none is configured
pub const DEFAULT_EVENTUAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for coordinator calls
pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

/// Drives operations across several engines
#[derive(Debug)]
pub struct TransactionCoordinator {
    registry: Registry,
    timeout_policy: TimeoutPolicy,
    eventual_timeout: Duration,
}

impl Default for TransactionCoordinator {
    fn default() -> Self {
        Self {
            registry: Registry::default(),
            timeout_policy: TimeoutPolicy::default(),
            eventual_timeout: DEFAULT_EVENTUAL_TIMEOUT,
        }
    }
}

impl TransactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinator whose eventual-mode timeout comes from `config`
    pub fn from_config(config: &HarnessConfig) -> Result<Self, ConfigError> {
        Ok(Self::new().with_eventual_timeout(config.eventual_timeout()?))
    }

    pub fn with_eventual_timeout(mut self, timeout: Duration) -> Self {
        self.eventual_timeout = timeout;
        self
    }

    /// Timeout used by [`execute_eventually_consistent_default`](Self::execute_eventually_consistent_default)
    pub fn eventual_timeout(&self) -> Duration {
        self.eventual_timeout
    }

    /// What eventual mode does with work still running when the timeout fires
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout_policy = policy;
        self
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        self.timeout_policy
    }

    /// Calls currently in flight on this coordinator
    pub fn active_transactions(&self) -> Vec<ActiveTransaction> {
        self.registry.snapshot()
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Time one invocation of `predicate` over `participants`.
    ///
    /// `Ok(false)` and `Err(_)` both yield an inconsistent report; the error
    /// message lands in `details`.
    pub async fn check_consistency<F, Fut, E>(
        &self,
        participants: Vec<Participant>,
        predicate: F,
    ) -> ConsistencyReport
    where
        F: FnOnce(Vec<Participant>) -> Fut,
        Fut: Future<Output = Result<bool, E>>,
        E: Display,
    {
        let names: Vec<String> = participants.iter().map(Participant::name).collect();
        let start = Instant::now();
        let outcome = predicate(participants).await;
        let duration = start.elapsed();

        let (is_consistent, details) = match outcome {
            Ok(true) => (true, None),
            Ok(false) => (
                false,
                Some(format!("predicate reported inconsistency across {:?}", names)),
            ),
            Err(e) => (false, Some(e.to_string())),
        };
        if !is_consistent {
            log::warn!(
                "consistency check across {:?} failed: {}",
                names,
                details.as_deref().unwrap_or_default()
            );
        }

        ConsistencyReport {
            is_consistent,
            duration,
            details,
        }
    }

    /// Reject the call up front when strict mode meets a non-transactional participant
    fn check_capabilities(
        operations: &[DatabaseOperation],
        config: &TransactionConfig,
    ) -> CoordinatorResult<()> {
        if !config.require_native_transactions {
            return Ok(());
        }
        match operations
            .iter()
            .find(|op| !op.participant().capabilities().transactions)
        {
            Some(op) => Err(CoordinatorError::UnsupportedCapability {
                participant: op.participant().name(),
                capability: "native transactions".to_string(),
            }),
            None => Ok(()),
        }
    }
}

fn participant_names(operations: &[DatabaseOperation]) -> Vec<String> {
    operations.iter().map(|op| op.participant().name()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryRelationalServer;
    use crate::error::EngineError;

    #[tokio::test]
    async fn test_check_consistency_reports_predicate_outcome() {
        let coordinator = TransactionCoordinator::new();
        let server = MemoryRelationalServer::new("pg");
        let pg = Participant::from(server.admin());

        let report = coordinator
            .check_consistency(vec![pg.clone()], |participants| async move {
                Ok::<_, EngineError>(participants.len() == 1)
            })
            .await;
        assert!(report.is_consistent);
        assert!(report.details.is_none());

        let report = coordinator
            .check_consistency(vec![pg], |_| async {
                Err::<bool, _>(EngineError::Query("count mismatch".into()))
            })
            .await;
        assert!(!report.is_consistent);
        assert!(report.details.unwrap().contains("count mismatch"));
    }

    #[test]
    fn test_eventual_timeout_from_config() {
        assert_eq!(
            TransactionCoordinator::new().eventual_timeout(),
            DEFAULT_EVENTUAL_TIMEOUT
        );
        let config = HarnessConfig::from_json_str(r#"{"eventual_timeout": "250ms"}"#).unwrap();
        let coordinator = TransactionCoordinator::from_config(&config).unwrap();
        assert_eq!(coordinator.eventual_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_default_policy_detaches() {
        let coordinator = TransactionCoordinator::new();
        assert_eq!(coordinator.timeout_policy(), TimeoutPolicy::Detach);
        let coordinator = coordinator.with_timeout_policy(TimeoutPolicy::Abort);
        assert_eq!(coordinator.timeout_policy(), TimeoutPolicy::Abort);
    }
}
