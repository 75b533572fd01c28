// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Eventually consistent fan-out
//!
//! Every operation runs in its own tokio task and records its outcome as soon as
//! it resolves. The caller waits for all of them or for the timeout, whichever
//! comes first. What happens to work still running at the timeout is decided by
//! [`TimeoutPolicy`].

use super::registry::TransactionMode;
use super::result::{CoordinationResult, FailureKind, ParticipantError, TransactionId};
use super::{participant_names, CoordinatorResult, DatabaseOperation, TransactionCoordinator};
use crate::config::parse_duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Participant name used for coordinator-level timeout records
const COORDINATOR: &str = "coordinator";

/// Fate of in-flight work once the eventual-mode timeout fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    /// Stop waiting; the work keeps running and may still land later
    #[default]
    Detach,
    /// Abort the tasks that have not finished
    Abort,
}

impl std::fmt::Display for TimeoutPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPolicy::Detach => write!(f, "detach"),
            TimeoutPolicy::Abort => write!(f, "abort"),
        }
    }
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "detach" => Ok(TimeoutPolicy::Detach),
            "abort" | "cancel" => Ok(TimeoutPolicy::Abort),
            _ => Err(format!("Unknown timeout policy: {}", s)),
        }
    }
}

#[derive(Debug, Default)]
struct Outcome {
    committed: Vec<String>,
    errors: Vec<ParticipantError>,
}

struct Spawned {
    participant: String,
    label: String,
    handle: tokio::task::JoinHandle<()>,
    collected: bool,
}

impl Spawned {
    /// Join the task; a panic or cancellation is recorded as an operation failure
    async fn collect(&mut self, outcome: &Mutex<Outcome>) {
        let joined = (&mut self.handle).await;
        self.collected = true;
        if let Err(e) = joined {
            outcome.lock().errors.push(ParticipantError::new(
                self.participant.clone(),
                self.label.clone(),
                FailureKind::Operation,
                format!("task failed: {}", e),
            ));
        }
    }
}

impl TransactionCoordinator {
    /// Fire every operation concurrently and wait at most `timeout`.
    ///
    /// Each operation's success or failure is recorded independently, so
    /// `committed` may be non-empty while `success` is false. Reaching the
    /// timeout records a [`FailureKind::Timeout`] error.
    pub async fn execute_eventually_consistent(
        &self,
        operations: Vec<DatabaseOperation>,
        timeout: Duration,
    ) -> CoordinatorResult<CoordinationResult> {
        let guard = self.registry.register(
            TransactionId::new(),
            TransactionMode::Eventual,
            participant_names(&operations),
        )?;
        let start = Instant::now();
        let outcome = Arc::new(Mutex::new(Outcome::default()));

        let mut spawned: Vec<Spawned> = operations
            .into_iter()
            .map(|op| {
                let participant = op.participant().name();
                let label = op.label().to_string();
                let outcome = outcome.clone();
                let handle = tokio::spawn(async move {
                    let participant = op.participant().name();
                    match op.run_direct().await {
                        Ok(()) => outcome.lock().committed.push(participant),
                        Err(e) => {
                            log::warn!("eventual operation '{}' failed: {}", op.label(), e);
                            outcome.lock().errors.push(ParticipantError::new(
                                participant,
                                op.label(),
                                FailureKind::Operation,
                                e,
                            ));
                        }
                    }
                });
                Spawned {
                    participant,
                    label,
                    handle,
                    collected: false,
                }
            })
            .collect();

        let waited = tokio::time::timeout(timeout, async {
            for task in spawned.iter_mut() {
                task.collect(&outcome).await;
            }
        })
        .await;

        let mut timeout_errors = Vec::new();
        if waited.is_err() {
            // tasks that finished while the wait was blocked on an earlier one
            for task in spawned
                .iter_mut()
                .filter(|task| !task.collected && task.handle.is_finished())
            {
                task.collect(&outcome).await;
            }
            let pending: Vec<&Spawned> = spawned.iter().filter(|task| !task.collected).collect();
            if !pending.is_empty() {
                timeout_errors = self.handle_timeout(&pending, timeout);
            }
        }

        let mut result = CoordinationResult::new(guard.id());
        {
            let recorded = outcome.lock();
            result.committed = recorded.committed.clone();
            result.errors = recorded.errors.clone();
        }
        result.errors.extend(timeout_errors);
        result.success = result.errors.is_empty();
        result.duration = start.elapsed();
        Ok(result)
    }

    /// Like [`execute_eventually_consistent`](Self::execute_eventually_consistent)
    /// with the timeout given as a duration string such as `"5s"`
    pub async fn execute_eventually_consistent_within(
        &self,
        operations: Vec<DatabaseOperation>,
        timeout: &str,
    ) -> CoordinatorResult<CoordinationResult> {
        let timeout = parse_duration(timeout)?;
        self.execute_eventually_consistent(operations, timeout).await
    }

    /// Eventual execution bounded by the coordinator's configured timeout
    pub async fn execute_eventually_consistent_default(
        &self,
        operations: Vec<DatabaseOperation>,
    ) -> CoordinatorResult<CoordinationResult> {
        self.execute_eventually_consistent(operations, self.eventual_timeout)
            .await
    }

    fn handle_timeout(&self, pending: &[&Spawned], timeout: Duration) -> Vec<ParticipantError> {
        let names: Vec<&str> = pending.iter().map(|t| t.participant.as_str()).collect();
        match self.timeout_policy {
            TimeoutPolicy::Detach => {
                log::warn!(
                    "eventual execution timed out after {:?}; still running on {:?}",
                    timeout,
                    names
                );
                vec![ParticipantError::new(
                    COORDINATOR,
                    "eventual",
                    FailureKind::Timeout,
                    format!(
                        "timed out after {:?}; still running: {}",
                        timeout,
                        names.join(", ")
                    ),
                )]
            }
            TimeoutPolicy::Abort => pending
                .iter()
                .map(|task| {
                    task.handle.abort();
                    log::warn!(
                        "aborted '{}' on '{}' after {:?}",
                        task.label,
                        task.participant,
                        timeout
                    );
                    ParticipantError::new(
                        task.participant.clone(),
                        task.label.clone(),
                        FailureKind::Timeout,
                        format!("aborted after {:?}", timeout),
                    )
                })
                .collect(),
        }
    }
}
