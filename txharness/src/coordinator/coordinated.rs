// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Coordinated (prepare / execute / finalize) execution

use super::registry::TransactionMode;
use super::result::{CoordinationResult, FailureKind, ParticipantError, TransactionId};
use super::{participant_names, CoordinatorResult, DatabaseOperation, TransactionCoordinator};
use crate::config::TransactionConfig;
use crate::engine::{NativeContext, Participant};
use crate::error::EngineResult;
use std::time::Instant;

/// A native transaction opened for one operation.
///
/// `commit` and `rollback` consume the value, so a prepared transaction moves
/// to its final state exactly once.
struct PreparedTransaction {
    index: usize,
    participant: String,
    context: NativeContext,
}

impl PreparedTransaction {
    async fn commit(mut self) -> EngineResult<()> {
        if !self.context.is_transactional() {
            log::warn!(
                "participant '{}' has no native transactions; commit is a no-op",
                self.participant
            );
        }
        let outcome = self.context.commit().await;
        self.context.release().await;
        outcome
    }

    async fn rollback(mut self) -> EngineResult<()> {
        let outcome = self.context.rollback().await;
        self.context.release().await;
        outcome
    }
}

async fn prepare(
    participant: &Participant,
    config: &TransactionConfig,
) -> EngineResult<NativeContext> {
    let effective = config.effective_for(&participant.capabilities());
    let retries = config.retry.map(|r| r.attempts).unwrap_or(0);
    let mut attempt = 0;
    loop {
        match participant.open_transaction(&effective).await {
            Ok(context) => return Ok(context),
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                log::debug!(
                    "transient prepare failure on '{}' (attempt {}/{}): {}",
                    participant.name(),
                    attempt,
                    retries,
                    e
                );
                if let Some(retry) = config.retry {
                    tokio::time::sleep(retry.delay).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

impl TransactionCoordinator {
    /// Run every operation inside its participant's native transaction and
    /// commit all of them, or none.
    ///
    /// All prepares are attempted before any decision. Units of work run in
    /// input order and stop at the first failure. Commit and rollback failures
    /// are recorded without stopping the remaining participants.
    pub async fn execute_coordinated(
        &self,
        operations: Vec<DatabaseOperation>,
        config: &TransactionConfig,
    ) -> CoordinatorResult<CoordinationResult> {
        Self::check_capabilities(&operations, config)?;

        let guard = self.registry.register(
            TransactionId::new(),
            TransactionMode::Coordinated,
            participant_names(&operations),
        )?;
        let start = Instant::now();
        let mut result = CoordinationResult::new(guard.id());
        log::debug!(
            "coordinated transaction {} over {} operation(s)",
            guard.id(),
            operations.len()
        );

        // Phase 1: prepare everything, no short-circuit
        let mut prepared = Vec::with_capacity(operations.len());
        for (index, op) in operations.iter().enumerate() {
            let participant = op.participant();
            match prepare(participant, config).await {
                Ok(context) => {
                    log::debug!("prepared '{}' for '{}'", participant.name(), op.label());
                    prepared.push(PreparedTransaction {
                        index,
                        participant: participant.name(),
                        context,
                    });
                }
                Err(e) => {
                    log::warn!("prepare failed on '{}': {}", participant.name(), e);
                    result.record(ParticipantError::new(
                        participant.name(),
                        op.label(),
                        FailureKind::Prepare,
                        e,
                    ));
                }
            }
        }

        // Phase 2: run the work only when every prepare succeeded
        if result.errors.is_empty() {
            for tx in prepared.iter_mut() {
                let op = &operations[tx.index];
                if let Err(e) = op.run(tx.context.execution()).await {
                    log::warn!("operation '{}' failed on '{}': {}", op.label(), tx.participant, e);
                    result.record(ParticipantError::new(
                        tx.participant.clone(),
                        op.label(),
                        FailureKind::Operation,
                        e,
                    ));
                    break;
                }
            }
        }

        // Phase 3: finalize every prepared transaction
        let commit = result.errors.is_empty();
        result.success = commit;
        for tx in prepared {
            let label = operations[tx.index].label().to_string();
            let participant = tx.participant.clone();
            if commit {
                match tx.commit().await {
                    Ok(()) => {
                        log::debug!("committed '{}'", participant);
                        result.committed.push(participant);
                    }
                    Err(e) => {
                        log::error!("commit failed on '{}': {}", participant, e);
                        result.record(ParticipantError::new(
                            participant,
                            label,
                            FailureKind::Commit,
                            e,
                        ));
                    }
                }
            } else {
                match tx.rollback().await {
                    Ok(()) => {
                        log::debug!("rolled back '{}'", participant);
                        result.rolled_back.push(participant);
                    }
                    Err(e) => {
                        log::warn!("rollback failed on '{}': {}", participant, e);
                        result.record(ParticipantError::new(
                            participant,
                            label,
                            FailureKind::Rollback,
                            e,
                        ));
                    }
                }
            }
        }

        result.duration = start.elapsed();
        Ok(result)
    }
}
