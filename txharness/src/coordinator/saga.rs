// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Saga execution with reverse-order compensation

use super::registry::TransactionMode;
use super::result::{CoordinationResult, FailureKind, ParticipantError, TransactionId};
use super::{participant_names, CoordinatorResult, DatabaseOperation, TransactionCoordinator};
use crate::error::{ConfigError, CoordinatorError};
use std::time::Instant;

impl TransactionCoordinator {
    /// Run operations one by one without native transactions.
    ///
    /// `compensations[i]` undoes `operations[i]`. On the first failure every
    /// completed step is compensated once, newest first. Compensation failures
    /// (including a missing compensation) are recorded and the remaining
    /// compensations still run. On failure `committed` is cleared and each
    /// successfully compensated participant is listed in `rolled_back`.
    pub async fn execute_saga(
        &self,
        operations: Vec<DatabaseOperation>,
        compensations: Vec<DatabaseOperation>,
    ) -> CoordinatorResult<CoordinationResult> {
        if compensations.len() > operations.len() {
            return Err(CoordinatorError::Config(ConfigError::InvalidValue {
                field: "compensations".to_string(),
                message: format!(
                    "{} compensations for {} operations",
                    compensations.len(),
                    operations.len()
                ),
            }));
        }

        let guard = self.registry.register(
            TransactionId::new(),
            TransactionMode::Saga,
            participant_names(&operations),
        )?;
        let start = Instant::now();
        let mut result = CoordinationResult::new(guard.id());
        let mut completed: Vec<usize> = Vec::new();

        for (index, op) in operations.iter().enumerate() {
            let participant = op.participant().name();
            match op.run_direct().await {
                Ok(()) => {
                    log::debug!("saga step {} '{}' done on '{}'", index, op.label(), participant);
                    result.committed.push(participant);
                    completed.push(index);
                }
                Err(e) => {
                    log::warn!(
                        "saga step {} '{}' failed on '{}': {}",
                        index,
                        op.label(),
                        participant,
                        e
                    );
                    result.success = false;
                    result.record(ParticipantError::new(
                        participant,
                        op.label(),
                        FailureKind::Operation,
                        e,
                    ));
                    break;
                }
            }
        }

        if !result.success {
            result.committed.clear();
            for &index in completed.iter().rev() {
                let step = &operations[index];
                let participant = step.participant().name();
                let Some(compensation) = compensations.get(index) else {
                    log::warn!("no compensation registered for saga step {}", index);
                    result.record(ParticipantError::new(
                        participant,
                        step.label(),
                        FailureKind::Compensation,
                        "no compensation registered",
                    ));
                    continue;
                };

                match compensation.run_direct().await {
                    Ok(()) => {
                        log::debug!("compensated saga step {} with '{}'", index, compensation.label());
                        result.rolled_back.push(participant);
                    }
                    Err(e) => {
                        log::warn!(
                            "compensation '{}' for saga step {} failed: {}",
                            compensation.label(),
                            index,
                            e
                        );
                        result.record(ParticipantError::new(
                            compensation.participant().name(),
                            compensation.label(),
                            FailureKind::Compensation,
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
