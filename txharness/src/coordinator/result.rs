// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Outcome records produced by the coordinator
//!
//! This module provides:
//! - [`TransactionId`]: UUID v4 identifier for one coordinator call
//! - [`FailureKind`] and [`ParticipantError`]: per-participant failure taxonomy
//! - [`CoordinationResult`]: the single record every execution mode returns
//! - [`ConsistencyReport`]: outcome of a timed consistency check

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Globally unique id of one coordinator call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where in the protocol a participant failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Opening the native transaction/session failed
    Prepare,
    /// The unit of work failed
    Operation,
    Commit,
    Rollback,
    /// A saga compensation failed or was missing
    Compensation,
    ConsistencyCheck,
    /// Creating or dropping an ephemeral database failed
    Provisioning,
    /// Eventual-mode wait expired
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Prepare => "PrepareFailure",
            FailureKind::Operation => "OperationFailure",
            FailureKind::Commit => "CommitFailure",
            FailureKind::Rollback => "RollbackFailure",
            FailureKind::Compensation => "CompensationFailure",
            FailureKind::ConsistencyCheck => "ConsistencyCheckFailure",
            FailureKind::Provisioning => "ProvisioningFailure",
            FailureKind::Timeout => "Timeout",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase();
        let trimmed = normalized.strip_suffix("failure").unwrap_or(&normalized);
        match trimmed {
            "prepare" => Ok(FailureKind::Prepare),
            "operation" => Ok(FailureKind::Operation),
            "commit" => Ok(FailureKind::Commit),
            "rollback" => Ok(FailureKind::Rollback),
            "compensation" => Ok(FailureKind::Compensation),
            "consistencycheck" => Ok(FailureKind::ConsistencyCheck),
            "provisioning" => Ok(FailureKind::Provisioning),
            "timeout" => Ok(FailureKind::Timeout),
            _ => Err(format!("Unknown failure kind: {}", s)),
        }
    }
}

/// One recorded failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantError {
    pub participant: String,
    /// Label of the originating operation
    pub operation: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ParticipantError {
    pub fn new(
        participant: impl Into<String>,
        operation: impl Into<String>,
        kind: FailureKind,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            participant: participant.into(),
            operation: operation.into(),
            kind,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ParticipantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on '{}' ({}): {}",
            self.kind, self.participant, self.operation, self.message
        )
    }
}

/// Outcome of one coordinator call.
///
/// `committed` and `rolled_back` never share an entry. For coordinated and saga
/// runs `committed` is non-empty only when `success` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationResult {
    pub transaction_id: TransactionId,
    pub success: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub committed: Vec<String>,
    pub rolled_back: Vec<String>,
    pub errors: Vec<ParticipantError>,
}

impl CoordinationResult {
    pub(crate) fn new(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id,
            success: true,
            duration: Duration::ZERO,
            committed: Vec::new(),
            rolled_back: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Succeeded without any recorded error, commit failures included
    pub fn is_clean(&self) -> bool {
        self.success && self.errors.is_empty()
    }

    pub fn errors_of(&self, kind: FailureKind) -> Vec<&ParticipantError> {
        self.errors.iter().filter(|e| e.kind == kind).collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub(crate) fn record(&mut self, error: ParticipantError) {
        self.errors.push(error);
    }
}

/// Outcome of [`check_consistency`](crate::coordinator::TransactionCoordinator::check_consistency)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// Failure message when the predicate errored or reported inconsistency
    pub details: Option<String>,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_micros() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}
