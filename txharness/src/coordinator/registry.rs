// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Active transaction registry
//!
//! Every coordinator call registers itself for its whole duration. Entries are
//! removed by [`RegistryGuard`] on drop, so early returns and unwinding panics
//! clean up the same way a normal return does.

use super::result::TransactionId;
use crate::error::CoordinatorError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Execution mode of a registered call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMode {
    Coordinated,
    Saga,
    Eventual,
}

impl std::fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionMode::Coordinated => "coordinated",
            TransactionMode::Saga => "saga",
            TransactionMode::Eventual => "eventual",
        };
        write!(f, "{}", name)
    }
}

/// Snapshot of one in-flight coordinator call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTransaction {
    pub id: TransactionId,
    pub mode: TransactionMode,
    pub participants: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Entry {
    mode: TransactionMode,
    participants: Vec<String>,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Registry owned by one coordinator instance
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<TransactionId, Entry>>,
}

impl Registry {
    pub(crate) fn register(
        &self,
        id: TransactionId,
        mode: TransactionMode,
        participants: Vec<String>,
    ) -> Result<RegistryGuard<'_>, CoordinatorError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(CoordinatorError::RegistryCorrupted(format!(
                "transaction {} is already registered",
                id
            )));
        }
        entries.insert(
            id,
            Entry {
                mode,
                participants,
                started: Instant::now(),
                started_at: Utc::now(),
            },
        );
        Ok(RegistryGuard { registry: self, id })
    }

    pub(crate) fn snapshot(&self) -> Vec<ActiveTransaction> {
        let mut active: Vec<ActiveTransaction> = self
            .entries
            .lock()
            .iter()
            .map(|(id, entry)| ActiveTransaction {
                id: *id,
                mode: entry.mode,
                participants: entry.participants.clone(),
                started_at: entry.started_at,
                elapsed: entry.started.elapsed(),
            })
            .collect();
        active.sort_by_key(|t| t.started_at);
        active
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Removes its registry entry when dropped
pub(crate) struct RegistryGuard<'a> {
    registry: &'a Registry,
    id: TransactionId,
}

impl RegistryGuard<'_> {
    pub(crate) fn id(&self) -> TransactionId {
        self.id
    }
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        if self.registry.entries.lock().remove(&self.id).is_none() {
            log::warn!("transaction {} vanished from the registry", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_removes_entry() {
        let registry = Registry::default();
        {
            let guard = registry
                .register(TransactionId::new(), TransactionMode::Saga, vec!["pg".into()])
                .unwrap();
            let active = registry.snapshot();
            assert_eq!(active.len(), 1);
            assert_eq!(active[0].id, guard.id());
            assert_eq!(active[0].participants, vec!["pg".to_string()]);
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_duplicate_id_is_corruption() {
        let registry = Registry::default();
        let id = TransactionId::new();
        let _guard = registry
            .register(id, TransactionMode::Coordinated, Vec::new())
            .unwrap();
        assert!(matches!(
            registry.register(id, TransactionMode::Coordinated, Vec::new()),
            Err(CoordinatorError::RegistryCorrupted(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entry_removed_on_panic() {
        let registry = Registry::default();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry
                .register(TransactionId::new(), TransactionMode::Eventual, Vec::new())
                .unwrap();
            panic!("unit of work blew up");
        }));
        assert!(outcome.is_err());
        assert_eq!(registry.len(), 0);
    }
}
