// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory engines for testing
//!
//! Both servers keep all state behind one `parking_lot::Mutex` and hand out
//! handles bound to a named database, mirroring how a real client connects to a
//! single database on a shared server. A transaction reads from a private view
//! taken at begin and records its writes, which are applied to the live data at
//! commit.
//!
//! Faults can be injected per server to exercise failure paths deterministically.

mod document;
mod relational;
mod sql;

pub use document::{MemoryDocumentEngine, MemoryDocumentServer};
pub use relational::{MemoryRelationalEngine, MemoryRelationalServer};

use crate::engine::Participant;
use crate::error::EngineError;
use std::collections::HashMap;
use std::sync::Arc;

/// Points where an injected failure can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Handle `connect`
    Connect,
    /// Leasing a connection / starting a session
    Lease,
    /// Opening a native transaction
    Begin,
    /// Any statement or document operation
    Query,
    Commit,
    Rollback,
    CreateDatabase,
    DropDatabase,
}

#[derive(Debug, Clone, Copy)]
struct PendingFault {
    remaining: u32,
    transient: bool,
}

/// Pending injected failures
#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pending: HashMap<Fault, PendingFault>,
}

impl FaultPlan {
    pub(crate) fn inject(&mut self, fault: Fault, times: u32, transient: bool) {
        self.pending.insert(
            fault,
            PendingFault {
                remaining: times,
                transient,
            },
        );
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }

    /// Consume one pending failure for `fault`, if any
    pub(crate) fn trigger(&mut self, fault: Fault) -> Result<(), EngineError> {
        let Some(pending) = self.pending.get_mut(&fault) else {
            return Ok(());
        };
        if pending.remaining == 0 {
            return Ok(());
        }
        pending.remaining -= 1;
        let transient = pending.transient;
        if pending.remaining == 0 {
            self.pending.remove(&fault);
        }

        let message = format!("injected {:?} failure", fault);
        Err(if transient {
            EngineError::Transient(message)
        } else {
            match fault {
                Fault::Connect | Fault::Lease => EngineError::Connection(message),
                Fault::Query | Fault::CreateDatabase | Fault::DropDatabase => {
                    EngineError::Query(message)
                }
                Fault::Begin | Fault::Commit | Fault::Rollback => EngineError::Transaction(message),
            }
        })
    }
}

impl From<Arc<MemoryRelationalEngine>> for Participant {
    fn from(engine: Arc<MemoryRelationalEngine>) -> Self {
        Participant::Relational(engine)
    }
}

impl From<Arc<MemoryDocumentEngine>> for Participant {
    fn from(engine: Arc<MemoryDocumentEngine>) -> Self {
        Participant::Document(engine)
    }
}
