// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Engine handle contracts
//!
//! This module provides:
//! - The shared 4-state handle lifecycle ([`EngineState`], [`Lifecycle`])
//! - Relational and document capability traits
//! - [`Participant`], the tagged union the coordinator dispatches on
//! - [`NativeContext`] / [`ExecutionContext`], the transaction or session a unit of work runs in
//! - In-memory engines for tests and an optional PostgreSQL adapter

pub mod context;
pub mod document;
pub mod lifecycle;
pub mod memory;
pub mod relational;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use context::{ExecutionContext, NativeContext};
pub use document::{with_transaction, DocumentConnector, DocumentEngine, DocumentSession};
pub use lifecycle::{EngineState, Lifecycle};
pub use relational::{QueryOutput, RelationalConnection, RelationalConnector, RelationalEngine, Row};

use crate::config::TransactionConfig;
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which capability set a handle implements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Relational,
    Document,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineKind::Relational => "relational",
            EngineKind::Document => "document",
        };
        write!(f, "{}", name)
    }
}

/// Transaction features an engine supports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Can open a native multi-statement transaction
    pub transactions: bool,
    /// Honours an explicit isolation level
    pub isolation_levels: bool,
    /// Honours a per-transaction timeout
    pub timeouts: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            transactions: true,
            isolation_levels: true,
            timeouts: true,
        }
    }

    pub fn none() -> Self {
        Self {
            transactions: false,
            isolation_levels: false,
            timeouts: false,
        }
    }
}

/// An engine handle taking part in a multi-engine call
#[derive(Clone)]
pub enum Participant {
    Relational(Arc<dyn RelationalEngine>),
    Document(Arc<dyn DocumentEngine>),
}

impl Participant {
    pub fn relational(engine: Arc<dyn RelationalEngine>) -> Self {
        Participant::Relational(engine)
    }

    pub fn document(engine: Arc<dyn DocumentEngine>) -> Self {
        Participant::Document(engine)
    }

    /// Identifier recorded in results and the registry
    pub fn name(&self) -> String {
        match self {
            Participant::Relational(engine) => engine.name().to_string(),
            Participant::Document(engine) => engine.name().to_string(),
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Participant::Relational(_) => EngineKind::Relational,
            Participant::Document(_) => EngineKind::Document,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Participant::Relational(engine) => engine.capabilities(),
            Participant::Document(engine) => engine.capabilities(),
        }
    }

    pub fn state(&self) -> EngineState {
        match self {
            Participant::Relational(engine) => engine.state(),
            Participant::Document(engine) => engine.state(),
        }
    }

    /// Open a native transaction with the given (already capability-filtered) config.
    ///
    /// Document participants without transaction support get a plain session whose
    /// commit is a no-op.
    pub(crate) async fn open_transaction(
        &self,
        config: &TransactionConfig,
    ) -> EngineResult<NativeContext> {
        match self {
            Participant::Relational(engine) => {
                let mut conn = engine.lease().await?;
                if let Err(e) = conn.begin(config).await {
                    conn.release().await;
                    return Err(e);
                }
                Ok(NativeContext::Relational {
                    conn,
                    in_transaction: true,
                })
            }
            Participant::Document(engine) => {
                let mut session = engine.start_session().await?;
                let in_transaction = engine.capabilities().transactions;
                if in_transaction {
                    if let Err(e) = session.start_transaction(config).await {
                        session.end_session().await;
                        return Err(e);
                    }
                }
                Ok(NativeContext::Document {
                    session,
                    in_transaction,
                })
            }
        }
    }

    /// Open a context without a native transaction (saga and eventual modes)
    pub(crate) async fn open_direct(&self) -> EngineResult<NativeContext> {
        match self {
            Participant::Relational(engine) => Ok(NativeContext::Relational {
                conn: engine.lease().await?,
                in_transaction: false,
            }),
            Participant::Document(engine) => Ok(NativeContext::Document {
                session: engine.start_session().await?,
                in_transaction: false,
            }),
        }
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Participant({}:{})", self.kind(), self.name())
    }
}

impl From<Arc<dyn RelationalEngine>> for Participant {
    fn from(engine: Arc<dyn RelationalEngine>) -> Self {
        Participant::Relational(engine)
    }
}

impl From<Arc<dyn DocumentEngine>> for Participant {
    fn from(engine: Arc<dyn DocumentEngine>) -> Self {
        Participant::Document(engine)
    }
}
