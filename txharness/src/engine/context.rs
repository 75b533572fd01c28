// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Native transaction/session contexts
//!
//! [`NativeContext`] owns a leased connection or a session for the duration of
//! one coordinator call. Units of work only ever see the borrowed
//! [`ExecutionContext`] view, so they cannot keep the connection past release.

use super::{DocumentSession, EngineKind, RelationalConnection};
use crate::error::{EngineError, EngineResult};

/// An owned connection or session, possibly inside a native transaction
pub enum NativeContext {
    Relational {
        conn: Box<dyn RelationalConnection>,
        in_transaction: bool,
    },
    Document {
        session: Box<dyn DocumentSession>,
        in_transaction: bool,
    },
}

impl NativeContext {
    pub fn kind(&self) -> EngineKind {
        match self {
            NativeContext::Relational { .. } => EngineKind::Relational,
            NativeContext::Document { .. } => EngineKind::Document,
        }
    }

    /// Whether commit/rollback talk to the engine or are no-ops
    pub fn is_transactional(&self) -> bool {
        match self {
            NativeContext::Relational { in_transaction, .. }
            | NativeContext::Document { in_transaction, .. } => *in_transaction,
        }
    }

    pub fn execution(&mut self) -> ExecutionContext<'_> {
        match self {
            NativeContext::Relational { conn, .. } => ExecutionContext::Relational(conn.as_mut()),
            NativeContext::Document { session, .. } => ExecutionContext::Document(session.as_mut()),
        }
    }

    pub async fn commit(&mut self) -> EngineResult<()> {
        match self {
            NativeContext::Relational {
                conn,
                in_transaction: true,
            } => conn.commit().await,
            NativeContext::Document {
                session,
                in_transaction: true,
            } => session.commit_transaction().await,
            _ => Ok(()),
        }
    }

    pub async fn rollback(&mut self) -> EngineResult<()> {
        match self {
            NativeContext::Relational {
                conn,
                in_transaction: true,
            } => conn.rollback().await,
            NativeContext::Document {
                session,
                in_transaction: true,
            } => session.abort_transaction().await,
            _ => Ok(()),
        }
    }

    /// Hand the connection back to its pool or end the session
    pub async fn release(self) {
        match self {
            NativeContext::Relational { conn, .. } => conn.release().await,
            NativeContext::Document { session, .. } => session.end_session().await,
        }
    }
}

/// Borrowed context handed to a unit of work
pub enum ExecutionContext<'a> {
    Relational(&'a mut dyn RelationalConnection),
    Document(&'a mut dyn DocumentSession),
}

impl<'a> ExecutionContext<'a> {
    pub fn kind(&self) -> EngineKind {
        match self {
            ExecutionContext::Relational(_) => EngineKind::Relational,
            ExecutionContext::Document(_) => EngineKind::Document,
        }
    }

    /// The relational connection, or an error naming the mismatch
    pub fn relational(self) -> EngineResult<&'a mut dyn RelationalConnection> {
        match self {
            ExecutionContext::Relational(conn) => Ok(conn),
            ExecutionContext::Document(_) => Err(EngineError::Unsupported(
                "expected a relational context, got a document session".to_string(),
            )),
        }
    }

    /// The document session, or an error naming the mismatch
    pub fn document(self) -> EngineResult<&'a mut dyn DocumentSession> {
        match self {
            ExecutionContext::Document(session) => Ok(session),
            ExecutionContext::Relational(_) => Err(EngineError::Unsupported(
                "expected a document session, got a relational connection".to_string(),
            )),
        }
    }
}
