// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Relational engine capability set

use super::{Capabilities, EngineState};
use crate::config::TransactionConfig;
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One result row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Outcome of a single statement
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
        }
    }

    pub fn with_rows(rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            rows,
            rows_affected,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row as an integer, for `SELECT COUNT(*)` style queries
    pub fn scalar_i64(&self) -> Option<i64> {
        self.rows
            .first()
            .and_then(|row| row.values().next())
            .and_then(|value| value.as_i64())
    }
}

/// Shared relational handle (pool/client)
#[async_trait]
pub trait RelationalEngine: Send + Sync {
    /// Participant identifier
    fn name(&self) -> &str;

    /// Database this handle is bound to
    fn database(&self) -> &str;

    fn state(&self) -> EngineState;

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn connect(&self) -> EngineResult<()>;

    async fn disconnect(&self) -> EngineResult<()>;

    /// Run one statement outside any explicit transaction
    async fn query(&self, sql: &str) -> EngineResult<QueryOutput>;

    /// Lease a dedicated connection; the caller must `release` it
    async fn lease(&self) -> EngineResult<Box<dyn RelationalConnection>>;

    async fn create_database(&self, name: &str) -> EngineResult<()>;

    /// Drop a database; `force` terminates other sessions connected to it
    async fn drop_database(&self, name: &str, force: bool) -> EngineResult<()>;
}

/// A connection leased from a [`RelationalEngine`]
#[async_trait]
pub trait RelationalConnection: Send {
    /// `BEGIN` with the capability-filtered config applied
    async fn begin(&mut self, config: &TransactionConfig) -> EngineResult<()>;

    async fn query(&mut self, sql: &str) -> EngineResult<QueryOutput>;

    async fn commit(&mut self) -> EngineResult<()>;

    async fn rollback(&mut self) -> EngineResult<()>;

    fn in_transaction(&self) -> bool;

    /// Return the connection to its engine
    async fn release(self: Box<Self>);
}

/// Builds unconnected handles bound to a named database
pub trait RelationalConnector: Send + Sync {
    fn handle_for(&self, database: &str) -> Arc<dyn RelationalEngine>;
}
