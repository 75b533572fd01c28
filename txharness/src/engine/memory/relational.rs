// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory relational server
//!
//! Each database carries an epoch. Handles and leased connections remember the
//! epoch they attached to, so a forced drop (or drop-and-recreate under the same
//! name) terminates them the way a real server kills backend sessions.

use super::sql::{self, Tables};
use super::{Fault, FaultPlan};
use crate::config::TransactionConfig;
use crate::engine::relational::{
    QueryOutput, RelationalConnection, RelationalConnector, RelationalEngine, Row,
};
use crate::engine::{EngineState, Lifecycle};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Database every server starts with; admin handles bind to it
pub const CONTROL_DATABASE: &str = "postgres";

#[derive(Debug)]
struct Database {
    tables: Tables,
    epoch: u64,
    connections: usize,
}

#[derive(Debug)]
struct ServerState {
    databases: HashMap<String, Database>,
    next_epoch: u64,
    faults: FaultPlan,
}

impl ServerState {
    fn create(&mut self, name: &str) -> EngineResult<()> {
        if self.databases.contains_key(name) {
            return Err(EngineError::AlreadyExists(format!(
                "database \"{}\" already exists",
                name
            )));
        }
        self.next_epoch += 1;
        self.databases.insert(
            name.to_string(),
            Database {
                tables: Tables::new(),
                epoch: self.next_epoch,
                connections: 0,
            },
        );
        Ok(())
    }

    /// The database if it still is the incarnation identified by `epoch`
    fn live(&mut self, name: &str, epoch: u64) -> EngineResult<&mut Database> {
        match self.databases.get_mut(name) {
            Some(db) if db.epoch == epoch => Ok(db),
            _ => Err(EngineError::Connection(format!(
                "connection to database \"{}\" was terminated",
                name
            ))),
        }
    }

    fn detach(&mut self, name: &str, epoch: u64) {
        if let Ok(db) = self.live(name, epoch) {
            db.connections = db.connections.saturating_sub(1);
        }
    }
}

/// A shared in-memory relational server holding named databases
#[derive(Debug, Clone)]
pub struct MemoryRelationalServer {
    name: String,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryRelationalServer {
    /// New server whose handles report `name` as their participant name
    pub fn new(name: impl Into<String>) -> Self {
        let mut state = ServerState {
            databases: HashMap::new(),
            next_epoch: 0,
            faults: FaultPlan::default(),
        };
        let _ = state.create(CONTROL_DATABASE);
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Unconnected handle bound to `database`
    pub fn handle(&self, database: &str) -> Arc<MemoryRelationalEngine> {
        self.handle_named(&self.name, database)
    }

    /// Unconnected handle with an explicit participant name
    pub fn handle_named(&self, name: &str, database: &str) -> Arc<MemoryRelationalEngine> {
        Arc::new(MemoryRelationalEngine {
            name: name.to_string(),
            database: database.to_string(),
            lifecycle: Lifecycle::new(name),
            epoch: Mutex::new(None),
            state: self.state.clone(),
        })
    }

    /// Unconnected handle bound to the control database
    pub fn admin(&self) -> Arc<MemoryRelationalEngine> {
        self.handle_named(&format!("{}-admin", self.name), CONTROL_DATABASE)
    }

    /// Create `name` unless it already exists (test setup shortcut)
    pub fn ensure_database(&self, name: &str) {
        let mut state = self.state.lock();
        if !state.databases.contains_key(name) {
            let _ = state.create(name);
        }
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.state.lock().databases.contains_key(name)
    }

    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Committed rows of `table`, or `None` if the database or table is missing
    pub fn table_rows(&self, database: &str, table: &str) -> Option<Vec<Row>> {
        let state = self.state.lock();
        state
            .databases
            .get(database)
            .and_then(|db| db.tables.get(table))
            .map(|t| t.rows.clone())
    }

    /// Connected handles plus outstanding leases on `database`
    pub fn active_connections(&self, database: &str) -> usize {
        self.state
            .lock()
            .databases
            .get(database)
            .map_or(0, |db| db.connections)
    }

    /// Fail the next `times` occurrences of `fault`
    pub fn inject_fault(&self, fault: Fault, times: u32) {
        self.state.lock().faults.inject(fault, times, false);
    }

    /// Like [`inject_fault`](Self::inject_fault) but the error is retryable
    pub fn inject_transient_fault(&self, fault: Fault, times: u32) {
        self.state.lock().faults.inject(fault, times, true);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }
}

impl RelationalConnector for MemoryRelationalServer {
    fn handle_for(&self, database: &str) -> Arc<dyn RelationalEngine> {
        self.handle(database)
    }
}

/// Handle bound to one database of a [`MemoryRelationalServer`]
#[derive(Debug)]
pub struct MemoryRelationalEngine {
    name: String,
    database: String,
    lifecycle: Lifecycle,
    epoch: Mutex<Option<u64>>,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryRelationalEngine {
    fn attach(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Connect)?;
        let db = state.databases.get_mut(&self.database).ok_or_else(|| {
            EngineError::Connection(format!("database \"{}\" does not exist", self.database))
        })?;
        db.connections += 1;
        *self.epoch.lock() = Some(db.epoch);
        Ok(())
    }

    fn attached_epoch(&self) -> EngineResult<u64> {
        if !self.lifecycle.is_connected() {
            return Err(EngineError::Connection(format!(
                "'{}' is {}",
                self.name,
                self.lifecycle.state()
            )));
        }
        self.epoch
            .lock()
            .ok_or_else(|| EngineError::InvalidState(format!("'{}' has no session", self.name)))
    }
}

#[async_trait]
impl RelationalEngine for MemoryRelationalEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    async fn connect(&self) -> EngineResult<()> {
        self.lifecycle.connect_with(|| async { self.attach() }).await
    }

    async fn disconnect(&self) -> EngineResult<()> {
        self.lifecycle
            .disconnect_with(|| async {
                if let Some(epoch) = self.epoch.lock().take() {
                    self.state.lock().detach(&self.database, epoch);
                }
                Ok(())
            })
            .await
    }

    async fn query(&self, sql: &str) -> EngineResult<QueryOutput> {
        let epoch = self.attached_epoch()?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Query)?;
        let db = state.live(&self.database, epoch)?;
        // Statement-level atomicity: apply to a copy and publish on success
        let mut working = db.tables.clone();
        let output = sql::execute(&mut working, sql)?;
        db.tables = working;
        Ok(output)
    }

    async fn lease(&self) -> EngineResult<Box<dyn RelationalConnection>> {
        let epoch = self.attached_epoch()?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Lease)?;
        state.live(&self.database, epoch)?.connections += 1;
        Ok(Box::new(MemoryRelationalConnection {
            database: self.database.clone(),
            epoch,
            transaction: None,
            state: self.state.clone(),
        }))
    }

    async fn create_database(&self, name: &str) -> EngineResult<()> {
        let epoch = self.attached_epoch()?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::CreateDatabase)?;
        state.live(&self.database, epoch)?;
        state.create(name)?;
        log::debug!("'{}' created database {}", self.name, name);
        Ok(())
    }

    async fn drop_database(&self, name: &str, force: bool) -> EngineResult<()> {
        let epoch = self.attached_epoch()?;
        if name == self.database {
            return Err(EngineError::InvalidState(format!(
                "cannot drop the currently open database \"{}\"",
                name
            )));
        }
        let mut state = self.state.lock();
        state.faults.trigger(Fault::DropDatabase)?;
        state.live(&self.database, epoch)?;

        let Some(target) = state.databases.get(name) else {
            log::debug!("database {} does not exist, skipping drop", name);
            return Ok(());
        };
        if !force && target.connections > 0 {
            return Err(EngineError::InvalidState(format!(
                "database \"{}\" is being accessed by {} other session(s)",
                name, target.connections
            )));
        }
        if target.connections > 0 {
            log::debug!(
                "terminating {} session(s) on database {}",
                target.connections,
                name
            );
        }
        state.databases.remove(name);
        log::debug!("'{}' dropped database {}", self.name, name);
        Ok(())
    }
}

/// Leased connection
struct MemoryRelationalConnection {
    database: String,
    epoch: u64,
    transaction: Option<OpenTransaction>,
    state: Arc<Mutex<ServerState>>,
}

/// Reads run against `view`; `statements` are replayed on the live tables at
/// commit so writes committed by other connections in the meantime survive.
struct OpenTransaction {
    view: Tables,
    statements: Vec<String>,
}

#[async_trait]
impl RelationalConnection for MemoryRelationalConnection {
    async fn begin(&mut self, _config: &TransactionConfig) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Begin)?;
        if self.transaction.is_some() {
            return Err(EngineError::Transaction(
                "a transaction is already in progress".to_string(),
            ));
        }
        let db = state.live(&self.database, self.epoch)?;
        self.transaction = Some(OpenTransaction {
            view: db.tables.clone(),
            statements: Vec::new(),
        });
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> EngineResult<QueryOutput> {
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Query)?;
        let db = state.live(&self.database, self.epoch)?;
        match self.transaction.as_mut() {
            Some(txn) => {
                let mut working = txn.view.clone();
                let output = sql::execute(&mut working, sql)?;
                txn.view = working;
                txn.statements.push(sql.to_string());
                Ok(output)
            }
            None => {
                let mut working = db.tables.clone();
                let output = sql::execute(&mut working, sql)?;
                db.tables = working;
                Ok(output)
            }
        }
    }

    async fn commit(&mut self) -> EngineResult<()> {
        let txn = self.transaction.take().ok_or_else(|| {
            EngineError::Transaction("there is no transaction in progress".to_string())
        })?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Commit)?;
        let db = state.live(&self.database, self.epoch)?;
        let mut working = db.tables.clone();
        for statement in &txn.statements {
            sql::execute(&mut working, statement).map_err(|e| {
                EngineError::Transaction(format!("could not apply transaction at commit: {}", e))
            })?;
        }
        db.tables = working;
        Ok(())
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        let discarded = self.transaction.take();
        self.state.lock().faults.trigger(Fault::Rollback)?;
        if discarded.is_none() {
            log::warn!("rollback on {} with no transaction in progress", self.database);
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn release(self: Box<Self>) {
        if self.transaction.is_some() {
            log::debug!("releasing connection to {} with an open transaction", self.database);
        }
        self.state.lock().detach(&self.database, self.epoch);
    }
}
