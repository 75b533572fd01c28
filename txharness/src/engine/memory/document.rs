// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory document server
//!
//! Databases and collections spring into existence on first write. A server
//! built with [`MemoryDocumentServer::standalone`] rejects session transactions,
//! like a document store that is not part of a replica set.

use super::{Fault, FaultPlan};
use crate::config::TransactionConfig;
use crate::engine::document::{expect_object, DocumentConnector, DocumentEngine, DocumentSession};
use crate::engine::{Capabilities, EngineState, Lifecycle};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Collections = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Default)]
struct ServerState {
    databases: HashMap<String, Collections>,
    clients: usize,
    sessions: usize,
    faults: FaultPlan,
}

/// A shared in-memory document server
#[derive(Debug, Clone)]
pub struct MemoryDocumentServer {
    name: String,
    transactions: bool,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryDocumentServer {
    /// Server that supports multi-document transactions
    pub fn replica_set(name: impl Into<String>) -> Self {
        Self::build(name.into(), true)
    }

    /// Server without transaction support
    pub fn standalone(name: impl Into<String>) -> Self {
        Self::build(name.into(), false)
    }

    fn build(name: String, transactions: bool) -> Self {
        Self {
            name,
            transactions,
            state: Arc::new(Mutex::new(ServerState::default())),
        }
    }

    pub fn handle(&self, database: &str) -> Arc<MemoryDocumentEngine> {
        self.handle_named(&self.name, database)
    }

    pub fn handle_named(&self, name: &str, database: &str) -> Arc<MemoryDocumentEngine> {
        Arc::new(MemoryDocumentEngine {
            name: name.to_string(),
            database: database.to_string(),
            transactions: self.transactions,
            lifecycle: Lifecycle::new(name),
            state: self.state.clone(),
        })
    }

    pub fn database_exists(&self, name: &str) -> bool {
        self.state.lock().databases.contains_key(name)
    }

    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Committed documents of a collection (empty when missing)
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Value> {
        self.state
            .lock()
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .cloned()
            .unwrap_or_default()
    }

    /// Handles currently connected
    pub fn connected_clients(&self) -> usize {
        self.state.lock().clients
    }

    /// Sessions started and not yet ended
    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions
    }

    pub fn inject_fault(&self, fault: Fault, times: u32) {
        self.state.lock().faults.inject(fault, times, false);
    }

    pub fn inject_transient_fault(&self, fault: Fault, times: u32) {
        self.state.lock().faults.inject(fault, times, true);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }
}

impl DocumentConnector for MemoryDocumentServer {
    fn handle_for(&self, database: &str) -> Arc<dyn DocumentEngine> {
        self.handle(database)
    }
}

/// Client handle bound to one database of a [`MemoryDocumentServer`]
#[derive(Debug)]
pub struct MemoryDocumentEngine {
    name: String,
    database: String,
    transactions: bool,
    lifecycle: Lifecycle,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryDocumentEngine {
    fn ensure_connected(&self) -> EngineResult<()> {
        if self.lifecycle.is_connected() {
            Ok(())
        } else {
            Err(EngineError::Connection(format!(
                "'{}' is {}",
                self.name,
                self.lifecycle.state()
            )))
        }
    }
}

#[async_trait]
impl DocumentEngine for MemoryDocumentEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    fn capabilities(&self) -> Capabilities {
        if self.transactions {
            Capabilities::full()
        } else {
            Capabilities::none()
        }
    }

    async fn connect(&self) -> EngineResult<()> {
        self.lifecycle
            .connect_with(|| async {
                let mut state = self.state.lock();
                state.faults.trigger(Fault::Connect)?;
                state.clients += 1;
                Ok(())
            })
            .await
    }

    async fn disconnect(&self) -> EngineResult<()> {
        self.lifecycle
            .disconnect_with(|| async {
                let mut state = self.state.lock();
                state.clients = state.clients.saturating_sub(1);
                Ok(())
            })
            .await
    }

    async fn drop_database(&self, name: &str) -> EngineResult<()> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::DropDatabase)?;
        if state.databases.remove(name).is_some() {
            log::debug!("'{}' dropped database {}", self.name, name);
        }
        Ok(())
    }

    async fn start_session(&self) -> EngineResult<Box<dyn DocumentSession>> {
        self.ensure_connected()?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Lease)?;
        state.sessions += 1;
        Ok(Box::new(MemoryDocumentSession {
            database: self.database.clone(),
            transactions: self.transactions,
            transaction: None,
            state: self.state.clone(),
        }))
    }
}

struct MemoryDocumentSession {
    database: String,
    transactions: bool,
    transaction: Option<OpenTransaction>,
    state: Arc<Mutex<ServerState>>,
}

enum DocumentWrite {
    Insert { collection: String, document: Value },
    Delete { collection: String, filter: serde_json::Map<String, Value> },
}

impl DocumentWrite {
    fn apply(&self, collections: &mut Collections) -> u64 {
        match self {
            DocumentWrite::Insert {
                collection,
                document,
            } => {
                collections
                    .entry(collection.clone())
                    .or_default()
                    .push(document.clone());
                1
            }
            DocumentWrite::Delete { collection, filter } => {
                let Some(docs) = collections.get_mut(collection) else {
                    return 0;
                };
                let before = docs.len();
                docs.retain(|doc| !matches_filter(doc, filter));
                (before - docs.len()) as u64
            }
        }
    }
}

/// Reads see `view`; `writes` are applied to the live database at commit
struct OpenTransaction {
    view: Collections,
    writes: Vec<DocumentWrite>,
}

impl MemoryDocumentSession {
    /// Run `op` against the transaction view or the live database
    fn with_collections<T>(&mut self, op: impl FnOnce(&Collections) -> T) -> EngineResult<T> {
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Query)?;
        match self.transaction.as_ref() {
            Some(txn) => Ok(op(&txn.view)),
            None => match state.databases.get(&self.database) {
                Some(collections) => Ok(op(collections)),
                None => Ok(op(&Collections::new())),
            },
        }
    }

    /// Apply `write` now, or stage it until commit inside a transaction
    fn write(&mut self, write: DocumentWrite) -> EngineResult<u64> {
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Query)?;
        match self.transaction.as_mut() {
            Some(txn) => {
                let affected = write.apply(&mut txn.view);
                txn.writes.push(write);
                Ok(affected)
            }
            None => Ok(write.apply(state.databases.entry(self.database.clone()).or_default())),
        }
    }

    fn matching(collections: &Collections, collection: &str, filter: &Value) -> EngineResult<Vec<Value>> {
        let filter = expect_object(filter, "filter")?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| matches_filter(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn matches_filter(doc: &Value, filter: &serde_json::Map<String, Value>) -> bool {
    filter
        .iter()
        .all(|(field, expected)| doc.get(field) == Some(expected))
}

#[async_trait]
impl DocumentSession for MemoryDocumentSession {
    async fn start_transaction(&mut self, _config: &TransactionConfig) -> EngineResult<()> {
        if !self.transactions {
            return Err(EngineError::Unsupported(
                "transactions require a replica set".to_string(),
            ));
        }
        if self.transaction.is_some() {
            return Err(EngineError::Transaction(
                "transaction already in progress".to_string(),
            ));
        }
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Begin)?;
        self.transaction = Some(OpenTransaction {
            view: state.databases.get(&self.database).cloned().unwrap_or_default(),
            writes: Vec::new(),
        });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> EngineResult<()> {
        let txn = self
            .transaction
            .take()
            .ok_or_else(|| EngineError::Transaction("no transaction started".to_string()))?;
        let mut state = self.state.lock();
        state.faults.trigger(Fault::Commit)?;
        if txn.writes.is_empty() {
            return Ok(());
        }
        let live = state.databases.entry(self.database.clone()).or_default();
        for write in &txn.writes {
            write.apply(live);
        }
        Ok(())
    }

    async fn abort_transaction(&mut self) -> EngineResult<()> {
        let discarded = self.transaction.take();
        self.state.lock().faults.trigger(Fault::Rollback)?;
        if discarded.is_none() {
            return Err(EngineError::Transaction("no transaction started".to_string()));
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn insert_one(&mut self, collection: &str, document: Value) -> EngineResult<()> {
        let mut document = expect_object(&document, "document")?.clone();
        document
            .entry("_id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().simple().to_string()));
        self.write(DocumentWrite::Insert {
            collection: collection.to_string(),
            document: Value::Object(document),
        })
        .map(|_| ())
    }

    async fn find(&mut self, collection: &str, filter: &Value) -> EngineResult<Vec<Value>> {
        self.with_collections(|collections| Self::matching(collections, collection, filter))?
    }

    async fn count_documents(&mut self, collection: &str, filter: &Value) -> EngineResult<u64> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }

    async fn delete_many(&mut self, collection: &str, filter: &Value) -> EngineResult<u64> {
        let filter = expect_object(filter, "filter")?.clone();
        self.write(DocumentWrite::Delete {
            collection: collection.to_string(),
            filter,
        })
    }

    async fn end_session(self: Box<Self>) {
        if self.transaction.is_some() {
            log::debug!("ending session on {} with an open transaction", self.database);
        }
        let mut state = self.state.lock();
        state.sessions = state.sessions.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connected(server: &MemoryDocumentServer) -> Arc<MemoryDocumentEngine> {
        let handle = server.handle("app");
        handle.connect().await.unwrap();
        handle
    }

    #[tokio::test]
    async fn test_session_transaction_commit_and_abort() {
        let server = MemoryDocumentServer::replica_set("mongo");
        let handle = connected(&server).await;
        let mut session = handle.start_session().await.unwrap();

        session.start_transaction(&TransactionConfig::default()).await.unwrap();
        session.insert_one("events", json!({"kind": "a"})).await.unwrap();
        assert!(server.documents("app", "events").is_empty());
        session.commit_transaction().await.unwrap();
        assert_eq!(server.documents("app", "events").len(), 1);

        session.start_transaction(&TransactionConfig::default()).await.unwrap();
        session.insert_one("events", json!({"kind": "b"})).await.unwrap();
        assert_eq!(session.count_documents("events", &json!({})).await.unwrap(), 2);
        session.abort_transaction().await.unwrap();
        assert_eq!(server.documents("app", "events").len(), 1);

        session.end_session().await;
        assert_eq!(server.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_interleaved_session_commits_keep_both_inserts() {
        let server = MemoryDocumentServer::replica_set("mongo");
        let handle = connected(&server).await;
        let mut first = handle.start_session().await.unwrap();
        let mut second = handle.start_session().await.unwrap();

        first.start_transaction(&TransactionConfig::default()).await.unwrap();
        second.start_transaction(&TransactionConfig::default()).await.unwrap();
        first.insert_one("events", json!({"kind": "a"})).await.unwrap();
        second.insert_one("events", json!({"kind": "b"})).await.unwrap();
        first.commit_transaction().await.unwrap();
        second.commit_transaction().await.unwrap();

        assert_eq!(server.documents("app", "events").len(), 2);
        first.end_session().await;
        second.end_session().await;
    }

    #[tokio::test]
    async fn test_standalone_rejects_transactions() {
        let server = MemoryDocumentServer::standalone("mongo");
        let handle = connected(&server).await;
        assert!(!handle.capabilities().transactions);

        let mut session = handle.start_session().await.unwrap();
        assert!(matches!(
            session.start_transaction(&TransactionConfig::default()).await,
            Err(EngineError::Unsupported(_))
        ));
        session.insert_one("events", json!({"kind": "a"})).await.unwrap();
        assert_eq!(server.documents("app", "events").len(), 1);
        session.end_session().await;
    }

    #[tokio::test]
    async fn test_filters_and_delete_many() {
        let server = MemoryDocumentServer::replica_set("mongo");
        let handle = connected(&server).await;
        let mut session = handle.start_session().await.unwrap();

        for (user, kind) in [(1, "login"), (1, "logout"), (2, "login")] {
            session
                .insert_one("events", json!({"user": user, "kind": kind}))
                .await
                .unwrap();
        }
        let logins = session.find("events", &json!({"kind": "login"})).await.unwrap();
        assert_eq!(logins.len(), 2);
        assert!(logins.iter().all(|doc| doc.get("_id").is_some()));

        let deleted = session.delete_many("events", &json!({"user": 1})).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(session.find("events", &json!([])).await.is_err());
        session.end_session().await;
    }

    #[tokio::test]
    async fn test_drop_database_and_operations_require_connection() {
        let server = MemoryDocumentServer::replica_set("mongo");
        let handle = server.handle("app");
        assert!(handle.start_session().await.is_err());

        handle.connect().await.unwrap();
        let mut session = handle.start_session().await.unwrap();
        session.insert_one("events", json!({"kind": "a"})).await.unwrap();
        session.end_session().await;
        assert!(server.database_exists("app"));

        handle.drop_database("app").await.unwrap();
        assert!(!server.database_exists("app"));
        handle.disconnect().await.unwrap();
        assert_eq!(server.connected_clients(), 0);
    }
}
