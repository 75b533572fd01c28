// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared fixtures for txharness integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use txharness::coordinator::UnitOfWork;
use txharness::engine::memory::{MemoryDocumentServer, MemoryRelationalServer};
use txharness::error::{EngineError, EngineResult};
use txharness::isolation::{DocumentProvisioner, RelationalProvisioner, Schema};
use txharness::{DocumentEngine, ExecutionContext, Participant, RelationalEngine};

pub const USERS_TABLE: &str = "(id SERIAL PRIMARY KEY, email TEXT)";

pub fn users_schema() -> Schema {
    Schema::new().table("users", USERS_TABLE)
}

/// One relational and one document server, both in memory
pub struct Fixture {
    pub relational: MemoryRelationalServer,
    pub document: MemoryDocumentServer,
}

impl Fixture {
    pub fn new() -> Self {
        txharness::logging::init_test_logging();
        Self {
            relational: MemoryRelationalServer::new("pg"),
            document: MemoryDocumentServer::replica_set("mongo"),
        }
    }

    /// Connected relational participant on `db` with a `users` table
    pub async fn pg(&self, db: &str) -> Participant {
        self.relational.ensure_database(db);
        let handle = self.relational.handle(db);
        handle.connect().await.expect("connect relational handle");
        handle
            .query(&format!("CREATE TABLE IF NOT EXISTS users {}", USERS_TABLE))
            .await
            .expect("create users table");
        handle.into()
    }

    /// Connected document participant on `db`
    pub async fn mongo(&self, db: &str) -> Participant {
        let handle = self.document.handle(db);
        handle.connect().await.expect("connect document handle");
        handle.into()
    }

    pub fn relational_provisioner(&self) -> RelationalProvisioner {
        RelationalProvisioner::new(self.relational.admin(), Arc::new(self.relational.clone()))
    }

    pub fn document_provisioner(&self) -> DocumentProvisioner {
        DocumentProvisioner::new(Arc::new(self.document.clone()))
    }

    pub fn user_count(&self, db: &str) -> usize {
        self.relational
            .table_rows(db, "users")
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}

/// Ordered log of executed steps, shared between units of work
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// A unit of work that appends `entry` and then succeeds
    pub fn step(&self, entry: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(JournalStep {
            journal: self.clone(),
            entry: entry.to_string(),
            fail: false,
        })
    }

    /// A unit of work that appends `entry` and then fails
    pub fn failing_step(&self, entry: &str) -> Arc<dyn UnitOfWork> {
        Arc::new(JournalStep {
            journal: self.clone(),
            entry: entry.to_string(),
            fail: true,
        })
    }
}

struct JournalStep {
    journal: Journal,
    entry: String,
    fail: bool,
}

#[async_trait]
impl UnitOfWork for JournalStep {
    async fn run(&self, _ctx: ExecutionContext<'_>) -> EngineResult<()> {
        self.journal.0.lock().push(self.entry.clone());
        if self.fail {
            return Err(EngineError::Query(format!("{} failed", self.entry)));
        }
        Ok(())
    }
}

/// Number of documents in `collection`, read through the server
pub fn document_count(server: &MemoryDocumentServer, db: &str, collection: &str) -> usize {
    server.documents(db, collection).len()
}

pub fn as_document_engine(participant: &Participant) -> Option<Arc<dyn DocumentEngine>> {
    match participant {
        Participant::Document(engine) => Some(engine.clone()),
        Participant::Relational(_) => None,
    }
}
