// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! txharness - multi-engine transactions and isolated test databases
//!
//! This crate coordinates one logical unit of work across a relational engine
//! and a document engine, and gives integration tests databases they do not
//! have to share.
//!
//! # Quick Start
//!
//! ```no_run
//! use txharness::{DocumentEngine, RelationalEngine};
//! use txharness::engine::memory::{MemoryDocumentServer, MemoryRelationalServer};
//! use txharness::{DatabaseOperation, TransactionConfig, TransactionCoordinator};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pg = MemoryRelationalServer::new("pg");
//! let mongo = MemoryDocumentServer::replica_set("mongo");
//! pg.ensure_database("app");
//! let orders = pg.handle("app");
//! let events = mongo.handle("app");
//! orders.connect().await?;
//! events.connect().await?;
//!
//! let coordinator = TransactionCoordinator::new();
//! let result = coordinator
//!     .execute_coordinated(
//!         vec![
//!             DatabaseOperation::statement(
//!                 orders,
//!                 "record order",
//!                 "INSERT INTO orders (total) VALUES (10)",
//!             ),
//!             DatabaseOperation::insert_document(
//!                 events,
//!                 "order event",
//!                 "events",
//!                 serde_json::json!({"kind": "order"}),
//!             ),
//!         ],
//!         &TransactionConfig::default(),
//!     )
//!     .await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`coordinator`] - coordinated, saga and eventual execution, consistency checks
//! - [`isolation`] - rollback sandbox, per-test and per-worker databases
//! - [`lifecycle`] - scoped temporary databases
//! - [`engine`] - engine traits, in-memory engines and the optional PostgreSQL adapter
//! - [`config`] - transaction and harness configuration
//! - [`error`] - error types
//! - [`logging`] - test logging setup

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod isolation;
pub mod lifecycle;
pub mod logging;

pub use config::{
    parse_duration, EngineConnectionConfig, EnvironmentPreset, HarnessConfig, IsolationLevel,
    RetryPolicy, TransactionConfig,
};
pub use coordinator::{
    ActiveTransaction, CoordinationResult, ConsistencyReport, DatabaseOperation, FailureKind,
    ParticipantError, TimeoutPolicy, TransactionCoordinator, TransactionId, TransactionMode,
    UnitOfWork,
};
pub use engine::{
    Capabilities, DocumentEngine, DocumentSession, EngineKind, EngineState, ExecutionContext,
    Participant, RelationalConnection, RelationalEngine,
};
pub use error::{ConfigError, CoordinatorError, EngineError, HarnessError};
pub use isolation::{PerTestDatabase, Schema, TransactionalHarness, WorkerDatabase};
pub use lifecycle::{with_temporary_database, TemporaryDatabaseOptions};
