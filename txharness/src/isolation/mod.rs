// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Isolation harness
//!
//! This module provides three ways to keep one test's writes away from another:
//! - [`TransactionalHarness`]: a rollback sandbox on a shared relational handle
//! - [`PerTestDatabase`]: a fresh database created and dropped around one test
//! - [`WorkerDatabase`]: one database per test-runner worker, optionally
//!   combined with the rollback sandbox
//!
//! Database creation and removal go through a [`Provisioner`].

mod naming;
mod per_worker;
mod provisioner;
mod transactional;

pub use naming::{test_database_name, worker_database_name};
pub use per_test::{seed_documents, PerTestDatabase};
pub use per_worker::WorkerDatabase;
pub use provisioner::{DocumentProvisioner, Provisioner, RelationalProvisioner, Schema};
pub use transactional::{SandboxFuture, TransactionalHarness};
