// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-test rollback sandbox
//!
//! [`TransactionalHarness::setup`] leases one connection and opens a
//! transaction on it; [`TransactionalHarness::teardown`] always rolls that
//! transaction back, so nothing a test writes through the harness survives.

use crate::config::{validate_identifier, TransactionConfig};
use crate::engine::{ExecutionContext, QueryOutput, RelationalConnection, RelationalEngine};
use crate::error::{HarnessError, HarnessResult};
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;

/// Future returned by a [`TransactionalHarness::run_isolated`] body
pub type SandboxFuture<'a, T> = Pin<Box<dyn Future<Output = HarnessResult<T>> + Send + 'a>>;

/// Rollback sandbox holding at most one leased connection
pub struct TransactionalHarness {
    engine: Arc<dyn RelationalEngine>,
    config: TransactionConfig,
    truncate: Vec<String>,
    lease: Option<Box<dyn RelationalConnection>>,
}

impl TransactionalHarness {
    pub fn new(engine: Arc<dyn RelationalEngine>) -> Self {
        Self {
            engine,
            config: TransactionConfig::default(),
            truncate: Vec::new(),
            lease: None,
        }
    }

    /// Tables truncated at teardown before the rollback
    pub fn with_truncate<I, S>(mut self, tables: I) -> HarnessResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for table in tables {
            let table = table.into();
            validate_identifier(&table)?;
            self.truncate.push(table);
        }
        Ok(self)
    }

    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    /// Whether a connection is currently leased
    pub fn is_active(&self) -> bool {
        self.lease.is_some()
    }

    /// Lease a connection and begin a transaction on it
    pub async fn setup(&mut self) -> HarnessResult<()> {
        if self.lease.is_some() {
            return Err(HarnessError::LeaseOutstanding);
        }
        let mut conn = self.engine.lease().await?;
        let config = self.config.effective_for(&self.engine.capabilities());
        if let Err(e) = conn.begin(&config).await {
            conn.release().await;
            return Err(e.into());
        }
        log::debug!("sandbox opened on '{}'", self.engine.name());
        self.lease = Some(conn);
        Ok(())
    }

    /// Run a statement inside the sandbox transaction
    pub async fn query(&mut self, sql: &str) -> HarnessResult<QueryOutput> {
        Ok(self.connection()?.query(sql).await?)
    }

    pub fn connection(&mut self) -> HarnessResult<&mut dyn RelationalConnection> {
        match self.lease.as_mut() {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(HarnessError::NoLease),
        }
    }

    /// The sandbox connection as an [`ExecutionContext`] for units of work
    pub fn execution(&mut self) -> HarnessResult<ExecutionContext<'_>> {
        self.connection().map(ExecutionContext::Relational)
    }

    /// Truncate, roll back and release. A no-op without a prior `setup`.
    ///
    /// Every step runs even if an earlier one failed; the first error is returned.
    pub async fn teardown(&mut self) -> HarnessResult<()> {
        let Some(mut conn) = self.lease.take() else {
            return Ok(());
        };

        let mut first_error: Option<HarnessError> = None;
        if !self.truncate.is_empty() {
            let sql = format!(
                "TRUNCATE TABLE {} RESTART IDENTITY CASCADE",
                self.truncate.join(", ")
            );
            if let Err(e) = conn.query(&sql).await {
                log::warn!("sandbox truncate failed: {}", e);
                first_error.get_or_insert(e.into());
            }
        }
        if let Err(e) = conn.rollback().await {
            log::warn!("sandbox rollback failed: {}", e);
            first_error.get_or_insert(e.into());
        }
        conn.release().await;
        log::debug!("sandbox closed on '{}'", self.engine.name());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `setup`, run `body` on the sandbox connection, then `teardown` whatever
    /// the body returned. A body error wins over a teardown error; a panic in
    /// the body is resumed once the connection has been released.
    pub async fn run_isolated<T, F>(&mut self, body: F) -> HarnessResult<T>
    where
        F: for<'c> FnOnce(&'c mut dyn RelationalConnection) -> SandboxFuture<'c, T>,
    {
        self.setup().await?;
        let outcome = match self.connection() {
            Ok(conn) => catch_panic(body(conn)).await,
            Err(e) => Ok(Err(e)),
        };
        let cleanup = self.teardown().await;
        let value = match outcome {
            Ok(result) => result?,
            Err(panic) => resume_unwind(panic),
        };
        cleanup?;
        Ok(value)
    }
}

/// Drive `future` to completion, handing back a panic payload instead of unwinding
async fn catch_panic<T>(
    mut future: SandboxFuture<'_, T>,
) -> Result<HarnessResult<T>, Box<dyn Any + Send>> {
    std::future::poll_fn(|cx| {
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(Poll::Ready(result)) => Poll::Ready(Ok(result)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(panic) => Poll::Ready(Err(panic)),
        }
    })
    .await
}

impl Drop for TransactionalHarness {
    fn drop(&mut self) {
        if self.lease.is_some() {
            log::warn!(
                "sandbox on '{}' dropped without teardown; the connection was not released",
                self.engine.name()
            );
        }
    }
}
