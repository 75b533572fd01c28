// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Creating and destroying ephemeral databases
//!
//! This module provides:
//! - [`Schema`], an ordered list of tables to create in a fresh database
//! - [`Provisioner`], the contract shared by the per-test, per-worker and
//!   temporary-database helpers
//! - [`RelationalProvisioner`]: create through an admin handle, tear down by
//!   disconnecting and then force-dropping
//! - [`DocumentProvisioner`]: connect lazily, tear down by dropping and then
//!   disconnecting

use crate::config::validate_identifier;
use crate::engine::{
    DocumentConnector, DocumentEngine, EngineKind, EngineState, RelationalConnector,
    RelationalEngine,
};
use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Ordered table declarations, e.g. `("users", "(id SERIAL PRIMARY KEY, email TEXT)")`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    tables: Vec<(String, String)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.tables.push((name.into(), definition.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` statements in declaration order
    pub fn statements(&self) -> HarnessResult<Vec<String>> {
        self.tables
            .iter()
            .map(|(name, definition)| -> HarnessResult<String> {
                validate_identifier(name)?;
                Ok(format!(
                    "CREATE TABLE IF NOT EXISTS {} {}",
                    name,
                    definition.trim()
                ))
            })
            .collect()
    }
}

/// Creates a database, hands back a connected handle and later reverses both
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Connected handle bound to a provisioned database
    type Handle: Clone + Send + Sync + 'static;

    fn kind(&self) -> EngineKind;

    /// Create `name`, connect a handle to it and apply `schema`.
    ///
    /// On failure anything already created is torn down again.
    async fn provision(&self, name: &str, schema: &Schema) -> HarnessResult<Self::Handle>;

    /// Reverse [`provision`](Self::provision). Every step is attempted; the
    /// first failure is returned.
    async fn teardown(&self, name: &str, handle: &Self::Handle) -> HarnessResult<()>;
}

/// Provisioner for relational servers
#[derive(Clone)]
pub struct RelationalProvisioner {
    admin: Arc<dyn RelationalEngine>,
    connector: Arc<dyn RelationalConnector>,
}

impl RelationalProvisioner {
    /// `admin` must be bound to a control database that is never dropped
    pub fn new(admin: Arc<dyn RelationalEngine>, connector: Arc<dyn RelationalConnector>) -> Self {
        Self { admin, connector }
    }

    pub fn admin(&self) -> &Arc<dyn RelationalEngine> {
        &self.admin
    }

    async fn ensure_admin(&self) -> HarnessResult<()> {
        if self.admin.state() != EngineState::Connected {
            self.admin.connect().await?;
        }
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> HarnessResult<()> {
        self.ensure_admin()
            .await
            .map_err(|e| HarnessError::provisioning(name, e))?;
        self.admin
            .drop_database(name, true)
            .await
            .map_err(|e| HarnessError::provisioning(name, e))
    }
}

#[async_trait]
impl Provisioner for RelationalProvisioner {
    type Handle = Arc<dyn RelationalEngine>;

    fn kind(&self) -> EngineKind {
        EngineKind::Relational
    }

    async fn provision(&self, name: &str, schema: &Schema) -> HarnessResult<Self::Handle> {
        validate_identifier(name)?;
        let statements = schema.statements()?;
        self.ensure_admin()
            .await
            .map_err(|e| HarnessError::provisioning(name, e))?;
        self.admin
            .create_database(name)
            .await
            .map_err(|e| HarnessError::provisioning(name, e))?;
        log::info!("created database {}", name);

        let handle = self.connector.handle_for(name);
        if let Err(e) = handle.connect().await {
            let _ = self.drop_database(name).await;
            return Err(HarnessError::provisioning(name, e));
        }

        for statement in &statements {
            if let Err(e) = handle.query(statement).await {
                log::warn!("schema statement failed on {}: {}", name, e);
                let _ = self.teardown(name, &handle).await;
                return Err(HarnessError::provisioning(name, e));
            }
        }
        Ok(handle)
    }

    async fn teardown(&self, name: &str, handle: &Self::Handle) -> HarnessResult<()> {
        let disconnected = handle
            .disconnect()
            .await
            .map_err(|e| HarnessError::provisioning(name, e));
        let dropped = self.drop_database(name).await;
        if dropped.is_ok() {
            log::info!("dropped database {}", name);
        }
        disconnected.and(dropped)
    }
}

/// Provisioner for document stores; databases appear on first write
#[derive(Clone)]
pub struct DocumentProvisioner {
    connector: Arc<dyn DocumentConnector>,
}

impl DocumentProvisioner {
    pub fn new(connector: Arc<dyn DocumentConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl Provisioner for DocumentProvisioner {
    type Handle = Arc<dyn DocumentEngine>;

    fn kind(&self) -> EngineKind {
        EngineKind::Document
    }

    async fn provision(&self, name: &str, schema: &Schema) -> HarnessResult<Self::Handle> {
        validate_identifier(name)?;
        if !schema.is_empty() {
            log::debug!(
                "document database {} creates {:?} lazily",
                name,
                schema.table_names()
            );
        }
        let handle = self.connector.handle_for(name);
        handle
            .connect()
            .await
            .map_err(|e| HarnessError::provisioning(name, e))?;
        Ok(handle)
    }

    async fn teardown(&self, name: &str, handle: &Self::Handle) -> HarnessResult<()> {
        let dropped = handle
            .drop_database(name)
            .await
            .map_err(|e| HarnessError::provisioning(name, e));
        let disconnected = handle
            .disconnect()
            .await
            .map_err(|e| HarnessError::provisioning(name, e));
        dropped.and(disconnected)
    }
}
