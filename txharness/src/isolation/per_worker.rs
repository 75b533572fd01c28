// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! One shared database per test-runner worker
//!
//! The database is provisioned lazily by the first test that asks for it and
//! lives until [`WorkerDatabase::teardown`]. Tests that must not leave rows
//! behind wrap themselves in a
//! [`TransactionalHarness`](super::TransactionalHarness) on the worker handle.

use super::naming::worker_database_name;
use super::provisioner::{Provisioner, Schema};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

struct Provisioned<H> {
    name: String,
    handle: H,
}

/// Lazily provisioned worker-scoped database
pub struct WorkerDatabase<P: Provisioner> {
    provisioner: P,
    worker_id: u32,
    schema: Schema,
    cell: OnceCell<Provisioned<P::Handle>>,
    torn_down: Mutex<bool>,
}

impl<P: Provisioner> WorkerDatabase<P> {
    pub fn new(provisioner: P, worker_id: u32, schema: Schema) -> Self {
        Self {
            provisioner,
            worker_id,
            schema,
            cell: OnceCell::new(),
            torn_down: Mutex::new(false),
        }
    }

    /// Worker id taken from the harness configuration
    pub fn from_config(provisioner: P, config: &HarnessConfig, schema: Schema) -> Self {
        Self::new(provisioner, config.worker_id, schema)
    }

    /// Handle to the worker database, provisioning it on first use.
    ///
    /// Concurrent first callers wait for a single provisioning run. A failed run
    /// is retried by the next caller.
    pub async fn handle(&self) -> HarnessResult<P::Handle> {
        if *self.torn_down.lock() {
            return Err(HarnessError::Provisioning {
                database: format!("w{}", self.worker_id),
                message: "worker database was already torn down".to_string(),
            });
        }
        let provisioned = self
            .cell
            .get_or_try_init(|| async {
                let name = worker_database_name(self.worker_id);
                let handle = self.provisioner.provision(&name, &self.schema).await?;
                log::info!("worker {} database {} ready", self.worker_id, name);
                Ok::<_, HarnessError>(Provisioned { name, handle })
            })
            .await?;
        Ok(provisioned.handle.clone())
    }

    /// Name of the database once provisioned
    pub fn name(&self) -> Option<&str> {
        self.cell.get().map(|p| p.name.as_str())
    }

    /// Disconnect and force-drop the database. Later calls are no-ops.
    pub async fn teardown(&self) -> HarnessResult<()> {
        {
            let mut torn_down = self.torn_down.lock();
            if *torn_down {
                return Ok(());
            }
            *torn_down = true;
        }
        match self.cell.get() {
            Some(provisioned) => {
                self.provisioner
                    .teardown(&provisioned.name, &provisioned.handle)
                    .await
            }
            None => Ok(()),
        }
    }
}
