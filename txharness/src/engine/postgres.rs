// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! PostgreSQL adapter built on sqlx
//!
//! This module provides:
//! - [`PgEngine`]: a pool-backed [`RelationalEngine`] bound to one database
//! - [`PgConnector`]: builds engines for other databases on the same server
//!
//! Statements run through the simple query protocol so DDL such as
//! `CREATE DATABASE` works. Result rows are converted to JSON maps for the
//! column types the harness needs (integers, floats, booleans, text).

use crate::config::{EngineConnectionConfig, EnvironmentPreset, TransactionConfig};
use crate::engine::relational::{
    QueryOutput, RelationalConnection, RelationalConnector, RelationalEngine, Row,
};
use crate::engine::{EngineState, Lifecycle};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Postgres, Row as _, TypeInfo};
use std::sync::Arc;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Pool-backed PostgreSQL handle
pub struct PgEngine {
    name: String,
    config: EngineConnectionConfig,
    preset: EnvironmentPreset,
    max_connections: u32,
    lifecycle: Lifecycle,
    pool: Mutex<Option<PgPool>>,
}

impl PgEngine {
    pub fn new(
        name: impl Into<String>,
        config: EngineConnectionConfig,
        preset: EnvironmentPreset,
    ) -> Self {
        let name = name.into();
        Self {
            lifecycle: Lifecycle::new(name.clone()),
            name,
            config,
            preset,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            pool: Mutex::new(None),
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    fn pool(&self) -> EngineResult<PgPool> {
        self.pool.lock().clone().ok_or_else(|| {
            EngineError::Connection(format!("'{}' is {}", self.name, self.lifecycle.state()))
        })
    }

    async fn open_pool(&self) -> EngineResult<()> {
        let timeout = self
            .config
            .connect_timeout(self.preset)
            .map_err(|e| EngineError::Connection(e.to_string()))?;
        let url = self.config.url_for("postgres", &self.config.database);
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(timeout)
            .connect(&url)
            .await
            .map_err(map_sqlx_error)?;
        *self.pool.lock() = Some(pool);
        Ok(())
    }
}

#[async_trait]
impl RelationalEngine for PgEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&self) -> &str {
        &self.config.database
    }

    fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    async fn connect(&self) -> EngineResult<()> {
        self.lifecycle.connect_with(|| self.open_pool()).await
    }

    async fn disconnect(&self) -> EngineResult<()> {
        self.lifecycle
            .disconnect_with(|| async {
                let pool = self.pool.lock().take();
                if let Some(pool) = pool {
                    pool.close().await;
                }
                Ok(())
            })
            .await
    }

    async fn query(&self, sql: &str) -> EngineResult<QueryOutput> {
        let pool = self.pool()?;
        let mut conn = pool.acquire().await.map_err(map_sqlx_error)?;
        run_statement(&mut conn, sql).await
    }

    async fn lease(&self) -> EngineResult<Box<dyn RelationalConnection>> {
        let pool = self.pool()?;
        let conn = pool.acquire().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgLease {
            conn,
            in_transaction: false,
        }))
    }

    async fn create_database(&self, name: &str) -> EngineResult<()> {
        crate::config::validate_identifier(name)
            .map_err(|e| EngineError::Query(e.to_string()))?;
        self.query(&format!("CREATE DATABASE \"{}\"", name)).await?;
        log::debug!("'{}' created database {}", self.name, name);
        Ok(())
    }

    async fn drop_database(&self, name: &str, force: bool) -> EngineResult<()> {
        crate::config::validate_identifier(name)
            .map_err(|e| EngineError::Query(e.to_string()))?;
        let sql = if force {
            format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", name)
        } else {
            format!("DROP DATABASE IF EXISTS \"{}\"", name)
        };
        self.query(&sql).await?;
        log::debug!("'{}' dropped database {}", self.name, name);
        Ok(())
    }
}

/// Leased pool connection
struct PgLease {
    conn: PoolConnection<Postgres>,
    in_transaction: bool,
}

#[async_trait]
impl RelationalConnection for PgLease {
    async fn begin(&mut self, config: &TransactionConfig) -> EngineResult<()> {
        let sql = format!(
            "BEGIN ISOLATION LEVEL {}",
            config.isolation_level.as_sql()
        );
        run_statement(&mut self.conn, &sql).await?;
        self.in_transaction = true;
        if let Some(timeout) = config.timeout {
            let sql = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
            if let Err(e) = run_statement(&mut self.conn, &sql).await {
                let _ = self.rollback().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> EngineResult<QueryOutput> {
        run_statement(&mut self.conn, sql).await
    }

    async fn commit(&mut self) -> EngineResult<()> {
        self.in_transaction = false;
        run_statement(&mut self.conn, "COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        self.in_transaction = false;
        run_statement(&mut self.conn, "ROLLBACK").await.map(|_| ())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn release(mut self: Box<Self>) {
        if self.in_transaction {
            if let Err(e) = self.rollback().await {
                log::warn!("rollback before release failed: {}", e);
            }
        }
    }
}

/// Builds [`PgEngine`]s for other databases on the same server
#[derive(Debug, Clone)]
pub struct PgConnector {
    name: String,
    config: EngineConnectionConfig,
    preset: EnvironmentPreset,
}

impl PgConnector {
    pub fn new(
        name: impl Into<String>,
        config: EngineConnectionConfig,
        preset: EnvironmentPreset,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            preset,
        }
    }

    /// Handle bound to the configured (control) database
    pub fn admin(&self) -> Arc<PgEngine> {
        Arc::new(PgEngine::new(
            format!("{}-admin", self.name),
            self.config.clone(),
            self.preset,
        ))
    }
}

impl RelationalConnector for PgConnector {
    fn handle_for(&self, database: &str) -> Arc<dyn RelationalEngine> {
        let mut config = self.config.clone();
        config.database = database.to_string();
        Arc::new(PgEngine::new(self.name.clone(), config, self.preset))
    }
}

fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_uppercase();
    ["SELECT", "WITH", "SHOW", "VALUES", "TABLE"]
        .iter()
        .any(|kw| upper.starts_with(kw))
        || upper.contains(" RETURNING ")
}

async fn run_statement(
    conn: &mut PoolConnection<Postgres>,
    sql: &str,
) -> EngineResult<QueryOutput> {
    if returns_rows(sql) {
        let rows = (&mut **conn).fetch_all(sql).await.map_err(map_sqlx_error)?;
        let rows = rows.iter().map(row_to_json).collect();
        Ok(QueryOutput::with_rows(rows))
    } else {
        let done = (&mut **conn).execute(sql).await.map_err(map_sqlx_error)?;
        Ok(QueryOutput::affected(done.rows_affected()))
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(i).ok().flatten().map(Value::from),
            "INT4" => row.try_get::<Option<i32>, _>(i).ok().flatten().map(Value::from),
            "INT8" => row.try_get::<Option<i64>, _>(i).ok().flatten().map(Value::from),
            "FLOAT4" => row.try_get::<Option<f32>, _>(i).ok().flatten().map(Value::from),
            "FLOAT8" => row.try_get::<Option<f64>, _>(i).ok().flatten().map(Value::from),
            "BOOL" => row.try_get::<Option<bool>, _>(i).ok().flatten().map(Value::from),
            _ => row
                .try_get::<Option<String>, _>(i)
                .ok()
                .flatten()
                .map(Value::from),
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    out
}

fn map_sqlx_error(err: sqlx::Error) -> EngineError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            EngineError::Connection(err.to_string())
        }
        sqlx::Error::RowNotFound => EngineError::NotFound(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => EngineError::Transient(err.to_string()),
            Some("42P04") | Some("42P07") => EngineError::AlreadyExists(err.to_string()),
            Some("3D000") | Some("42P01") => EngineError::NotFound(err.to_string()),
            Some("55006") => EngineError::InvalidState(err.to_string()),
            _ => EngineError::Query(err.to_string()),
        },
        _ => EngineError::Query(err.to_string()),
    }
}
