// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Document store capability set

use super::{Capabilities, EngineState};
use crate::config::TransactionConfig;
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Shared document-store client bound to one database
#[async_trait]
pub trait DocumentEngine: Send + Sync {
    /// Participant identifier
    fn name(&self) -> &str;

    /// Database this handle is bound to
    fn database(&self) -> &str;

    fn state(&self) -> EngineState;

    /// A standalone server reports `transactions: false`
    fn capabilities(&self) -> Capabilities;

    async fn connect(&self) -> EngineResult<()>;

    async fn disconnect(&self) -> EngineResult<()>;

    /// Drop the named database (usually the handle's own)
    async fn drop_database(&self, name: &str) -> EngineResult<()>;

    async fn start_session(&self) -> EngineResult<Box<dyn DocumentSession>>;
}

/// A client session; document operations issued through it join its transaction when one is open
#[async_trait]
pub trait DocumentSession: Send {
    async fn start_transaction(&mut self, config: &TransactionConfig) -> EngineResult<()>;

    async fn commit_transaction(&mut self) -> EngineResult<()>;

    async fn abort_transaction(&mut self) -> EngineResult<()>;

    fn in_transaction(&self) -> bool;

    async fn insert_one(&mut self, collection: &str, document: Value) -> EngineResult<()>;

    /// Documents whose fields equal every field of `filter` (`{}` matches all)
    async fn find(&mut self, collection: &str, filter: &Value) -> EngineResult<Vec<Value>>;

    async fn count_documents(&mut self, collection: &str, filter: &Value) -> EngineResult<u64>;

    async fn delete_many(&mut self, collection: &str, filter: &Value) -> EngineResult<u64>;

    async fn end_session(self: Box<Self>);
}

/// Builds unconnected handles bound to a named database
pub trait DocumentConnector: Send + Sync {
    fn handle_for(&self, database: &str) -> Arc<dyn DocumentEngine>;
}

/// Future returned by a [`with_transaction`] callback
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send + 'a>>;

/// Run `work` inside a session transaction, committing on success.
///
/// Transient failures (from the work or the commit) abort and retry the whole
/// callback up to `config.retry` extra times. The session is always ended.
/// Engines without transactions run the callback once in a plain session.
pub async fn with_transaction<T, F>(
    engine: &dyn DocumentEngine,
    config: &TransactionConfig,
    mut work: F,
) -> EngineResult<T>
where
    F: for<'s> FnMut(&'s mut dyn DocumentSession) -> SessionFuture<'s, T>,
{
    let mut session = engine.start_session().await?;
    let effective = config.effective_for(&engine.capabilities());

    if !engine.capabilities().transactions {
        let outcome = work(session.as_mut()).await;
        session.end_session().await;
        return outcome;
    }

    let retries = effective.retry.map(|r| r.attempts).unwrap_or(0);
    let delay = effective.retry.map(|r| r.delay).unwrap_or_default();
    let mut attempt = 0;

    let outcome = loop {
        if let Err(e) = session.start_transaction(&effective).await {
            break Err(e);
        }

        let result = match work(session.as_mut()).await {
            Ok(value) => session.commit_transaction().await.map(|_| value),
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    log::warn!(
                        "abort after failed callback on '{}' failed: {}",
                        engine.name(),
                        abort_err
                    );
                }
                Err(e)
            }
        };

        match result {
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                log::debug!(
                    "transient failure on '{}' (attempt {}/{}): {}",
                    engine.name(),
                    attempt,
                    retries,
                    e
                );
                if session.in_transaction() {
                    if let Err(abort_err) = session.abort_transaction().await {
                        log::warn!(
                            "abort before retry on '{}' failed: {}",
                            engine.name(),
                            abort_err
                        );
                    }
                }
                tokio::time::sleep(delay).await;
            }
            other => break other,
        }
    };

    session.end_session().await;
    outcome
}

/// Reject anything but a JSON object as a document or filter
pub(crate) fn expect_object<'a>(
    value: &'a Value,
    what: &str,
) -> EngineResult<&'a serde_json::Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| EngineError::Query(format!("{} must be a JSON object", what)))
}
