// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Units of work and the operations that pair them with a participant

use crate::engine::{ExecutionContext, Participant};
use crate::error::EngineResult;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Work run against a participant's native transaction or session
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(&self, ctx: ExecutionContext<'_>) -> EngineResult<()>;
}

/// Future returned by closure-based units of work
pub type WorkFuture<'a> = Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>>;

/// Adapter turning a closure into a [`UnitOfWork`]
struct FnWork<F>(F);

#[async_trait]
impl<F> UnitOfWork for FnWork<F>
where
    F: for<'a> Fn(ExecutionContext<'a>) -> WorkFuture<'a> + Send + Sync,
{
    async fn run(&self, ctx: ExecutionContext<'_>) -> EngineResult<()> {
        (self.0)(ctx).await
    }
}

/// Runs one SQL statement on a relational participant
#[derive(Debug, Clone)]
pub struct Statement {
    sql: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

#[async_trait]
impl UnitOfWork for Statement {
    async fn run(&self, ctx: ExecutionContext<'_>) -> EngineResult<()> {
        ctx.relational()?.query(&self.sql).await.map(|_| ())
    }
}

/// Inserts one document on a document participant
#[derive(Debug, Clone)]
pub struct InsertDocument {
    collection: String,
    document: Value,
}

impl InsertDocument {
    pub fn new(collection: impl Into<String>, document: Value) -> Self {
        Self {
            collection: collection.into(),
            document,
        }
    }
}

#[async_trait]
impl UnitOfWork for InsertDocument {
    async fn run(&self, ctx: ExecutionContext<'_>) -> EngineResult<()> {
        ctx.document()?
            .insert_one(&self.collection, self.document.clone())
            .await
    }
}

/// Deletes every document matching a filter on a document participant
#[derive(Debug, Clone)]
pub struct DeleteDocuments {
    collection: String,
    filter: Value,
}

impl DeleteDocuments {
    pub fn new(collection: impl Into<String>, filter: Value) -> Self {
        Self {
            collection: collection.into(),
            filter,
        }
    }
}

#[async_trait]
impl UnitOfWork for DeleteDocuments {
    async fn run(&self, ctx: ExecutionContext<'_>) -> EngineResult<()> {
        ctx.document()?
            .delete_many(&self.collection, &self.filter)
            .await
            .map(|_| ())
    }
}

/// A participant paired with the work to run on it. Immutable once built.
#[derive(Clone)]
pub struct DatabaseOperation {
    participant: Participant,
    work: Arc<dyn UnitOfWork>,
    label: String,
}

impl DatabaseOperation {
    /// Build an operation from a closure.
    ///
    /// ```ignore
    /// DatabaseOperation::new(pg, "insert user", |ctx| {
    ///     Box::pin(async move {
    ///         ctx.relational()?
    ///             .query("INSERT INTO users (email) VALUES ('a@x.com')")
    ///             .await?;
    ///         Ok(())
    ///     })
    /// })
    /// ```
    pub fn new<F>(participant: impl Into<Participant>, label: impl Into<String>, work: F) -> Self
    where
        F: for<'a> Fn(ExecutionContext<'a>) -> WorkFuture<'a> + Send + Sync + 'static,
    {
        Self::from_unit(participant, label, Arc::new(FnWork(work)))
    }

    pub fn from_unit(
        participant: impl Into<Participant>,
        label: impl Into<String>,
        work: Arc<dyn UnitOfWork>,
    ) -> Self {
        Self {
            participant: participant.into(),
            work,
            label: label.into(),
        }
    }

    /// Operation running a single SQL statement
    pub fn statement(
        participant: impl Into<Participant>,
        label: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self::from_unit(participant, label, Arc::new(Statement::new(sql)))
    }

    /// Operation inserting a single document
    pub fn insert_document(
        participant: impl Into<Participant>,
        label: impl Into<String>,
        collection: impl Into<String>,
        document: Value,
    ) -> Self {
        Self::from_unit(
            participant,
            label,
            Arc::new(InsertDocument::new(collection, document)),
        )
    }

    /// Operation deleting every document matching `filter`
    pub fn delete_documents(
        participant: impl Into<Participant>,
        label: impl Into<String>,
        collection: impl Into<String>,
        filter: Value,
    ) -> Self {
        Self::from_unit(
            participant,
            label,
            Arc::new(DeleteDocuments::new(collection, filter)),
        )
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) async fn run(&self, ctx: ExecutionContext<'_>) -> EngineResult<()> {
        self.work.run(ctx).await
    }

    /// Run without a native transaction on a freshly leased connection or session
    pub(crate) async fn run_direct(&self) -> EngineResult<()> {
        let mut ctx = self.participant.open_direct().await?;
        let outcome = self.run(ctx.execution()).await;
        ctx.release().await;
        outcome
    }
}

impl std::fmt::Debug for DatabaseOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseOperation")
            .field("participant", &self.participant)
            .field("label", &self.label)
            .finish()
    }
}
