// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Scoped temporary databases
//!
//! [`with_temporary_database`] provisions a uniquely named database, hands a
//! connected handle to the caller's body and tears everything down afterwards,
//! whether the body returned a value, returned an error or panicked.

use crate::isolation::{test_database_name, Provisioner, Schema};
use crate::error::{HarnessError, HarnessResult};
use std::future::Future;

/// Settings for [`with_temporary_database`]
#[derive(Debug, Clone)]
pub struct TemporaryDatabaseOptions {
    pub prefix: String,
    pub schema: Schema,
}

impl Default for TemporaryDatabaseOptions {
    fn default() -> Self {
        Self {
            prefix: "tmp".to_string(),
            schema: Schema::new(),
        }
    }
}

impl TemporaryDatabaseOptions {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }
}

/// Run `body` against a throwaway database.
///
/// The body runs on its own tokio task so a panic inside it is caught, the
/// database is torn down and the panic is then resumed on the caller. An error
/// from the body takes precedence over a teardown error.
pub async fn with_temporary_database<P, F, Fut, T>(
    provisioner: &P,
    options: TemporaryDatabaseOptions,
    body: F,
) -> HarnessResult<T>
where
    P: Provisioner,
    F: FnOnce(P::Handle) -> Fut,
    Fut: Future<Output = HarnessResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let name = test_database_name(&options.prefix)?;
    let handle = provisioner.provision(&name, &options.schema).await?;
    log::debug!("temporary database {} ready", name);

    let joined = tokio::spawn(body(handle.clone())).await;
    let cleanup = provisioner.teardown(&name, &handle).await;
    if let Err(e) = &cleanup {
        log::warn!("teardown of temporary database {} failed: {}", name, e);
    }

    match joined {
        Ok(outcome) => {
            let value = outcome?;
            cleanup?;
            Ok(value)
        }
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(HarnessError::provisioning(name, format!("body did not complete: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryRelationalServer;
    use crate::error::EngineError;
    use crate::isolation::RelationalProvisioner;
    use std::sync::Arc;

    fn provisioner(server: &MemoryRelationalServer) -> RelationalProvisioner {
        RelationalProvisioner::new(server.admin(), Arc::new(server.clone()))
    }

    fn options() -> TemporaryDatabaseOptions {
        TemporaryDatabaseOptions::new("tmp")
            .with_schema(Schema::new().table("users", "(id SERIAL PRIMARY KEY, email TEXT)"))
    }

    #[tokio::test]
    async fn test_value_returned_and_database_dropped() {
        let server = MemoryRelationalServer::new("pg");
        let db_name = with_temporary_database(&provisioner(&server), options(), |handle| async move {
            handle
                .query("INSERT INTO users (email) VALUES ('a@x.com')")
                .await?;
            Ok::<_, HarnessError>(handle.database().to_string())
        })
        .await
        .unwrap();

        assert!(db_name.starts_with("tmp_"));
        assert!(!server.database_exists(&db_name));
    }

    #[tokio::test]
    async fn test_error_still_tears_down() {
        let server = MemoryRelationalServer::new("pg");
        let err = with_temporary_database(&provisioner(&server), options(), |_handle| async move {
            Err::<(), _>(HarnessError::Engine(EngineError::Query("boom".into())))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, HarnessError::Engine(_)));
        assert_eq!(server.databases(), vec!["postgres".to_string()]);
    }

    #[tokio::test]
    async fn test_panic_is_resumed_after_teardown() {
        let server = MemoryRelationalServer::new("pg");
        let provisioner = provisioner(&server);

        let outer = tokio::spawn(async move {
            with_temporary_database(&provisioner, options(), |_handle| async move {
                if true {
                    panic!("body exploded");
                }
                Ok::<(), HarnessError>(())
            })
            .await
        })
        .await;

        assert!(outer.unwrap_err().is_panic());
        assert_eq!(server.databases(), vec!["postgres".to_string()]);
    }
}
