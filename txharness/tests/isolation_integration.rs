// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Isolation harness and temporary database scenarios

#[path = "testutils/mod.rs"]
mod testutils;

use regex::Regex;
use serde_json::json;
use testutils::{users_schema, Fixture};
use txharness::isolation::seed_documents;
use txharness::{
    with_temporary_database, DocumentEngine, EngineState, HarnessConfig, HarnessError,
    PerTestDatabase, RelationalEngine, TemporaryDatabaseOptions, TransactionalHarness,
    WorkerDatabase,
};

#[tokio::test]
async fn test_connect_twice_is_a_single_connection() {
    let fixture = Fixture::new();
    fixture.relational.ensure_database("app");
    let pg = fixture.relational.handle("app");
    pg.connect().await.expect("first connect");
    pg.connect().await.expect("second connect");
    assert_eq!(pg.state(), EngineState::Connected);
    assert_eq!(fixture.relational.active_connections("app"), 1);

    let mongo = fixture.document.handle("app");
    mongo.connect().await.expect("first connect");
    mongo.connect().await.expect("second connect");
    assert_eq!(mongo.state(), EngineState::Connected);
    assert_eq!(fixture.document.connected_clients(), 1);
}

#[tokio::test]
async fn test_sandbox_leaves_tables_untouched() {
    let fixture = Fixture::new();
    fixture.pg("app").await;
    let handle = fixture.relational.handle("app");
    handle.connect().await.expect("connect");
    handle
        .query("INSERT INTO users (email) VALUES ('seed@x.com')")
        .await
        .expect("seed");
    let before = fixture.relational.table_rows("app", "users");

    let mut harness = TransactionalHarness::new(handle.clone())
        .with_truncate(["users"])
        .expect("valid table name");
    harness.setup().await.expect("setup");
    harness
        .query("INSERT INTO users (email) VALUES ('a@x.com')")
        .await
        .expect("insert");
    harness
        .query("UPDATE users SET email = 'changed@x.com'")
        .await
        .expect("update");
    harness.teardown().await.expect("teardown");

    assert_eq!(fixture.relational.table_rows("app", "users"), before);
    assert!(!harness.is_active());
}

#[tokio::test]
async fn test_per_test_databases_do_not_share_documents() {
    let fixture = Fixture::new();

    // test A
    let a = PerTestDatabase::setup(fixture.document_provisioner(), "test", &Default::default())
        .await
        .expect("setup A");
    let seeded = seed_documents(a.handle().as_ref(), &json!({"users": [{"email": "a@x.com"}]}))
        .await
        .expect("seed A");
    assert_eq!(seeded, 1);

    // test B
    let b = PerTestDatabase::setup(fixture.document_provisioner(), "test", &Default::default())
        .await
        .expect("setup B");
    assert_ne!(a.name(), b.name());
    let mut session = b.handle().start_session().await.expect("session");
    let users = session
        .count_documents("users", &json!({}))
        .await
        .expect("count");
    session.end_session().await;
    assert_eq!(users, 0);

    let names = (a.name().to_string(), b.name().to_string());
    a.teardown().await.expect("teardown A");
    b.teardown().await.expect("teardown B");
    assert!(!fixture.document.database_exists(&names.0));
    assert!(!fixture.document.database_exists(&names.1));
}

#[tokio::test]
async fn test_worker_database_with_sandboxed_tests() {
    let fixture = Fixture::new();
    let config = HarnessConfig::from_json_str(r#"{"worker_id": 1}"#).expect("config");
    let worker = WorkerDatabase::from_config(fixture.relational_provisioner(), &config, users_schema());

    // test 1: writes directly, the row persists
    let handle = worker.handle().await.expect("worker handle");
    handle
        .query("INSERT INTO users (email) VALUES ('kept@x.com')")
        .await
        .expect("direct insert");

    // test 2: writes inside the sandbox, the row is rolled back
    let mut harness = TransactionalHarness::new(worker.handle().await.expect("worker handle"));
    harness.setup().await.expect("setup");
    harness
        .query("INSERT INTO users (email) VALUES ('discarded@x.com')")
        .await
        .expect("sandboxed insert");
    harness.teardown().await.expect("teardown");

    // test 3
    let count = worker
        .handle()
        .await
        .expect("worker handle")
        .query("SELECT COUNT(*) FROM users")
        .await
        .expect("count");
    assert_eq!(count.scalar_i64(), Some(1));

    let name = worker.name().expect("provisioned").to_string();
    assert!(Regex::new(r"^w1_[0-9a-f]{8}$").unwrap().is_match(&name));
    worker.teardown().await.expect("worker teardown");
    assert!(!fixture.relational.database_exists(&name));
}

#[tokio::test]
async fn test_temporary_database_on_every_exit_path() {
    let fixture = Fixture::new();
    let options = TemporaryDatabaseOptions::new("tmp").with_schema(users_schema());

    let rows = with_temporary_database(&fixture.relational_provisioner(), options.clone(), |db| async move {
        db.query("INSERT INTO users (email) VALUES ('a@x.com')").await?;
        Ok::<_, HarnessError>(db.query("SELECT * FROM users").await?.rows.len())
    })
    .await
    .expect("body result");
    assert_eq!(rows, 1);

    let err = with_temporary_database(&fixture.relational_provisioner(), options.clone(), |db| async move {
        db.query("SELECT * FROM nowhere").await?;
        Ok::<(), HarnessError>(())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, HarnessError::Engine(_)));

    let provisioner = fixture.relational_provisioner();
    let panicked = tokio::spawn(async move {
        with_temporary_database(&provisioner, options, |_db| async move {
            if true {
                panic!("body panicked");
            }
            Ok::<(), HarnessError>(())
        })
        .await
    })
    .await;
    assert!(panicked.unwrap_err().is_panic());

    assert_eq!(fixture.relational.databases(), vec!["postgres".to_string()]);
}

#[tokio::test]
async fn test_provisioning_failure_surfaces() {
    let fixture = Fixture::new();
    fixture
        .relational
        .inject_fault(txharness::engine::memory::Fault::CreateDatabase, 1);

    let err = PerTestDatabase::setup(fixture.relational_provisioner(), "itest", &users_schema())
        .await
        .err()
        .expect("provisioning should fail");
    assert!(matches!(err, HarnessError::Provisioning { .. }));
    assert_eq!(fixture.relational.databases(), vec!["postgres".to_string()]);
}
