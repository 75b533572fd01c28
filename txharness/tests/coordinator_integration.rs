// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! End-to-end coordination across the in-memory relational and document engines

#[path = "testutils/mod.rs"]
mod testutils;

use serde_json::json;
use std::time::Duration;
use testutils::{document_count, Fixture, Journal};
use txharness::engine::memory::Fault;
use txharness::{
    DatabaseOperation, EngineError, FailureKind, TimeoutPolicy, TransactionConfig,
    TransactionCoordinator, TransactionMode,
};

#[tokio::test]
async fn test_coordinated_all_succeed() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let mongo = fixture.mongo("shop").await;

    let ops = vec![
        DatabaseOperation::statement(
            pg.clone(),
            "create user",
            "INSERT INTO users (email) VALUES ('a@x.com')",
        ),
        DatabaseOperation::insert_document(
            mongo,
            "audit",
            "events",
            json!({"kind": "user_created", "email": "a@x.com"}),
        ),
    ];
    let coordinator = TransactionCoordinator::new();
    let result = coordinator
        .execute_coordinated(ops, &TransactionConfig::default())
        .await
        .expect("coordinated call");

    assert!(result.success);
    assert_eq!(result.committed, vec!["pg".to_string(), "mongo".to_string()]);
    assert!(result.rolled_back.is_empty());
    assert!(result.errors.is_empty());
    assert_eq!(fixture.user_count("shop"), 1);
    assert_eq!(document_count(&fixture.document, "shop", "events"), 1);
    assert!(coordinator.active_transactions().is_empty());
}

#[tokio::test]
async fn test_coordinated_operations_sharing_a_participant_all_commit() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let mongo = fixture.mongo("shop").await;

    let ops = vec![
        DatabaseOperation::statement(
            pg.clone(),
            "first user",
            "INSERT INTO users (email) VALUES ('a@x.com')",
        ),
        DatabaseOperation::statement(
            pg,
            "second user",
            "INSERT INTO users (email) VALUES ('b@x.com')",
        ),
        DatabaseOperation::insert_document(mongo.clone(), "first event", "events", json!({"n": 1})),
        DatabaseOperation::insert_document(mongo, "second event", "events", json!({"n": 2})),
    ];
    let result = TransactionCoordinator::new()
        .execute_coordinated(ops, &TransactionConfig::default())
        .await
        .expect("coordinated call");

    assert!(result.success);
    assert_eq!(result.committed.len(), 4);
    assert_eq!(fixture.user_count("shop"), 2);
    assert_eq!(document_count(&fixture.document, "shop", "events"), 2);
}

#[tokio::test]
async fn test_coordinated_operation_failure_rolls_back_everything() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let mongo = fixture.mongo("shop").await;

    let ops = vec![
        DatabaseOperation::statement(
            pg.clone(),
            "create user",
            "INSERT INTO users (email) VALUES ('a@x.com')",
        ),
        DatabaseOperation::insert_document(mongo.clone(), "audit", "events", json!({"n": 1})),
        DatabaseOperation::statement(pg, "broken", "INSERT INTO missing_table (x) VALUES (1)"),
    ];
    let result = TransactionCoordinator::new()
        .execute_coordinated(ops, &TransactionConfig::default())
        .await
        .expect("coordinated call");

    assert!(!result.success);
    assert!(result.committed.is_empty());
    assert_eq!(result.rolled_back.len(), 3);
    assert_eq!(result.errors_of(FailureKind::Operation).len(), 1);
    assert_eq!(result.errors_of(FailureKind::Operation)[0].operation, "broken");
    assert_eq!(fixture.user_count("shop"), 0);
    assert_eq!(document_count(&fixture.document, "shop", "events"), 0);
    assert_eq!(fixture.relational.active_connections("shop"), 1);
    assert_eq!(fixture.document.open_sessions(), 0);
}

#[tokio::test]
async fn test_coordinated_rollback_failure_does_not_stop_other_rollbacks() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let mongo = fixture.mongo("shop").await;
    fixture.document.inject_fault(Fault::Rollback, 1);

    let ops = vec![
        DatabaseOperation::insert_document(mongo, "audit", "events", json!({"n": 1})),
        DatabaseOperation::statement(pg.clone(), "create user", "INSERT INTO users (email) VALUES ('a@x.com')"),
        DatabaseOperation::new(pg, "explode", |_ctx| {
            Box::pin(async { Err::<(), _>(EngineError::Query("constraint violated".into())) })
        }),
    ];
    let result = TransactionCoordinator::new()
        .execute_coordinated(ops, &TransactionConfig::default())
        .await
        .expect("coordinated call");

    assert!(!result.success);
    assert_eq!(result.errors_of(FailureKind::Rollback).len(), 1);
    assert_eq!(result.rolled_back, vec!["pg".to_string(), "pg".to_string()]);
    assert_eq!(fixture.user_count("shop"), 0);
    assert_eq!(fixture.document.open_sessions(), 0);
}

#[tokio::test]
async fn test_empty_coordinated_call() {
    let coordinator = TransactionCoordinator::new();
    let result = coordinator
        .execute_coordinated(Vec::new(), &TransactionConfig::default())
        .await
        .expect("coordinated call");

    assert!(result.success);
    assert!(result.committed.is_empty());
    assert!(result.rolled_back.is_empty());
    assert!(result.errors.is_empty());
    assert!(result.duration < Duration::from_millis(50));
}

#[tokio::test]
async fn test_saga_compensates_in_reverse_exactly_once() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let journal = Journal::default();

    let ops = vec![
        DatabaseOperation::from_unit(pg.clone(), "reserve", journal.step("reserve")),
        DatabaseOperation::from_unit(pg.clone(), "charge", journal.step("charge")),
        DatabaseOperation::from_unit(pg.clone(), "ship", journal.failing_step("ship")),
    ];
    let compensations = vec![
        DatabaseOperation::from_unit(pg.clone(), "release", journal.step("release")),
        DatabaseOperation::from_unit(pg.clone(), "refund", journal.step("refund")),
        DatabaseOperation::from_unit(pg, "unship", journal.step("unship")),
    ];
    let result = TransactionCoordinator::new()
        .execute_saga(ops, compensations)
        .await
        .expect("saga call");

    assert!(!result.success);
    assert!(result.committed.is_empty());
    assert_eq!(result.rolled_back.len(), 2);
    assert_eq!(
        journal.entries(),
        vec!["reserve", "charge", "ship", "refund", "release"]
    );
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, FailureKind::Operation);
}

#[tokio::test]
async fn test_saga_compensation_failure_keeps_going() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let journal = Journal::default();

    let ops = vec![
        DatabaseOperation::from_unit(pg.clone(), "a", journal.step("a")),
        DatabaseOperation::from_unit(pg.clone(), "b", journal.step("b")),
        DatabaseOperation::from_unit(pg.clone(), "c", journal.failing_step("c")),
    ];
    let compensations = vec![
        DatabaseOperation::from_unit(pg.clone(), "undo a", journal.step("undo a")),
        DatabaseOperation::from_unit(pg, "undo b", journal.failing_step("undo b")),
    ];
    let result = TransactionCoordinator::new()
        .execute_saga(ops, compensations)
        .await
        .expect("saga call");

    assert_eq!(journal.entries(), vec!["a", "b", "c", "undo b", "undo a"]);
    assert_eq!(result.errors_of(FailureKind::Compensation).len(), 1);
    assert_eq!(result.rolled_back, vec!["pg".to_string()]);
}

#[tokio::test]
async fn test_eventual_records_each_outcome() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let mongo = fixture.mongo("shop").await;

    let ops = vec![
        DatabaseOperation::statement(pg, "create user", "INSERT INTO users (email) VALUES ('a@x.com')"),
        DatabaseOperation::new(mongo, "explode", |_ctx| {
            Box::pin(async { Err::<(), _>(EngineError::Query("write conflict".into())) })
        }),
    ];
    let result = TransactionCoordinator::new()
        .execute_eventually_consistent_within(ops, "2s")
        .await
        .expect("eventual call");

    assert!(!result.success);
    assert_eq!(result.committed, vec!["pg".to_string()]);
    assert_eq!(result.errors_of(FailureKind::Operation).len(), 1);
    assert_eq!(fixture.user_count("shop"), 1);
}

#[tokio::test]
async fn test_eventual_timeout_policies() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let slow = DatabaseOperation::new(pg, "slow", |_ctx| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), EngineError>(())
        })
    });

    let detached = TransactionCoordinator::new()
        .execute_eventually_consistent(vec![slow.clone()], Duration::from_millis(20))
        .await
        .expect("eventual call");
    assert!(!detached.success);
    let timeouts = detached.errors_of(FailureKind::Timeout);
    assert_eq!(timeouts.len(), 1);
    assert_eq!(timeouts[0].participant, "coordinator");

    let aborting = TransactionCoordinator::new().with_timeout_policy(TimeoutPolicy::Abort);
    let aborted = aborting
        .execute_eventually_consistent(vec![slow], Duration::from_millis(20))
        .await
        .expect("eventual call");
    assert!(!aborted.success);
    assert_eq!(aborted.errors_of(FailureKind::Timeout)[0].participant, "pg");
    assert!(aborted.duration < Duration::from_secs(5));
}

#[tokio::test]
async fn test_consistency_check_reports_mismatch() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let mongo = fixture.mongo("shop").await;
    let coordinator = TransactionCoordinator::new();

    coordinator
        .execute_coordinated(
            vec![DatabaseOperation::statement(
                pg.clone(),
                "create user",
                "INSERT INTO users (email) VALUES ('a@x.com')",
            )],
            &TransactionConfig::default(),
        )
        .await
        .expect("coordinated call");

    let relational = fixture.relational.clone();
    let document = fixture.document.clone();
    let report = coordinator
        .check_consistency(vec![pg, mongo], |_participants| async move {
            let users = relational.table_rows("shop", "users").unwrap_or_default().len();
            let events = document.documents("shop", "events").len();
            Ok::<_, EngineError>(users == events)
        })
        .await;
    assert!(!report.is_consistent);
    assert!(report.details.is_some());

    let report = coordinator
        .check_consistency(Vec::new(), |_| async {
            Err::<bool, _>(EngineError::Connection("unreachable".into()))
        })
        .await;
    assert!(!report.is_consistent);
    assert_eq!(report.details.as_deref(), Some("Connection error: unreachable"));
}

#[tokio::test]
async fn test_registry_tracks_in_flight_transactions() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let coordinator = std::sync::Arc::new(TransactionCoordinator::new());
    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let entered = parking_lot::Mutex::new(Some(entered_tx));
    let release = std::sync::Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

    let gate = DatabaseOperation::new(pg, "gate", move |_ctx| {
        let entered = entered.lock().take();
        let release = release.clone();
        Box::pin(async move {
            if let Some(tx) = entered {
                let _ = tx.send(());
            }
            if let Some(rx) = release.lock().await.take() {
                let _ = rx.await;
            }
            Ok::<(), EngineError>(())
        })
    });

    let running = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.execute_saga(vec![gate], Vec::new()).await })
    };
    entered_rx.await.expect("operation started");

    let active = coordinator.active_transactions();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].mode, TransactionMode::Saga);
    assert_eq!(active[0].participants, vec!["pg".to_string()]);

    release_tx.send(()).expect("release gate");
    let result = running.await.expect("join").expect("saga call");
    assert!(result.success);
    assert_eq!(coordinator.active_count(), 0);
}

#[tokio::test]
async fn test_result_serializes_for_reporting() {
    let fixture = Fixture::new();
    let pg = fixture.pg("shop").await;
    let result = TransactionCoordinator::new()
        .execute_coordinated(
            vec![DatabaseOperation::statement(pg, "broken", "SELECT * FROM nowhere")],
            &TransactionConfig::default(),
        )
        .await
        .expect("coordinated call");

    let json: serde_json::Value =
        serde_json::from_str(&result.to_json().expect("serialize")).expect("parse");
    assert_eq!(json["success"], false);
    assert_eq!(json["errors"][0]["kind"], "Operation");
    assert!(json["duration"].is_number());
}
