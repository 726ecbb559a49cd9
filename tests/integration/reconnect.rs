//! Reconnect and re-sync behavior.
//!
//! A client that disconnects misses events with no replay: the contract
//! is that the connect-time snapshot carries the authoritative state,
//! so a reconnecting client converges without assuming it missed
//! nothing.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use taskflow::{Connection, Reconciler};
use taskflow_proto::task::{Priority, TaskStatus};
use taskflow_proto::wire::{OpResult, TaskEvent, TaskOp};
use taskflow_server::auth::TokenTable;
use taskflow_server::server::{ServerState, start_server_with_state};

async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let mut table = TokenTable::new();
    table.insert("tok-alice", "alice");
    let state = Arc::new(ServerState::new(Arc::new(table)));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start test server");
    (format!("ws://{addr}/ws"), handle)
}

async fn recv_event(conn: &Connection) -> TaskEvent {
    tokio::time::timeout(Duration::from_secs(5), conn.next_event())
        .await
        .expect("event timed out")
        .expect("connection closed")
}

async fn create(conn: &Connection, title: &str) -> taskflow_proto::task::Task {
    match conn
        .request(TaskOp::Create {
            title: title.to_string(),
            description: None,
            status: TaskStatus::Todo,
            priority: Priority::Medium,
        })
        .await
        .expect("create request")
    {
        OpResult::Task(task) => task,
        other => panic!("expected Task, got {other:?}"),
    }
}

#[tokio::test]
async fn snapshot_reflects_mutations_made_while_disconnected() {
    let (url, _handle) = start_test_server().await;

    // First session: one task, then the client goes away.
    let conn1 = Connection::connect(&url, "tok-alice").await.unwrap();
    let kept = create(&conn1, "kept").await;
    let doomed = create(&conn1, "doomed").await;
    drop(conn1);

    // Another client of the same owner mutates during the gap.
    let conn2 = Connection::connect(&url, "tok-alice").await.unwrap();
    create(&conn2, "added while away").await;
    let result = conn2
        .request(TaskOp::Delete { id: doomed.id })
        .await
        .unwrap();
    assert!(matches!(result, OpResult::Deleted(_)));

    // Reconnect: the snapshot alone brings the board current.
    let conn3 = Connection::connect(&url, "tok-alice").await.unwrap();
    let mut rec = Reconciler::new(conn3.owner().clone());
    rec.apply_event(&recv_event(&conn3).await);

    let titles: Vec<String> = rec
        .board()
        .tasks_ordered()
        .iter()
        .map(|t| t.title.clone())
        .collect();
    assert_eq!(titles, vec!["kept", "added while away"]);
    assert!(rec.board().contains(kept.id));
    assert!(!rec.board().contains(doomed.id));
}

#[tokio::test]
async fn reconnected_client_receives_new_events_after_snapshot() {
    let (url, _handle) = start_test_server().await;

    let conn1 = Connection::connect(&url, "tok-alice").await.unwrap();
    create(&conn1, "before").await;
    drop(conn1);

    let conn2 = Connection::connect(&url, "tok-alice").await.unwrap();
    let mut rec = Reconciler::new(conn2.owner().clone());
    let snapshot = recv_event(&conn2).await;
    assert!(matches!(snapshot, TaskEvent::Snapshot(_)));
    rec.apply_event(&snapshot);

    // Mutations from a third connection flow in as ordinary events.
    let conn3 = Connection::connect(&url, "tok-alice").await.unwrap();
    create(&conn3, "after").await;

    let event = recv_event(&conn2).await;
    rec.apply_event(&event);
    assert!(matches!(event, TaskEvent::Created(_)));
    assert_eq!(rec.board().len(), 2);
}

#[tokio::test]
async fn dropped_connection_does_not_disturb_survivors() {
    let (url, _handle) = start_test_server().await;

    let conn1 = Connection::connect(&url, "tok-alice").await.unwrap();
    let conn2 = Connection::connect(&url, "tok-alice").await.unwrap();
    // Consume the snapshots.
    let _ = recv_event(&conn1).await;
    let _ = recv_event(&conn2).await;

    drop(conn1);
    // Give the server a moment to notice the disconnect.
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The surviving connection still mutates and hears events.
    let task = create(&conn2, "still alive").await;
    let event = recv_event(&conn2).await;
    assert!(matches!(event, TaskEvent::Created(t) if t.id == task.id));
}
