//! End-to-end board synchronization tests.
//!
//! Starts the real server in-process and drives it through the client
//! library: optimistic mutations, reply reconciliation, event fan-out,
//! ownership isolation, and multi-client convergence.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::similar_names)]

use std::sync::Arc;
use std::time::Duration;

use taskflow::{Connection, Reconcile, Reconciler};
use taskflow_proto::task::{Priority, TaskId, TaskStatus};
use taskflow_proto::wire::{OpError, OpResult, TaskEvent, TaskOp, TaskPatch};
use taskflow_server::auth::TokenTable;
use taskflow_server::server::{ServerState, start_server_with_state};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Starts an in-process server knowing alice and bob.
async fn start_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let mut table = TokenTable::new();
    table.insert("tok-alice", "alice");
    table.insert("tok-bob", "bob");
    let state = Arc::new(ServerState::new(Arc::new(table)));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", state)
        .await
        .expect("failed to start test server");
    (format!("ws://{addr}/ws"), handle)
}

/// Connects, builds a reconciler for the verified owner, and applies the
/// connect-time snapshot.
async fn connect_synced(url: &str, token: &str) -> (Connection, Reconciler) {
    let conn = Connection::connect(url, token).await.expect("connect");
    let mut rec = Reconciler::new(conn.owner().clone());
    let snapshot = recv_event(&conn).await;
    assert!(matches!(snapshot, TaskEvent::Snapshot(_)), "first event must be the snapshot");
    rec.apply_event(&snapshot);
    (conn, rec)
}

/// Receives the next event or panics after 5 seconds.
async fn recv_event(conn: &Connection) -> TaskEvent {
    tokio::time::timeout(Duration::from_secs(5), conn.next_event())
        .await
        .expect("event timed out")
        .expect("connection closed")
}

/// Returns `true` if an event arrived within the grace window.
async fn event_within(conn: &Connection, window: Duration) -> bool {
    tokio::time::timeout(window, conn.next_event()).await.is_ok()
}

/// Runs one optimistic mutation end to end: local apply, send, reconcile.
async fn run_op(
    conn: &Connection,
    rec: &mut Reconciler,
    request: (taskflow_proto::wire::RequestId, TaskOp),
) -> OpResult {
    let (request_id, op) = request;
    let result = conn.send_request(request_id, op).await.expect("request");
    let outcome = rec.apply_reply(request_id, &result);
    assert_eq!(outcome, Reconcile::Clean, "unexpected reconcile outcome for {result:?}");
    result
}

/// Creates a task through the reconciler and returns its canonical id.
async fn create_task(
    conn: &Connection,
    rec: &mut Reconciler,
    title: &str,
    status: TaskStatus,
) -> TaskId {
    let request = rec
        .create(title, None, status, Priority::Medium)
        .expect("create op");
    match run_op(conn, rec, request).await {
        OpResult::Task(task) => task.id,
        other => panic!("expected Task reply, got {other:?}"),
    }
}

/// Fetches the authoritative list over a connection.
async fn server_list(conn: &Connection) -> Vec<taskflow_proto::task::Task> {
    match conn.request(TaskOp::List).await.expect("list") {
        OpResult::Tasks(tasks) => tasks,
        other => panic!("expected Tasks reply, got {other:?}"),
    }
}

/// Drains events into the reconciler until none arrive for the window.
async fn drain_events(conn: &Connection, rec: &mut Reconciler) {
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(300), conn.next_event()).await
    {
        rec.apply_event(&event);
    }
}

// ---------------------------------------------------------------------------
// Basic flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_snapshot_initializes_board() {
    let (url, _handle) = start_test_server().await;

    let (conn1, mut rec1) = connect_synced(&url, "tok-alice").await;
    create_task(&conn1, &mut rec1, "existing", TaskStatus::Todo).await;

    let (_conn2, rec2) = connect_synced(&url, "tok-alice").await;
    assert_eq!(rec2.board().len(), 1);
    assert_eq!(rec2.board().tasks_ordered()[0].title, "existing");
}

#[tokio::test]
async fn create_converges_across_clients_of_same_owner() {
    let (url, _handle) = start_test_server().await;
    let (conn_a, mut rec_a) = connect_synced(&url, "tok-alice").await;
    let (conn_b, mut rec_b) = connect_synced(&url, "tok-alice").await;

    let id = create_task(&conn_a, &mut rec_a, "shared", TaskStatus::Todo).await;

    // B learns about it from the pushed event.
    let event = recv_event(&conn_b).await;
    rec_b.apply_event(&event);
    assert!(matches!(event, TaskEvent::Created(_)));

    assert_eq!(rec_a.board().tasks_ordered(), rec_b.board().tasks_ordered());
    assert!(rec_b.board().contains(id));
}

#[tokio::test]
async fn originator_event_and_reply_agree() {
    let (url, _handle) = start_test_server().await;
    let (conn, mut rec) = connect_synced(&url, "tok-alice").await;

    let id = create_task(&conn, &mut rec, "mine", TaskStatus::Todo).await;

    // The originator also receives its own event; applying it must not
    // duplicate or diverge.
    let event = recv_event(&conn).await;
    rec.apply_event(&event);
    assert_eq!(rec.board().len(), 1);
    assert!(rec.board().contains(id));
}

// ---------------------------------------------------------------------------
// Ownership isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn other_owners_see_nothing() {
    let (url, _handle) = start_test_server().await;
    let (conn_alice, mut rec_alice) = connect_synced(&url, "tok-alice").await;
    let (conn_bob, rec_bob) = connect_synced(&url, "tok-bob").await;

    create_task(&conn_alice, &mut rec_alice, "private", TaskStatus::Todo).await;

    // No event crosses the owner boundary.
    assert!(!event_within(&conn_bob, Duration::from_millis(300)).await);
    assert!(rec_bob.board().is_empty());
    assert!(server_list(&conn_bob).await.is_empty());
}

#[tokio::test]
async fn foreign_delete_not_found_and_emits_nothing() {
    let (url, _handle) = start_test_server().await;
    let (conn_alice, mut rec_alice) = connect_synced(&url, "tok-alice").await;
    let (conn_bob, _rec_bob) = connect_synced(&url, "tok-bob").await;

    let id = create_task(&conn_alice, &mut rec_alice, "hers", TaskStatus::Todo).await;
    // Consume alice's own Created event so the channel is quiet.
    let _ = recv_event(&conn_alice).await;

    // Bob attacks the raw op (his reconciler would refuse — the task is
    // not on his board).
    let result = conn_bob.request(TaskOp::Delete { id }).await.unwrap();
    assert!(matches!(result, OpResult::Err(OpError::NotFound)));

    // Alice's board is untouched and neither party got an event.
    assert_eq!(server_list(&conn_alice).await.len(), 1);
    assert!(!event_within(&conn_alice, Duration::from_millis(300)).await);
    assert!(!event_within(&conn_bob, Duration::from_millis(300)).await);
}

// ---------------------------------------------------------------------------
// Ordering semantics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn move_scenario_keeps_unrelated_sibling_rank() {
    let (url, _handle) = start_test_server().await;
    let (conn, mut rec) = connect_synced(&url, "tok-alice").await;

    let t1 = create_task(&conn, &mut rec, "Write spec", TaskStatus::Todo).await;
    let t2 = create_task(&conn, &mut rec, "Review spec", TaskStatus::Todo).await;

    let request = rec.move_task(t1, TaskStatus::InProgress, 0).expect("move op");
    run_op(&conn, &mut rec, request).await;

    let tasks = server_list(&conn).await;
    let moved = tasks.iter().find(|t| t.id == t1).unwrap();
    let stayed = tasks.iter().find(|t| t.id == t2).unwrap();
    assert_eq!(moved.status, TaskStatus::InProgress);
    assert_eq!(moved.position, 0);
    // No longer sharing a bucket — the sibling keeps position 1.
    assert_eq!(stayed.status, TaskStatus::Todo);
    assert_eq!(stayed.position, 1);

    // The reconciler's board agrees with the authoritative list.
    assert_eq!(rec.board().tasks_ordered(), tasks);
}

#[tokio::test]
async fn update_with_position_lands_at_exact_rank() {
    let (url, _handle) = start_test_server().await;
    let (conn, mut rec) = connect_synced(&url, "tok-alice").await;

    let mut ids = Vec::new();
    for title in ["a", "b", "c"] {
        ids.push(create_task(&conn, &mut rec, title, TaskStatus::Todo).await);
    }

    // update {status, position} behaves exactly like a move.
    let patch = TaskPatch {
        status: Some(TaskStatus::Todo),
        position: Some(1),
        ..TaskPatch::default()
    };
    let request = rec.update(ids[2], patch).expect("update op");
    run_op(&conn, &mut rec, request).await;

    let tasks = server_list(&conn).await;
    let ranked: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
    assert_eq!(ranked, vec![ids[0], ids[2], ids[1]]);
    let positions: Vec<u32> = tasks.iter().map(|t| t.position).collect();
    assert_eq!(positions, vec![0, 1, 2]);
    assert_eq!(rec.board().tasks_ordered(), tasks);
}

#[tokio::test]
async fn stale_client_index_is_clamped_not_copied() {
    let (url, _handle) = start_test_server().await;
    let (conn, mut rec) = connect_synced(&url, "tok-alice").await;

    let t1 = create_task(&conn, &mut rec, "only", TaskStatus::Todo).await;

    // A stale view asked for index 40 in a column of one.
    let request = rec.move_task(t1, TaskStatus::Done, 40).expect("move op");
    let result = run_op(&conn, &mut rec, request).await;
    let OpResult::Moved(moved) = result else {
        panic!("expected Moved");
    };
    assert_eq!(moved[0].position, 0);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn losing_concurrent_delete_rolls_back_via_resync() {
    let (url, _handle) = start_test_server().await;
    let (conn_a, mut rec_a) = connect_synced(&url, "tok-alice").await;
    let (conn_b, mut rec_b) = connect_synced(&url, "tok-alice").await;

    let id = create_task(&conn_a, &mut rec_a, "contested", TaskStatus::Todo).await;
    // B syncs up before the race.
    let event = recv_event(&conn_b).await;
    rec_b.apply_event(&event);

    // A deletes first and wins.
    let request = rec_a.delete(id).expect("delete op");
    run_op(&conn_a, &mut rec_a, request).await;

    // B's optimistic delete loses; the reply demands a re-sync.
    let (rid, op) = rec_b.delete(id).expect("delete op");
    let result = conn_b.send_request(rid, op).await.unwrap();
    assert_eq!(rec_b.apply_reply(rid, &result), Reconcile::Resync);

    let (rid, op) = rec_b.begin_resync();
    let result = conn_b.send_request(rid, op).await.unwrap();
    assert_eq!(rec_b.apply_reply(rid, &result), Reconcile::Clean);

    assert!(rec_b.board().is_empty());
    assert_eq!(rec_b.board().tasks_ordered(), server_list(&conn_b).await);
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disjoint_mutations_from_two_clients_converge() {
    let (url, _handle) = start_test_server().await;
    let (conn_a, mut rec_a) = connect_synced(&url, "tok-alice").await;
    let (conn_b, mut rec_b) = connect_synced(&url, "tok-alice").await;

    create_task(&conn_a, &mut rec_a, "a1", TaskStatus::Todo).await;
    create_task(&conn_a, &mut rec_a, "a2", TaskStatus::Done).await;
    create_task(&conn_b, &mut rec_b, "b1", TaskStatus::Todo).await;
    create_task(&conn_b, &mut rec_b, "b2", TaskStatus::InProgress).await;

    drain_events(&conn_a, &mut rec_a).await;
    drain_events(&conn_b, &mut rec_b).await;

    let authoritative = server_list(&conn_a).await;
    assert_eq!(authoritative.len(), 4);
    assert_eq!(rec_a.board().tasks_ordered(), authoritative);
    assert_eq!(rec_b.board().tasks_ordered(), authoritative);
}

#[tokio::test]
async fn interleaved_moves_converge_with_unique_positions() {
    let (url, _handle) = start_test_server().await;
    let (conn_a, mut rec_a) = connect_synced(&url, "tok-alice").await;
    let (conn_b, mut rec_b) = connect_synced(&url, "tok-alice").await;

    let mut ids = Vec::new();
    for i in 0..4 {
        ids.push(create_task(&conn_a, &mut rec_a, &format!("t{i}"), TaskStatus::Todo).await);
    }
    drain_events(&conn_b, &mut rec_b).await;

    // Both clients reorder concurrently; the server serializes them.
    let req_a = rec_a.move_task(ids[3], TaskStatus::Todo, 0).expect("move");
    let req_b = rec_b.move_task(ids[0], TaskStatus::InProgress, 0).expect("move");
    let (res_a, res_b) = tokio::join!(
        conn_a.send_request(req_a.0, req_a.1.clone()),
        conn_b.send_request(req_b.0, req_b.1.clone()),
    );
    rec_a.apply_reply(req_a.0, &res_a.unwrap());
    rec_b.apply_reply(req_b.0, &res_b.unwrap());

    drain_events(&conn_a, &mut rec_a).await;
    drain_events(&conn_b, &mut rec_b).await;

    let authoritative = server_list(&conn_a).await;
    assert_eq!(rec_a.board().tasks_ordered(), authoritative);
    assert_eq!(rec_b.board().tasks_ordered(), authoritative);

    // Positions stay unique within each bucket.
    for status in TaskStatus::ALL {
        let mut positions: Vec<u32> = authoritative
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.position)
            .collect();
        let before = positions.len();
        positions.sort_unstable();
        positions.dedup();
        assert_eq!(positions.len(), before, "duplicate positions in {status}");
    }
}
