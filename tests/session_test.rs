//! Comparison session state machine

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{alice_only_on_a, MemoryStore};
use history_merge::config::AppConfig;
use history_merge::{
    ChatStore, ChatType, ComparisonSession, Direction, JobEvent, MergeError, MergeScope, SessionState, Side,
};

fn session(a: &Arc<MemoryStore>, b: &Arc<MemoryStore>) -> ComparisonSession {
    ComparisonSession::new(a.clone(), b.clone(), &AppConfig::default())
}

fn scanned(a: &Arc<MemoryStore>, b: &Arc<MemoryStore>) -> ComparisonSession {
    let mut session = session(a, b);
    session.scan().unwrap();
    session.wait(&mut |_| {}).unwrap();
    session
}

fn shared_pair() -> (Arc<MemoryStore>, Arc<MemoryStore>) {
    let (a, b) = alice_only_on_a();
    (Arc::new(a), Arc::new(b))
}

#[test]
fn test_scan_streams_progress_and_reaches_scanned() {
    let (a, b) = shared_pair();
    let mut session = session(&a, &b);
    assert_eq!(session.state(), SessionState::Idle);

    session.scan().unwrap();
    assert_eq!(session.state(), SessionState::Scanning);

    let mut percents = Vec::new();
    session
        .wait(&mut |event| {
            if let JobEvent::Progress(progress) = event {
                percents.push(progress.percent);
            }
        })
        .unwrap();

    assert_eq!(session.state(), SessionState::Scanned);
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    let result = session.result().expect("scan result");
    assert_eq!(result.counts(Side::A).messages, 10);
}

#[test]
fn test_poll_eventually_finishes() {
    let (a, b) = shared_pair();
    let mut session = session(&a, &b);
    session.scan().unwrap();

    let mut done = false;
    for _ in 0..500 {
        if session.poll(&mut |_| {}).unwrap() {
            done = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(done);
    assert_eq!(session.state(), SessionState::Scanned);
}

#[test]
fn test_operations_rejected_in_wrong_state() {
    let (a, b) = shared_pair();
    let mut session = session(&a, &b);

    assert!(matches!(
        session.merge(Direction::AToB, MergeScope::All),
        Err(MergeError::InvalidState(_))
    ));
    assert!(matches!(session.swap(), Err(MergeError::InvalidState(_))));
    assert!(matches!(session.cancel(true), Err(MergeError::InvalidState(_))));

    session.scan().unwrap();
    assert!(matches!(session.scan(), Err(MergeError::InvalidState(_))));
    session.wait(&mut |_| {}).unwrap();
    assert_eq!(session.state(), SessionState::Scanned);
}

#[test]
fn test_swap_twice_restores_result() {
    let (a, b) = shared_pair();
    let mut session = scanned(&a, &b);
    let original = session.result().cloned().unwrap();

    let swapped = session.swap().unwrap().clone();
    assert_eq!(swapped.counts(Side::B), original.counts(Side::A));
    assert_eq!(swapped.counts(Side::A), original.counts(Side::B));
    assert_eq!(session.left().label(), "b.db");
    assert_eq!(session.state(), SessionState::Scanned);

    session.swap().unwrap();
    assert_eq!(session.result(), Some(&original));
    assert_eq!(session.left().label(), "a.db");
}

#[test]
fn test_merge_updates_result_in_place() {
    let (a, b) = shared_pair();
    let mut session = scanned(&a, &b);

    session.merge(Direction::AToB, MergeScope::All).unwrap();
    assert_eq!(session.state(), SessionState::Merging);
    assert_eq!(session.merging(), Some(Direction::AToB));
    session.wait(&mut |_| {}).unwrap();

    assert_eq!(session.state(), SessionState::Scanned);
    assert_eq!(session.merging(), None);
    let summary = session.last_summary().unwrap();
    assert_eq!(summary.conversations, 1);
    assert_eq!(summary.messages, 10);
    assert!(!session.result().unwrap().has_differences());
    assert_eq!(b.message_count("alice"), 10);
}

#[test]
fn test_merge_after_swap_uses_new_sides() {
    let (a, b) = shared_pair();
    let mut session = scanned(&a, &b);
    session.swap().unwrap();

    // Alice's chat is now on side B
    session.merge(Direction::BToA, MergeScope::All).unwrap();
    session.wait(&mut |_| {}).unwrap();

    assert_eq!(b.message_count("alice"), 10);
    assert_eq!(session.last_summary().map(|s| s.messages), Some(10));
}

#[test]
fn test_conversation_diff_on_demand() {
    let (a, b) = shared_pair();
    let mut session = session(&a, &b);

    let diff = session.get_conversation_diff("alice").unwrap();
    assert_eq!(diff.messages_only_on(Side::A).len(), 10);
    assert!(matches!(
        session.get_conversation_diff("nobody"),
        Err(MergeError::NotFound(_))
    ));
    assert!(matches!(
        session.get_conversation_diff(""),
        Err(MergeError::InvalidInput(_))
    ));
}

#[test]
fn test_cancel_without_partial_returns_to_idle() {
    let a = MemoryStore::new("a.db");
    for i in 0..200 {
        a.chat(&format!("chat-{i}"), ChatType::Single, &[]);
        a.message(&format!("chat-{i}"), "me", i, "hello");
    }
    let (a, b) = (Arc::new(a), Arc::new(MemoryStore::new("b.db")));
    let mut session = session(&a, &b);

    session.scan().unwrap();
    session.cancel(false).unwrap();

    // The scan may have finished before the cancel landed
    match session.state() {
        SessionState::Idle => assert!(session.result().is_none()),
        SessionState::Scanned => assert!(session.result().is_some_and(|r| r.complete)),
        other => panic!("unexpected state {other:?}"),
    }
}

#[test]
fn test_dropping_session_releases_stores() {
    let (a, b) = shared_pair();
    {
        let _session = session(&a, &b);
        assert!(a.has_consumers());
        assert!(b.has_consumers());
    }
    assert!(!a.has_consumers());
    assert!(!b.has_consumers());
}
