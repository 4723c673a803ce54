use std::time::Duration;

use chrono::TimeZone;
use shared::domain::Role;

use super::*;

fn me() -> ChatIdentity {
    ChatIdentity {
        user_id: UserId(7),
        user_name: "Sam".into(),
        user_role: Role::Student,
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_000_000 + secs, 0).unwrap()
}

fn wire(id: i64, sender: i64, content: &str, timestamp: Option<DateTime<Utc>>) -> WireMessage {
    WireMessage {
        id: MessageId::from(id),
        sender_id: Some(UserId(sender)),
        sender_name: Some(format!("user-{sender}")),
        sender_role: Some(Role::Admin),
        content: content.to_string(),
        message_type: None,
        attachments: Vec::new(),
        timestamp: timestamp.map(|t| t.to_rfc3339()),
        is_edited: false,
        reply_to: None,
    }
}

fn reconciler() -> MessageReconciler {
    MessageReconciler::new(Duration::from_secs(5))
}

fn ids(reconciler: &MessageReconciler) -> Vec<&str> {
    reconciler.messages().iter().map(|m| m.id.as_str()).collect()
}

#[test]
fn optimistic_messages_get_monotonic_temp_ids() {
    let mut r = reconciler();
    let first = r.append_optimistic("Hello", &me(), None, at(0));
    let second = r.append_optimistic("Again", &me(), None, at(1));

    assert_eq!(first.id.as_str(), "temp-1");
    assert_eq!(second.id.as_str(), "temp-2");
    assert_eq!(first.status, MessageStatus::Sending);
    assert_eq!(ids(&r), vec!["temp-1", "temp-2"]);
}

#[test]
fn echo_of_optimistic_send_replaces_it_in_place() {
    let mut r = reconciler();
    r.append_optimistic("Hello", &me(), None, at(0));
    r.reconcile_incoming(wire(41, 9, "earlier", Some(at(1))), at(1));

    let outcome = r.reconcile_incoming(wire(42, 7, "Hello", Some(at(2))), at(2));

    match outcome {
        ReconcileOutcome::Replaced {
            previous_id,
            message,
        } => {
            assert_eq!(previous_id.as_str(), "temp-1");
            assert_eq!(message.status, MessageStatus::Delivered);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(ids(&r), vec!["42", "41"]);
}

#[test]
fn optimistic_send_then_echo_leaves_exactly_one_entry() {
    let mut r = reconciler();
    r.append_optimistic("Hello", &me(), None, at(0));
    r.reconcile_incoming(wire(42, 7, "Hello", Some(at(0))), at(0));
    let again = r.reconcile_incoming(wire(42, 7, "Hello", Some(at(0))), at(1));

    assert_eq!(again, ReconcileOutcome::Duplicate);
    assert_eq!(ids(&r), vec!["42"]);
}

#[test]
fn rest_confirmation_marks_sent() {
    let mut r = reconciler();
    let temp = r.append_optimistic("Hello", &me(), None, at(0));

    let outcome = r.confirm_send(&temp.id, wire(42, 7, "Hello", Some(at(0))), at(0));

    assert!(matches!(outcome, ConfirmOutcome::Replaced { .. }));
    assert_eq!(r.messages().len(), 1);
    assert_eq!(r.messages()[0].id.as_str(), "42");
    assert_eq!(r.messages()[0].status, MessageStatus::Sent);
}

#[test]
fn confirmation_after_echo_keeps_delivered_status() {
    let mut r = reconciler();
    let temp = r.append_optimistic("Hello", &me(), None, at(0));
    r.reconcile_incoming(wire(42, 7, "Hello", Some(at(0))), at(0));

    let outcome = r.confirm_send(&temp.id, wire(42, 7, "Hello", Some(at(0))), at(0));

    assert_eq!(outcome, ConfirmOutcome::Unknown);
    assert_eq!(ids(&r), vec!["42"]);
    assert_eq!(r.messages()[0].status, MessageStatus::Delivered);
}

#[test]
fn confirmation_drops_optimistic_entry_when_permanent_copy_exists() {
    let mut r = reconciler();
    // echo arrived under a different local copy, so both exist
    r.reconcile_incoming(wire(42, 7, "Hello", Some(at(0))), at(0));
    let temp = r.append_optimistic("Hello!", &me(), None, at(1));

    let outcome = r.confirm_send(&temp.id, wire(42, 7, "Hello", Some(at(0))), at(1));

    assert_eq!(outcome, ConfirmOutcome::Removed { temp_id: temp.id });
    assert_eq!(ids(&r), vec!["42"]);
}

#[test]
fn near_duplicate_within_window_is_ignored() {
    let mut r = reconciler();
    r.reconcile_incoming(wire(1, 9, "ping", Some(at(0))), at(0));

    let inside = r.reconcile_incoming(wire(2, 9, "ping", Some(at(4))), at(4));
    let outside = r.reconcile_incoming(wire(3, 9, "ping", Some(at(11))), at(11));

    assert_eq!(inside, ReconcileOutcome::SuppressedNearDuplicate);
    assert!(matches!(outside, ReconcileOutcome::Appended(_)));
    assert_eq!(ids(&r), vec!["1", "3"]);
}

#[test]
fn same_content_from_another_sender_is_kept() {
    let mut r = reconciler();
    r.reconcile_incoming(wire(1, 9, "ok", Some(at(0))), at(0));
    let other = r.reconcile_incoming(wire(2, 10, "ok", Some(at(0))), at(0));

    assert!(matches!(other, ReconcileOutcome::Appended(_)));
    assert_eq!(r.messages().len(), 2);
}

#[test]
fn in_order_arrivals_stay_sorted() {
    let mut r = reconciler();
    for i in 0..20 {
        r.reconcile_incoming(wire(i, 9, &format!("m{i}"), Some(at(i * 10))), at(i * 10));
    }

    let stamps = r.messages().iter().map(|m| m.timestamp).collect::<Vec<_>>();
    let mut sorted = stamps.clone();
    sorted.sort();
    assert_eq!(stamps, sorted);
    assert_eq!(r.messages().len(), 20);
}

#[test]
fn out_of_order_arrival_is_placed_by_timestamp() {
    let mut r = reconciler();
    r.reconcile_incoming(wire(2, 9, "second", Some(at(20))), at(30));
    r.reconcile_incoming(wire(1, 9, "first", Some(at(10))), at(31));

    assert_eq!(ids(&r), vec!["1", "2"]);
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut r = reconciler();
    r.reconcile_incoming(wire(5, 9, "a", Some(at(10))), at(10));
    r.reconcile_incoming(wire(3, 8, "b", Some(at(10))), at(10));

    assert_eq!(ids(&r), vec!["5", "3"]);
}

#[test]
fn unparseable_timestamp_falls_back_to_now() {
    let mut r = reconciler();
    let mut broken = wire(8, 9, "when?", None);
    broken.timestamp = Some("yesterday-ish".into());

    let outcome = r.reconcile_incoming(broken, at(99));

    match outcome {
        ReconcileOutcome::Appended(message) => assert_eq!(message.timestamp, at(99)),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(r.messages().len(), 1);
}

#[test]
fn edit_updates_content_in_place() {
    let mut r = reconciler();
    r.reconcile_incoming(wire(1, 9, "teh", Some(at(0))), at(0));
    r.reconcile_incoming(wire(2, 9, "next", Some(at(1))), at(1));

    let outcome = r.mark_edited(&MessageId::from(1), "the".into());

    assert!(matches!(outcome, EditOutcome::Applied(_)));
    assert_eq!(ids(&r), vec!["1", "2"]);
    assert_eq!(r.messages()[0].content, "the");
    assert!(r.messages()[0].is_edited);
}

#[test]
fn edit_before_message_is_queued_and_applied_on_arrival() {
    let mut r = reconciler();
    assert_eq!(
        r.mark_edited(&MessageId::from(4), "fixed".into()),
        EditOutcome::Queued
    );

    r.reconcile_incoming(wire(4, 9, "broken", Some(at(0))), at(0));

    assert_eq!(r.messages()[0].content, "fixed");
    assert!(r.messages()[0].is_edited);
}

#[test]
fn failed_send_can_be_retried_once() {
    let mut r = reconciler();
    let temp = r.append_optimistic("retry me", &me(), None, at(0));

    assert!(r.mark_send_failed(&temp.id));
    assert!(r.is_send_failed(&temp.id));
    assert_eq!(r.messages()[0].status, MessageStatus::Sending);

    let (content, reply_to) = r.take_retry(&temp.id).expect("retry");
    assert_eq!(content, "retry me");
    assert_eq!(reply_to, None);
    assert!(r.take_retry(&temp.id).is_none());
}

#[test]
fn history_load_sorts_and_keeps_unconfirmed_sends() {
    let mut r = reconciler();
    r.append_optimistic("pending", &me(), None, at(50));

    r.load_history(
        vec![
            wire(3, 9, "c", Some(at(30))),
            wire(1, 9, "a", Some(at(10))),
            wire(2, 9, "b", Some(at(20))),
            wire(1, 9, "a", Some(at(10))),
        ],
        at(60),
    );

    assert_eq!(ids(&r), vec!["1", "2", "3", "temp-1"]);
}

#[test]
fn mark_all_read_skips_own_messages() {
    let mut r = reconciler();
    r.reconcile_incoming(wire(1, 9, "from admin", Some(at(0))), at(0));
    r.reconcile_incoming(wire(2, 7, "from me", Some(at(1))), at(1));

    let changed = r.mark_all_read(UserId(7));

    assert_eq!(changed, vec![MessageId::from(1)]);
    assert_eq!(r.messages()[0].status, MessageStatus::Read);
    assert_eq!(r.messages()[1].status, MessageStatus::Delivered);
}

#[test]
fn senderless_messages_never_pass_for_our_own() {
    let guest = ChatIdentity {
        user_id: UserId(0),
        user_name: "guest".into(),
        user_role: Role::Student,
    };
    let mut r = reconciler();
    r.append_optimistic("hi", &guest, None, at(0));

    let mut anonymous = wire(50, 0, "hi", Some(at(1)));
    anonymous.sender_id = None;
    let outcome = r.reconcile_incoming(anonymous, at(1));

    assert!(matches!(outcome, ReconcileOutcome::Appended(_)), "{outcome:?}");
    assert_eq!(ids(&r), vec!["temp-1", "50"]);
    assert_eq!(r.get(&MessageId::from("50")).map(|m| m.sender_id), Some(UserId::UNKNOWN));

    let read = r.mark_all_read(guest.user_id);
    assert_eq!(read, vec![MessageId::from("50")]);
}
