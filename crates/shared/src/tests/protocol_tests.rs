use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::{
    domain::{MessageId, MessageKind, MessageStatus, Role, UserId},
    protocol::{ClientFrame, PresenceAction, ServerFrame, WireMessage},
};

#[test]
fn client_frames_use_flat_type_tag() {
    let join = serde_json::to_value(ClientFrame::UserJoin {
        user_id: UserId(7),
        user_role: Role::Student,
    })
    .expect("serialize");
    assert_eq!(
        join,
        json!({"type": "user_join", "user_id": 7, "user_role": "student"})
    );

    let ping = serde_json::to_value(ClientFrame::Ping).expect("serialize");
    assert_eq!(ping, json!({"type": "ping"}));

    let send = serde_json::to_value(ClientFrame::SendMessage {
        message: "hi".to_string(),
        reply_to: None,
    })
    .expect("serialize");
    assert_eq!(
        send,
        json!({"type": "send_message", "message": "hi", "reply_to": null})
    );
}

#[test]
fn decodes_message_sent_with_numeric_id_and_created_at() {
    let frame: ServerFrame = serde_json::from_value(json!({
        "type": "message_sent",
        "message": {
            "id": 42,
            "sender_id": 3,
            "sender_name": "Ada",
            "sender_role": "admin",
            "content": "Hello",
            "type": "text",
            "created_at": "2024-05-01T10:00:00Z"
        }
    }))
    .expect("decode");

    let ServerFrame::MessageSent { message } = frame else {
        panic!("unexpected frame: {frame:?}");
    };
    assert_eq!(message.id, MessageId::from("42"));
    assert_eq!(message.sender_role, Some(Role::Admin));
    assert_eq!(message.message_type, Some(MessageKind::Text));
    assert!(message.has_valid_timestamp());
}

#[test]
fn decodes_typing_and_presence_frames() {
    let typing: ServerFrame = serde_json::from_value(json!({
        "type": "typing_status",
        "user": {"user_id": 9, "user_name": "Bo", "user_role": "tutor"},
        "is_typing": true
    }))
    .expect("decode typing");
    match typing {
        ServerFrame::TypingStatus { user, is_typing } => {
            assert_eq!(user.id, UserId(9));
            assert_eq!(user.role, Role::Tutor);
            assert!(is_typing);
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    let status: ServerFrame =
        serde_json::from_value(json!({"type": "user_status", "action": "left"}))
            .expect("decode status");
    assert_eq!(
        status,
        ServerFrame::UserStatus {
            action: PresenceAction::Left,
            user: None
        }
    );
}

#[test]
fn unknown_frame_types_decode_as_unknown() {
    let frame: ServerFrame =
        serde_json::from_value(json!({"type": "chat_archived", "chat_id": 1})).expect("decode");
    assert_eq!(frame, ServerFrame::Unknown);
}

#[test]
fn unknown_roles_are_preserved() {
    let role: Role = serde_json::from_value(json!("Mentor")).expect("role");
    assert_eq!(role, Role::Other("Mentor".to_string()));
    assert_eq!(serde_json::to_value(&role).expect("ser"), json!("Mentor"));
}

#[test]
fn normalisation_defaults_missing_sender_and_bad_timestamp() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let wire = WireMessage {
        id: MessageId::from("5"),
        sender_id: None,
        sender_name: Some("   ".to_string()),
        sender_role: None,
        content: "x".to_string(),
        message_type: None,
        attachments: Vec::new(),
        timestamp: Some("yesterday-ish".to_string()),
        is_edited: false,
        reply_to: None,
    };
    assert!(!wire.has_valid_timestamp());

    let message = wire.into_message(MessageStatus::Delivered, now);
    assert_eq!(message.timestamp, now);
    assert_eq!(message.sender_id, UserId::UNKNOWN);
    assert!(message.sender_id.is_unknown());
    assert_eq!(message.sender_name, "Unknown");
    assert_eq!(message.kind, MessageKind::Text);
}

#[test]
fn naive_backend_timestamps_are_read_as_utc() {
    let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let wire: WireMessage = serde_json::from_value(json!({
        "id": "11",
        "content": "c",
        "timestamp": "2024-05-01T10:00:00.123456"
    }))
    .expect("decode");
    let message = wire.into_message(MessageStatus::Sent, now);
    assert_eq!(
        message.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        "2024-05-01 10:00:00"
    );
}

#[test]
fn non_string_timestamps_decode_and_fall_back_to_now() {
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    for timestamp in [json!(1714000000), json!({"seconds": 1}), json!(null), json!(true)] {
        let frame: ServerFrame = serde_json::from_value(json!({
            "type": "message_sent",
            "message": {"id": 9, "sender_id": 4, "content": "hi", "timestamp": timestamp}
        }))
        .expect("decode");
        let ServerFrame::MessageSent { message } = frame else {
            panic!("unexpected frame: {frame:?}");
        };
        assert!(!message.has_valid_timestamp());
        assert_eq!(message.into_message(MessageStatus::Delivered, now).timestamp, now);
    }

    let page: crate::protocol::MessagePage = serde_json::from_value(json!({
        "results": [
            {"id": 1, "content": "a", "created_at": 1714000000},
            {"id": 2, "content": "b", "created_at": "2024-05-01T10:00:00Z"}
        ],
        "next": null
    }))
    .expect("page decodes");
    assert_eq!(page.results.len(), 2);
}
