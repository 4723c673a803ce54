use chrono::Utc;
use shared::domain::{ChatId, Message, MessageId, MessageKind, MessageStatus, Role, UserId};
use storage::Storage;

fn message(id: &str) -> Message {
    Message {
        id: MessageId::from(id),
        sender_id: UserId(1),
        sender_name: "Student".to_string(),
        sender_role: Role::Student,
        content: format!("message {id}"),
        kind: MessageKind::Text,
        attachments: Vec::new(),
        timestamp: Utc::now(),
        status: MessageStatus::Sent,
        is_edited: false,
        reply_to: None,
    }
}

#[tokio::test]
async fn cache_survives_reopening_the_database_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("cache.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let storage = Storage::new(&database_url).await.expect("open");
        storage
            .save_conversation(ChatId(12), &[message("1"), message("2")])
            .await
            .expect("save");
    }

    assert!(db_path.exists(), "database file should exist");

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let cached = reopened
        .load_conversation(ChatId(12))
        .await
        .expect("load")
        .expect("entry");
    assert_eq!(
        cached
            .messages
            .iter()
            .map(|m| m.id.as_str())
            .collect::<Vec<_>>(),
        vec!["1", "2"]
    );

    assert_eq!(reopened.clear_all().await.expect("clear"), 1);
}
