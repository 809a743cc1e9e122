use super::{test_cipher, test_repo, Uuid};
use chrono::{Duration, Utc};
use pamoja_chat::{
    identity::LookupKey,
    models::internal::{NewConversation, NewMessage, Role, StoredHistory},
    storage::{ConversationRepository, RepositoryError},
};

// ============================================
// Storage Layer Tests
// ============================================

fn exchange(question: &str, answer: &str) -> Vec<NewMessage> {
    let now = Utc::now();
    vec![
        NewMessage::new(Role::User, question, now),
        NewMessage::new(Role::Assistant, answer, now + Duration::milliseconds(5)),
    ]
}

fn plaintext(serialized: &str) -> StoredHistory {
    StoredHistory::PlaintextFallback {
        serialized: serialized.to_string(),
    }
}

fn new_conversation(owner: Option<&str>, session: Option<&str>) -> NewConversation {
    NewConversation {
        id: None,
        owner_user_id: owner.map(str::to_string),
        session_id: session.map(str::to_string),
        is_whatsapp: false,
        history: plaintext("[]"),
        messages: exchange("hello", "hi there"),
    }
}

#[tokio::test]
async fn test_repository_create_and_find() {
    let repo = test_repo().await;

    let created = repo
        .create(new_conversation(None, Some("sess-1")))
        .await
        .unwrap();

    assert!(created.is_anonymous);
    assert!(!created.is_whatsapp);
    assert_eq!(created.session_id.as_deref(), Some("sess-1"));
    assert_eq!(created.messages.len(), 2);
    assert_eq!(created.messages[0].role, Role::User);
    assert_eq!(created.messages[1].content, "hi there");

    let found = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.messages, created.messages);
    assert_eq!(found.history, plaintext("[]"));
}

#[tokio::test]
async fn test_repository_owner_is_not_anonymous() {
    let repo = test_repo().await;
    let created = repo
        .create(new_conversation(Some("user-1"), None))
        .await
        .unwrap();
    assert!(!created.is_anonymous);
    assert_eq!(created.owner_user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn test_repository_rejects_missing_lookup_key() {
    let repo = test_repo().await;

    let result = repo.create(new_conversation(None, Some("   "))).await;
    assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
    assert_eq!(repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_repository_find_by_id_missing() {
    let repo = test_repo().await;
    assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_repository_encrypted_history_round_trip() {
    let repo = test_repo().await;
    let cipher = test_cipher();
    let payload = cipher.encrypt(r#"[{"role":"user","content":"hi"}]"#).unwrap();

    let mut conv = new_conversation(None, Some("sess-enc"));
    conv.history = StoredHistory::Encrypted(payload.clone());
    let created = repo.create(conv).await.unwrap();

    let found = repo.find_by_id(created.id).await.unwrap().unwrap();
    match found.history {
        StoredHistory::Encrypted(stored) => {
            assert_eq!(stored, payload);
            assert_eq!(
                cipher.decrypt_payload(&stored).unwrap(),
                r#"[{"role":"user","content":"hi"}]"#
            );
        }
        other => panic!("expected encrypted history, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repository_find_latest_picks_newest() {
    let repo = test_repo().await;
    let key = LookupKey::Session("sess-latest".to_string());

    let first = repo
        .create(new_conversation(None, Some("sess-latest")))
        .await
        .unwrap();
    let second = repo
        .create(new_conversation(None, Some("sess-latest")))
        .await
        .unwrap();
    repo.create(new_conversation(None, Some("someone-else")))
        .await
        .unwrap();

    let latest = repo.find_latest(&key).await.unwrap().unwrap();
    assert_eq!(latest.id, second.id);
    assert_ne!(latest.id, first.id);

    let all = repo.find_all(&key).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.id);
    assert_eq!(all[1].id, first.id);
}

#[tokio::test]
async fn test_repository_lookup_keys_are_separate_columns() {
    let repo = test_repo().await;
    repo.create(new_conversation(Some("abc"), None)).await.unwrap();

    let by_session = repo
        .find_latest(&LookupKey::Session("abc".to_string()))
        .await
        .unwrap();
    assert!(by_session.is_none());

    let by_owner = repo
        .find_latest(&LookupKey::Owner("abc".to_string()))
        .await
        .unwrap();
    assert!(by_owner.is_some());
}

#[tokio::test]
async fn test_repository_record_turn_appends_and_replaces_history() {
    let repo = test_repo().await;
    let created = repo
        .create(new_conversation(None, Some("sess-turn")))
        .await
        .unwrap();

    let updated = repo
        .record_turn(
            created.id,
            plaintext(r#"["second"]"#),
            exchange("and then?", "then this"),
        )
        .await
        .unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.messages.len(), 4);
    let contents: Vec<&str> = updated.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["hello", "hi there", "and then?", "then this"]);
    assert_eq!(updated.history, plaintext(r#"["second"]"#));
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(updated.created_at, created.created_at);
}

#[tokio::test]
async fn test_repository_record_turn_missing_conversation() {
    let repo = test_repo().await;
    let result = repo
        .record_turn(Uuid::new_v4(), plaintext("[]"), exchange("a", "b"))
        .await;
    assert!(matches!(result, Err(RepositoryError::NotFound(_))));
}

#[tokio::test]
async fn test_repository_delete_all_for_owner_scope() {
    let repo = test_repo().await;
    for _ in 0..3 {
        repo.create(new_conversation(Some("user-a"), None)).await.unwrap();
    }
    repo.create(new_conversation(Some("user-b"), None)).await.unwrap();
    let anonymous = repo
        .create(new_conversation(None, Some("user-a")))
        .await
        .unwrap();

    let deleted = repo.delete_all_for_owner("user-a").await.unwrap();
    assert_eq!(deleted, 3);

    assert!(repo
        .find_all(&LookupKey::Owner("user-a".to_string()))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        repo.find_all(&LookupKey::Owner("user-b".to_string()))
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(repo.find_by_id(anonymous.id).await.unwrap().is_some());
    assert_eq!(repo.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_repository_delete_for_unknown_owner() {
    let repo = test_repo().await;
    assert_eq!(repo.delete_all_for_owner("nobody").await.unwrap(), 0);
}
