use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{prelude::*, DatabaseTransaction, QueryOrder, Set, TransactionTrait};
use uuid::Uuid;

use crate::crypto::EncryptedPayload;
use crate::identity::LookupKey;
use crate::models::internal::{
    Conversation, Message, NewConversation, NewMessage, Role, StoredHistory,
};
use crate::storage::entities::{conversations, messages};

const FORMAT_ENCRYPTED: &str = "encrypted";
const FORMAT_PLAINTEXT: &str = "plaintext";

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DbError(#[from] sea_orm::DbErr),
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create(&self, conv: NewConversation) -> Result<Conversation, RepositoryError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError>;

    /// The active thread for an identity: the most recently created match.
    async fn find_latest(&self, key: &LookupKey) -> Result<Option<Conversation>, RepositoryError>;

    /// Every thread for an identity, newest first.
    async fn find_all(&self, key: &LookupKey) -> Result<Vec<Conversation>, RepositoryError>;

    /// Replace the stored history and append transcript entries in one transaction.
    async fn record_turn(
        &self,
        id: Uuid,
        history: StoredHistory,
        new_messages: Vec<NewMessage>,
    ) -> Result<Conversation, RepositoryError>;

    async fn delete_all_for_owner(&self, owner_user_id: &str) -> Result<u64, RepositoryError>;
    async fn count(&self) -> Result<u64, RepositoryError>;
}

pub struct SeaOrmConversationRepository {
    db: DatabaseConnection,
}

impl SeaOrmConversationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl ConversationRepository for SeaOrmConversationRepository {
    async fn create(&self, conv: NewConversation) -> Result<Conversation, RepositoryError> {
        let owner_user_id = non_blank(conv.owner_user_id);
        let session_id = non_blank(conv.session_id);
        if owner_user_id.is_none() && session_id.is_none() {
            return Err(RepositoryError::InvalidInput(
                "conversation needs an owner or a session id".to_string(),
            ));
        }

        let conv_id = conv.id.unwrap_or_else(Uuid::new_v4);
        let now = format_timestamp(Utc::now());
        let (encrypted_history, iv, auth_tag, history_format) = history_columns(conv.history);

        let txn = self.db.begin().await?;

        conversations::ActiveModel {
            id: Set(conv_id.to_string()),
            is_anonymous: Set(owner_user_id.is_none()),
            owner_user_id: Set(owner_user_id),
            session_id: Set(session_id),
            encrypted_history: Set(encrypted_history),
            iv: Set(iv),
            auth_tag: Set(auth_tag),
            history_format: Set(history_format.to_string()),
            is_whatsapp: Set(conv.is_whatsapp),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        append_messages(&txn, conv_id, 0, conv.messages).await?;
        txn.commit().await?;

        tracing::info!("Created conversation: {}", conv_id);

        self.find_by_id(conv_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(conv_id.to_string()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let Some(model) = conversations::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let msg_models = model.find_related(messages::Entity).all(&self.db).await?;
        hydrate(model, msg_models).map(Some)
    }

    async fn find_latest(&self, key: &LookupKey) -> Result<Option<Conversation>, RepositoryError> {
        let Some(model) = conversations::Entity::find()
            .filter(key_filter(key))
            .order_by_desc(conversations::Column::CreatedAt)
            .order_by_desc(Expr::cust("rowid"))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let msg_models = model.find_related(messages::Entity).all(&self.db).await?;
        hydrate(model, msg_models).map(Some)
    }

    async fn find_all(&self, key: &LookupKey) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = conversations::Entity::find()
            .filter(key_filter(key))
            .order_by_desc(conversations::Column::CreatedAt)
            .find_with_related(messages::Entity)
            .all(&self.db)
            .await?;

        let mut conversations = rows
            .into_iter()
            .map(|(model, msg_models)| hydrate(model, msg_models))
            .collect::<Result<Vec<_>, _>>()?;
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    async fn record_turn(
        &self,
        id: Uuid,
        history: StoredHistory,
        new_messages: Vec<NewMessage>,
    ) -> Result<Conversation, RepositoryError> {
        let txn = self.db.begin().await?;

        let model = conversations::Entity::find_by_id(id.to_string())
            .one(&txn)
            .await?
            .ok_or_else(|| RepositoryError::NotFound("Conversation not found".to_string()))?;

        let next_position = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(id.to_string()))
            .count(&txn)
            .await? as i64;

        let (encrypted_history, iv, auth_tag, history_format) = history_columns(history);
        let mut active_model: conversations::ActiveModel = model.into();
        active_model.encrypted_history = Set(encrypted_history);
        active_model.iv = Set(iv);
        active_model.auth_tag = Set(auth_tag);
        active_model.history_format = Set(history_format.to_string());
        active_model.updated_at = Set(format_timestamp(Utc::now()));
        active_model.update(&txn).await?;

        append_messages(&txn, id, next_position, new_messages).await?;
        txn.commit().await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn delete_all_for_owner(&self, owner_user_id: &str) -> Result<u64, RepositoryError> {
        let txn = self.db.begin().await?;

        let owned_ids: Vec<String> = conversations::Entity::find()
            .filter(conversations::Column::OwnerUserId.eq(owner_user_id))
            .all(&txn)
            .await?
            .into_iter()
            .map(|model| model.id)
            .collect();

        if owned_ids.is_empty() {
            txn.commit().await?;
            return Ok(0);
        }

        messages::Entity::delete_many()
            .filter(messages::Column::ConversationId.is_in(owned_ids.clone()))
            .exec(&txn)
            .await?;
        let result = conversations::Entity::delete_many()
            .filter(conversations::Column::Id.is_in(owned_ids))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        tracing::info!(
            "Deleted {} conversations for owner {}",
            result.rows_affected,
            owner_user_id
        );
        Ok(result.rows_affected)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(conversations::Entity::find().count(&self.db).await?)
    }
}

// ============================================
// Helpers
// ============================================

async fn append_messages(
    txn: &DatabaseTransaction,
    conversation_id: Uuid,
    first_position: i64,
    new_messages: Vec<NewMessage>,
) -> Result<(), RepositoryError> {
    for (offset, msg) in new_messages.into_iter().enumerate() {
        messages::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            conversation_id: Set(conversation_id.to_string()),
            position: Set(first_position + offset as i64),
            role: Set(msg.role.as_str().to_string()),
            content: Set(msg.content),
            timestamp: Set(format_timestamp(msg.timestamp)),
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}

fn key_filter(key: &LookupKey) -> SimpleExpr {
    match key {
        LookupKey::Owner(id) => conversations::Column::OwnerUserId.eq(id.as_str()),
        LookupKey::Session(id) => conversations::Column::SessionId.eq(id.as_str()),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches chronological order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn history_columns(
    history: StoredHistory,
) -> (String, Option<String>, Option<String>, &'static str) {
    match history {
        StoredHistory::Encrypted(payload) => (
            payload.ciphertext,
            Some(payload.iv),
            Some(payload.auth_tag),
            FORMAT_ENCRYPTED,
        ),
        StoredHistory::PlaintextFallback { serialized } => {
            (serialized, None, None, FORMAT_PLAINTEXT)
        }
    }
}

fn stored_history(model: &conversations::Model) -> Result<StoredHistory, RepositoryError> {
    match (model.history_format.as_str(), &model.iv, &model.auth_tag) {
        (FORMAT_ENCRYPTED, Some(iv), Some(auth_tag)) => {
            Ok(StoredHistory::Encrypted(EncryptedPayload {
                ciphertext: model.encrypted_history.clone(),
                iv: iv.clone(),
                auth_tag: auth_tag.clone(),
            }))
        }
        (FORMAT_PLAINTEXT, _, _) => Ok(StoredHistory::PlaintextFallback {
            serialized: model.encrypted_history.clone(),
        }),
        (format, _, _) => Err(RepositoryError::Corrupt(format!(
            "conversation {} has unusable history (format '{format}')",
            model.id
        ))),
    }
}

fn hydrate(
    model: conversations::Model,
    mut msg_models: Vec<messages::Model>,
) -> Result<Conversation, RepositoryError> {
    msg_models.sort_by_key(|m| m.position);

    let messages = msg_models
        .into_iter()
        .map(|m| -> Result<Message, RepositoryError> {
            Ok(Message {
                role: m.role.parse::<Role>().map_err(RepositoryError::Corrupt)?,
                content: m.content,
                timestamp: parse_timestamp(&m.timestamp)?,
            })
        })
        .collect::<Result<Vec<_>, RepositoryError>>()?;

    Ok(Conversation {
        id: Uuid::parse_str(&model.id)
            .map_err(|e| RepositoryError::Corrupt(format!("bad id '{}': {e}", model.id)))?,
        history: stored_history(&model)?,
        created_at: parse_timestamp(&model.created_at)?,
        updated_at: parse_timestamp(&model.updated_at)?,
        owner_user_id: model.owner_user_id,
        session_id: model.session_id,
        messages,
        is_anonymous: model.is_anonymous,
        is_whatsapp: model.is_whatsapp,
    })
}
