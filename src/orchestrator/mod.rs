pub mod prompt;
pub mod turn_locks;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::crypto::HistoryCipher;
use crate::identity::{Channel, Identity, IdentityError, LookupKey};
use crate::models::internal::{
    ChatMessage, Conversation, NewConversation, NewMessage, Role, StoredHistory,
};
use crate::services::completion_client::{
    CompletionError, CompletionProvider, CompletionRequest,
};
use crate::storage::repository::{ConversationRepository, RepositoryError};
use turn_locks::TurnLocks;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Completion provider error: {0}")]
    Provider(CompletionError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(RepositoryError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<CompletionError> for ChatError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::MissingApiKey => ChatError::Configuration(err.to_string()),
            other => ChatError::Provider(other),
        }
    }
}

impl From<RepositoryError> for ChatError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ChatError::NotFound(what),
            other => ChatError::Storage(other),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TurnSettings {
    pub completion_timeout: Duration,
    /// Prior messages offered to the model; 0 means all of them.
    pub history_window: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            completion_timeout: Duration::from_secs(60),
            history_window: 0,
        }
    }
}

impl From<&Config> for TurnSettings {
    fn from(config: &Config) -> Self {
        Self {
            completion_timeout: Duration::from_secs(config.completion_timeout_secs),
            history_window: config.history_window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub conversation_id: Uuid,
    /// True when this turn opened a new thread.
    pub created: bool,
    pub history_encrypted: bool,
}

pub struct ChatOrchestrator {
    repo: Arc<dyn ConversationRepository>,
    cipher: Arc<HistoryCipher>,
    provider: Arc<dyn CompletionProvider>,
    settings: TurnSettings,
    locks: TurnLocks,
}

impl ChatOrchestrator {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        cipher: Arc<HistoryCipher>,
        provider: Arc<dyn CompletionProvider>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            repo,
            cipher,
            provider,
            settings,
            locks: TurnLocks::new(),
        }
    }

    /// Run one exchange: recover the thread, ask the model, persist both sides.
    ///
    /// Nothing is written unless the provider produced a reply.
    pub async fn run_turn(
        &self,
        identity: &Identity,
        utterance: &str,
        channel: Channel,
    ) -> Result<TurnOutcome, ChatError> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(ChatError::Validation("Question is required".to_string()));
        }

        let key = identity.lookup_key();
        let _turn = self.locks.acquire(&key).await;

        let existing = self.repo.find_latest(&key).await?;
        let history = match &existing {
            Some(conversation) => self.recover_history(conversation),
            None => Vec::new(),
        };

        let prompt = prompt::assemble(
            channel,
            prompt::window(&history, self.settings.history_window),
            utterance,
        );
        tracing::debug!(
            "Assembled prompt for {}: {} messages ({} channel)",
            key,
            prompt.len(),
            channel.as_str()
        );

        let asked_at = Utc::now();
        let reply = self
            .complete(CompletionRequest {
                messages: prompt,
                options: prompt::completion_options(channel),
            })
            .await?;

        let mut thread = Vec::with_capacity(history.len() + 3);
        thread.push(prompt::system_instruction(channel));
        thread.extend(history);
        thread.push(ChatMessage::user(utterance));
        thread.push(ChatMessage::assistant(reply.clone()));
        let stored = self.seal(&thread)?;
        let history_encrypted = stored.is_encrypted();

        let transcript = vec![
            NewMessage::new(Role::User, utterance, asked_at),
            NewMessage::new(Role::Assistant, reply.as_str(), Utc::now()),
        ];

        let (conversation, created) = match existing {
            Some(conversation) => (
                self.repo
                    .record_turn(conversation.id, stored, transcript)
                    .await?,
                false,
            ),
            None => (
                self.repo
                    .create(NewConversation {
                        id: None,
                        owner_user_id: identity.owner_user_id().map(str::to_string),
                        session_id: identity.session_id().map(str::to_string),
                        is_whatsapp: channel == Channel::WhatsApp,
                        history: stored,
                        messages: transcript,
                    })
                    .await?,
                true,
            ),
        };

        tracing::info!(
            "Chat turn stored: conversation={}, messages={}, created={}",
            conversation.id,
            conversation.messages.len(),
            created
        );

        Ok(TurnOutcome {
            reply,
            conversation_id: conversation.id,
            created,
            history_encrypted,
        })
    }

    /// Every thread for the identity with its plaintext transcript, newest first.
    pub async fn conversations_for(
        &self,
        identity: &Identity,
    ) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.repo.find_all(&identity.lookup_key()).await?)
    }

    /// Delete every conversation owned by the user. Anonymous threads are untouched.
    pub async fn clear_history(&self, user_id: &str) -> Result<u64, ChatError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ChatError::Validation("User id is required".to_string()));
        }

        let key = LookupKey::Owner(user_id.to_string());
        let _turn = self.locks.acquire(&key).await;
        Ok(self.repo.delete_all_for_owner(user_id).await?)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ChatError> {
        let timeout = self.settings.completion_timeout;
        let reply = match tokio::time::timeout(timeout, self.provider.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(CompletionError::Timeout(timeout.as_secs())),
        }
        .map_err(|e| {
            tracing::error!("Completion failed: {}", e);
            ChatError::from(e)
        })?;

        let reply = reply.trim();
        if reply.is_empty() {
            tracing::error!("Completion provider returned an empty reply");
            return Err(ChatError::Provider(CompletionError::InvalidResponse(
                "empty reply".to_string(),
            )));
        }
        Ok(reply.to_string())
    }

    /// Prior non-system messages of a thread, or nothing when they cannot be read back.
    fn recover_history(&self, conversation: &Conversation) -> Vec<ChatMessage> {
        let serialized = match &conversation.history {
            StoredHistory::Encrypted(payload) => match self.cipher.decrypt_payload(payload) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::warn!(
                        "Could not decrypt history of conversation {}, starting fresh: {}",
                        conversation.id,
                        e
                    );
                    return Vec::new();
                }
            },
            StoredHistory::PlaintextFallback { serialized } => serialized.clone(),
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&serialized) {
            Ok(messages) => prompt::strip_system(messages),
            Err(e) => {
                tracing::warn!(
                    "Stored history of conversation {} is not a message list, starting fresh: {}",
                    conversation.id,
                    e
                );
                Vec::new()
            }
        }
    }

    fn seal(&self, thread: &[ChatMessage]) -> Result<StoredHistory, ChatError> {
        let serialized = serde_json::to_string(thread)?;
        match self.cipher.encrypt(&serialized) {
            Ok(payload) => Ok(StoredHistory::Encrypted(payload)),
            Err(e) => {
                tracing::warn!("History encryption failed, storing plaintext fallback: {}", e);
                Ok(StoredHistory::PlaintextFallback { serialized })
            }
        }
    }
}
