//! Pamoja Chat - encrypted conversation history and AI chat turns for web and WhatsApp

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod identity;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;

// Re-export main types for convenience
pub use crate::api::routes::{create_router, ApiDoc, AppState};
pub use crate::config::Config;
pub use crate::crypto::{CipherError, EncryptedPayload, HistoryCipher};
pub use crate::identity::{Channel, Identity, LookupKey};
pub use crate::models::internal::{Conversation, Message, NewConversation, NewMessage};
pub use crate::orchestrator::{ChatError, ChatOrchestrator, TurnOutcome, TurnSettings};
pub use crate::services::{CompletionProvider, MessageSender, OpenAiCompatibleClient, WhatsAppClient};
pub use crate::storage::db::init_db;
pub use crate::storage::repository::{ConversationRepository, SeaOrmConversationRepository};
