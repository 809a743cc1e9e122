pub mod completion_client;
pub mod whatsapp_client;

// Re-export for convenience
pub use completion_client::{
    CompletionError, CompletionOptions, CompletionProvider, CompletionRequest,
    OpenAiCompatibleClient,
};
pub use whatsapp_client::{MessageSender, WhatsAppClient, WhatsAppError};
