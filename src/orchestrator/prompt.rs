use crate::identity::Channel;
use crate::models::internal::{ChatMessage, Role};
use crate::services::completion_client::CompletionOptions;

pub const WEB_SYSTEM_INSTRUCTION: &str = "You are Pamoja, a friendly assistant that answers \
questions about sexual and reproductive health. Only discuss health-related topics and \
politely decline anything else. You are still in development, so say so if you are unsure \
and suggest speaking to a health professional. Always answer in the same language the user \
writes in.";

pub const WHATSAPP_SYSTEM_INSTRUCTION: &str = "You are Pamoja, a sexual and reproductive \
health assistant replying over WhatsApp. Keep answers short and concise, a few sentences at \
most. Use plain text only, with no emoji and no markdown. Only discuss health-related topics \
and politely decline anything else.";

pub const WHATSAPP_TEMPERATURE: f32 = 0.7;
pub const WHATSAPP_MAX_TOKENS: u32 = 200;

pub fn system_instruction(channel: Channel) -> ChatMessage {
    match channel {
        Channel::Web => ChatMessage::system(WEB_SYSTEM_INSTRUCTION),
        Channel::WhatsApp => ChatMessage::system(WHATSAPP_SYSTEM_INSTRUCTION),
    }
}

/// Web turns use the provider defaults.
pub fn completion_options(channel: Channel) -> CompletionOptions {
    match channel {
        Channel::Web => CompletionOptions::default(),
        Channel::WhatsApp => CompletionOptions {
            temperature: Some(WHATSAPP_TEMPERATURE),
            max_tokens: Some(WHATSAPP_MAX_TOKENS),
        },
    }
}

/// Drop recovered system entries; the current channel's instruction replaces them.
pub fn strip_system(history: Vec<ChatMessage>) -> Vec<ChatMessage> {
    history
        .into_iter()
        .filter(|msg| msg.role != Role::System)
        .collect()
}

/// The most recent `limit` messages. `0` keeps everything.
pub fn window(history: &[ChatMessage], limit: usize) -> &[ChatMessage] {
    if limit == 0 || history.len() <= limit {
        history
    } else {
        &history[history.len() - limit..]
    }
}

/// System instruction, then the (windowed) history, then the new utterance.
pub fn assemble(channel: Channel, history: &[ChatMessage], utterance: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(system_instruction(channel));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(utterance));
    messages
}
