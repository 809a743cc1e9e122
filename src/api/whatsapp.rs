//! WhatsApp Cloud API webhook: subscription handshake and inbound text messages.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::collections::HashMap;

use crate::api::routes::AppState;
use crate::identity::{self, Channel, IdentityError};
use crate::orchestrator::ChatError;
use crate::services::WhatsAppError;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<ChangeValue>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
pub struct TextContent {
    pub body: Option<String>,
}

/// A text message worth answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub from: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),
    #[error("turn: {0}")]
    Turn(#[from] ChatError),
    #[error("delivery: {0}")]
    Delivery(#[from] WhatsAppError),
}

/// Only the first message of the first change is considered.
pub fn extract_text_message(payload: &WebhookPayload) -> Option<InboundText> {
    let message = payload
        .entry
        .first()?
        .changes
        .first()?
        .value
        .as_ref()?
        .messages
        .first()?;

    if message.kind.as_deref() != Some("text") {
        return None;
    }

    let from = message.from.as_deref().map(str::trim).filter(|f| !f.is_empty())?;
    let body = message
        .text
        .as_ref()?
        .body
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())?;

    Some(InboundText {
        from: from.to_string(),
        body: body.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/whatsapp/webhook",
    params(
        ("hub.mode" = String, Query, description = "Must be `subscribe`"),
        ("hub.verify_token" = String, Query, description = "Shared verification token"),
        ("hub.challenge" = String, Query, description = "Echoed back on success")
    ),
    responses(
        (status = 200, description = "Challenge echoed", body = String),
        (status = 403, description = "Verification failed")
    )
)]
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or_default();
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    let expected = state
        .config
        .whatsapp_verify_token
        .as_deref()
        .filter(|t| !t.is_empty());

    match expected {
        Some(expected) if mode == "subscribe" && token == expected => {
            tracing::info!("WhatsApp webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            tracing::warn!("WhatsApp webhook verification failed (mode={})", mode);
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/whatsapp/webhook",
    request_body(content = String, description = "WhatsApp Cloud API message event", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Not a text message event")
    )
)]
pub async fn receive_message(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let inbound = match serde_json::from_slice::<WebhookPayload>(&body) {
        Ok(payload) => extract_text_message(&payload),
        Err(e) => {
            tracing::debug!("Unparseable webhook payload: {}", e);
            None
        }
    };

    let Some(inbound) = inbound else {
        return StatusCode::BAD_REQUEST;
    };

    // Non-2xx would make the provider redeliver an event that has already been read.
    if let Err(e) = relay(&state, &inbound).await {
        tracing::error!("WhatsApp relay failed: {}", e);
    }
    StatusCode::OK
}

async fn relay(state: &AppState, inbound: &InboundText) -> Result<(), RelayError> {
    let identity = identity::resolve_whatsapp(&inbound.from)?;
    let outcome = state
        .orchestrator
        .run_turn(&identity, &inbound.body, Channel::WhatsApp)
        .await?;
    state.whatsapp.send_text(&inbound.from, &outcome.reply).await?;

    tracing::info!(
        "Replied over WhatsApp: conversation={}",
        outcome.conversation_id
    );
    Ok(())
}
