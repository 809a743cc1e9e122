use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::internal::Conversation;

// ==================== REQUEST DTOs ====================

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub question: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Required for anonymous callers
    pub session_id: Option<String>,
}

// ==================== RESPONSE DTOs ====================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatReply {
    /// The assistant reply text
    pub results: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub success: bool,
    pub data: ChatReply,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryData {
    pub messages: Vec<Conversation>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub success: bool,
    pub data: HistoryData,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClearHistoryResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub conversations: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
