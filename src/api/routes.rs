use axum::{
    extract::{rejection::JsonRejection, FromRef, Query, State},
    middleware,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;

use crate::{
    api::{
        dto::*,
        rate_limiter::{rate_limit_middleware, RateLimiter},
        whatsapp,
    },
    auth::{AuthenticatedUser, MaybeUser},
    config::Config,
    identity::{self, Channel},
    models::internal::{Conversation, Message, Role},
    orchestrator::{ChatError, ChatOrchestrator},
    services::MessageSender,
    storage::repository::ConversationRepository,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn ConversationRepository>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub whatsapp: Arc<dyn MessageSender>,
    pub rate_limiter: RateLimiter,
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        post_chat,
        get_chat,
        delete_chat,
        health,
        whatsapp::verify_webhook,
        whatsapp::receive_message
    ),
    components(schemas(
        ChatRequest,
        ChatReply,
        ChatResponse,
        HistoryData,
        HistoryResponse,
        ClearHistoryResponse,
        HealthResponse,
        ErrorResponse,
        Conversation,
        Message,
        Role
    )),
    tags(
        (name = "chat", description = "Web chat turns and history"),
        (name = "whatsapp", description = "WhatsApp Cloud API webhook")
    )
)]
pub struct ApiDoc;

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Malformed body, missing question or session id", body = ErrorResponse),
        (status = 401, description = "Invalid bearer token", body = ErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ErrorResponse),
        (status = 500, description = "Failed to get AI response", body = ErrorResponse)
    )
)]
pub async fn post_chat(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ChatError> {
    let Json(req) = payload.map_err(|rejection| ChatError::Validation(rejection.body_text()))?;
    if req.question.trim().is_empty() {
        return Err(ChatError::Validation("Question is required".to_string()));
    }

    let identity = identity::resolve_web(
        user.as_ref().map(|u| u.user_id.as_str()),
        req.session_id.as_deref(),
    )?;

    let outcome = state
        .orchestrator
        .run_turn(&identity, &req.question, Channel::Web)
        .await?;

    Ok(Json(ChatResponse {
        success: true,
        data: ChatReply {
            results: outcome.reply,
        },
    }))
}

#[utoipa::path(
    get,
    path = "/chat",
    tag = "chat",
    params(HistoryQuery),
    responses(
        (status = 200, description = "All conversations for the caller", body = HistoryResponse),
        (status = 400, description = "Anonymous caller without session id", body = ErrorResponse),
        (status = 401, description = "Invalid bearer token", body = ErrorResponse)
    )
)]
pub async fn get_chat(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let identity = identity::resolve_web(
        user.as_ref().map(|u| u.user_id.as_str()),
        query.session_id.as_deref(),
    )?;

    let messages = state.orchestrator.conversations_for(&identity).await?;

    Ok(Json(HistoryResponse {
        success: true,
        data: HistoryData { messages },
    }))
}

#[utoipa::path(
    delete,
    path = "/chat",
    tag = "chat",
    responses(
        (status = 200, description = "History cleared", body = ClearHistoryResponse),
        (status = 401, description = "Authentication required", body = ErrorResponse)
    )
)]
pub async fn delete_chat(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ClearHistoryResponse>, ChatError> {
    let deleted = state.orchestrator.clear_history(&user.user_id).await?;

    Ok(Json(ClearHistoryResponse {
        success: true,
        message: format!("Chat history cleared ({deleted} conversations removed)"),
    }))
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service status and stored conversation count", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (status, conversations) = match state.repo.count().await {
        Ok(count) => ("ok", count),
        Err(e) => {
            tracing::error!("Health check could not reach the database: {}", e);
            ("degraded", 0)
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        conversations,
    })
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn create_router(state: AppState) -> Router {
    let chat = Router::new()
        .route(
            "/chat",
            get(get_chat).post(post_chat).delete(delete_chat),
        )
        .route_layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ));

    let mut router = Router::new()
        .merge(chat)
        .route(
            "/whatsapp/webhook",
            get(whatsapp::verify_webhook).post(whatsapp::receive_message),
        )
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http());

    if state.config.cors_enabled {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}
