// tests/integration/mod.rs

// ============================================
// Re-export commonly used types
// ============================================
pub use serde_json::json;
pub use std::sync::Arc;
pub use uuid::Uuid;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use pamoja_chat::{
    api::{
        rate_limiter::RateLimiter,
        routes::{create_router, AppState},
    },
    auth::Claims,
    config::Config,
    crypto::HistoryCipher,
    orchestrator::{ChatOrchestrator, TurnSettings},
    services::{
        CompletionError, CompletionProvider, CompletionRequest, MessageSender, WhatsAppError,
    },
    storage::{init_db, SeaOrmConversationRepository},
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tower::ServiceExt;

// ============================================
// Public modules (test files)
// ============================================
pub mod api;
pub mod repository;

// ============================================
// Shared Test Helpers
// ============================================

pub const TEST_KEY: [u8; 32] = [7u8; 32];
pub const JWT_SECRET: &str = "integration-test-jwt-secret";
pub const VERIFY_TOKEN: &str = "verify-me-please";

pub async fn test_repo() -> Arc<SeaOrmConversationRepository> {
    let db = init_db("sqlite::memory:").await.unwrap();
    Arc::new(SeaOrmConversationRepository::new(db))
}

pub fn test_cipher() -> Arc<HistoryCipher> {
    Arc::new(HistoryCipher::from_key(TEST_KEY))
}

/// Replays queued replies (then `reply N`) and records every request it saw.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<CompletionRequest>>,
    failing: AtomicBool,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replying(replies: &[&str]) -> Arc<Self> {
        let provider = Self::default();
        provider
            .replies
            .lock()
            .unwrap()
            .extend(replies.iter().map(|r| r.to_string()));
        Arc::new(provider)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests().pop().expect("provider was never called")
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if self.failing.load(Ordering::SeqCst) {
            return Err(CompletionError::ApiError {
                status: 503,
                message: "provider unavailable".to_string(),
            });
        }

        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("reply {call}")))
    }
}

/// Captures outbound WhatsApp messages instead of calling the Graph API.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), WhatsAppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WhatsAppError::Delivery {
                status: 400,
                body: "invalid recipient".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

pub fn create_test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        encryption_secret: Some("integration-test-encryption-secret".to_string()),
        jwt_secret: Some(JWT_SECRET.to_string()),
        completion_api_key: Some("sk-test".to_string()),
        whatsapp_verify_token: Some(VERIFY_TOKEN.to_string()),
        whatsapp_phone_number_id: Some("1234567890".to_string()),
        whatsapp_access_token: Some("wa-token".to_string()),
        rate_limit_per_minute: 1000,
        ..Config::default()
    }
}

pub fn test_orchestrator(
    repo: Arc<SeaOrmConversationRepository>,
    provider: Arc<dyn CompletionProvider>,
) -> ChatOrchestrator {
    ChatOrchestrator::new(repo, test_cipher(), provider, TurnSettings::default())
}

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<SeaOrmConversationRepository>,
    pub provider: Arc<ScriptedProvider>,
    pub sender: Arc<RecordingSender>,
}

pub async fn create_test_app_with(config: Config) -> TestApp {
    let repo = test_repo().await;
    let provider = ScriptedProvider::new();
    let sender = RecordingSender::new();

    let state = AppState {
        rate_limiter: RateLimiter::new(config.rate_limit_per_minute),
        config: Arc::new(config),
        repo: repo.clone(),
        orchestrator: Arc::new(test_orchestrator(repo.clone(), provider.clone())),
        whatsapp: sender.clone(),
    };

    TestApp {
        router: create_router(state),
        repo,
        provider,
        sender,
    }
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(create_test_config()).await
}

pub fn bearer(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

/// Send a request and decode the JSON body (`Null` when the body is not JSON).
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

pub fn json_request(
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: serde_json::Value,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn empty_request(method: &str, uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }
    builder.body(Body::empty()).unwrap()
}
