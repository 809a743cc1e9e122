use super::{
    bearer, create_test_app, create_test_app_with, create_test_config, empty_request, json,
    json_request, send,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use pamoja_chat::{identity::LookupKey, storage::ConversationRepository};

// ============================================
// REST API Tests
// ============================================

#[tokio::test]
async fn test_api_anonymous_chat() {
    let app = create_test_app().await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            None,
            json!({ "question": "What is emergency contraception?", "sessionId": "sess-123" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["results"], "reply 1");

    let stored = app
        .repo
        .find_latest(&LookupKey::Session("sess-123".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.is_anonymous);
    assert_eq!(stored.messages.len(), 2);
}

#[tokio::test]
async fn test_api_authenticated_chat_ignores_session_id() {
    let app = create_test_app().await;
    let auth = bearer("user-42");

    let (status, _) = send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            Some(&auth),
            json!({ "question": "hello", "sessionId": "sess-ignored" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let owned = app
        .repo
        .find_all(&LookupKey::Owner("user-42".to_string()))
        .await
        .unwrap();
    assert_eq!(owned.len(), 1);
    assert!(!owned[0].is_anonymous);
    assert!(app
        .repo
        .find_latest(&LookupKey::Session("sess-ignored".to_string()))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_api_chat_requires_question() {
    let app = create_test_app().await;

    let (status, body) = send(
        &app.router,
        json_request("POST", "/chat", None, json!({ "sessionId": "sess-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(app.provider.requests().is_empty());
}

#[tokio::test]
async fn test_api_chat_malformed_body() {
    let app = create_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("Content-Type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
    assert!(app.provider.requests().is_empty());
}

#[tokio::test]
async fn test_api_chat_without_content_type() {
    let app = create_test_app().await;

    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .body(Body::from(
            json!({ "question": "hello", "sessionId": "sess-1" }).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
    assert_eq!(app.repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_api_anonymous_chat_requires_session() {
    let app = create_test_app().await;

    let (status, body) = send(
        &app.router,
        json_request("POST", "/chat", None, json!({ "question": "hello" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(app.repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_api_rejects_reserved_session_prefix() {
    let app = create_test_app().await;

    let (status, _) = send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            None,
            json!({ "question": "hello", "sessionId": "wa_15551234567" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_invalid_token_rejected() {
    let app = create_test_app().await;

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            Some("Bearer not-a-jwt"),
            json!({ "question": "hello", "sessionId": "sess-1" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(app.repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_api_provider_failure_returns_500() {
    let app = create_test_app().await;
    app.provider.set_failing(true);

    let (status, body) = send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            None,
            json!({ "question": "hello", "sessionId": "sess-1" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Failed to get AI response");
    assert!(body["details"]
        .as_str()
        .unwrap()
        .contains("provider unavailable"));
    assert_eq!(app.repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_api_get_history_for_session() {
    let app = create_test_app().await;
    for question in ["first", "second"] {
        let (status, _) = send(
            &app.router,
            json_request(
                "POST",
                "/chat",
                None,
                json!({ "question": question, "sessionId": "sess-hist" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(
        &app.router,
        empty_request("GET", "/chat?sessionId=sess-hist", None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let conversations = body["data"]["messages"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    let conversation = &conversations[0];
    assert_eq!(conversation["sessionId"], "sess-hist");
    assert_eq!(conversation["isAnonymous"], true);
    assert_eq!(conversation["isWhatsApp"], false);
    assert_eq!(conversation["messages"].as_array().unwrap().len(), 4);
    assert_eq!(conversation["messages"][2]["content"], "second");
    assert!(conversation.get("history").is_none());
}

#[tokio::test]
async fn test_api_get_history_requires_identity() {
    let app = create_test_app().await;

    let (status, _) = send(&app.router, empty_request("GET", "/chat", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_clear_history() {
    let app = create_test_app().await;
    let auth = bearer("user-clear");

    for _ in 0..2 {
        send(
            &app.router,
            json_request("POST", "/chat", Some(&auth), json!({ "question": "hi" })),
        )
        .await;
    }
    send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            None,
            json!({ "question": "hi", "sessionId": "anon-keep" }),
        ),
    )
    .await;

    let (status, body) = send(&app.router, empty_request("DELETE", "/chat", Some(&auth))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["message"].as_str().is_some());

    let (status, body) = send(&app.router, empty_request("GET", "/chat", Some(&auth))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["messages"].as_array().unwrap().is_empty());

    let (_, body) = send(
        &app.router,
        empty_request("GET", "/chat?sessionId=anon-keep", None),
    )
    .await;
    assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_api_clear_history_requires_auth() {
    let app = create_test_app().await;

    let (status, body) = send(&app.router, empty_request("DELETE", "/chat", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_api_rate_limit() {
    let app = create_test_app_with(pamoja_chat::config::Config {
        rate_limit_per_minute: 2,
        ..create_test_config()
    })
    .await;

    for _ in 0..2 {
        let (status, _) = send(
            &app.router,
            empty_request("GET", "/chat?sessionId=sess-rl", None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _) = send(
        &app.router,
        empty_request("GET", "/chat?sessionId=sess-rl", None),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Health is outside the limited routes.
    let (status, _) = send(&app.router, empty_request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_api_health() {
    let app = create_test_app().await;
    send(
        &app.router,
        json_request(
            "POST",
            "/chat",
            None,
            json!({ "question": "hi", "sessionId": "sess-health" }),
        ),
    )
    .await;

    let (status, body) = send(&app.router, empty_request("GET", "/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["conversations"], 1);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_api_openapi_document() {
    let app = create_test_app().await;

    let (status, body) = send(
        &app.router,
        empty_request("GET", "/api-docs/openapi.json", None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/chat"]["post"].is_object());
    assert!(body["paths"]["/whatsapp/webhook"]["get"].is_object());
    assert!(body["components"]["schemas"]["ChatRequest"].is_object());
}
