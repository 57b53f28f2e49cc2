use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use avatar_dialogue::api::auth::{CredentialStore, MemoryCredentials};
use avatar_dialogue::api::types::{AuthTokens, SpeakRequest};
use avatar_dialogue::api::{ApiClient, ApiError, DialogueBackend};
use avatar_dialogue::config::{Mode, ReplyAs};
use avatar_dialogue::session::Side;

#[derive(Clone)]
struct TestState {
    access_token: Arc<Mutex<String>>,
    refreshes: Arc<AtomicUsize>,
    refresh_allowed: Arc<AtomicBool>,
}

impl TestState {
    fn new(access_token: &str) -> Self {
        Self {
            access_token: Arc::new(Mutex::new(access_token.to_string())),
            refreshes: Arc::new(AtomicUsize::new(0)),
            refresh_allowed: Arc::new(AtomicBool::new(true)),
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.access_token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false)
    }
}

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Token expired" })),
    )
        .into_response()
}

async fn me_handler(State(state): State<TestState>, headers: HeaderMap) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "id": 7, "username": "amy", "email": "amy@example.com" })).into_response()
}

async fn refresh_handler(State(state): State<TestState>, Json(body): Json<Value>) -> impl IntoResponse {
    state.refreshes.fetch_add(1, Ordering::SeqCst);
    // Give concurrent callers time to pile up behind the gate.
    tokio::time::sleep(Duration::from_millis(100)).await;
    if !state.refresh_allowed.load(Ordering::SeqCst) || body["refreshToken"] != "refresh-1" {
        return unauthorized();
    }
    *state.access_token.lock().unwrap() = "fresh".to_string();
    Json(json!({ "accessToken": "fresh", "refreshToken": "refresh-2" })).into_response()
}

async fn login_handler(State(state): State<TestState>, Json(body): Json<Value>) -> impl IntoResponse {
    if body["password"] != "secret" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "Invalid credentials" })),
        )
            .into_response();
    }
    let token = state.access_token.lock().unwrap().clone();
    Json(json!({ "accessToken": token, "refreshToken": "refresh-1" })).into_response()
}

async fn avatars_handler(State(state): State<TestState>, headers: HeaderMap) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    Json(json!([
        {
            "id": 1, "uid": "u-1", "side": "USER", "avatar_name": "Amy",
            "voice_name": "Bella", "elevenlabs_voice_id": "v-user", "video": "avatars/amy.mp4"
        },
        {
            "id": 2, "uid": "a-1", "side": "AI", "avatar_name": "Nova",
            "voice_name": "Rachel", "elevenlabs_voice_id": "v-ai", "video": "avatars/nova.mp4",
            "voice_options": ["calm"], "status": "active"
        }
    ]))
    .into_response()
}

async fn speak_handler(State(state): State<TestState>, headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "reply": format!("echo: {}", body["text"].as_str().unwrap_or_default()),
        "user_audio": "audio/user-1.mp3",
        "ai_audio": "",
        "received": body,
    }))
    .into_response()
}

async fn saved_chat_handler(State(state): State<TestState>, headers: HeaderMap, Path(uid): Path<String>) -> impl IntoResponse {
    if !state.authorized(&headers) {
        return unauthorized();
    }
    if uid != "chat-1" {
        return (StatusCode::NOT_FOUND, "no such chat").into_response();
    }
    Json(json!({
        "title": "Morning talk",
        "conversation_id": "conv-9",
        "chat_dict": [{ "user": "Hi" }, { "ai": "Hello" }],
        "audio_dict": [{ "user": "h1.mp3" }, { "ai": "h2.mp3" }]
    }))
    .into_response()
}

async fn analyze_handler() -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "detail": "Text too short" })),
    )
}

async fn spawn_backend(state: TestState) -> String {
    let app = Router::new()
        .route("/api/me", get(me_handler))
        .route("/api/refresh-token", post(refresh_handler))
        .route("/api/login", post(login_handler))
        .route("/api/avatar", get(avatars_handler))
        .route("/api/speak", post(speak_handler))
        .route("/api/chat-history/:uid", get(saved_chat_handler))
        .route("/api/analyze", post(analyze_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{addr}/api")
}

fn client(base: &str, credentials: Arc<MemoryCredentials>) -> ApiClient {
    ApiClient::new(base, Duration::from_secs(5), credentials).expect("client")
}

fn stale_tokens() -> Arc<MemoryCredentials> {
    Arc::new(MemoryCredentials::with_tokens(AuthTokens {
        access_token: "stale".into(),
        refresh_token: "refresh-1".into(),
    }))
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let state = TestState::new("rotated-away");
    let base = spawn_backend(state.clone()).await;
    let credentials = stale_tokens();
    let api = client(&base, credentials.clone());

    let results = futures::future::join_all((0..5).map(|_| api.me())).await;
    for result in results {
        assert_eq!(result.expect("request succeeds after refresh").username.as_deref(), Some("amy"));
    }
    assert_eq!(state.refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(api.access_token().as_deref(), Some("fresh"));
    assert_eq!(
        credentials.load(),
        Some(AuthTokens {
            access_token: "fresh".into(),
            refresh_token: "refresh-2".into(),
        })
    );
}

#[tokio::test]
async fn failed_refresh_logs_out() {
    let state = TestState::new("rotated-away");
    state.refresh_allowed.store(false, Ordering::SeqCst);
    let base = spawn_backend(state.clone()).await;
    let credentials = stale_tokens();
    let api = client(&base, credentials.clone());

    let err = api.me().await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired));
    assert!(!api.is_authenticated());
    assert_eq!(credentials.load(), None);
    assert_eq!(state.refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_without_token_is_session_expired() {
    let state = TestState::new("valid");
    let base = spawn_backend(state.clone()).await;
    let api = client(&base, Arc::new(MemoryCredentials::default()));

    assert!(matches!(api.me().await, Err(ApiError::SessionExpired)));
    assert_eq!(state.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn login_stores_tokens_for_later_calls() {
    let state = TestState::new("valid");
    let base = spawn_backend(state.clone()).await;
    let credentials = Arc::new(MemoryCredentials::default());
    let api = client(&base, credentials.clone());

    let err = api.login("amy@example.com", "wrong").await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(err.to_string().contains("Invalid credentials"));
    assert!(!api.is_authenticated());

    api.login("amy@example.com", "secret").await.unwrap();
    assert_eq!(credentials.load().unwrap().access_token, "valid");

    let avatars = api.get_avatars().await.unwrap();
    assert_eq!(avatars.len(), 2);
    assert_eq!(avatars[0].side, Side::User);
    assert_eq!(avatars[1].side, Side::Ai);
    assert_eq!(avatars[1].voice_options.as_deref(), Some(&["calm".to_string()][..]));
    assert_eq!(state.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn speak_sends_the_turn_payload() {
    let state = TestState::new("valid");
    let base = spawn_backend(state).await;
    let api = client(
        &base,
        Arc::new(MemoryCredentials::with_tokens(AuthTokens {
            access_token: "valid".into(),
            refresh_token: "refresh-1".into(),
        })),
    );

    let response = api
        .speak(&SpeakRequest {
            conversation_id: "conv-1".into(),
            text: "Hello".into(),
            sender_type: Side::User,
            user_voice_name: "v-user".into(),
            ai_voice_name: "v-ai".into(),
            reply_as: ReplyAs::Ai,
            mode: Mode::Casual,
            reply_text: None,
        })
        .await
        .unwrap();
    assert_eq!(response.reply.as_deref(), Some("echo: Hello"));
    assert_eq!(response.audio_for(Side::User), Some("audio/user-1.mp3"));
    assert_eq!(response.audio_for(Side::Ai), None);
}

#[tokio::test]
async fn saved_chat_and_error_bodies() {
    let state = TestState::new("valid");
    let base = spawn_backend(state).await;
    let api = client(
        &base,
        Arc::new(MemoryCredentials::with_tokens(AuthTokens {
            access_token: "valid".into(),
            refresh_token: "refresh-1".into(),
        })),
    );

    let chat = api.get_saved_chat("chat-1").await.unwrap();
    assert_eq!(chat.title, "Morning talk");
    let turns = chat.turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].side, Side::Ai);
    assert_eq!(turns[1].audio.as_deref(), Some("h2.mp3"));

    let missing = api.get_saved_chat("nope").await.unwrap_err();
    assert_eq!(missing.status(), Some(404));
    assert!(missing.to_string().contains("no such chat"));

    match api.analyze("hi").await.unwrap_err() {
        ApiError::Api { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Text too short");
        }
        other => panic!("unexpected error: {other}"),
    }
}
