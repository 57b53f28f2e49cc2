pub mod auth;
pub mod types;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex as AsyncMutex;

use auth::CredentialStore;
use types::{
    AnalyzeRequest, AnalyzeResponse, AuthTokens, Avatar, LoginRequest, NewAvatar,
    RefreshRequest, Registration, ReplayDialogue, ReplayDialogueRequest, SaveChatRequest,
    SavedChat, SavedChatDetails, SpeakRequest, SpeakResponse, UserProfile,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Session expired, please log in again")]
    SessionExpired,
    #[error("Parse error: {0}")]
    Parse(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Api { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// The backend calls the turn and replay logic depends on.
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    async fn speak(&self, request: &SpeakRequest) -> Result<SpeakResponse, ApiError>;
    async fn replay_dialogue(&self, conversation_id: &str) -> Result<ReplayDialogue, ApiError>;
}

/// Resolves a backend media path against the asset host. Absolute URLs pass through.
pub fn resolve_asset_url(asset_base: &str, path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/media/{}",
        asset_base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
    tokens: RwLock<Option<AuthTokens>>,
    refresh_gate: AsyncMutex<()>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::ACCEPT,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;
        let tokens = credentials.load();
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
            tokens: RwLock::new(tokens),
            refresh_gate: AsyncMutex::new(()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── Tokens ──

    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .unwrap()
            .as_ref()
            .map(|t| t.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    pub fn save_tokens(&self, tokens: AuthTokens) {
        self.credentials.save(&tokens);
        *self.tokens.write().unwrap() = Some(tokens);
    }

    pub fn clear_tokens(&self) {
        self.credentials.clear();
        *self.tokens.write().unwrap() = None;
    }

    // ── Transport ──

    async fn dispatch<F>(&self, build: &F, token: Option<&str>) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut req = build(&self.client);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        Ok(req.send().await?)
    }

    /// Sends with the current access token. A 401 gets one refresh-and-retry.
    async fn send<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let stale = self.access_token();
        let resp = self.dispatch(&build, stale.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check(resp).await;
        }

        tracing::debug!("backend answered 401, refreshing access token");
        let fresh = self.refreshed_token(stale).await?;
        let resp = self.dispatch(&build, Some(&fresh)).await?;
        check(resp).await
    }

    /// Sends without credentials and without refresh handling.
    async fn send_public<F>(&self, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let resp = self.dispatch(&build, None).await?;
        check(resp).await
    }

    /// Returns an access token newer than `stale`. Callers that arrive while a refresh is
    /// in flight wait on the gate and reuse its result instead of refreshing again.
    async fn refreshed_token(&self, stale: Option<String>) -> Result<String, ApiError> {
        let _gate = self.refresh_gate.lock().await;

        let current = self.tokens.read().unwrap().clone();
        let Some(current) = current else {
            return Err(ApiError::SessionExpired);
        };
        if stale.as_deref() != Some(current.access_token.as_str()) {
            return Ok(current.access_token);
        }
        if current.refresh_token.is_empty() {
            tracing::warn!("no refresh token available, logging out");
            self.clear_tokens();
            return Err(ApiError::SessionExpired);
        }

        match self.request_refresh(&current.refresh_token).await {
            Ok(tokens) => {
                tracing::info!("access token refreshed");
                let access = tokens.access_token.clone();
                self.save_tokens(tokens);
                Ok(access)
            }
            Err(e) => {
                tracing::warn!(error = %e, "token refresh failed, logging out");
                self.clear_tokens();
                Err(ApiError::SessionExpired)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        let url = self.url("/refresh-token");
        let body = RefreshRequest { refresh_token };
        let resp = self.send_public(|c| c.post(&url).json(&body)).await?;
        json(resp).await
    }

    // ── Auth ──

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthTokens, ApiError> {
        let url = self.url("/login");
        let body = LoginRequest { email, password };
        let resp = self.send_public(|c| c.post(&url).json(&body)).await?;
        let tokens: AuthTokens = json(resp).await?;
        self.save_tokens(tokens.clone());
        Ok(tokens)
    }

    pub async fn register(&self, registration: &Registration) -> Result<serde_json::Value, ApiError> {
        let url = self.url("/users");
        let resp = self.send_public(|c| c.post(&url).json(registration)).await?;
        json(resp).await
    }

    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        let url = self.url("/me");
        let resp = self.send(|c| c.get(&url)).await?;
        json(resp).await
    }

    // ── Avatars ──

    pub async fn get_avatars(&self) -> Result<Vec<Avatar>, ApiError> {
        let url = self.url("/avatar");
        let resp = self.send(|c| c.get(&url)).await?;
        json(resp).await
    }

    pub async fn upload_avatar(&self, avatar: &NewAvatar) -> Result<Avatar, ApiError> {
        let url = self.url("/avatar");
        let resp = self
            .send(|c| c.post(&url).multipart(avatar_form(avatar)))
            .await?;
        json(resp).await
    }

    // ── Chat history ──

    pub async fn save_chat(&self, title: &str, conversation_id: &str) -> Result<SavedChat, ApiError> {
        let url = self.url("/chat-history");
        let body = SaveChatRequest {
            title,
            conversation_id,
        };
        let resp = self.send(|c| c.post(&url).json(&body)).await?;
        json(resp).await
    }

    pub async fn list_saved_chats(&self) -> Result<Vec<SavedChat>, ApiError> {
        let url = self.url("/chat-history");
        let resp = self.send(|c| c.get(&url)).await?;
        json(resp).await
    }

    pub async fn get_saved_chat(&self, uid: &str) -> Result<SavedChatDetails, ApiError> {
        let url = self.url(&format!("/chat-history/{}", uid));
        let resp = self.send(|c| c.get(&url)).await?;
        json(resp).await
    }

    pub async fn analyze(&self, text: &str) -> Result<String, ApiError> {
        let url = self.url("/analyze");
        let body = AnalyzeRequest { text };
        let resp = self.send(|c| c.post(&url).json(&body)).await?;
        let data: AnalyzeResponse = json(resp).await?;
        Ok(data.into_summary())
    }
}

#[async_trait]
impl DialogueBackend for ApiClient {
    async fn speak(&self, request: &SpeakRequest) -> Result<SpeakResponse, ApiError> {
        let url = self.url("/speak");
        let resp = self.send(|c| c.post(&url).json(request)).await?;
        json(resp).await
    }

    async fn replay_dialogue(&self, conversation_id: &str) -> Result<ReplayDialogue, ApiError> {
        let url = self.url("/replay-dialogue");
        let body = ReplayDialogueRequest { conversation_id };
        let resp = self.send(|c| c.post(&url).json(&body)).await?;
        json(resp).await
    }
}

fn avatar_form(avatar: &NewAvatar) -> Form {
    let video = Part::bytes(avatar.video.clone()).file_name(avatar.video_file_name.clone());
    Form::new()
        .text("side", avatar.side.as_str().to_ascii_uppercase())
        .text("avatar_name", avatar.avatar_name.clone())
        .text("voice_name", avatar.voice_name.clone())
        .text("elevenlabs_voice_id", avatar.elevenlabs_voice_id.clone())
        .part("video", video)
}

async fn check(resp: Response) -> Result<Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status,
        message: error_message(&text),
    })
}

/// Pulls `detail` or `message` out of a JSON error body, else returns the body as-is.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["detail", "message"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

async fn json<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    resp.json().await.map_err(|e| ApiError::Parse(e.to_string()))
}
