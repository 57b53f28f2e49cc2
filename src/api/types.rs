use serde::{Deserialize, Serialize};

use crate::config::{Mode, ReplyAs};
use crate::session::Side;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Avatar {
    #[serde(default)]
    pub id: i64,
    pub uid: String,
    pub side: Side,
    pub avatar_name: String,
    pub voice_name: String,
    pub elevenlabs_voice_id: String,
    pub video: String,
    #[serde(default)]
    pub voice_options: Option<Vec<String>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Multipart form for `POST /avatar`.
#[derive(Debug, Clone)]
pub struct NewAvatar {
    pub side: Side,
    pub avatar_name: String,
    pub voice_name: String,
    pub elevenlabs_voice_id: String,
    pub video_file_name: String,
    pub video: Vec<u8>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SpeakRequest {
    pub conversation_id: String,
    pub text: String,
    pub sender_type: Side,
    pub user_voice_name: String,
    pub ai_voice_name: String,
    pub reply_as: ReplyAs,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SpeakResponse {
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub user_audio: Option<String>,
    #[serde(default)]
    pub ai_audio: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl SpeakResponse {
    pub fn audio_for(&self, side: Side) -> Option<&str> {
        let audio = match side {
            Side::User => self.user_audio.as_deref(),
            Side::Ai => self.ai_audio.as_deref(),
        };
        audio.filter(|a| !a.trim().is_empty())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SaveChatRequest<'a> {
    pub title: &'a str,
    pub conversation_id: &'a str,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SavedChat {
    #[serde(default)]
    pub id: i64,
    pub uid: String,
    pub title: String,
    pub conversation_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// One element of the backend's turn arrays: a single `user` or `ai` key.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct SpeakerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai: Option<String>,
}

impl SpeakerEntry {
    pub fn speaker(&self) -> Option<(Side, &str)> {
        if let Some(value) = &self.user {
            return Some((Side::User, value.as_str()));
        }
        self.ai.as_deref().map(|value| (Side::Ai, value))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SavedChatDetails {
    #[serde(default)]
    pub title: String,
    pub conversation_id: String,
    #[serde(default)]
    pub chat_dict: Vec<SpeakerEntry>,
    #[serde(default)]
    pub audio_dict: Vec<SpeakerEntry>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReplayDialogue {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub chat_list: Vec<SpeakerEntry>,
    #[serde(default)]
    pub audio_list: Vec<SpeakerEntry>,
}

/// A stored turn, with its chat and audio entries paired up.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTurn {
    pub side: Side,
    pub text: Option<String>,
    pub audio: Option<String>,
}

/// Pairs the parallel chat/audio arrays by index. The audio entry decides the side when
/// both are present; turns with neither are dropped.
pub fn pair_turns(chat: &[SpeakerEntry], audio: &[SpeakerEntry]) -> Vec<StoredTurn> {
    let len = chat.len().max(audio.len());
    (0..len)
        .filter_map(|i| {
            let said = chat.get(i).and_then(SpeakerEntry::speaker);
            let heard = audio.get(i).and_then(SpeakerEntry::speaker);
            let side = heard.or(said).map(|(side, _)| side)?;
            Some(StoredTurn {
                side,
                text: said.map(|(_, text)| text.to_string()),
                audio: heard
                    .map(|(_, path)| path.trim().to_string())
                    .filter(|path| !path.is_empty()),
            })
        })
        .collect()
}

impl ReplayDialogue {
    pub fn turns(&self) -> Vec<StoredTurn> {
        pair_turns(&self.chat_list, &self.audio_list)
    }
}

impl SavedChatDetails {
    pub fn turns(&self) -> Vec<StoredTurn> {
        pair_turns(&self.chat_dict, &self.audio_dict)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ReplayDialogueRequest<'a> {
    pub conversation_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnalyzeRequest<'a> {
    pub text: &'a str,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AnalyzeResponse {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub analysis: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl AnalyzeResponse {
    pub fn into_summary(self) -> String {
        self.summary
            .or(self.analysis)
            .or(self.text)
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserProfile {
    pub id: serde_json::Value,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Registration {
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub password2: String,
}
