use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_ASSET_BASE_URL: &str = "http://localhost:8000";

/// Who answers a user-side turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyAs {
    #[default]
    Ai,
    Human,
}

impl FromStr for ReplyAs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" => Ok(ReplyAs::Ai),
            "human" => Ok(ReplyAs::Human),
            other => Err(format!("Unknown reply_as value: {}", other)),
        }
    }
}

/// Conversational tone sent with every turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Friendly,
    Formal,
    Casual,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "friendly" => Ok(Mode::Friendly),
            "formal" => Ok(Mode::Formal),
            "casual" => Ok(Mode::Casual),
            other => Err(format!("Unknown mode: {}", other)),
        }
    }
}

/// User preferences persisted in the settings table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub reply_as: ReplyAs,
    pub mode: Mode,
    pub auto_send: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            reply_as: ReplyAs::Ai,
            mode: Mode::Friendly,
            auto_send: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// How long the audio may take to become playable.
    pub readiness_timeout: Duration,
    /// Beat between replayed turns.
    pub inter_turn_pause: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(10),
            inter_turn_pause: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub language: String,
    pub restart_delay: Duration,
    /// Consecutive restarts without recognized speech before capture gives up.
    pub max_restarts: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            restart_delay: Duration::from_millis(300),
            max_restarts: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub asset_base_url: String,
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
    pub playback: PlaybackConfig,
    pub speech: SpeechConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            asset_base_url: DEFAULT_ASSET_BASE_URL.to_string(),
            data_dir: default_data_dir(),
            request_timeout: Duration::from_secs(30),
            playback: PlaybackConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `AVATAR_DIALOGUE_*` variables (a `.env` file is honoured).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("AVATAR_DIALOGUE_API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(url) = lookup("AVATAR_DIALOGUE_ASSET_BASE_URL") {
            config.asset_base_url = url;
        }
        if let Some(dir) = lookup("AVATAR_DIALOGUE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup("AVATAR_DIALOGUE_REQUEST_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => config.request_timeout = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %secs, "ignoring invalid request timeout"),
            }
        }
        config
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("avatar-dialogue")
}
