use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;

use crate::api::{ApiClient, ApiError, DialogueBackend};
use crate::config::{AppConfig, Preferences};
use crate::db::Database;
use crate::media::{AudioElement, AvatarStage, MediaPlayer, VideoElement};
use crate::notice::Notifier;
use crate::replay::ReplayOrchestrator;
use crate::session::{Conversation, Session, UiIndicators};
use crate::speech::{CaptureEvent, SpeechCapture, SpeechRecognizer};
use crate::turn::TurnController;

/// Media and speech elements supplied by the host shell.
pub struct Platform {
    pub audio: Arc<dyn AudioElement>,
    pub user_video: Arc<dyn VideoElement>,
    pub ai_video: Arc<dyn VideoElement>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] ApiError),
}

/// Everything the commands operate on.
pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub api: Arc<ApiClient>,
    pub session: Arc<Mutex<Session>>,
    pub prefs: Arc<RwLock<Preferences>>,
    pub player: Arc<MediaPlayer>,
    pub turns: TurnController,
    pub replay: ReplayOrchestrator,
    pub speech: SpeechCapture,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Arc<Database>,
        platform: Platform,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CaptureEvent>), StartupError> {
        let api = Arc::new(ApiClient::new(
            config.api_base_url.clone(),
            config.request_timeout,
            db.clone(),
        )?);
        let backend: Arc<dyn DialogueBackend> = api.clone();
        Self::with_backend(config, db, api, backend, platform)
    }

    /// Like [`AppState::new`], but turns and replays go through `backend`.
    pub fn with_backend(
        config: AppConfig,
        db: Arc<Database>,
        api: Arc<ApiClient>,
        backend: Arc<dyn DialogueBackend>,
        platform: Platform,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CaptureEvent>), StartupError> {
        let conversation = match db.resume_latest()? {
            Some(conversation) => {
                tracing::info!(
                    conversation = %conversation.id,
                    messages = conversation.messages().len(),
                    "resuming conversation"
                );
                conversation
            }
            None => {
                let conversation = Conversation::new();
                db.create_conversation(&conversation.id, &conversation.title)?;
                db.set_active_conversation(&conversation.id)?;
                tracing::info!(conversation = %conversation.id, "started new conversation");
                conversation
            }
        };

        let prefs = Arc::new(RwLock::new(db.load_preferences()?));
        let session = Arc::new(Mutex::new(Session::new(conversation)));
        let stage = AvatarStage::new(platform.user_video, platform.ai_video);
        let player = Arc::new(MediaPlayer::new(
            platform.audio,
            config.playback.readiness_timeout,
        ));

        let turns = TurnController::new(
            backend.clone(),
            player.clone(),
            stage.clone(),
            session.clone(),
            prefs.clone(),
            config.asset_base_url.clone(),
        );
        let replay = ReplayOrchestrator::new(
            backend,
            player.clone(),
            stage,
            config.asset_base_url.clone(),
            config.playback.inter_turn_pause,
        );
        let (speech, captures) =
            SpeechCapture::new(platform.recognizer, config.speech.clone(), prefs.clone());

        let state = Self {
            config,
            db,
            api,
            session,
            prefs,
            player,
            turns,
            replay,
            speech,
            notifier: Notifier::new(),
        };
        Ok((state, captures))
    }

    pub fn indicators(&self) -> UiIndicators {
        UiIndicators {
            replaying: self.replay.is_running(),
            mic: self.speech.active_side(),
        }
    }

    pub fn preferences(&self) -> Preferences {
        *self.prefs.read().unwrap()
    }
}
