use std::sync::{Arc, Mutex, RwLock};

use crate::api::types::SpeakRequest;
use crate::api::{resolve_asset_url, ApiError, DialogueBackend};
use crate::config::{Preferences, ReplyAs};
use crate::media::{AvatarStage, MediaPlayer, PlaybackError, PlaybackOutcome};
use crate::session::{Message, Session, Side};

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Select an avatar for the {0} side first")]
    AvatarNotSelected(Side),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Default)]
pub struct TurnReport {
    pub conversation_id: String,
    /// Messages appended to the conversation, in order.
    pub messages: Vec<Message>,
    /// Playback problems; they never undo an appended message.
    pub playback_errors: Vec<PlaybackError>,
}

#[derive(Debug)]
pub enum TurnOutcome {
    /// Blank text; nothing was sent.
    Ignored,
    /// The conversation was replaced while the backend was answering; nothing was appended.
    Discarded,
    Sent(TurnReport),
}

pub struct TurnController {
    backend: Arc<dyn DialogueBackend>,
    player: Arc<MediaPlayer>,
    stage: AvatarStage,
    session: Arc<Mutex<Session>>,
    prefs: Arc<RwLock<Preferences>>,
    asset_base: String,
}

impl TurnController {
    pub fn new(
        backend: Arc<dyn DialogueBackend>,
        player: Arc<MediaPlayer>,
        stage: AvatarStage,
        session: Arc<Mutex<Session>>,
        prefs: Arc<RwLock<Preferences>>,
        asset_base: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            player,
            stage,
            session,
            prefs,
            asset_base: asset_base.into(),
        }
    }

    /// Sends one turn for `sender`, appends what the backend voiced and plays it back.
    pub async fn send_turn(&self, text: &str, sender: Side) -> Result<TurnOutcome, TurnError> {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!(%sender, "ignoring blank turn");
            return Ok(TurnOutcome::Ignored);
        }

        let prefs = *self.prefs.read().unwrap();
        let request = self.build_request(text, sender, &prefs)?;
        tracing::info!(
            conversation = %request.conversation_id,
            %sender,
            reply_as = ?prefs.reply_as,
            "sending turn"
        );

        let response = self.backend.speak(&request).await?;

        let mut report = TurnReport {
            conversation_id: request.conversation_id.clone(),
            ..Default::default()
        };
        let spoken = Message::new(
            text,
            sender,
            response.audio_for(sender).map(str::to_string),
        );
        if !self.append(&request.conversation_id, spoken.clone(), Some(sender)) {
            return Ok(TurnOutcome::Discarded);
        }
        report.messages.push(spoken.clone());
        self.present(&spoken, &mut report).await;

        let wants_reply = prefs.reply_as == ReplyAs::Ai && sender == Side::User;
        let reply = response
            .reply
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        if let (true, Some(reply)) = (wants_reply, reply) {
            let answer = Message::new(
                reply,
                Side::Ai,
                response.audio_for(Side::Ai).map(str::to_string),
            );
            if self.append(&request.conversation_id, answer.clone(), None) {
                report.messages.push(answer.clone());
                self.present(&answer, &mut report).await;
            }
        }

        Ok(TurnOutcome::Sent(report))
    }

    fn build_request(
        &self,
        text: &str,
        sender: Side,
        prefs: &Preferences,
    ) -> Result<SpeakRequest, TurnError> {
        let session = self.session.lock().unwrap();
        let user = session
            .selected(Side::User)
            .ok_or(TurnError::AvatarNotSelected(Side::User))?;
        let ai = session
            .selected(Side::Ai)
            .ok_or(TurnError::AvatarNotSelected(Side::Ai))?;
        Ok(SpeakRequest {
            conversation_id: session.conversation.id.clone(),
            text: text.to_string(),
            sender_type: sender,
            user_voice_name: user.elevenlabs_voice_id.clone(),
            ai_voice_name: ai.elevenlabs_voice_id.clone(),
            reply_as: prefs.reply_as,
            mode: prefs.mode,
            reply_text: (sender == Side::Ai).then(|| text.to_string()),
        })
    }

    /// Appends to the active conversation if it is still `conversation_id`, clearing the
    /// input field the text came from.
    fn append(&self, conversation_id: &str, message: Message, input: Option<Side>) -> bool {
        let mut session = self.session.lock().unwrap();
        if session.conversation.id != conversation_id {
            tracing::warn!(
                conversation = conversation_id,
                "conversation changed while waiting for the backend, dropping turn"
            );
            return false;
        }
        session.conversation.append(message);
        if let Some(side) = input {
            session.inputs.clear(side);
        }
        true
    }

    async fn present(&self, message: &Message, report: &mut TurnReport) {
        let Some(audio) = message.audio.as_deref() else {
            tracing::warn!(sender = %message.sender, "backend returned no audio for turn");
            return;
        };
        let url = resolve_asset_url(&self.asset_base, audio);
        match self.player.play(self.stage.video(message.sender), &url).await {
            Ok(PlaybackOutcome::Completed) => {}
            Ok(PlaybackOutcome::Cancelled) => {
                tracing::debug!(%url, "turn playback was interrupted");
            }
            Err(e) => {
                tracing::warn!(error = %e, "turn playback failed");
                report.playback_errors.push(e);
            }
        }
    }
}
