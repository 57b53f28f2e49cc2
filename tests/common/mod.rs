#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use avatar_dialogue::api::auth::MemoryCredentials;
use avatar_dialogue::api::types::{
    Avatar, ReplayDialogue, SpeakRequest, SpeakResponse, SpeakerEntry,
};
use avatar_dialogue::api::{ApiClient, ApiError, DialogueBackend};
use avatar_dialogue::app::{AppState, Platform};
use avatar_dialogue::config::AppConfig;
use avatar_dialogue::db::Database;
use avatar_dialogue::media::{AudioElement, AudioEvent, AvatarStage, VideoElement};
use avatar_dialogue::session::Side;
use avatar_dialogue::speech::{CaptureEvent, RecognitionEvent, SpeechRecognizer};

pub const ASSETS: &str = "http://assets.test";

// ── Event log ──

#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<(Instant, String)>>>,
}

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap()
            .push((Instant::now(), entry.into()));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    /// When `entry` was first logged.
    pub fn time_of(&self, entry: &str) -> Option<Instant> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| e == entry)
            .map(|(at, _)| *at)
    }
}

// ── Audio ──

#[derive(Clone, Debug)]
pub enum AudioScript {
    /// Ready at once, ends after the duration.
    Plays(Duration),
    /// Never fires "can play through".
    NeverReady,
    LoadError(String),
    PlayError(String),
}

struct Loaded {
    url: String,
    generation: u64,
    events: mpsc::UnboundedSender<AudioEvent>,
}

pub struct FakeAudio {
    log: EventLog,
    scripts: Mutex<HashMap<String, AudioScript>>,
    default_length: Duration,
    loaded: Mutex<Option<Loaded>>,
    generation: Arc<AtomicU64>,
    playing: Arc<AtomicBool>,
    overlaps: AtomicUsize,
}

impl FakeAudio {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            scripts: Mutex::new(HashMap::new()),
            default_length: Duration::from_secs(1),
            loaded: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            playing: Arc::new(AtomicBool::new(false)),
            overlaps: AtomicUsize::new(0),
        }
    }

    pub fn script(&self, url: &str, script: AudioScript) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Times a `play` started while earlier audio was still sounding.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn script_for(&self, url: &str) -> AudioScript {
        self.scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(AudioScript::Plays(self.default_length))
    }
}

#[async_trait]
impl AudioElement for FakeAudio {
    fn load(&self, url: &str) -> mpsc::UnboundedReceiver<AudioEvent> {
        self.log.push(format!("audio.load {url}"));
        let (tx, rx) = mpsc::unbounded_channel();
        match self.script_for(url) {
            AudioScript::NeverReady => {}
            AudioScript::LoadError(reason) => {
                let _ = tx.send(AudioEvent::Error(reason));
            }
            AudioScript::Plays(_) | AudioScript::PlayError(_) => {
                let _ = tx.send(AudioEvent::CanPlayThrough);
            }
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.loaded.lock().unwrap() = Some(Loaded {
            url: url.to_string(),
            generation,
            events: tx,
        });
        rx
    }

    async fn play(&self) -> Result<(), String> {
        let (url, generation, events) = {
            let loaded = self.loaded.lock().unwrap();
            let loaded = loaded.as_ref().ok_or("nothing loaded")?;
            (loaded.url.clone(), loaded.generation, loaded.events.clone())
        };
        self.log.push(format!("audio.play {url}"));
        let length = match self.script_for(&url) {
            AudioScript::PlayError(reason) => return Err(reason),
            AudioScript::Plays(length) => length,
            AudioScript::NeverReady | AudioScript::LoadError(_) => self.default_length,
        };
        if self.playing.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let current = self.generation.clone();
        let playing = self.playing.clone();
        let log = self.log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(length).await;
            if current.load(Ordering::SeqCst) == generation {
                playing.store(false, Ordering::SeqCst);
                log.push(format!("audio.ended {url}"));
                let _ = events.send(AudioEvent::Ended);
            }
        });
        Ok(())
    }

    fn stop(&self) {
        self.log.push("audio.stop");
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.playing.store(false, Ordering::SeqCst);
        self.loaded.lock().unwrap().take();
    }
}

// ── Video ──

pub struct FakeVideo {
    name: &'static str,
    log: EventLog,
    looping: AtomicBool,
    playing: AtomicBool,
    fail_play: AtomicBool,
}

impl FakeVideo {
    pub fn new(name: &'static str, log: EventLog) -> Self {
        Self {
            name,
            log,
            looping: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            fail_play: AtomicBool::new(false),
        }
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn fail_next_play(&self) {
        self.fail_play.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoElement for FakeVideo {
    fn source(&self) -> String {
        format!("{}.mp4", self.name)
    }

    fn set_loop(&self, looping: bool) {
        self.looping.store(looping, Ordering::SeqCst);
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
        self.log.push(format!("{}.pause", self.name));
    }

    fn seek_to_start(&self) {}

    async fn play(&self) -> Result<(), String> {
        if self.fail_play.swap(false, Ordering::SeqCst) {
            return Err("decode error".to_string());
        }
        self.playing.store(true, Ordering::SeqCst);
        self.log.push(format!("{}.play", self.name));
        Ok(())
    }
}

// ── Speech ──

#[derive(Default)]
pub struct FakeRecognizer {
    sessions: Mutex<Vec<mpsc::UnboundedSender<RecognitionEvent>>>,
    stops: AtomicUsize,
    /// Every session ends as soon as it starts.
    end_immediately: AtomicBool,
    unavailable: AtomicBool,
}

impl FakeRecognizer {
    pub fn ending_immediately() -> Self {
        let recognizer = Self::default();
        recognizer.end_immediately.store(true, Ordering::SeqCst);
        recognizer
    }

    pub fn unavailable() -> Self {
        let recognizer = Self::default();
        recognizer.unavailable.store(true, Ordering::SeqCst);
        recognizer
    }

    pub fn starts(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Feeds an event into the newest recognizer session.
    pub fn emit(&self, event: RecognitionEvent) {
        if let Some(session) = self.sessions.lock().unwrap().last() {
            let _ = session.send(event);
        }
    }

    pub fn heard(&self, transcript: &str, is_final: bool) {
        self.emit(RecognitionEvent::Result {
            transcript: transcript.to_string(),
            is_final,
        });
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn start(&self, _language: &str) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>, String> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err("no microphone".to_string());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        if self.end_immediately.load(Ordering::SeqCst) {
            let _ = tx.send(RecognitionEvent::End);
        }
        self.sessions.lock().unwrap().push(tx);
        Ok(rx)
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Backend ──

#[derive(Default)]
pub struct FakeBackend {
    speak_replies: Mutex<VecDeque<Result<SpeakResponse, ApiError>>>,
    speak_delay: Mutex<Duration>,
    dialogue: Mutex<Option<ReplayDialogue>>,
    pub requests: Mutex<Vec<SpeakRequest>>,
    pub replay_fetches: AtomicUsize,
}

impl FakeBackend {
    pub fn reply(&self, response: SpeakResponse) {
        self.speak_replies.lock().unwrap().push_back(Ok(response));
    }

    pub fn fail_next_speak(&self, status: u16) {
        self.speak_replies.lock().unwrap().push_back(Err(ApiError::Api {
            status,
            message: "backend unavailable".to_string(),
        }));
    }

    pub fn delay_speak(&self, delay: Duration) {
        *self.speak_delay.lock().unwrap() = delay;
    }

    pub fn set_dialogue(&self, dialogue: ReplayDialogue) {
        *self.dialogue.lock().unwrap() = Some(dialogue);
    }

    pub fn requests(&self) -> Vec<SpeakRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DialogueBackend for FakeBackend {
    async fn speak(&self, request: &SpeakRequest) -> Result<SpeakResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        let delay = *self.speak_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.speak_replies.lock().unwrap().pop_front();
        reply.unwrap_or_else(|| Ok(SpeakResponse::default()))
    }

    async fn replay_dialogue(&self, _conversation_id: &str) -> Result<ReplayDialogue, ApiError> {
        self.replay_fetches.fetch_add(1, Ordering::SeqCst);
        let dialogue = self.dialogue.lock().unwrap().clone();
        dialogue.ok_or(ApiError::Api {
            status: 500,
            message: "replay failed".to_string(),
        })
    }
}

// ── Builders ──

pub fn entry(side: Side, value: &str) -> SpeakerEntry {
    match side {
        Side::User => SpeakerEntry {
            user: Some(value.to_string()),
            ai: None,
        },
        Side::Ai => SpeakerEntry {
            user: None,
            ai: Some(value.to_string()),
        },
    }
}

pub fn dialogue(turns: &[(Side, &str, Option<&str>)]) -> ReplayDialogue {
    ReplayDialogue {
        conversation_id: None,
        chat_list: turns.iter().map(|(side, text, _)| entry(*side, text)).collect(),
        audio_list: turns
            .iter()
            .map(|(side, _, audio)| entry(*side, audio.unwrap_or("")))
            .collect(),
    }
}

pub fn avatar(uid: &str, side: Side) -> Avatar {
    Avatar {
        id: 0,
        uid: uid.to_string(),
        side,
        avatar_name: uid.to_string(),
        voice_name: format!("{uid} voice"),
        elevenlabs_voice_id: format!("{uid}-voice-id"),
        video: format!("{uid}.mp4"),
        voice_options: None,
        status: None,
        created_at: None,
        updated_at: None,
    }
}

pub fn media_url(path: &str) -> String {
    format!("{ASSETS}/media/{path}")
}

/// Fake media elements sharing one log.
pub struct Rig {
    pub log: EventLog,
    pub audio: Arc<FakeAudio>,
    pub user_video: Arc<FakeVideo>,
    pub ai_video: Arc<FakeVideo>,
}

impl Rig {
    pub fn new() -> Self {
        let log = EventLog::default();
        Self {
            audio: Arc::new(FakeAudio::new(log.clone())),
            user_video: Arc::new(FakeVideo::new("user", log.clone())),
            ai_video: Arc::new(FakeVideo::new("ai", log.clone())),
            log,
        }
    }

    pub fn stage(&self) -> AvatarStage {
        AvatarStage::new(self.user_video.clone(), self.ai_video.clone())
    }

    pub fn any_video_looping(&self) -> bool {
        self.user_video.is_looping() || self.ai_video.is_looping()
    }
}

/// A full application wired to fakes, with avatars loaded on both sides.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub rig: Rig,
    pub backend: Arc<FakeBackend>,
    pub recognizer: Arc<FakeRecognizer>,
    pub captures: Option<mpsc::UnboundedReceiver<CaptureEvent>>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_recognizer(FakeRecognizer::default())
    }

    pub fn with_recognizer(recognizer: FakeRecognizer) -> Self {
        let rig = Rig::new();
        let backend = Arc::new(FakeBackend::default());
        let recognizer = Arc::new(recognizer);
        let config = AppConfig {
            asset_base_url: ASSETS.to_string(),
            ..AppConfig::default()
        };
        let db = Arc::new(Database::open_in_memory().unwrap());
        let api = Arc::new(
            ApiClient::new(
                "http://127.0.0.1:9/api",
                Duration::from_secs(1),
                Arc::new(MemoryCredentials::default()),
            )
            .unwrap(),
        );
        let platform = Platform {
            audio: rig.audio.clone(),
            user_video: rig.user_video.clone(),
            ai_video: rig.ai_video.clone(),
            recognizer: recognizer.clone(),
        };
        let (state, captures) =
            AppState::with_backend(config, db, api, backend.clone(), platform).unwrap();
        state
            .session
            .lock()
            .unwrap()
            .set_avatars(vec![avatar("me", Side::User), avatar("bot", Side::Ai)]);
        Self {
            state: Arc::new(state),
            rig,
            backend,
            recognizer,
            captures: Some(captures),
        }
    }

    pub fn take_captures(&mut self) -> mpsc::UnboundedReceiver<CaptureEvent> {
        self.captures.take().expect("capture receiver already taken")
    }
}
