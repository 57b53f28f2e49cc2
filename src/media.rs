//! Lockstep audio/video playback for one avatar turn at a time.
//!
//! The player owns the only [`PlaybackSession`]. Starting a new one tears the previous
//! one down first, so at most one audio/video pair is ever live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::Side;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioEvent {
    /// Enough is buffered to play to the end.
    CanPlayThrough,
    Ended,
    Error(String),
}

/// The platform's audio element. Each `load` hands back the event stream for that source;
/// events from an earlier load never show up on a later stream.
#[async_trait]
pub trait AudioElement: Send + Sync {
    fn load(&self, url: &str) -> mpsc::UnboundedReceiver<AudioEvent>;
    async fn play(&self) -> Result<(), String>;
    /// Pause and rewind.
    fn stop(&self);
}

/// A muted avatar video element.
#[async_trait]
pub trait VideoElement: Send + Sync {
    fn source(&self) -> String;
    fn set_loop(&self, looping: bool);
    fn pause(&self);
    fn seek_to_start(&self);
    async fn play(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("No audio source to play")]
    EmptySource,
    #[error("Audio playback failed for {url}: {reason}")]
    Audio { url: String, reason: String },
    #[error("Video playback failed for {url}: {reason}")]
    Video { url: String, reason: String },
    #[error("Audio {url} was not ready within {after:?}")]
    Timeout { url: String, after: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    /// Torn down by `cancel` or by a newer session. Neither success nor failure.
    Cancelled,
}

/// The two avatar videos; a turn's side picks which one moves.
#[derive(Clone)]
pub struct AvatarStage {
    user: Arc<dyn VideoElement>,
    ai: Arc<dyn VideoElement>,
}

impl AvatarStage {
    pub fn new(user: Arc<dyn VideoElement>, ai: Arc<dyn VideoElement>) -> Self {
        Self { user, ai }
    }

    pub fn video(&self, side: Side) -> Arc<dyn VideoElement> {
        match side {
            Side::User => self.user.clone(),
            Side::Ai => self.ai.clone(),
        }
    }
}

/// The live pairing of the audio element with one avatar video.
pub struct PlaybackSession {
    id: u64,
    video: Arc<dyn VideoElement>,
    audio_url: String,
    cancel: CancellationToken,
}

pub struct MediaPlayer {
    audio: Arc<dyn AudioElement>,
    readiness_timeout: Duration,
    next_id: AtomicU64,
    active: Mutex<Option<PlaybackSession>>,
}

impl MediaPlayer {
    pub fn new(audio: Arc<dyn AudioElement>, readiness_timeout: Duration) -> Self {
        Self {
            audio,
            readiness_timeout,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// URL of the audio currently playing, if any.
    pub fn current_audio(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.audio_url.clone())
    }

    /// Stops whatever is playing right now. The interrupted `play` call resolves
    /// `Cancelled`.
    pub fn cancel(&self) {
        let session = self.active.lock().unwrap().take();
        if let Some(session) = session {
            tracing::debug!(session = session.id, url = %session.audio_url, "playback cancelled");
            session.cancel.cancel();
            self.teardown(&session);
        }
    }

    /// Plays `audio_url` in lockstep with `video`, resolving once the audio ends.
    pub async fn play(
        &self,
        video: Arc<dyn VideoElement>,
        audio_url: &str,
    ) -> Result<PlaybackOutcome, PlaybackError> {
        let url = audio_url.trim();
        if url.is_empty() {
            return Err(PlaybackError::EmptySource);
        }

        let (id, cancel) = self.begin(video.clone(), url);
        let _session = SessionGuard { player: self, id };
        video.set_loop(true);
        video.seek_to_start();
        let mut events = self.audio.load(url);

        let ready = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PlaybackOutcome::Cancelled),
            ready = tokio::time::timeout(self.readiness_timeout, wait_ready(&mut events)) => ready,
        };
        match ready {
            Err(_) => {
                tracing::warn!(url, "audio not ready in time");
                return self.fail(
                    id,
                    PlaybackError::Timeout {
                        url: url.to_string(),
                        after: self.readiness_timeout,
                    },
                );
            }
            Ok(Err(reason)) => return self.fail(id, audio_error(url, reason)),
            Ok(Ok(())) => {}
        }

        // Video first so the mouth never trails the voice.
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PlaybackOutcome::Cancelled),
            started = video.play() => started,
        };
        if let Err(reason) = started {
            let error = PlaybackError::Video {
                url: video.source(),
                reason,
            };
            return self.fail(id, error);
        }

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PlaybackOutcome::Cancelled),
            started = self.audio.play() => started,
        };
        if let Err(reason) = started {
            return self.fail(id, audio_error(url, reason));
        }

        let ended = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PlaybackOutcome::Cancelled),
            ended = wait_ended(&mut events) => ended,
        };
        match ended {
            Ok(()) if self.finish(id) => {
                tracing::debug!(session = id, url, "playback completed");
                Ok(PlaybackOutcome::Completed)
            }
            Ok(()) => Ok(PlaybackOutcome::Cancelled),
            Err(reason) => self.fail(id, audio_error(url, reason)),
        }
    }

    /// Installs a fresh session, tearing down the one it displaces.
    fn begin(&self, video: Arc<dyn VideoElement>, url: &str) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let previous = self.active.lock().unwrap().replace(PlaybackSession {
            id,
            video,
            audio_url: url.to_string(),
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!(session = previous.id, "displacing active playback");
            previous.cancel.cancel();
            self.teardown(&previous);
        }
        tracing::debug!(session = id, url, "playback started");
        (id, cancel)
    }

    /// Drops session `id` and resets its media. False if it was already displaced.
    fn finish(&self, id: u64) -> bool {
        let session = {
            let mut active = self.active.lock().unwrap();
            match active.as_ref() {
                Some(s) if s.id == id => active.take(),
                _ => None,
            }
        };
        match session {
            Some(session) => {
                self.teardown(&session);
                true
            }
            None => false,
        }
    }

    fn fail(&self, id: u64, error: PlaybackError) -> Result<PlaybackOutcome, PlaybackError> {
        if self.finish(id) {
            Err(error)
        } else {
            Ok(PlaybackOutcome::Cancelled)
        }
    }

    fn teardown(&self, session: &PlaybackSession) {
        self.audio.stop();
        session.video.set_loop(false);
        session.video.pause();
        session.video.seek_to_start();
    }
}

/// Tears session `id` down if the `play` future is dropped before it resolves.
struct SessionGuard<'a> {
    player: &'a MediaPlayer,
    id: u64,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.player.finish(self.id) {
            tracing::debug!(session = self.id, "playback abandoned");
        }
    }
}

fn audio_error(url: &str, reason: String) -> PlaybackError {
    PlaybackError::Audio {
        url: url.to_string(),
        reason,
    }
}

async fn wait_ready(events: &mut mpsc::UnboundedReceiver<AudioEvent>) -> Result<(), String> {
    loop {
        match events.recv().await {
            Some(AudioEvent::CanPlayThrough) => return Ok(()),
            Some(AudioEvent::Error(reason)) => return Err(reason),
            Some(AudioEvent::Ended) => continue,
            None => return Err("audio element closed before it was ready".to_string()),
        }
    }
}

async fn wait_ended(events: &mut mpsc::UnboundedReceiver<AudioEvent>) -> Result<(), String> {
    loop {
        match events.recv().await {
            Some(AudioEvent::Ended) => return Ok(()),
            Some(AudioEvent::Error(reason)) => return Err(reason),
            Some(AudioEvent::CanPlayThrough) => continue,
            None => return Err("audio element closed during playback".to_string()),
        }
    }
}
