//! Sequential replay of a stored conversation through the media player.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::{resolve_asset_url, ApiError, DialogueBackend};
use crate::media::{AvatarStage, MediaPlayer, PlaybackOutcome};
use crate::session::Conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayState {
    Idle,
    Running,
    /// Halted by `stop`; stays here until the next `start`.
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("A replay is already running")]
    AlreadyRunning,
    #[error("There is nothing to replay yet")]
    EmptyConversation,
    #[error("Failed to load the dialogue: {0}")]
    Fetch(#[source] ApiError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub played: usize,
    /// Turns without an audio reference.
    pub skipped: usize,
    pub failed: usize,
    pub stopped: bool,
}

struct Run {
    id: u64,
    cancel: CancellationToken,
}

pub struct ReplayOrchestrator {
    backend: Arc<dyn DialogueBackend>,
    player: Arc<MediaPlayer>,
    stage: AvatarStage,
    asset_base: String,
    pause: Duration,
    next_run: AtomicU64,
    run: Mutex<Option<Run>>,
    state: watch::Sender<ReplayState>,
}

impl ReplayOrchestrator {
    pub fn new(
        backend: Arc<dyn DialogueBackend>,
        player: Arc<MediaPlayer>,
        stage: AvatarStage,
        asset_base: impl Into<String>,
        pause: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ReplayState::Idle);
        Self {
            backend,
            player,
            stage,
            asset_base: asset_base.into(),
            pause,
            next_run: AtomicU64::new(1),
            run: Mutex::new(None),
            state,
        }
    }

    pub fn state(&self) -> ReplayState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReplayState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ReplayState::Running
    }

    /// Replays `conversation` turn by turn, returning once the list is exhausted or the
    /// replay is stopped.
    pub async fn start(&self, conversation: &Conversation) -> Result<ReplayReport, ReplayError> {
        if conversation.is_empty() {
            return Err(ReplayError::EmptyConversation);
        }
        let (run_id, cancel) = self.begin()?;
        let _run = RunGuard {
            orchestrator: self,
            id: run_id,
        };
        tracing::info!(conversation = %conversation.id, "replay started");

        let dialogue = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Ok(ReplayReport { stopped: true, ..Default::default() });
            }
            dialogue = self.backend.replay_dialogue(&conversation.id) => dialogue,
        };
        let dialogue = match dialogue {
            Ok(dialogue) => dialogue,
            Err(e) => {
                tracing::warn!(error = %e, "could not fetch dialogue for replay");
                return Err(ReplayError::Fetch(e));
            }
        };

        let mut report = ReplayReport::default();
        let mut after_first = false;
        for (index, turn) in dialogue.turns().into_iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let Some(audio) = turn.audio else {
                tracing::warn!(index, side = %turn.side, "turn has no audio, skipping");
                report.skipped += 1;
                continue;
            };

            if after_first {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
            after_first = true;

            let url = resolve_asset_url(&self.asset_base, &audio);
            tracing::debug!(index, side = %turn.side, %url, "replaying turn");
            match self.player.play(self.stage.video(turn.side), &url).await {
                Ok(PlaybackOutcome::Completed) => report.played += 1,
                Ok(PlaybackOutcome::Cancelled) => {
                    if !cancel.is_cancelled() {
                        // Something else took the player over; leave it playing.
                        tracing::info!(index, "replay interrupted by other playback");
                        self.settle(run_id, ReplayState::Stopped);
                        cancel.cancel();
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "turn failed during replay");
                    report.failed += 1;
                }
            }
        }

        report.stopped = cancel.is_cancelled();
        tracing::info!(
            played = report.played,
            skipped = report.skipped,
            failed = report.failed,
            stopped = report.stopped,
            "replay finished"
        );
        Ok(report)
    }

    /// Halts a running replay: no further turn starts and the current one is torn down
    /// before this returns. False if nothing was running.
    pub fn stop(&self) -> bool {
        let run = self.run.lock().unwrap().take();
        let Some(run) = run else {
            return false;
        };
        tracing::info!(run = run.id, "replay stopped");
        self.state.send_replace(ReplayState::Stopped);
        run.cancel.cancel();
        self.player.cancel();
        true
    }

    fn begin(&self) -> Result<(u64, CancellationToken), ReplayError> {
        let mut run = self.run.lock().unwrap();
        if run.is_some() {
            return Err(ReplayError::AlreadyRunning);
        }
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *run = Some(Run {
            id,
            cancel: cancel.clone(),
        });
        self.state.send_replace(ReplayState::Running);
        Ok((id, cancel))
    }

    /// Ends run `id` unless `stop` already did, in which case the state stays `Stopped`.
    fn settle(&self, id: u64, state: ReplayState) {
        let mut run = self.run.lock().unwrap();
        if run.as_ref().map(|r| r.id) == Some(id) {
            *run = None;
            self.state.send_replace(state);
        }
    }
}

/// Returns the orchestrator to `Idle` when a run ends, including when its future is
/// dropped partway through.
struct RunGuard<'a> {
    orchestrator: &'a ReplayOrchestrator,
    id: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.settle(self.id, ReplayState::Idle);
    }
}
