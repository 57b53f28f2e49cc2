use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::app::AppState;
use crate::session::Side;
use crate::speech::CaptureEvent;

use super::{chat, fail, CommandError};

/// Starts listening on `side`, or stops if that side is already listening. Returns the side
/// left listening.
pub async fn toggle_mic(state: &AppState, side: Side) -> Result<Option<Side>, CommandError> {
    if state.speech.active_side() == Some(side) {
        state.speech.stop().await;
        return Ok(None);
    }
    state
        .speech
        .start(side)
        .await
        .map_err(|e| fail(state, "Microphone unavailable", e))?;
    Ok(Some(side))
}

pub async fn stop_mic(state: &AppState) {
    state.speech.stop().await;
}

/// Applies one capture event to the session. A submitted transcript is sent on its own
/// task, whose handle is returned.
pub fn handle_capture_event(
    state: &Arc<AppState>,
    event: CaptureEvent,
) -> Option<JoinHandle<()>> {
    match event {
        CaptureEvent::Interim { side, text } | CaptureEvent::Final { side, text } => {
            chat::set_input(state, side, &text);
            None
        }
        CaptureEvent::Submit { side, text } => {
            chat::set_input(state, side, "");
            tracing::info!(%side, "sending dictated turn");
            let state = state.clone();
            Some(tokio::spawn(async move {
                // Failures already surfaced as notices.
                let _ = chat::send(&state, side, &text).await;
            }))
        }
        CaptureEvent::Notice(message) => {
            state.notifier.info("Microphone", message);
            None
        }
        CaptureEvent::Failed { side, error } => {
            tracing::warn!(%side, %error, "speech capture failed");
            state.notifier.error("Microphone", error.to_string());
            None
        }
        CaptureEvent::Stopped { side } => {
            tracing::debug!(%side, "speech capture ended");
            None
        }
    }
}

pub fn spawn_capture_pump(
    state: Arc<AppState>,
    mut events: mpsc::UnboundedReceiver<CaptureEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            handle_capture_event(&state, event);
        }
    })
}
