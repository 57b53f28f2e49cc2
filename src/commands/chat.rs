use crate::api::types::SavedChat;
use crate::app::AppState;
use crate::replay::ReplayReport;
use crate::session::{Conversation, Message, Side};
use crate::turn::TurnOutcome;

use super::{fail, require, CommandError};

pub fn current_conversation(state: &AppState) -> Conversation {
    state.session.lock().unwrap().conversation.clone()
}

/// Halts replay and playback, then starts an empty conversation.
pub fn new_conversation(state: &AppState) -> Result<Conversation, CommandError> {
    state.replay.stop();
    state.player.cancel();

    let conversation = Conversation::new();
    state
        .db
        .create_conversation(&conversation.id, &conversation.title)
        .and_then(|_| state.db.set_active_conversation(&conversation.id))
        .map_err(|e| fail(state, "Could not start a conversation", e))?;
    state
        .session
        .lock()
        .unwrap()
        .replace_conversation(conversation.clone());
    tracing::info!(conversation = %conversation.id, "new conversation");
    Ok(conversation)
}

pub fn set_input(state: &AppState, side: Side, text: &str) {
    state.session.lock().unwrap().inputs.set(side, text);
}

pub fn input(state: &AppState, side: Side) -> String {
    state.session.lock().unwrap().inputs.get(side).to_string()
}

/// Sends `text` as `side`'s turn and mirrors whatever was appended into the local store.
pub async fn send(state: &AppState, side: Side, text: &str) -> Result<TurnOutcome, CommandError> {
    let outcome = state
        .turns
        .send_turn(text, side)
        .await
        .map_err(|e| fail(state, "Message failed", e))?;

    if let TurnOutcome::Sent(report) = &outcome {
        for message in &report.messages {
            if let Err(e) = state.db.add_message(&report.conversation_id, message) {
                tracing::warn!(error = %e, message = %message.id, "could not cache message");
            }
        }
        for error in &report.playback_errors {
            state.notifier.error("Playback failed", error.to_string());
        }
    }
    Ok(outcome)
}

/// Sends whatever is in `side`'s input field.
pub async fn send_input(state: &AppState, side: Side) -> Result<TurnOutcome, CommandError> {
    let text = input(state, side);
    send(state, side, &text).await
}

pub async fn save_chat(state: &AppState, title: &str) -> Result<SavedChat, CommandError> {
    let title = title.trim();
    require(&[(title, "title")]).map_err(|e| fail(state, "Save failed", e))?;

    let conversation_id = state.session.lock().unwrap().conversation.id.clone();
    let saved = state
        .api
        .save_chat(title, &conversation_id)
        .await
        .map_err(|e| fail(state, "Save failed", e))?;

    {
        let mut session = state.session.lock().unwrap();
        if session.conversation.id == conversation_id {
            session.conversation.title = title.to_string();
        }
    }
    if let Err(e) = state.db.update_conversation_title(&conversation_id, title) {
        tracing::warn!(error = %e, "could not cache conversation title");
    }
    tracing::info!(uid = %saved.uid, conversation = %conversation_id, "chat saved");
    state.notifier.success("Chat saved", format!("Saved as \"{title}\""));
    Ok(saved)
}

pub async fn list_saved_chats(state: &AppState) -> Result<Vec<SavedChat>, CommandError> {
    state
        .api
        .list_saved_chats()
        .await
        .map_err(|e| fail(state, "Could not load saved chats", e))
}

/// Replaces the active conversation with a saved one.
pub async fn load_saved_chat(state: &AppState, uid: &str) -> Result<Conversation, CommandError> {
    state.replay.stop();
    state.player.cancel();

    let details = state
        .api
        .get_saved_chat(uid)
        .await
        .map_err(|e| fail(state, "Could not load chat", e))?;
    let messages = details
        .turns()
        .into_iter()
        .map(|turn| Message::new(turn.text.unwrap_or_default(), turn.side, turn.audio))
        .collect();
    let conversation =
        Conversation::restore(details.conversation_id, details.title, messages);

    state
        .db
        .replace_conversation(&conversation)
        .and_then(|()| state.db.set_active_conversation(&conversation.id))
        .map_err(|e| fail(state, "Could not load chat", e))?;
    state
        .session
        .lock()
        .unwrap()
        .replace_conversation(conversation.clone());
    tracing::info!(
        uid,
        conversation = %conversation.id,
        messages = conversation.messages().len(),
        "saved chat loaded"
    );
    Ok(conversation)
}

pub async fn replay(state: &AppState) -> Result<ReplayReport, CommandError> {
    let conversation = current_conversation(state);
    state
        .replay
        .start(&conversation)
        .await
        .map_err(|e| fail(state, "Replay failed", e))
}

pub fn stop_replay(state: &AppState) -> bool {
    state.replay.stop()
}

pub async fn analyze(state: &AppState, text: &str) -> Result<String, CommandError> {
    let text = text.trim();
    require(&[(text, "text")]).map_err(|e| fail(state, "Analysis failed", e))?;
    state
        .api
        .analyze(text)
        .await
        .map_err(|e| fail(state, "Analysis failed", e))
}
