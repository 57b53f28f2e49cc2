use std::collections::HashMap;

use crate::app::AppState;
use crate::config::{Mode, Preferences, ReplyAs};

use super::{fail, CommandError};

const SETTING_KEYS: &[&str] = &["reply_as", "mode", "auto_send"];

/// Effective value of every preference, stored or default.
pub fn get_settings(state: &AppState) -> HashMap<String, String> {
    let prefs = state.preferences();
    let mut map = HashMap::new();
    for key in SETTING_KEYS {
        map.insert(key.to_string(), render(&prefs, key));
    }
    map
}

pub fn set_setting(state: &AppState, key: &str, value: &str) -> Result<(), CommandError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(fail(
            state,
            "Invalid setting",
            CommandError::Validation(format!("Unknown setting key: {}", key)),
        ));
    }
    let mut prefs = state.preferences();
    apply(&mut prefs, key, value)
        .map_err(|e| fail(state, "Invalid setting", CommandError::Validation(e)))?;

    state
        .db
        .set_setting(key, &render(&prefs, key))
        .map_err(|e| fail(state, "Could not save setting", e))?;
    *state.prefs.write().unwrap() = prefs;
    tracing::info!(key, value, "setting updated");
    Ok(())
}

/// Forgets a stored preference, falling back to its default.
pub fn delete_setting(state: &AppState, key: &str) -> Result<(), CommandError> {
    if !SETTING_KEYS.contains(&key) {
        return Err(fail(
            state,
            "Invalid setting",
            CommandError::Validation(format!("Unknown setting key: {}", key)),
        ));
    }
    state
        .db
        .delete_setting(key)
        .map_err(|e| fail(state, "Could not reset setting", e))?;

    let defaults = Preferences::default();
    let mut prefs = state.prefs.write().unwrap();
    match key {
        "reply_as" => prefs.reply_as = defaults.reply_as,
        "mode" => prefs.mode = defaults.mode,
        _ => prefs.auto_send = defaults.auto_send,
    }
    Ok(())
}

fn apply(prefs: &mut Preferences, key: &str, value: &str) -> Result<(), String> {
    match key {
        "reply_as" => prefs.reply_as = value.parse::<ReplyAs>()?,
        "mode" => prefs.mode = value.parse::<Mode>()?,
        "auto_send" => {
            prefs.auto_send = value
                .trim()
                .parse()
                .map_err(|_| format!("auto_send must be true or false, got {}", value))?
        }
        other => return Err(format!("Unknown setting key: {}", other)),
    }
    Ok(())
}

fn render(prefs: &Preferences, key: &str) -> String {
    match key {
        "reply_as" => match prefs.reply_as {
            ReplyAs::Ai => "ai",
            ReplyAs::Human => "human",
        }
        .to_string(),
        "mode" => match prefs.mode {
            Mode::Friendly => "friendly",
            Mode::Formal => "formal",
            Mode::Casual => "casual",
        }
        .to_string(),
        _ => prefs.auto_send.to_string(),
    }
}
