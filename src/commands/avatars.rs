use std::path::PathBuf;

use serde::Deserialize;

use crate::api::resolve_asset_url;
use crate::api::types::{Avatar, NewAvatar};
use crate::app::AppState;
use crate::session::Side;

use super::{fail, require, CommandError};

/// The avatar upload form as the user filled it in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvatarUpload {
    pub side: Option<Side>,
    pub avatar_name: String,
    pub voice_name: String,
    pub elevenlabs_voice_id: String,
    pub video_path: Option<PathBuf>,
}

pub async fn load_avatars(state: &AppState) -> Result<Vec<Avatar>, CommandError> {
    let avatars = state
        .api
        .get_avatars()
        .await
        .map_err(|e| fail(state, "Could not load avatars", e))?;
    tracing::info!(count = avatars.len(), "avatars loaded");
    state.session.lock().unwrap().set_avatars(avatars.clone());
    Ok(avatars)
}

pub fn avatars_for(state: &AppState, side: Side) -> Vec<Avatar> {
    let session = state.session.lock().unwrap();
    session.avatars_for(side).into_iter().cloned().collect()
}

pub fn selected_avatar(state: &AppState, side: Side) -> Option<Avatar> {
    state.session.lock().unwrap().selected(side).cloned()
}

/// Playable URL of the video for `side`'s selected avatar.
pub fn avatar_video_url(state: &AppState, side: Side) -> Option<String> {
    let avatar = selected_avatar(state, side)?;
    if avatar.video.trim().is_empty() {
        return None;
    }
    Some(resolve_asset_url(&state.config.asset_base_url, &avatar.video))
}

pub fn select_avatar(state: &AppState, uid: &str) -> Result<Side, CommandError> {
    let side = state.session.lock().unwrap().select_avatar(uid);
    match side {
        Some(side) => {
            tracing::info!(uid, %side, "avatar selected");
            Ok(side)
        }
        None => Err(fail(
            state,
            "Avatar not found",
            CommandError::Validation(format!("No avatar with uid {uid}")),
        )),
    }
}

pub async fn upload_avatar(state: &AppState, form: AvatarUpload) -> Result<Avatar, CommandError> {
    let new_avatar = read_upload(form)
        .await
        .map_err(|e| fail(state, "Upload failed", e))?;
    let avatar = state
        .api
        .upload_avatar(&new_avatar)
        .await
        .map_err(|e| fail(state, "Upload failed", e))?;
    tracing::info!(uid = %avatar.uid, side = %avatar.side, "avatar uploaded");

    {
        let mut session = state.session.lock().unwrap();
        let mut avatars = session.avatars().to_vec();
        avatars.push(avatar.clone());
        session.set_avatars(avatars);
    }
    state
        .notifier
        .success("Avatar uploaded", format!("{} is ready", avatar.avatar_name));
    Ok(avatar)
}

async fn read_upload(form: AvatarUpload) -> Result<NewAvatar, CommandError> {
    let path = form.video_path.unwrap_or_default();
    let path_text = path.to_string_lossy();
    require(&[
        (form.avatar_name.as_str(), "avatar name"),
        (form.voice_name.as_str(), "voice name"),
        (form.elevenlabs_voice_id.as_str(), "voice id"),
        (&*path_text, "video file"),
    ])?;
    let side = form
        .side
        .ok_or_else(|| CommandError::Validation("Required: side".to_string()))?;

    let video = tokio::fs::read(&path).await?;
    let video_file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("avatar.mp4")
        .to_string();
    Ok(NewAvatar {
        side,
        avatar_name: form.avatar_name.trim().to_string(),
        voice_name: form.voice_name.trim().to_string(),
        elevenlabs_voice_id: form.elevenlabs_voice_id.trim().to_string(),
        video_file_name,
        video,
    })
}
