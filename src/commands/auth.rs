use crate::api::types::{Avatar, Registration, UserProfile};
use crate::api::ApiError;
use crate::app::AppState;

use super::{fail, require, CommandError};

pub async fn login(state: &AppState, email: &str, password: &str) -> Result<(), CommandError> {
    let email = email.trim();
    require(&[(email, "email"), (password, "password")])
        .map_err(|e| fail(state, "Login failed", e))?;

    state
        .api
        .login(email, password)
        .await
        .map_err(|e| fail(state, "Login failed", e))?;
    tracing::info!(email, "logged in");
    state.notifier.success("Logged in", format!("Signed in as {email}"));
    Ok(())
}

pub async fn register(
    state: &AppState,
    registration: &Registration,
) -> Result<serde_json::Value, CommandError> {
    require(&[
        (registration.username.as_str(), "username"),
        (registration.email.as_str(), "email"),
        (registration.password.as_str(), "password"),
        (registration.password2.as_str(), "password2"),
    ])
    .map_err(|e| fail(state, "Registration failed", e))?;
    if registration.password != registration.password2 {
        return Err(fail(
            state,
            "Registration failed",
            CommandError::Validation("Passwords do not match".to_string()),
        ));
    }

    let created = state
        .api
        .register(registration)
        .await
        .map_err(|e| fail(state, "Registration failed", e))?;
    tracing::info!(username = %registration.username, "account created");
    state
        .notifier
        .success("Account created", "You can now log in");
    Ok(created)
}

/// Drops the stored tokens after halting anything that is playing or listening.
pub async fn logout(state: &AppState) {
    state.replay.stop();
    state.player.cancel();
    state.speech.stop().await;
    state.api.clear_tokens();
    tracing::info!("logged out");
}

/// The signed-in user, or None when no token is stored or the session has expired.
pub async fn check_auth(state: &AppState) -> Result<Option<UserProfile>, CommandError> {
    if !state.api.is_authenticated() {
        return Ok(None);
    }
    match state.api.me().await {
        Ok(profile) => Ok(Some(profile)),
        Err(ApiError::SessionExpired) => {
            tracing::info!("stored session expired");
            Ok(None)
        }
        Err(e) => Err(fail(state, "Could not verify session", e)),
    }
}

/// Fetches the profile and the avatar catalogue together for a stored session, applying
/// the catalogue to the session state.
pub async fn restore_session(
    state: &AppState,
) -> Result<Option<(UserProfile, Vec<Avatar>)>, CommandError> {
    if !state.api.is_authenticated() {
        return Ok(None);
    }
    let loaded = futures::try_join!(state.api.me(), state.api.get_avatars());
    match loaded {
        Ok((profile, avatars)) => {
            state.session.lock().unwrap().set_avatars(avatars.clone());
            tracing::info!(avatars = avatars.len(), "session restored");
            Ok(Some((profile, avatars)))
        }
        Err(ApiError::SessionExpired) => Ok(None),
        Err(e) => Err(fail(state, "Could not restore session", e)),
    }
}
