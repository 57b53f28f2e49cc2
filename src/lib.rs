pub mod api;
pub mod app;
pub mod commands;
pub mod config;
pub mod db;
pub mod logging;
pub mod media;
pub mod notice;
pub mod replay;
pub mod session;
pub mod speech;
pub mod turn;

use std::sync::Arc;

pub use app::{AppState, Platform, StartupError};
pub use config::AppConfig;

use db::Database;

/// Boots the client core and starts applying speech events. Must run inside a tokio
/// runtime.
pub fn start(config: AppConfig, platform: Platform) -> Result<Arc<AppState>, StartupError> {
    logging::init_logging();
    let database = Arc::new(Database::new(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir.display(), api = %config.api_base_url, "starting");
    let (state, captures) = AppState::new(config, database, platform)?;
    let state = Arc::new(state);
    commands::speech::spawn_capture_pump(state.clone(), captures);
    Ok(state)
}
