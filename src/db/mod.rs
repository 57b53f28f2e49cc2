pub mod models;

use models::{StoredConversation, StoredMessage};
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::sync::Mutex;

use crate::api::auth::CredentialStore;
use crate::api::types::AuthTokens;
use crate::config::Preferences;
use crate::session::{Conversation, Message};

/// Settings row naming the conversation on screen; not a user-editable preference.
const ACTIVE_CONVERSATION_KEY: &str = "active_conversation";

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(app_dir: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(app_dir).ok();
        let db_path = app_dir.join("avatar-dialogue.db");
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                conversation_id TEXT NOT NULL,
                sender TEXT NOT NULL CHECK (sender IN ('user', 'ai')),
                text TEXT NOT NULL,
                audio TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS auth_tokens (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Conversations ──

    /// Registers a conversation; a second call with the same id is a no-op.
    pub fn create_conversation(&self, id: &str, title: &str) -> Result<StoredConversation> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, title) VALUES (?1, ?2)",
            params![id, title],
        )?;
        conn.query_row(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
            params![id],
            |row| {
                Ok(StoredConversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
    }

    /// The most recently touched conversation.
    pub fn latest_conversation(&self) -> Result<Option<StoredConversation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, created_at, updated_at FROM conversations
             ORDER BY updated_at DESC, rowid DESC LIMIT 1",
            [],
            |row| {
                Ok(StoredConversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
    }

    pub fn update_conversation_title(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET title = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![title, id],
        )?;
        Ok(())
    }

    /// Stores a whole conversation, replacing any messages kept for it before.
    pub fn replace_conversation(&self, conversation: &Conversation) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, title) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = datetime('now')",
            params![conversation.id, conversation.title],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation.id],
        )?;
        for message in conversation.messages() {
            tx.execute(
                "INSERT INTO messages (id, conversation_id, sender, text, audio) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id,
                    conversation.id,
                    message.sender.as_str(),
                    message.text,
                    message.audio
                ],
            )?;
        }
        tx.commit()
    }

    // ── Messages ──

    pub fn add_message(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, sender, text, audio) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                conversation_id,
                message.sender.as_str(),
                message.text,
                message.audio
            ],
        )?;
        // Touch conversation updated_at
        conn.execute(
            "UPDATE conversations SET updated_at = datetime('now') WHERE id = ?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sender, text, audio, created_at FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            Ok(StoredMessage {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender: row.get(2)?,
                text: row.get(3)?,
                audio: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    /// Marks `id` as the conversation to resume on the next start.
    pub fn set_active_conversation(&self, id: &str) -> Result<()> {
        self.set_setting(ACTIVE_CONVERSATION_KEY, id)
    }

    fn conversation(&self, id: &str) -> Result<Option<StoredConversation>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, title, created_at, updated_at FROM conversations WHERE id = ?1",
            params![id],
            |row| {
                Ok(StoredConversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
    }

    /// Rebuilds the active conversation with its messages. Falls back to the most
    /// recently touched one when no active id is stored or its row is gone.
    pub fn resume_latest(&self) -> Result<Option<Conversation>> {
        let active = match self.get_setting(ACTIVE_CONVERSATION_KEY)? {
            Some(id) => self.conversation(&id)?,
            None => None,
        };
        let stored = match active {
            Some(stored) => stored,
            None => match self.latest_conversation()? {
                Some(stored) => stored,
                None => return Ok(None),
            },
        };
        let messages = self
            .get_messages(&stored.id)?
            .into_iter()
            .filter_map(StoredMessage::into_message)
            .collect();
        Ok(Some(Conversation::restore(stored.id, stored.title, messages)))
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Stored preferences; unknown or unparsable values fall back to the defaults.
    pub fn load_preferences(&self) -> Result<Preferences> {
        let mut prefs = Preferences::default();
        if let Some(value) = self.get_setting("reply_as")? {
            prefs.reply_as = value.parse().unwrap_or(prefs.reply_as);
        }
        if let Some(value) = self.get_setting("mode")? {
            prefs.mode = value.parse().unwrap_or(prefs.mode);
        }
        if let Some(value) = self.get_setting("auto_send")? {
            prefs.auto_send = value.parse().unwrap_or(prefs.auto_send);
        }
        Ok(prefs)
    }

    // ── Tokens ──

    fn read_tokens(&self) -> Result<Option<AuthTokens>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT access_token, refresh_token FROM auth_tokens WHERE id = 1",
            [],
            |row| {
                Ok(AuthTokens {
                    access_token: row.get(0)?,
                    refresh_token: row.get(1)?,
                })
            },
        )
        .optional()
    }

    fn write_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO auth_tokens (id, access_token, refresh_token) VALUES (1, ?1, ?2)",
            params![tokens.access_token, tokens.refresh_token],
        )?;
        Ok(())
    }

    fn delete_tokens(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM auth_tokens", [])?;
        Ok(())
    }
}

impl CredentialStore for Database {
    fn load(&self) -> Option<AuthTokens> {
        self.read_tokens().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "could not read stored tokens");
            None
        })
    }

    fn save(&self, tokens: &AuthTokens) {
        if let Err(e) = self.write_tokens(tokens) {
            tracing::warn!(error = %e, "could not persist tokens");
        }
    }

    fn clear(&self) {
        if let Err(e) = self.delete_tokens() {
            tracing::warn!(error = %e, "could not clear stored tokens");
        }
    }
}
