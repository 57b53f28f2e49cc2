use std::sync::Mutex;

use super::types::AuthTokens;

/// Where the token pair lives between runs.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Option<AuthTokens>;
    fn save(&self, tokens: &AuthTokens);
    fn clear(&self);
}

/// Process-local store, used when nothing should touch disk.
#[derive(Default)]
pub struct MemoryCredentials {
    tokens: Mutex<Option<AuthTokens>>,
}

impl MemoryCredentials {
    pub fn with_tokens(tokens: AuthTokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn load(&self) -> Option<AuthTokens> {
        self.tokens.lock().unwrap().clone()
    }

    fn save(&self, tokens: &AuthTokens) {
        *self.tokens.lock().unwrap() = Some(tokens.clone());
    }

    fn clear(&self) {
        *self.tokens.lock().unwrap() = None;
    }
}
