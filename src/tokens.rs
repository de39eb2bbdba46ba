//! Persisted access/refresh token pair.
//!
//! The current [`Auth`] record is stored as JSON under a single fixed key.
//! Reads are forgiving: a missing key, an unreadable store and malformed
//! JSON all read as "no token", so callers fall back to unauthenticated
//! requests instead of failing before the server had a say.

use std::{fmt, sync::Arc};

use crate::{error::Result, protocol::auth::Auth, store::KeyValueStore};

#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl TokenStore {
    /// Key the token record is stored under.
    pub const KEY: &'static str = "auth";

    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Reads the current token record.
    pub async fn load(&self) -> Option<Auth> {
        let json = match self.store.get(Self::KEY).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                warn!("reading token record failed: {e}");
                return None;
            }
        };

        match serde_json::from_str(&json) {
            Ok(auth) => Some(auth),
            Err(e) => {
                warn!("ignoring malformed token record: {e}");
                None
            }
        }
    }

    /// Replaces the stored token record.
    pub async fn save(&self, auth: &Auth) -> Result<()> {
        let json = serde_json::to_string(auth)?;
        self.store.set(Self::KEY, &json).await?;
        debug!("token record saved; expires in {}s", auth.expires_in.as_secs());
        Ok(())
    }

    /// Deletes the stored token record.
    pub async fn clear(&self) -> Result<()> {
        self.store.remove(Self::KEY).await?;
        debug!("token record cleared");
        Ok(())
    }

    /// The refresh token of the current record, if any.
    pub async fn refresh_token(&self) -> Option<String> {
        self.load().await.map(|auth| auth.refresh_token)
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore").field("key", &Self::KEY).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::MemoryStore;

    fn auth(access: &str) -> Auth {
        Auth {
            access_token: access.to_owned(),
            refresh_token: format!("{access}-refresh"),
            id_token: None,
            expires_in: Duration::from_secs(300),
            refresh_expires_in: None,
            token_type: "Bearer".to_owned(),
            scope: None,
            session_state: None,
            not_before_policy: None,
        }
    }

    #[tokio::test]
    async fn missing_key_reads_as_no_token() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        assert!(tokens.load().await.is_none());
        assert!(tokens.refresh_token().await.is_none());
    }

    #[tokio::test]
    async fn malformed_json_reads_as_no_token() {
        let store = Arc::new(MemoryStore::new());
        store.set(TokenStore::KEY, "{not json").await.unwrap();
        let tokens = TokenStore::new(store);
        assert!(tokens.load().await.is_none());
    }

    #[tokio::test]
    async fn save_replaces_and_clear_deletes() {
        let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
        tokens.save(&auth("first")).await.unwrap();
        tokens.save(&auth("second")).await.unwrap();
        assert_eq!(tokens.load().await, Some(auth("second")));
        assert_eq!(tokens.refresh_token().await.as_deref(), Some("second-refresh"));

        tokens.clear().await.unwrap();
        assert!(tokens.load().await.is_none());
    }
}
