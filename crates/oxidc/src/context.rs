//! Per-request and per-session state passed into the flow engine
//!
//! The engine never touches ambient globals: callback parameters arrive in
//! an explicit [`RequestContext`], and the ephemeral authentication state
//! (nonce, state, PKCE verifier) lives in a caller-provided
//! [`SessionStore`] scoped to one end user. The store must be committed
//! before any redirect is rendered; the async `set` resolving is that
//! commit point.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

/// Session key for the per-attempt nonce
pub const SESSION_NONCE: &str = "openid_connect_nonce";
/// Session key for the per-attempt state value
pub const SESSION_STATE: &str = "openid_connect_state";
/// Session key for the PKCE code verifier
pub const SESSION_CODE_VERIFIER: &str = "openid_connect_code_verifier";

/// Parameters of the inbound callback request (query or form)
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    params: HashMap<String, String>,
}

impl RequestContext {
    /// Empty context; used for the initial call that issues the redirect
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from (name, value) pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Build a context from a raw query string (without the leading `?`)
    pub fn from_query(query: &str) -> Self {
        Self::from_pairs(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned())),
        )
    }

    /// Insert a parameter
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    /// Look up a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// True when no parameters are present
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Per-end-user session storage
///
/// Scoping is the caller's responsibility: one store instance per end-user
/// session. The core writes only the three `openid_connect_*` keys.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Read a value
    ///
    /// # Errors
    ///
    /// Implementations may fail on backend errors; the core treats any
    /// failure as fatal to the current attempt.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value; returning means the write is committed
    ///
    /// # Errors
    ///
    /// Implementations may fail on backend errors.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Delete a value; deleting an absent key is not an error
    ///
    /// # Errors
    ///
    /// Implementations may fail on backend errors.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory session store
///
/// Suitable for tests and single-process callers; production deployments
/// typically adapt their web framework's session to [`SessionStore`].
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing_decodes_values() {
        let ctx = RequestContext::from_query("code=abc%2Fdef&state=xyz");
        assert_eq!(ctx.get("code"), Some("abc/def"));
        assert_eq!(ctx.get("state"), Some("xyz"));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn empty_context_reports_empty() {
        assert!(RequestContext::new().is_empty());
        assert!(!RequestContext::from_pairs([("code", "c")]).is_empty());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        store.set(SESSION_NONCE, "n0nce".to_string()).await.unwrap();
        assert_eq!(
            store.get(SESSION_NONCE).await.unwrap().as_deref(),
            Some("n0nce")
        );
        store.delete(SESSION_NONCE).await.unwrap();
        assert_eq!(store.get(SESSION_NONCE).await.unwrap(), None);
        // deleting again is fine
        store.delete(SESSION_NONCE).await.unwrap();
    }
}
