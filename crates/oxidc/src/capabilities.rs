//! Injected capabilities: fetch, clock, randomness, shared cache
//!
//! The core never reaches for ambient process state. Everything it needs
//! from the outside world comes in through one of the small traits in this
//! module, each with a production default:
//!
//! - [`Fetch`] - outbound HTTP, implemented by [`crate::http::HttpFetcher`]
//! - [`Clock`] - wall-clock seconds for `exp`/`iat` checks
//! - [`RandomSource`] - CSPRNG for nonce, state, PKCE verifier and `jti`
//! - [`Cache`] - optional process-wide cache shared between client
//!   instances; defaults to a no-op
//!
//! Duplicate cache population by concurrent callers is harmless: entries
//! are keyed by a stable fingerprint and replaced wholesale, last write
//! wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::jwt::codec::base64url_encode;

/// HTTP method for a [`FetchRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
}

/// An outbound request handed to the [`Fetch`] capability
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Absolute URL to fetch
    pub url: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Request body, for POST requests
    pub body: Option<String>,
    /// Additional request headers as (name, value) pairs
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    /// Build a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            body: None,
            headers: Vec::new(),
        }
    }

    /// Build a POST request with a body
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            body: Some(body.into()),
            headers: Vec::new(),
        }
    }

    /// Add a request header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response produced by the [`Fetch`] capability
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// `Content-Type` header value, when present
    pub content_type: Option<String>,
}

impl FetchResponse {
    /// True when the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP capability
///
/// Implementations must follow redirects and honor the configured timeout;
/// the core performs no retries of its own.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Perform a single HTTP request
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] when the request cannot be
    /// completed at all. Non-2xx responses are returned, not errors;
    /// callers decide whether a 2xx was required.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse>;
}

/// Wall-clock capability, in seconds since the Unix epoch
pub trait Clock: Send + Sync {
    /// Current time in whole seconds
    fn now_secs(&self) -> u64;
}

/// System clock backed by [`std::time::SystemTime`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Cryptographically secure random byte source
pub trait RandomSource: Send + Sync {
    /// Fill `buf` with random bytes
    fn fill_bytes(&self, buf: &mut [u8]);

    /// Generate `len` random bytes and base64url-encode them
    ///
    /// Used for nonce, state and PKCE verifier values; callers pass at
    /// least 16 bytes (32 for the PKCE verifier).
    fn random_urlsafe(&self, len: usize) -> String {
        let mut buf = vec![0u8; len];
        self.fill_bytes(&mut buf);
        base64url_encode(&buf)
    }
}

/// Operating-system CSPRNG
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        OsRng.fill_bytes(buf);
    }
}

/// Optional process-wide cache shared between client instances
///
/// Holds serialized provider documents (discovery metadata, JWKS) keyed by
/// a URL fingerprint. The cache is advisory: a missing or stale entry only
/// costs an extra fetch, never correctness.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a cached value
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value with a time-to-live; `ttl` of zero means do not store
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

/// Default cache: stores nothing, returns nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) {}
}

/// In-memory cache with per-entry expiry
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((value, expires_at)) => {
                if expires_at.is_some_and(|at| Instant::now() >= at) {
                    None
                } else {
                    Some(value.clone())
                }
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now().checked_add(ttl);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, expires_at));
    }
}

/// Stable fingerprint for cache keys derived from a URL
pub(crate) fn cache_fingerprint(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    base64url_encode(&digest)
}

/// Shared handles used by the caches and the flow engine
pub(crate) type SharedFetch = Arc<dyn Fetch>;
pub(crate) type SharedCache = Arc<dyn Cache>;
pub(crate) type SharedClock = Arc<dyn Clock>;
pub(crate) type SharedRandom = Arc<dyn RandomSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_urlsafe_has_requested_entropy() {
        let value = OsRandom.random_urlsafe(16);
        // 16 bytes -> 22 base64url chars, no padding
        assert_eq!(value.len(), 22);
        assert!(!value.contains('='));
        assert!(!value.contains('+'));
        assert!(!value.contains('/'));
    }

    #[test]
    fn random_values_differ() {
        assert_ne!(OsRandom.random_urlsafe(16), OsRandom.random_urlsafe(16));
    }

    #[test]
    fn fingerprint_is_stable_and_url_specific() {
        let a = cache_fingerprint("https://op.example.org/.well-known/openid-configuration");
        let b = cache_fingerprint("https://op.example.org/.well-known/openid-configuration");
        let c = cache_fingerprint("https://other.example.org/.well-known/openid-configuration");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn memory_cache_zero_ttl_is_disabled() {
        let cache = MemoryCache::new();
        cache.set("k", "v".to_string(), Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn noop_cache_stores_nothing() {
        let cache = NoopCache;
        cache
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(cache.get("k").await, None);
    }
}
