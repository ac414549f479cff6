//! Discovery document fetching and caching
//!
//! The whole document is cached keyed by a fingerprint of the discovery
//! URL. Default lifetime is 86 400 seconds; a lifetime of zero disables
//! caching entirely and every lookup fetches fresh. The cache is
//! advisory: staleness only ever costs an extra fetch.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::capabilities::{FetchRequest, SharedCache, SharedFetch, cache_fingerprint};
use crate::discovery::metadata::ProviderMetadata;
use crate::error::{Error, Result};

const WELL_KNOWN_SUFFIX: &str = "/.well-known/openid-configuration";

#[derive(Debug, Clone)]
struct CachedDocument {
    metadata: Arc<ProviderMetadata>,
    fetched_at: Instant,
}

/// Fetches and caches the provider's discovery document
///
/// Field lookups consult configured overrides first, then the (possibly
/// freshly fetched) document. A missing field with no default is a
/// configuration error: the flow cannot proceed without it.
pub struct MetadataCache {
    discovery_url: String,
    ttl: Duration,
    overrides: Map<String, Value>,
    fetch: SharedFetch,
    shared_cache: SharedCache,
    snapshot: RwLock<Option<CachedDocument>>,
}

impl MetadataCache {
    /// Create a cache for one provider
    ///
    /// `provider_url` is used verbatim when it already ends with
    /// `/.well-known/openid-configuration`; otherwise the suffix is
    /// appended.
    pub fn new(
        provider_url: &str,
        ttl_secs: u64,
        overrides: Map<String, Value>,
        fetch: SharedFetch,
        shared_cache: SharedCache,
    ) -> Self {
        Self {
            discovery_url: discovery_url(provider_url),
            ttl: Duration::from_secs(ttl_secs),
            overrides,
            fetch,
            shared_cache,
            snapshot: RwLock::new(None),
        }
    }

    /// The discovery URL this cache fetches from
    pub fn discovery_url(&self) -> &str {
        &self.discovery_url
    }

    /// Current document snapshot, fetching if absent or expired
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on fetch failure or non-2xx status,
    /// [`Error::Protocol`] when the response is not a JSON object.
    pub async fn document(&self) -> Result<Arc<ProviderMetadata>> {
        if !self.ttl.is_zero() {
            {
                let snapshot = self.snapshot.read().await;
                if let Some(cached) = snapshot.as_ref()
                    && cached.fetched_at.elapsed() < self.ttl
                {
                    debug!(url = %self.discovery_url, "using cached provider metadata");
                    return Ok(Arc::clone(&cached.metadata));
                }
            }

            let fingerprint = cache_fingerprint(&self.discovery_url);
            if let Some(body) = self.shared_cache.get(&fingerprint).await {
                debug!(url = %self.discovery_url, "provider metadata from shared cache");
                let metadata = Arc::new(ProviderMetadata::from_json(&body)?);
                let mut snapshot = self.snapshot.write().await;
                *snapshot = Some(CachedDocument {
                    metadata: Arc::clone(&metadata),
                    fetched_at: Instant::now(),
                });
                return Ok(metadata);
            }
        }

        self.fetch_and_cache().await
    }

    async fn fetch_and_cache(&self) -> Result<Arc<ProviderMetadata>> {
        info!(url = %self.discovery_url, "fetching provider discovery document");

        let response = self
            .fetch
            .fetch(FetchRequest::get(&self.discovery_url))
            .await?;
        if !response.is_success() {
            return Err(Error::Transport(format!(
                "discovery endpoint {} returned status {}",
                self.discovery_url, response.status
            )));
        }

        let metadata = Arc::new(ProviderMetadata::from_json(&response.body)?);
        info!(
            url = %self.discovery_url,
            fields = metadata.len(),
            "provider discovery document fetched"
        );

        if !self.ttl.is_zero() {
            let fingerprint = cache_fingerprint(&self.discovery_url);
            self.shared_cache
                .set(&fingerprint, response.body, self.ttl)
                .await;
            let mut snapshot = self.snapshot.write().await;
            *snapshot = Some(CachedDocument {
                metadata: Arc::clone(&metadata),
                fetched_at: Instant::now(),
            });
        }

        Ok(metadata)
    }

    /// Look up a field, consulting overrides before the document
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the field is absent, plus
    /// any error from fetching the document.
    pub async fn get(&self, name: &str) -> Result<Value> {
        match self.get_opt(name).await? {
            Some(value) => Ok(value),
            None => Err(Error::Configuration(format!(
                "provider metadata value `{name}` is unavailable and no default was given"
            ))),
        }
    }

    /// Look up a field, falling back to `default` when absent
    ///
    /// # Errors
    ///
    /// Returns any error from fetching the document.
    pub async fn get_or(&self, name: &str, default: Value) -> Result<Value> {
        Ok(self.get_opt(name).await?.unwrap_or(default))
    }

    /// Look up a field, returning `None` when absent
    ///
    /// # Errors
    ///
    /// Returns any error from fetching the document.
    pub async fn get_opt(&self, name: &str) -> Result<Option<Value>> {
        if let Some(value) = self.overrides.get(name) {
            return Ok(Some(value.clone()));
        }
        let document = self.document().await?;
        Ok(document.get(name).cloned())
    }

    /// Look up a field that must be a string (endpoints, issuer)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the field is absent or not a
    /// string.
    pub async fn endpoint(&self, name: &str) -> Result<String> {
        match self.get(name).await? {
            Value::String(s) => Ok(s),
            other => Err(Error::Configuration(format!(
                "provider metadata value `{name}` is not a string: {other}"
            ))),
        }
    }

    /// Like [`Self::endpoint`] but absent fields yield `None`
    ///
    /// # Errors
    ///
    /// Returns any error from fetching the document.
    pub async fn endpoint_opt(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .get_opt(name)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Look up a string-array field with a default
    ///
    /// # Errors
    ///
    /// Returns any error from fetching the document.
    pub async fn string_list(&self, name: &str, default: &[&str]) -> Result<Vec<String>> {
        match self.get_opt(name).await? {
            Some(Value::Array(items)) => Ok(items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()),
            _ => Ok(default.iter().map(|s| (*s).to_string()).collect()),
        }
    }

    /// The provider's discovered issuer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the document lacks `issuer`.
    pub async fn issuer(&self) -> Result<String> {
        self.endpoint("issuer").await
    }
}

fn discovery_url(provider_url: &str) -> String {
    if provider_url.ends_with(WELL_KNOWN_SUFFIX) {
        provider_url.to_string()
    } else {
        format!("{}{}", provider_url.trim_end_matches('/'), WELL_KNOWN_SUFFIX)
    }
}
