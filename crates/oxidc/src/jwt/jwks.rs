//! JWKS fetching, caching and key selection
//!
//! The provider's public keys arrive as a JSON Web Key Set. The resolver
//! caches the set keyed by a fingerprint of the JWKS URL (same TTL
//! semantics as the discovery document) and selects the key matching a
//! token header deterministically:
//!
//! 1. header has a `kid`: the first key matching both family and `kid`
//! 2. no `kid`: the first key matching the family
//! 3. otherwise `KeyNotFound`, naming alg and kid when a kid was given
//!
//! The family is dictated by the header algorithm: algorithms beginning
//! with `E` require an EC key, all others an RSA key. A resolution miss
//! against a cached set triggers exactly one re-fetch (the provider may
//! have rotated keys); a second miss falls back to caller-supplied
//! supplementary keys before failing permanently. That fallback is
//! deliberately broad: any failure of the primary lookup, not only a
//! not-found, falls through to the supplementary list.

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::capabilities::{FetchRequest, SharedCache, SharedFetch, cache_fingerprint};
use crate::error::{Error, Result};
use crate::jwt::codec::JoseHeader;

/// Key family required by a token header algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// Elliptic-curve keys (`ES*` algorithms)
    Ec,
    /// RSA keys (everything else)
    Rsa,
}

impl KeyFamily {
    /// Family implied by a header `alg` value
    pub fn for_algorithm(alg: &str) -> Self {
        if alg.starts_with('E') {
            Self::Ec
        } else {
            Self::Rsa
        }
    }
}

/// One public key record from a JWKS document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type: `RSA` or `EC`
    pub kty: String,
    /// Intended algorithm, when the provider set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Key id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Intended use (`sig` / `enc`)
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    /// EC curve name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    /// EC x coordinate, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    /// EC y coordinate, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// The family this key belongs to, when the `kty` is recognized
    pub fn family(&self) -> Option<KeyFamily> {
        match self.kty.as_str() {
            "EC" => Some(KeyFamily::Ec),
            "RSA" => Some(KeyFamily::Rsa),
            _ => None,
        }
    }

    /// Build a verification key handle from this record
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedKey`] when required fields for the
    /// declared `kty` are missing or unusable. Never silently skipped:
    /// a selected-but-broken key fails the lookup it was selected for.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.required_field(self.n.as_deref(), "n")?;
                let e = self.required_field(self.e.as_deref(), "e")?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| self.malformed(format!("unusable RSA components: {err}")))
            }
            "EC" => {
                self.required_field(self.crv.as_deref(), "crv")?;
                let x = self.required_field(self.x.as_deref(), "x")?;
                let y = self.required_field(self.y.as_deref(), "y")?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|err| self.malformed(format!("unusable EC components: {err}")))
            }
            other => Err(self.malformed(format!("unsupported kty `{other}`"))),
        }
    }

    fn required_field<'a>(&self, value: Option<&'a str>, name: &str) -> Result<&'a str> {
        value.ok_or_else(|| self.malformed(format!("missing `{name}` for kty `{}`", self.kty)))
    }

    fn malformed(&self, detail: String) -> Error {
        match &self.kid {
            Some(kid) => Error::MalformedKey(format!("key `{kid}`: {detail}")),
            None => Error::MalformedKey(detail),
        }
    }
}

/// An ordered JSON Web Key Set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    /// Keys in document order
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Parse a JWKS response body
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the body is not JSON at all and
    /// [`Error::MalformedKey`] when the document does not have the JWKS
    /// shape.
    pub fn from_json(body: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
            Error::protocol("invalid_jwks", Some(format!("not valid JSON: {e}")))
        })?;
        serde_json::from_value(value)
            .map_err(|e| Error::MalformedKey(format!("invalid JWKS document: {e}")))
    }
}

/// Select the key matching a token header from an ordered key list
///
/// # Errors
///
/// Returns [`Error::KeyNotFound`] when nothing matches; the error names
/// the algorithm and kid when the header carried a kid.
pub fn select_key<'a>(keys: &'a [Jwk], alg: &str, kid: Option<&str>) -> Result<&'a Jwk> {
    let family = KeyFamily::for_algorithm(alg);

    if let Some(kid) = kid {
        for key in keys {
            if key.family() == Some(family) && key.kid.as_deref() == Some(kid) {
                return Ok(key);
            }
        }
        return Err(Error::KeyNotFound {
            alg: alg.to_string(),
            kid: Some(kid.to_string()),
        });
    }

    for key in keys {
        if key.family() == Some(family) {
            return Ok(key);
        }
    }
    Err(Error::KeyNotFound {
        alg: alg.to_string(),
        kid: None,
    })
}

#[derive(Clone)]
struct CachedKeys {
    keys: Arc<JwkSet>,
    url: String,
    fetched_at: Instant,
}

/// Resolves the verification key for a token header
pub struct KeyResolver {
    ttl: Duration,
    supplementary: Vec<Jwk>,
    fetch: SharedFetch,
    shared_cache: SharedCache,
    snapshot: RwLock<Option<CachedKeys>>,
}

impl KeyResolver {
    /// Create a resolver
    ///
    /// `supplementary` keys are only consulted after the provider's set
    /// failed to produce a usable key twice (cached, then re-fetched).
    pub fn new(
        ttl_secs: u64,
        supplementary: Vec<Jwk>,
        fetch: SharedFetch,
        shared_cache: SharedCache,
    ) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            supplementary,
            fetch,
            shared_cache,
            snapshot: RwLock::new(None),
        }
    }

    /// Resolve the verification key for `header` against the provider's
    /// key set at `jwks_uri`
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when no key matches after the
    /// re-fetch and the supplementary fallback, [`Error::MalformedKey`]
    /// when the matching key is unusable, and transport/protocol errors
    /// from fetching the set.
    pub async fn resolve(&self, jwks_uri: &str, header: &JoseHeader) -> Result<DecodingKey> {
        let alg = header.alg.as_str();
        let kid = header.kid.as_deref();

        let keys = self.key_set(jwks_uri, false).await?;
        let primary = select_key(&keys.keys, alg, kid).and_then(Jwk::decoding_key);
        let first_miss = match primary {
            Ok(key) => return Ok(key),
            Err(err) => err,
        };

        // The provider may have rotated keys since the set was cached;
        // exactly one forced re-fetch before giving up on the primary set.
        warn!(
            alg,
            kid = kid.unwrap_or("<none>"),
            error = %first_miss,
            "key lookup missed cached set, re-fetching JWKS"
        );
        let keys = self.key_set(jwks_uri, true).await?;
        let second_miss =
            match select_key(&keys.keys, alg, kid).and_then(Jwk::decoding_key) {
                Ok(key) => return Ok(key),
                Err(err) => err,
            };

        if self.supplementary.is_empty() {
            return Err(second_miss);
        }
        warn!(
            alg,
            kid = kid.unwrap_or("<none>"),
            error = %second_miss,
            "key lookup missed fresh set, trying supplementary keys"
        );
        select_key(&self.supplementary, alg, kid).and_then(Jwk::decoding_key)
    }

    async fn key_set(&self, jwks_uri: &str, force_refresh: bool) -> Result<Arc<JwkSet>> {
        if !force_refresh && !self.ttl.is_zero() {
            {
                let snapshot = self.snapshot.read().await;
                if let Some(cached) = snapshot.as_ref()
                    && cached.url == jwks_uri
                    && cached.fetched_at.elapsed() < self.ttl
                {
                    debug!(url = %jwks_uri, "using cached JWKS");
                    return Ok(Arc::clone(&cached.keys));
                }
            }

            let fingerprint = cache_fingerprint(jwks_uri);
            if let Some(body) = self.shared_cache.get(&fingerprint).await {
                debug!(url = %jwks_uri, "JWKS from shared cache");
                let keys = Arc::new(JwkSet::from_json(&body)?);
                self.store_snapshot(jwks_uri, &keys).await;
                return Ok(keys);
            }
        }

        info!(url = %jwks_uri, force_refresh, "fetching JWKS");
        let response = self.fetch.fetch(FetchRequest::get(jwks_uri)).await?;
        if !response.is_success() {
            return Err(Error::Transport(format!(
                "JWKS endpoint {} returned status {}",
                jwks_uri, response.status
            )));
        }

        let keys = Arc::new(JwkSet::from_json(&response.body)?);
        info!(url = %jwks_uri, key_count = keys.keys.len(), "JWKS fetched");

        if !self.ttl.is_zero() {
            let fingerprint = cache_fingerprint(jwks_uri);
            self.shared_cache
                .set(&fingerprint, response.body, self.ttl)
                .await;
            self.store_snapshot(jwks_uri, &keys).await;
        }

        Ok(keys)
    }

    async fn store_snapshot(&self, url: &str, keys: &Arc<JwkSet>) {
        let mut snapshot = self.snapshot.write().await;
        *snapshot = Some(CachedKeys {
            keys: Arc::clone(keys),
            url: url.to_string(),
            fetched_at: Instant::now(),
        });
    }
}
