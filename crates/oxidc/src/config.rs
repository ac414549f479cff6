//! Relying-party client configuration
//!
//! A [`ClientConfig`] carries everything that identifies this client to
//! the provider plus the knobs for validation leeway, cache lifetimes and
//! transport timeouts. Explicit provider overrides short-circuit
//! discovery for individual metadata fields, which also lets a client run
//! against providers with no discovery document at all.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use crate::jwt::jwks::Jwk;
use crate::oauth2::client_auth::ClientAuthMethod;
use crate::oauth2::pkce::CodeChallengeMethod;

/// Default `iat` skew window in seconds, symmetric around now
pub const DEFAULT_LEEWAY_SECS: u64 = 600;
/// Default provider metadata / key set cache lifetime in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
/// Default outbound timeout in seconds; also bounds client assertions
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Configuration for one relying-party client
#[derive(Clone)]
pub struct ClientConfig {
    /// Provider URL; discovery appends `/.well-known/openid-configuration`
    /// unless the URL already ends with it
    pub provider_url: String,
    /// OAuth2 client identifier
    pub client_id: String,
    /// OAuth2 client secret, when the client is confidential
    pub client_secret: Option<SecretString>,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Expected issuer; defaults to the provider URL
    pub issuer: Option<String>,
    /// Additional scopes merged into the authorization request
    /// (`openid` is always requested)
    pub scopes: Vec<String>,
    /// Additional response types merged into the authorization request
    /// (defaults to `code` when empty)
    pub response_types: Vec<String>,
    /// Extra parameters appended to the authorization request
    pub auth_params: HashMap<String, String>,
    /// PKCE challenge method; `None` disables PKCE
    pub code_challenge_method: Option<CodeChallengeMethod>,
    /// Accept an `id_token` delivered directly in the callback
    pub allow_implicit: bool,
    /// `iat` skew window in seconds, symmetric around the current time
    pub leeway_secs: u64,
    /// Provider metadata cache lifetime in seconds; 0 disables caching
    pub metadata_ttl_secs: u64,
    /// Key set cache lifetime in seconds; 0 disables caching
    pub jwks_ttl_secs: u64,
    /// Outbound timeout in seconds; also bounds client-assertion lifetime
    pub timeout_secs: u64,
    /// Token-endpoint authentication method override
    pub token_endpoint_auth_method: Option<ClientAuthMethod>,
    /// Keys tried after the provider's key set failed to match twice
    pub supplementary_keys: Vec<Jwk>,
    /// Explicit provider metadata values, consulted before discovery
    pub provider_overrides: Map<String, Value>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("provider_url", &self.provider_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("redirect_uri", &self.redirect_uri)
            .field("issuer", &self.issuer)
            .field("scopes", &self.scopes)
            .field("response_types", &self.response_types)
            .field("code_challenge_method", &self.code_challenge_method)
            .field("allow_implicit", &self.allow_implicit)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Create a configuration for a public client (no secret)
    pub fn new(
        provider_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            provider_url: provider_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            issuer: None,
            scopes: Vec::new(),
            response_types: Vec::new(),
            auth_params: HashMap::new(),
            code_challenge_method: None,
            allow_implicit: false,
            leeway_secs: DEFAULT_LEEWAY_SECS,
            metadata_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            jwks_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            token_endpoint_auth_method: None,
            supplementary_keys: Vec::new(),
            provider_overrides: Map::new(),
        }
    }

    /// Set the client secret (confidential client)
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(secret.into()));
        self
    }

    /// Override the expected issuer
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Register additional scopes for the authorization request
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Register additional response types for the authorization request
    pub fn with_response_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.response_types.extend(types.into_iter().map(Into::into));
        self
    }

    /// Append an extra authorization request parameter
    pub fn with_auth_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_params.insert(name.into(), value.into());
        self
    }

    /// Enable PKCE with the given challenge method
    pub fn with_code_challenge_method(mut self, method: CodeChallengeMethod) -> Self {
        self.code_challenge_method = Some(method);
        self
    }

    /// Accept implicit-flow callbacks carrying an `id_token` directly
    pub fn with_implicit_flow(mut self) -> Self {
        self.allow_implicit = true;
        self
    }

    /// Set the `iat` skew window
    pub fn with_leeway_secs(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// Set both cache lifetimes; 0 disables caching
    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.metadata_ttl_secs = secs;
        self.jwks_ttl_secs = secs;
        self
    }

    /// Set the outbound timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Force a token-endpoint authentication method
    pub fn with_token_endpoint_auth_method(mut self, method: ClientAuthMethod) -> Self {
        self.token_endpoint_auth_method = Some(method);
        self
    }

    /// Provide keys tried after the provider's key set failed to match
    pub fn with_supplementary_keys(mut self, keys: Vec<Jwk>) -> Self {
        self.supplementary_keys = keys;
        self
    }

    /// Override a single provider metadata value, bypassing discovery
    pub fn with_provider_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.provider_overrides.insert(name.into(), value);
        self
    }

    /// The issuer this client expects, before discovery is consulted
    pub fn expected_issuer(&self) -> &str {
        self.issuer.as_deref().unwrap_or(&self.provider_url)
    }

    /// Expose the configured secret as bytes, when present
    pub(crate) fn secret_bytes(&self) -> Option<Vec<u8>> {
        self.client_secret
            .as_ref()
            .map(|s| s.expose_secret().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_expectations() {
        let config = ClientConfig::new("https://op.example.org", "client-1", "https://rp/cb");
        assert_eq!(config.leeway_secs, 600);
        assert_eq!(config.metadata_ttl_secs, 86_400);
        assert_eq!(config.jwks_ttl_secs, 86_400);
        assert!(config.client_secret.is_none());
        assert!(!config.allow_implicit);
        assert_eq!(config.expected_issuer(), "https://op.example.org");
    }

    #[test]
    fn issuer_override_wins() {
        let config = ClientConfig::new("https://op.example.org", "client-1", "https://rp/cb")
            .with_issuer("https://issuer.example.org");
        assert_eq!(config.expected_issuer(), "https://issuer.example.org");
    }

    #[test]
    fn debug_redacts_the_secret() {
        let config = ClientConfig::new("https://op.example.org", "client-1", "https://rp/cb")
            .with_client_secret("hunter2");
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn builder_accumulates_scopes_and_params() {
        let config = ClientConfig::new("https://op.example.org", "client-1", "https://rp/cb")
            .with_scopes(["email", "profile"])
            .with_auth_param("prompt", "consent");
        assert_eq!(config.scopes, vec!["email", "profile"]);
        assert_eq!(config.auth_params.get("prompt").unwrap(), "consent");
    }
}
