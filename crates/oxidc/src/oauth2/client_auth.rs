//! Client authentication for token-endpoint requests
//!
//! Selection order, given the provider's advertised
//! `token_endpoint_auth_methods_supported` and an optional caller
//! override:
//!
//! 1. a configured override is used as-is, but only when the provider
//!    advertises it - anything else is a configuration error raised
//!    before any request is sent
//! 2. `client_secret_basic` when advertised and a secret is configured
//! 3. otherwise the credentials ride in the request body
//!    (`client_secret_post`)
//!
//! `client_secret_jwt` builds a fresh HMAC-signed assertion per request:
//! `iss` and `sub` are the client id, `aud` is the token endpoint, `jti`
//! is unique, and `iat`/`exp` are bounded by the configured lifetime.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::capabilities::SharedClock;
use crate::error::{Error, Result};

/// Assertion type URN for `client_secret_jwt`
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Token-endpoint client authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP basic header with URL-encoded `id:secret`
    SecretBasic,
    /// `client_id`/`client_secret` in the request body
    SecretPost,
    /// HMAC-signed client assertion
    SecretJwt,
}

impl ClientAuthMethod {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecretBasic => "client_secret_basic",
            Self::SecretPost => "client_secret_post",
            Self::SecretJwt => "client_secret_jwt",
        }
    }
}

impl std::fmt::Display for ClientAuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Materialized credentials for one token-endpoint request
#[derive(Debug, Clone)]
pub enum TokenEndpointAuth {
    /// Send an `Authorization` header with this value
    BasicHeader(String),
    /// Merge these parameters into the form body
    BodyParams(Vec<(String, String)>),
}

/// Selects and constructs client credentials for token-endpoint calls
pub struct ClientAuthenticator {
    client_id: String,
    client_secret: Option<SecretString>,
    assertion_lifetime_secs: u64,
    clock: SharedClock,
}

impl ClientAuthenticator {
    /// Create an authenticator for one client
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
        assertion_lifetime_secs: u64,
        clock: SharedClock,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            assertion_lifetime_secs,
            clock,
        }
    }

    /// Select a method and build the credentials for one request
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when a configured override is not
    /// advertised by the provider, or when the selected method needs a
    /// secret that is not configured.
    pub fn prepare(
        &self,
        advertised: &[String],
        override_method: Option<ClientAuthMethod>,
        token_endpoint: &str,
    ) -> Result<TokenEndpointAuth> {
        let method = self.select(advertised, override_method)?;
        debug!(method = %method, "token endpoint client authentication selected");
        match method {
            ClientAuthMethod::SecretJwt => self.assertion_params(token_endpoint),
            ClientAuthMethod::SecretBasic => self.basic_header(),
            ClientAuthMethod::SecretPost => Ok(self.body_params()),
        }
    }

    fn select(
        &self,
        advertised: &[String],
        override_method: Option<ClientAuthMethod>,
    ) -> Result<ClientAuthMethod> {
        if let Some(method) = override_method {
            if !advertised.iter().any(|m| m == method.as_str()) {
                return Err(Error::Configuration(format!(
                    "token endpoint auth method `{method}` is not advertised by the provider \
                     (supported: {})",
                    advertised.join(", ")
                )));
            }
            return Ok(method);
        }

        if self.client_secret.is_some()
            && advertised
                .iter()
                .any(|m| m == ClientAuthMethod::SecretBasic.as_str())
        {
            return Ok(ClientAuthMethod::SecretBasic);
        }
        Ok(ClientAuthMethod::SecretPost)
    }

    fn basic_header(&self) -> Result<TokenEndpointAuth> {
        let secret = self.require_secret(ClientAuthMethod::SecretBasic)?;
        let credentials = format!(
            "{}:{}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(secret.expose_secret())
        );
        Ok(TokenEndpointAuth::BasicHeader(format!(
            "Basic {}",
            STANDARD.encode(credentials)
        )))
    }

    fn body_params(&self) -> TokenEndpointAuth {
        let mut params = vec![("client_id".to_string(), self.client_id.clone())];
        if let Some(secret) = &self.client_secret {
            params.push((
                "client_secret".to_string(),
                secret.expose_secret().clone(),
            ));
        }
        TokenEndpointAuth::BodyParams(params)
    }

    fn assertion_params(&self, token_endpoint: &str) -> Result<TokenEndpointAuth> {
        let secret = self.require_secret(ClientAuthMethod::SecretJwt)?;
        let now = self.clock.now_secs();
        let claims = json!({
            "iss": self.client_id,
            "sub": self.client_id,
            "aud": token_endpoint,
            "jti": Uuid::new_v4().to_string(),
            "iat": now,
            "exp": now + self.assertion_lifetime_secs,
        });

        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
        )
        .map_err(|e| Error::Configuration(format!("failed to sign client assertion: {e}")))?;

        Ok(TokenEndpointAuth::BodyParams(vec![
            ("client_id".to_string(), self.client_id.clone()),
            (
                "client_assertion_type".to_string(),
                JWT_BEARER_ASSERTION_TYPE.to_string(),
            ),
            ("client_assertion".to_string(), assertion),
        ]))
    }

    fn require_secret(&self, method: ClientAuthMethod) -> Result<&SecretString> {
        self.client_secret.as_ref().ok_or_else(|| {
            Error::Configuration(format!("`{method}` requires a configured client secret"))
        })
    }
}
