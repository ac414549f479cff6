//! The authorization flow engine
//!
//! [`RelyingParty`] drives one authentication attempt through the state
//! machine
//!
//! ```text
//! Idle ──▶ AuthorizationRequested ──▶ {CodeReceived | ImplicitReceived}
//!                                            │
//!                                            ▼
//!                                      Authenticated
//! ```
//!
//! with `Failed` absorbing from any point. The redirect is the sole
//! suspension point: [`RelyingParty::authenticate`] returns
//! [`AuthOutcome::Redirect`] once the session is committed, and a later
//! independent callback carrying the matching `state` resumes the flow.
//!
//! No token is trusted before both signature verification and claim
//! validation succeed, and the per-attempt nonce and state are erased as
//! soon as the callback is processed - on failure too, so a rejected
//! callback cannot be replayed.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::capabilities::{
    FetchRequest, FetchResponse, NoopCache, OsRandom, SharedClock, SharedFetch, SharedRandom,
    SystemClock,
};
use crate::config::ClientConfig;
use crate::context::{RequestContext, SESSION_CODE_VERIFIER, SESSION_NONCE, SESSION_STATE, SessionStore};
use crate::discovery::MetadataCache;
use crate::error::{Error, Result};
use crate::http::{HttpConfig, HttpFetcher};
use crate::jwt::claims::{
    Claims, ClaimsValidator, DefaultIssuerValidator, IssuerValidator, constant_time_str_eq,
};
use crate::jwt::codec::{CompactToken, JoseHeader};
use crate::jwt::jwks::KeyResolver;
use crate::jwt::verify;
use crate::oauth2::client_auth::{ClientAuthenticator, TokenEndpointAuth};
use crate::oauth2::pkce;

/// Number of random bytes behind nonce and state values
const STATE_BYTES: usize = 16;

/// Default client auth methods assumed when the provider advertises none
const DEFAULT_AUTH_METHODS: &[&str] = &["client_secret_basic", "client_secret_post"];

/// Flow engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No authentication attempt in progress
    Idle,
    /// Redirect issued, waiting for the callback
    AuthorizationRequested,
    /// Callback carried an authorization code
    CodeReceived,
    /// Callback carried an ID token directly
    ImplicitReceived,
    /// A token bundle was verified and accepted
    Authenticated,
    /// The attempt failed; absorbing
    Failed,
}

/// Outcome of [`RelyingParty::authenticate`]
#[derive(Debug, Clone)]
pub enum AuthOutcome {
    /// The end user is authenticated; ownership of the bundle transfers
    /// to the caller
    Authenticated(FlowResult),
    /// Not yet authenticated: render this redirect and wait for the
    /// callback
    Redirect(String),
}

/// Verified token bundle produced by a successful flow
#[derive(Debug, Clone)]
pub struct FlowResult {
    /// The raw (verified) ID token
    pub id_token: String,
    /// Access token, when the grant produced one
    pub access_token: Option<String>,
    /// Refresh token, when the grant produced one
    pub refresh_token: Option<String>,
    /// Claims from the verified ID token
    pub verified_claims: Claims,
}

/// Response from dynamic client registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    /// Registered client identifier
    pub client_id: String,
    /// Registered client secret, for confidential clients
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Everything else the provider returned
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// The relying-party flow engine
///
/// One instance drives one logical client; each authentication attempt is
/// fully sequential - every outbound fetch completes before the flow
/// continues.
pub struct RelyingParty {
    config: ClientConfig,
    metadata: MetadataCache,
    keys: KeyResolver,
    fetch: SharedFetch,
    clock: SharedClock,
    random: SharedRandom,
    issuer_validator: Option<Arc<dyn IssuerValidator>>,
    state: FlowState,
    access_token: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    verified_claims: Option<Claims>,
}

impl RelyingParty {
    /// Create an engine with production capabilities
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the HTTP client cannot be
    /// built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let fetch = Arc::new(HttpFetcher::with_config(HttpConfig {
            timeout: Duration::from_secs(config.timeout_secs),
            ..HttpConfig::default()
        })?);
        Ok(Self::with_capabilities(
            config,
            fetch,
            Arc::new(NoopCache),
            Arc::new(SystemClock),
            Arc::new(OsRandom),
        ))
    }

    /// Create an engine with explicit capabilities (tests, custom stacks)
    pub fn with_capabilities(
        config: ClientConfig,
        fetch: Arc<dyn crate::capabilities::Fetch>,
        cache: Arc<dyn crate::capabilities::Cache>,
        clock: Arc<dyn crate::capabilities::Clock>,
        random: Arc<dyn crate::capabilities::RandomSource>,
    ) -> Self {
        let metadata = MetadataCache::new(
            &config.provider_url,
            config.metadata_ttl_secs,
            config.provider_overrides.clone(),
            Arc::clone(&fetch),
            Arc::clone(&cache),
        );
        let keys = KeyResolver::new(
            config.jwks_ttl_secs,
            config.supplementary_keys.clone(),
            Arc::clone(&fetch),
            cache,
        );
        Self {
            config,
            metadata,
            keys,
            fetch,
            clock,
            random,
            issuer_validator: None,
            state: FlowState::Idle,
            access_token: None,
            id_token: None,
            refresh_token: None,
            verified_claims: None,
        }
    }

    /// Replace the issuer-acceptance predicate
    pub fn with_issuer_validator(mut self, validator: Arc<dyn IssuerValidator>) -> Self {
        self.issuer_validator = Some(validator);
        self
    }

    /// Current flow state
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Access token from the last successful exchange
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Verified ID token from the last successful flow
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Refresh token from the last successful exchange
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Claims of the verified ID token
    pub fn verified_claims(&self) -> Option<&Claims> {
        self.verified_claims.as_ref()
    }

    /// Provider metadata cache (exposed for advanced callers)
    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Drive one authentication step
    ///
    /// Dispatches on the callback parameters: a provider `error` is
    /// terminal, a `code` is exchanged and verified, a direct `id_token`
    /// is verified when the implicit flow is enabled, and an empty
    /// context starts a fresh attempt by issuing a redirect.
    ///
    /// # Errors
    ///
    /// Any error moves the engine to [`FlowState::Failed`]. Security
    /// failures erase the stored nonce and state first.
    pub async fn authenticate(
        &mut self,
        request: &RequestContext,
        session: &dyn SessionStore,
    ) -> Result<AuthOutcome> {
        let outcome = self.authenticate_inner(request, session).await;
        if outcome.is_err() {
            self.state = FlowState::Failed;
        }
        outcome
    }

    async fn authenticate_inner(
        &mut self,
        request: &RequestContext,
        session: &dyn SessionStore,
    ) -> Result<AuthOutcome> {
        if let Some(error) = request.get("error") {
            let description = request.get("error_description").map(str::to_string);
            warn!(error, "provider callback carried an error");
            return Err(Error::protocol(error, description));
        }

        if let Some(code) = request.get("code") {
            self.state = FlowState::CodeReceived;
            let result = self.complete_code_flow(code, request, session).await?;
            self.state = FlowState::Authenticated;
            info!("authorization code flow complete");
            return Ok(AuthOutcome::Authenticated(result));
        }

        if self.config.allow_implicit
            && let Some(id_token) = request.get("id_token")
        {
            self.state = FlowState::ImplicitReceived;
            let result = self.complete_implicit_flow(id_token, request, session).await?;
            self.state = FlowState::Authenticated;
            info!("implicit flow complete");
            return Ok(AuthOutcome::Authenticated(result));
        }

        let redirect = self.begin_authorization(session).await?;
        self.state = FlowState::AuthorizationRequested;
        Ok(AuthOutcome::Redirect(redirect))
    }

    /// Validate a received back-channel logout token
    ///
    /// The token's signature is verified exactly like an ID token's, then
    /// the logout-token claim rule set is applied.
    ///
    /// # Errors
    ///
    /// Returns the usual token errors plus [`Error::ClaimValidation`]
    /// from the logout rule set.
    pub async fn validate_logout_token(&self, raw: &str) -> Result<Claims> {
        let token = CompactToken::parse(raw)?;
        let header = token.jose_header()?;
        let key = self.verification_key(&header).await?;
        verify::verify(&token, &header.alg, &key)?;

        let claims = token.payload()?;
        self.claims_validator().await?.validate_logout_token(&claims)?;
        Ok(claims)
    }

    // ---- authorization request ------------------------------------------

    async fn begin_authorization(&self, session: &dyn SessionStore) -> Result<String> {
        let auth_endpoint = self.metadata.endpoint("authorization_endpoint").await?;

        let nonce = self.random.random_urlsafe(STATE_BYTES);
        let state = self.random.random_urlsafe(STATE_BYTES);
        session.set(SESSION_NONCE, nonce.clone()).await?;
        session.set(SESSION_STATE, state.clone()).await?;

        let response_type = if self.config.response_types.is_empty() {
            "code".to_string()
        } else {
            self.config.response_types.join(" ")
        };

        let mut scopes = self.config.scopes.clone();
        if !scopes.iter().any(|s| s == "openid") {
            scopes.push("openid".to_string());
        }

        let mut params: Vec<(String, String)> = vec![
            ("response_type".to_string(), response_type),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("client_id".to_string(), self.config.client_id.clone()),
            ("nonce".to_string(), nonce),
            ("state".to_string(), state),
            ("scope".to_string(), scopes.join(" ")),
        ];
        for (name, value) in &self.config.auth_params {
            params.push((name.clone(), value.clone()));
        }

        if let Some(method) = self.config.code_challenge_method {
            let supported = self
                .metadata
                .string_list("code_challenge_methods_supported", &[])
                .await?;
            if !supported.iter().any(|m| m == method.as_str()) {
                return Err(Error::Configuration(format!(
                    "PKCE challenge method `{method}` is not supported by the provider \
                     (supported: {})",
                    supported.join(", ")
                )));
            }
            let verifier = pkce::generate_verifier(self.random.as_ref());
            session.set(SESSION_CODE_VERIFIER, verifier.clone()).await?;
            params.push((
                "code_challenge".to_string(),
                pkce::code_challenge(method, &verifier),
            ));
            params.push(("code_challenge_method".to_string(), method.as_str().to_string()));
            debug!(method = %method, "PKCE challenge attached");
        }

        if let Some(par_endpoint) = self
            .metadata
            .endpoint_opt("pushed_authorization_request_endpoint")
            .await?
        {
            let request_uri = self.push_authorization_request(&par_endpoint, &params).await?;
            params = vec![
                ("client_id".to_string(), self.config.client_id.clone()),
                ("request_uri".to_string(), request_uri),
            ];
        }

        let mut url = Url::parse(&auth_endpoint)
            .map_err(|e| Error::Configuration(format!("invalid authorization endpoint: {e}")))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        info!(endpoint = %auth_endpoint, "authorization redirect prepared");
        Ok(url.into())
    }

    async fn push_authorization_request(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> Result<String> {
        info!(endpoint, "pushing authorization request");

        let body_params = if let Some(secret) = self.config.secret_bytes() {
            // wrap the parameters in a signed request object
            let audience = self
                .metadata
                .endpoint_opt("issuer")
                .await?
                .unwrap_or_else(|| self.config.expected_issuer().to_string());
            let mut claims = Map::new();
            for (name, value) in params {
                claims.insert(name.clone(), Value::String(value.clone()));
            }
            claims.insert("iss".to_string(), Value::String(self.config.client_id.clone()));
            claims.insert("aud".to_string(), Value::String(audience));

            let request_object = jsonwebtoken::encode(
                &Header::new(Algorithm::HS256),
                &Value::Object(claims),
                &EncodingKey::from_secret(&secret),
            )
            .map_err(|e| Error::Configuration(format!("failed to sign request object: {e}")))?;

            vec![
                ("client_id".to_string(), self.config.client_id.clone()),
                ("request".to_string(), request_object),
            ]
        } else {
            params.to_vec()
        };

        let response = self.authenticated_form_post(endpoint, body_params).await?;
        let value = parse_json_response(&response)?;
        value
            .get("request_uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::protocol(
                    "invalid_par_response",
                    Some("response carried no request_uri".to_string()),
                )
            })
    }

    // ---- callback handling ----------------------------------------------

    async fn complete_code_flow(
        &mut self,
        code: &str,
        request: &RequestContext,
        session: &dyn SessionStore,
    ) -> Result<FlowResult> {
        self.take_verified_state(request, session).await?;

        let code_verifier = session.get(SESSION_CODE_VERIFIER).await?;
        session.delete(SESSION_CODE_VERIFIER).await?;

        let token_endpoint = self.metadata.endpoint("token_endpoint").await?;
        let mut params: Vec<(String, String)> = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier".to_string(), verifier));
        }

        let response = self.token_request(&token_endpoint, params).await?;

        let id_token = response
            .get("id_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::protocol(
                    "invalid_token_response",
                    Some("token response carried no id_token".to_string()),
                )
            })?;
        let access_token = response
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string);
        let refresh_token = response
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string);

        let verified_claims = self
            .verify_id_token(&id_token, access_token.as_deref(), session)
            .await?;

        self.id_token = Some(id_token.clone());
        self.access_token = access_token.clone();
        self.refresh_token = refresh_token.clone();
        self.verified_claims = Some(verified_claims.clone());

        Ok(FlowResult {
            id_token,
            access_token,
            refresh_token,
            verified_claims,
        })
    }

    async fn complete_implicit_flow(
        &mut self,
        id_token: &str,
        request: &RequestContext,
        session: &dyn SessionStore,
    ) -> Result<FlowResult> {
        self.take_verified_state(request, session).await?;

        let access_token = request.get("access_token").map(str::to_string);
        let verified_claims = self
            .verify_id_token(id_token, access_token.as_deref(), session)
            .await?;

        self.id_token = Some(id_token.to_string());
        self.access_token = access_token.clone();
        self.verified_claims = Some(verified_claims.clone());

        Ok(FlowResult {
            id_token: id_token.to_string(),
            access_token,
            refresh_token: None,
            verified_claims,
        })
    }

    /// Compare the returned `state` against the stored one, consuming the
    /// stored value regardless of the outcome. A mismatch is terminal and
    /// happens before any token request.
    async fn take_verified_state(
        &self,
        request: &RequestContext,
        session: &dyn SessionStore,
    ) -> Result<()> {
        let stored = session.get(SESSION_STATE).await?;
        session.delete(SESSION_STATE).await?;

        let matches = match (request.get("state"), stored.as_deref()) {
            (Some(returned), Some(stored)) => constant_time_str_eq(returned, stored),
            _ => false,
        };
        if !matches {
            warn!("callback state does not match the stored state");
            return Err(Error::StateMismatch);
        }
        Ok(())
    }

    async fn verify_id_token(
        &self,
        raw: &str,
        access_token: Option<&str>,
        session: &dyn SessionStore,
    ) -> Result<Claims> {
        let session_nonce = session.get(SESSION_NONCE).await?;
        let outcome = self
            .check_id_token(raw, access_token, session_nonce.as_deref())
            .await;
        // the nonce is single-use: erase it whether validation passed or
        // not, so the callback cannot be replayed
        session.delete(SESSION_NONCE).await?;
        outcome
    }

    async fn check_id_token(
        &self,
        raw: &str,
        access_token: Option<&str>,
        session_nonce: Option<&str>,
    ) -> Result<Claims> {
        let token = CompactToken::parse(raw)?;
        let header = token.jose_header()?;
        let key = self.verification_key(&header).await?;
        verify::verify(&token, &header.alg, &key)?;

        let claims = token.payload()?;
        self.claims_validator()
            .await?
            .validate_id_token(&claims, &header.alg, session_nonce, access_token)?;
        Ok(claims)
    }

    async fn verification_key(&self, header: &JoseHeader) -> Result<DecodingKey> {
        // reject unknown algorithms before touching the key set, so an
        // `alg: none` token can never trigger a key lookup
        if !verify::SUPPORTED_ALGORITHMS.contains(&header.alg.as_str()) {
            return Err(Error::UnsupportedAlgorithm(header.alg.clone()));
        }
        if header.alg.starts_with("HS") {
            // the shared secret never appears in the JWKS
            let secret = self.config.secret_bytes().ok_or_else(|| {
                Error::Configuration(format!(
                    "token is signed with {} but no client secret is configured",
                    header.alg
                ))
            })?;
            return Ok(DecodingKey::from_secret(&secret));
        }
        let jwks_uri = self.metadata.endpoint("jwks_uri").await?;
        self.keys.resolve(&jwks_uri, header).await
    }

    async fn claims_validator(&self) -> Result<ClaimsValidator> {
        let issuer_validator = match &self.issuer_validator {
            Some(validator) => Arc::clone(validator),
            None => {
                let discovered = self.metadata.endpoint_opt("issuer").await?;
                Arc::new(DefaultIssuerValidator::new(
                    self.config.expected_issuer(),
                    discovered.as_deref(),
                ))
            }
        };
        Ok(ClaimsValidator::new(
            self.config.client_id.clone(),
            self.config.leeway_secs,
            issuer_validator,
            Arc::clone(&self.clock),
        ))
    }

    // ---- non-interactive grants -----------------------------------------

    /// Request a token with the `client_credentials` grant
    ///
    /// Bypasses the state machine entirely and returns the decoded token
    /// response.
    ///
    /// # Errors
    ///
    /// Transport, protocol and configuration errors from the token
    /// request.
    pub async fn request_client_credentials_token(
        &mut self,
        scope: Option<&str>,
    ) -> Result<Value> {
        let token_endpoint = self.metadata.endpoint("token_endpoint").await?;
        let mut params: Vec<(String, String)> = vec![(
            "grant_type".to_string(),
            "client_credentials".to_string(),
        )];
        if let Some(scope) = scope_or_configured(scope, &self.config.scopes) {
            params.push(("scope".to_string(), scope));
        }
        self.token_request(&token_endpoint, params).await
    }

    /// Request a token with the resource-owner password grant
    ///
    /// # Errors
    ///
    /// Transport, protocol and configuration errors from the token
    /// request.
    pub async fn request_resource_owner_token(
        &mut self,
        username: &str,
        password: &str,
        scope: Option<&str>,
    ) -> Result<Value> {
        let token_endpoint = self.metadata.endpoint("token_endpoint").await?;
        let mut params: Vec<(String, String)> = vec![
            ("grant_type".to_string(), "password".to_string()),
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ];
        if let Some(scope) = scope_or_configured(scope, &self.config.scopes) {
            params.push(("scope".to_string(), scope));
        }
        self.token_request(&token_endpoint, params).await
    }

    /// Exchange a refresh token; stored access/refresh tokens are updated
    /// on success
    ///
    /// # Errors
    ///
    /// Transport, protocol and configuration errors from the token
    /// request.
    pub async fn refresh_token_grant(&mut self, refresh_token: &str) -> Result<Value> {
        let token_endpoint = self.metadata.endpoint("token_endpoint").await?;
        let params: Vec<(String, String)> = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        let response = self.token_request(&token_endpoint, params).await?;

        if let Some(access_token) = response.get("access_token").and_then(Value::as_str) {
            self.access_token = Some(access_token.to_string());
        }
        if let Some(new_refresh) = response.get("refresh_token").and_then(Value::as_str) {
            self.refresh_token = Some(new_refresh.to_string());
        }
        Ok(response)
    }

    // ---- auxiliary provider endpoints -----------------------------------

    /// Fetch claims from the userinfo endpoint with the stored access
    /// token
    ///
    /// When a verified ID token is held, the userinfo `sub` must match
    /// the authenticated subject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] without a stored access token,
    /// [`Error::Protocol`] on a subject mismatch, plus transport errors.
    pub async fn request_userinfo(&self) -> Result<Value> {
        let access_token = self.access_token.as_deref().ok_or_else(|| {
            Error::Configuration(
                "no access token held; complete an authorization flow first".to_string(),
            )
        })?;
        let endpoint = self.metadata.endpoint("userinfo_endpoint").await?;

        let request = FetchRequest::get(endpoint)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Accept", "application/json");
        let response = self.fetch.fetch(request).await?;
        let userinfo = parse_json_response(&response)?;

        if let Some(claims) = &self.verified_claims {
            let expected = claims.get("sub").and_then(Value::as_str);
            let actual = userinfo.get("sub").and_then(Value::as_str);
            if expected != actual {
                return Err(Error::protocol(
                    "userinfo_subject_mismatch",
                    Some(format!(
                        "userinfo sub {:?} does not match the authenticated subject {:?}",
                        actual, expected
                    )),
                ));
            }
        }
        Ok(userinfo)
    }

    /// Build the provider sign-out redirect URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] when the provider has no
    /// `end_session_endpoint`.
    pub async fn end_session_url(
        &self,
        id_token_hint: &str,
        post_logout_redirect_uri: Option<&str>,
        state: Option<&str>,
    ) -> Result<String> {
        let endpoint = self.metadata.endpoint("end_session_endpoint").await?;
        let mut url = Url::parse(&endpoint)
            .map_err(|e| Error::Configuration(format!("invalid end session endpoint: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("id_token_hint", id_token_hint);
            if let Some(redirect) = post_logout_redirect_uri {
                pairs.append_pair("post_logout_redirect_uri", redirect);
            }
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.into())
    }

    /// Register this client with the provider (single request/response)
    ///
    /// On success the engine adopts the returned credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] when the provider rejects the
    /// registration or omits a `client_id`.
    pub async fn register(
        &mut self,
        client_name: &str,
        extra: Map<String, Value>,
    ) -> Result<RegistrationResponse> {
        let endpoint = self.metadata.endpoint("registration_endpoint").await?;

        let mut document = Map::new();
        document.insert(
            "redirect_uris".to_string(),
            Value::Array(vec![Value::String(self.config.redirect_uri.clone())]),
        );
        document.insert(
            "client_name".to_string(),
            Value::String(client_name.to_string()),
        );
        for (name, value) in extra {
            document.insert(name, value);
        }

        info!(endpoint = %endpoint, client_name, "registering client");
        let request = FetchRequest::post(endpoint, Value::Object(document).to_string())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        let response = self.fetch.fetch(request).await?;
        let value = parse_json_response(&response)?;

        let registration: RegistrationResponse = serde_json::from_value(value).map_err(|e| {
            Error::protocol(
                "invalid_registration_response",
                Some(format!("missing or malformed fields: {e}")),
            )
        })?;

        self.config.client_id = registration.client_id.clone();
        if let Some(secret) = &registration.client_secret {
            self.config.client_secret = Some(secrecy::SecretString::new(secret.clone()));
        }
        Ok(registration)
    }

    /// Introspect a token (plain request/response wrapper)
    ///
    /// # Errors
    ///
    /// Transport, protocol and configuration errors from the request.
    pub async fn introspect_token(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<Value> {
        let endpoint = self.metadata.endpoint("introspection_endpoint").await?;
        let mut params = vec![("token".to_string(), token.to_string())];
        if let Some(hint) = token_type_hint {
            params.push(("token_type_hint".to_string(), hint.to_string()));
        }
        let response = self.authenticated_form_post(&endpoint, params).await?;
        parse_json_response(&response)
    }

    /// Revoke a token (plain request/response wrapper)
    ///
    /// # Errors
    ///
    /// Transport, protocol and configuration errors from the request.
    pub async fn revoke_token(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<Value> {
        let endpoint = self.metadata.endpoint("revocation_endpoint").await?;
        let mut params = vec![("token".to_string(), token.to_string())];
        if let Some(hint) = token_type_hint {
            params.push(("token_type_hint".to_string(), hint.to_string()));
        }
        let response = self.authenticated_form_post(&endpoint, params).await?;
        if response.body.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        parse_json_response(&response)
    }

    // ---- request plumbing ------------------------------------------------

    async fn token_request(
        &self,
        token_endpoint: &str,
        params: Vec<(String, String)>,
    ) -> Result<Value> {
        let response = self.authenticated_form_post(token_endpoint, params).await?;
        parse_json_response(&response)
    }

    /// Form-encoded POST carrying the selected client credentials
    async fn authenticated_form_post(
        &self,
        endpoint: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<FetchResponse> {
        let advertised = self
            .metadata
            .string_list(
                "token_endpoint_auth_methods_supported",
                DEFAULT_AUTH_METHODS,
            )
            .await?;
        let authenticator = ClientAuthenticator::new(
            self.config.client_id.clone(),
            self.config.client_secret.clone(),
            self.config.timeout_secs,
            Arc::clone(&self.clock),
        );
        let auth = authenticator.prepare(
            &advertised,
            self.config.token_endpoint_auth_method,
            endpoint,
        )?;

        let mut request = FetchRequest::post(endpoint, String::new())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json");
        match auth {
            TokenEndpointAuth::BasicHeader(value) => {
                request = request.header("Authorization", value);
            }
            TokenEndpointAuth::BodyParams(extra) => params.extend(extra),
        }
        request.body = Some(encode_form(&params));

        debug!(endpoint, "token endpoint request");
        self.fetch.fetch(request).await
    }
}

fn scope_or_configured(scope: Option<&str>, configured: &[String]) -> Option<String> {
    match scope {
        Some(scope) => Some(scope.to_string()),
        None if configured.is_empty() => None,
        None => Some(configured.join(" ")),
    }
}

fn encode_form(params: &[(String, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, value) in params {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}

/// Decode a provider JSON response, surfacing embedded `error` fields
fn parse_json_response(response: &FetchResponse) -> Result<Value> {
    let value: Value = match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(e) => {
            if !response.is_success() {
                return Err(Error::Transport(format!(
                    "provider returned status {} with a non-JSON body",
                    response.status
                )));
            }
            return Err(Error::protocol(
                "invalid_response",
                Some(format!("response body is not valid JSON: {e}")),
            ));
        }
    };

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let description = value
            .get("error_description")
            .and_then(Value::as_str)
            .map(str::to_string);
        return Err(Error::protocol(error, description));
    }
    if !response.is_success() {
        return Err(Error::Transport(format!(
            "provider returned status {}",
            response.status
        )));
    }
    match value {
        Value::Object(_) => Ok(value),
        other => Err(Error::protocol(
            "invalid_response",
            Some(format!("expected a JSON object, found {other}")),
        )),
    }
}
