//! # oxidc - OpenID Connect relying-party core
//!
//! The trust-boundary half of an OpenID Connect / OAuth2 client: it
//! authenticates an end user against a remote identity provider,
//! validates the cryptographic integrity and semantic correctness of the
//! tokens the provider returns, and exposes verified identity claims to
//! the calling application.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                  RelyingParty (flow engine)            │
//! │  redirect / callback / token exchange / grants         │
//! └──────┬──────────────┬───────────────┬──────────────────┘
//!        │              │               │
//!        ▼              ▼               ▼
//!  MetadataCache   KeyResolver     ClaimsValidator
//!  (discovery)     (JWKS)          (rule sets)
//!        │              │               ▲
//!        └──────┬───────┘               │
//!               ▼                       │
//!         Fetch capability        CompactToken + verify
//! ```
//!
//! No token is trusted before both signature verification and claim
//! validation succeed. Caches are advisory only: a stale or absent entry
//! costs an extra fetch, never the acceptance of an invalid token.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use oxidc::{AuthOutcome, ClientConfig, MemorySessionStore, RelyingParty, RequestContext};
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::new(
//!     "https://op.example.org",
//!     "my-client-id",
//!     "https://rp.example.org/callback",
//! )
//! .with_client_secret("my-client-secret");
//!
//! let mut client = RelyingParty::new(config)?;
//! let session = MemorySessionStore::new();
//!
//! // First call: no callback parameters yet, so a redirect is issued.
//! match client.authenticate(&RequestContext::new(), &session).await? {
//!     AuthOutcome::Redirect(url) => println!("send the user to {url}"),
//!     AuthOutcome::Authenticated(result) => {
//!         println!("verified subject: {:?}", result.verified_claims.get("sub"));
//!     }
//! }
//!
//! // Later, the provider redirects back:
//! let callback = RequestContext::from_query("code=AUTHZ_CODE&state=STORED_STATE");
//! let outcome = client.authenticate(&callback, &session).await?;
//! # let _ = outcome;
//! # Ok::<(), oxidc::Error>(())
//! # });
//! ```
//!
//! ## Capabilities
//!
//! External collaborators are injected, never ambient: HTTP transport
//! ([`Fetch`], default [`HttpFetcher`]), per-user session storage
//! ([`SessionStore`]), wall clock ([`Clock`]), CSPRNG ([`RandomSource`])
//! and an optional process-wide [`Cache`] for discovery documents and
//! key sets.
//!
//! ## Out of scope
//!
//! Encrypted tokens (JWE), back-channel delivery of logout notifications
//! (only validation of a received logout token is provided), private-key
//! client authentication, and retry policy - callers own retries.

// Submodules
pub mod capabilities;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod http;
pub mod jwt;
pub mod oauth2;

// Re-export the error type
#[doc(inline)]
pub use error::{Error, Result};

// Re-export configuration
#[doc(inline)]
pub use config::ClientConfig;

// Re-export request/session plumbing
#[doc(inline)]
pub use context::{MemorySessionStore, RequestContext, SessionStore};

// Re-export capabilities
#[doc(inline)]
pub use capabilities::{Cache, Clock, Fetch, MemoryCache, NoopCache, OsRandom, RandomSource};

#[doc(inline)]
pub use http::{HttpConfig, HttpFetcher};

// Re-export discovery
#[doc(inline)]
pub use discovery::{MetadataCache, ProviderMetadata};

// Re-export token handling
#[doc(inline)]
pub use jwt::{
    Claims, ClaimsValidator, CompactToken, DefaultIssuerValidator, IssuerValidator, Jwk, JwkSet,
    KeyResolver,
};

// Re-export the flow engine
#[doc(inline)]
pub use oauth2::{
    AuthOutcome, ClientAuthMethod, CodeChallengeMethod, FlowResult, FlowState,
    RegistrationResponse, RelyingParty,
};
