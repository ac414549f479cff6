//! Authorization flows and token-endpoint plumbing
//!
//! # Modules
//!
//! - `flow` - the [`RelyingParty`] state machine driving authorization
//!   code, implicit and non-interactive grants to a verified result
//! - `client_auth` - token-endpoint client authentication selection
//! - `pkce` - code verifier/challenge computation (RFC 7636)

pub mod client_auth;
pub mod flow;
pub mod pkce;

pub use client_auth::{ClientAuthMethod, ClientAuthenticator, TokenEndpointAuth};
pub use flow::{AuthOutcome, FlowResult, FlowState, RegistrationResponse, RelyingParty};
pub use pkce::{CodeChallengeMethod, code_challenge, generate_verifier};
