//! Compact-token handling: parsing, key resolution, signature and claim
//! verification
//!
//! ```text
//! compact token ──▶ codec ──▶ header/payload/signature
//!                     │
//!        header alg   ▼
//!  jwks ──────▶ key resolution ──▶ verify (signature) ──▶ claims (rules)
//! ```
//!
//! Nothing in this module trusts a token on its own: the flow engine only
//! accepts a token after both [`verify::verify`] and the
//! [`claims::ClaimsValidator`] rule set succeed.
//!
//! # Modules
//!
//! - `codec` - compact-token splitting and base64url/JSON decoding
//! - `jwks` - key-set fetching, caching and deterministic key selection
//! - `verify` - algorithm-dispatched signature verification
//! - `claims` - ID-token and logout-token claim rule sets

pub mod claims;
pub mod codec;
pub mod jwks;
pub mod verify;

pub use claims::{
    BACKCHANNEL_LOGOUT_EVENT, Claims, ClaimsValidator, DefaultIssuerValidator, IssuerValidator,
    access_token_hash,
};
pub use codec::{CompactToken, JoseHeader, base64url_decode, base64url_encode};
pub use jwks::{Jwk, JwkSet, KeyFamily, KeyResolver, select_key};
pub use verify::{SUPPORTED_ALGORITHMS, verify};
