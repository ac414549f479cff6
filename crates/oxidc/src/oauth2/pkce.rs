//! Proof Key for Code Exchange (RFC 7636)
//!
//! The verifier is 32 random bytes, base64url-encoded. The challenge sent
//! with the authorization request is either the verifier itself (`plain`)
//! or the base64url-encoded SHA-256 of it (`S256`). The chosen method
//! must be advertised by the provider; that check happens in the flow
//! engine before any redirect is issued.

use sha2::{Digest, Sha256};

use crate::capabilities::RandomSource;
use crate::jwt::codec::base64url_encode;

/// Number of random bytes behind a code verifier
pub const VERIFIER_BYTES: usize = 32;

/// PKCE challenge method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChallengeMethod {
    /// The challenge is the verifier itself
    Plain,
    /// The challenge is `base64url(sha256(verifier))`
    S256,
}

impl CodeChallengeMethod {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a fresh code verifier
pub fn generate_verifier(random: &dyn RandomSource) -> String {
    random.random_urlsafe(VERIFIER_BYTES)
}

/// Compute the code challenge for a verifier
pub fn code_challenge(method: CodeChallengeMethod, verifier: &str) -> String {
    match method {
        CodeChallengeMethod::Plain => verifier.to_string(),
        CodeChallengeMethod::S256 => base64url_encode(&Sha256::digest(verifier.as_bytes())),
    }
}
