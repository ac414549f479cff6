//! Error taxonomy for the relying-party core
//!
//! Every failure mode is fatal to the current authentication attempt; the
//! only local recovery anywhere in the crate is the single JWKS re-fetch
//! (and the supplementary-key fallback) performed by the key resolver.
//!
//! Security failures ([`Error::SignatureVerification`],
//! [`Error::ClaimValidation`]) additionally cause the flow engine to erase
//! the stored nonce and state before the error propagates, so a rejected
//! callback can never be replayed.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Relying-party errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A required provider or client configuration value is unavailable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An outbound fetch failed, or returned a non-2xx status where a 2xx
    /// response was required
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider returned an `error` field, or a response of an
    /// unexpected shape
    #[error("provider error: {error} ({})", .description.as_deref().unwrap_or("no description"))]
    Protocol {
        /// Provider-supplied error code (e.g. `access_denied`)
        error: String,
        /// Provider-supplied human-readable description, when present
        description: Option<String>,
    },

    /// A compact token did not have the required shape
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Key material was missing required fields for its declared `kty`
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// A signature segment could not be interpreted for the declared
    /// algorithm (e.g. an odd-length ECDSA signature)
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// The token header declared an algorithm outside the supported set.
    /// Never downgraded: the declared algorithm is the only one tried.
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// No key in the provider's key set (or the supplementary list)
    /// matched the token header
    #[error("no verification key found (alg {alg}, kid {})", .kid.as_deref().unwrap_or("<none>"))]
    KeyNotFound {
        /// Algorithm declared in the token header
        alg: String,
        /// Key id from the token header, when one was present
        kid: Option<String>,
    },

    /// Cryptographic signature verification failed
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// A token claim failed the validation rule set
    #[error("claim validation failed: {claim} (expected {expected}, got {actual})")]
    ClaimValidation {
        /// Name of the offending claim
        claim: &'static str,
        /// What the rule required
        expected: String,
        /// What the token carried
        actual: String,
    },

    /// The `state` returned by the provider did not match the stored one
    #[error("state parameter mismatch - possible CSRF attack")]
    StateMismatch,
}

impl Error {
    /// Build a [`Error::Protocol`] from a provider error response
    pub fn protocol(error: impl Into<String>, description: Option<String>) -> Self {
        Self::Protocol {
            error: error.into(),
            description,
        }
    }

    /// Build a [`Error::ClaimValidation`] with expected/actual diagnostics
    pub(crate) fn claim(
        claim: &'static str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ClaimValidation {
            claim,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// True for the two security failures that must erase session state
    /// before they propagate
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerification(_) | Self::ClaimValidation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_carries_description() {
        let err = Error::protocol("access_denied", Some("user said no".to_string()));
        let text = err.to_string();
        assert!(text.contains("access_denied"));
        assert!(text.contains("user said no"));
    }

    #[test]
    fn protocol_error_without_description() {
        let err = Error::protocol("invalid_request", None);
        assert_eq!(
            err.to_string(),
            "provider error: invalid_request (no description)"
        );
    }

    #[test]
    fn key_not_found_names_alg_and_kid() {
        let err = Error::KeyNotFound {
            alg: "RS256".to_string(),
            kid: Some("key-1".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("RS256"));
        assert!(text.contains("key-1"));
    }

    #[test]
    fn security_failures_are_flagged() {
        assert!(Error::SignatureVerification("mismatch".into()).is_security_failure());
        assert!(Error::claim("nonce", "a", "b").is_security_failure());
        assert!(!Error::StateMismatch.is_security_failure());
    }
}
