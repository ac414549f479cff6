//! Algorithm-dispatched signature verification
//!
//! The algorithm used is always exactly the one declared in the token
//! header; there is no negotiation and no downgrade path. Anything
//! outside the supported RSA/ECDSA/HMAC families is rejected outright,
//! including `none`.
//!
//! Verification runs over the exact encoded `header.payload` prefix of
//! the compact token. ECDSA signatures are the raw fixed-width `r || s`
//! concatenation (an odd-length signature cannot be split and is
//! malformed); HMAC signatures are recomputed from the shared secret and
//! compared in constant time by the underlying crypto backend.

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::debug;

use crate::error::{Error, Result};
use crate::jwt::codec::CompactToken;

/// Signing algorithms this verifier accepts
pub const SUPPORTED_ALGORITHMS: &[&str] = &[
    "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256", "ES384", "ES512", "HS256",
    "HS384", "HS512",
];

/// Verify a compact token's signature with the given key
///
/// `alg` must be the value declared in the token header; the key must be
/// the provider key resolved for that algorithm (or the client secret for
/// the HMAC family).
///
/// # Errors
///
/// - [`Error::UnsupportedAlgorithm`] for any algorithm outside
///   [`SUPPORTED_ALGORITHMS`]
/// - [`Error::MalformedSignature`] for an empty or (for ECDSA)
///   odd-length signature
/// - [`Error::SignatureVerification`] when the cryptographic check fails
pub fn verify(token: &CompactToken, alg: &str, key: &DecodingKey) -> Result<()> {
    if !SUPPORTED_ALGORITHMS.contains(&alg) {
        return Err(Error::UnsupportedAlgorithm(alg.to_string()));
    }
    let algorithm: Algorithm = alg
        .parse()
        .map_err(|_| Error::UnsupportedAlgorithm(alg.to_string()))?;

    let signature = token.signature()?;
    if alg.starts_with("ES") && signature.len() % 2 != 0 {
        return Err(Error::MalformedSignature(format!(
            "ECDSA signature of {} bytes cannot be split into r and s",
            signature.len()
        )));
    }

    // Claim checks are a separate rule set applied afterwards; this
    // decode is pinned to the declared algorithm and verifies only the
    // signature.
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.leeway = 0;

    match decode::<serde_json::Value>(token.raw(), key, &validation) {
        Ok(_) => {
            debug!(alg, "signature verified");
            Ok(())
        }
        Err(err) => Err(map_verify_error(alg, &err)),
    }
}

fn map_verify_error(alg: &str, err: &jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::InvalidSignature => {
            Error::SignatureVerification("signature does not match signing input".to_string())
        }
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            Error::UnsupportedAlgorithm(alg.to_string())
        }
        ErrorKind::Base64(e) => Error::MalformedSignature(format!("undecodable signature: {e}")),
        ErrorKind::Json(e) => Error::MalformedToken(format!("undecodable payload: {e}")),
        _ => Error::SignatureVerification(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::codec::base64url_encode;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    const SECRET: &[u8] = b"a-very-well-kept-client-secret";

    fn hs256_token() -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &json!({"iss": "https://op.example.org", "sub": "alice"}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn hmac_signature_verifies_with_the_shared_secret() {
        let token = CompactToken::parse(&hs256_token()).unwrap();
        verify(&token, "HS256", &DecodingKey::from_secret(SECRET)).unwrap();
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = CompactToken::parse(&hs256_token()).unwrap();
        assert!(matches!(
            verify(&token, "HS256", &DecodingKey::from_secret(b"other")),
            Err(Error::SignatureVerification(_))
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let raw = hs256_token();
        let mut parts: Vec<String> = raw.split('.').map(str::to_string).collect();
        // flip one character of the payload segment
        let mut payload: Vec<u8> = parts[1].clone().into_bytes();
        payload[0] = if payload[0] == b'A' { b'B' } else { b'A' };
        parts[1] = String::from_utf8(payload).unwrap();
        let tampered = CompactToken::parse(&parts.join(".")).unwrap();

        assert!(verify(&tampered, "HS256", &DecodingKey::from_secret(SECRET)).is_err());
    }

    #[test]
    fn unsupported_algorithms_are_fatal() {
        let token = CompactToken::parse(&hs256_token()).unwrap();
        for alg in ["none", "EdDSA", "HS1024", "RS128", ""] {
            assert!(matches!(
                verify(&token, alg, &DecodingKey::from_secret(SECRET)),
                Err(Error::UnsupportedAlgorithm(_))
            ));
        }
    }

    #[test]
    fn declared_algorithm_is_never_substituted() {
        // Token signed with HS256, verifier told the header says RS256:
        // the pinned algorithm must not fall back to the working one.
        let token = CompactToken::parse(&hs256_token()).unwrap();
        assert!(verify(&token, "RS256", &DecodingKey::from_secret(SECRET)).is_err());
    }

    #[test]
    fn odd_length_ecdsa_signature_is_malformed() {
        let header = base64url_encode(br#"{"alg":"ES256"}"#);
        let payload = base64url_encode(br#"{"sub":"alice"}"#);
        let signature = base64url_encode(&[0u8; 63]);
        let token = CompactToken::parse(&format!("{header}.{payload}.{signature}")).unwrap();

        assert!(matches!(
            verify(&token, "ES256", &DecodingKey::from_secret(b"unused")),
            Err(Error::MalformedSignature(_))
        ));
    }

    #[test]
    fn empty_signature_is_malformed() {
        let header = base64url_encode(br#"{"alg":"HS256"}"#);
        let payload = base64url_encode(br#"{"sub":"alice"}"#);
        let token = CompactToken::parse(&format!("{header}.{payload}.")).unwrap();

        assert!(matches!(
            verify(&token, "HS256", &DecodingKey::from_secret(SECRET)),
            Err(Error::MalformedSignature(_))
        ));
    }
}
