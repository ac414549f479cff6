//! Claim validation rule sets for ID tokens and logout tokens
//!
//! The ID-token rules run in a fixed order against the wall clock and the
//! per-session nonce; every failure is fatal and carries the offending
//! claim plus expected/actual values. The logout-token rule set reuses
//! the issuer, audience and issued-at checks, then applies its own
//! requirements (`sub` or `sid`, the back-channel logout event, and an
//! explicitly absent `nonce`).

use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::capabilities::SharedClock;
use crate::error::{Error, Result};
use crate::jwt::codec::base64url_encode;

/// Decoded token payload; validators only read it
pub type Claims = Map<String, Value>;

/// Member key required inside a logout token's `events` object
pub const BACKCHANNEL_LOGOUT_EVENT: &str = "http://schemas.openid.net/event/backchannel-logout";

/// Pluggable issuer-acceptance predicate
pub trait IssuerValidator: Send + Sync {
    /// True when `issuer` is acceptable for this client
    fn is_valid(&self, issuer: &str) -> bool;
}

/// Default issuer predicate
///
/// Accepts the configured issuer, the provider's discovered issuer, and
/// the discovered issuer with its trailing slash toggled (providers are
/// inconsistent about the trailing slash between their discovery document
/// and their tokens).
#[derive(Debug, Clone)]
pub struct DefaultIssuerValidator {
    accepted: Vec<String>,
}

impl DefaultIssuerValidator {
    /// Build the predicate from the configured and discovered issuers
    pub fn new(configured: &str, discovered: Option<&str>) -> Self {
        let mut accepted = vec![configured.to_string()];
        if let Some(discovered) = discovered {
            accepted.push(discovered.to_string());
            let toggled = match discovered.strip_suffix('/') {
                Some(trimmed) => trimmed.to_string(),
                None => format!("{discovered}/"),
            };
            accepted.push(toggled);
        }
        Self { accepted }
    }
}

impl IssuerValidator for DefaultIssuerValidator {
    fn is_valid(&self, issuer: &str) -> bool {
        self.accepted.iter().any(|accepted| accepted == issuer)
    }
}

/// Applies the claim validation rule sets
pub struct ClaimsValidator {
    client_id: String,
    leeway_secs: u64,
    issuer_validator: Arc<dyn IssuerValidator>,
    clock: SharedClock,
}

impl ClaimsValidator {
    /// Create a validator for one client
    pub fn new(
        client_id: impl Into<String>,
        leeway_secs: u64,
        issuer_validator: Arc<dyn IssuerValidator>,
        clock: SharedClock,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            leeway_secs,
            issuer_validator,
            clock,
        }
    }

    /// Validate an ID token's claims
    ///
    /// `header_alg` is the algorithm from the (already verified) token
    /// header, used to pick the `at_hash` digest; `session_nonce` is the
    /// nonce stored when the authorization request was issued;
    /// `access_token` is the token returned alongside the ID token, when
    /// one was.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClaimValidation`] naming the first failing claim.
    pub fn validate_id_token(
        &self,
        claims: &Claims,
        header_alg: &str,
        session_nonce: Option<&str>,
        access_token: Option<&str>,
    ) -> Result<()> {
        self.check_issuer(claims)?;
        self.check_audience(claims)?;
        self.check_expiry(claims)?;
        self.check_issued_at(claims)?;
        self.check_nonce(claims, session_nonce)?;
        self.check_at_hash(claims, header_alg, access_token)?;
        debug!(client_id = %self.client_id, "ID token claims validated");
        Ok(())
    }

    /// Validate a received logout token's claims
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClaimValidation`] naming the first failing claim.
    pub fn validate_logout_token(&self, claims: &Claims) -> Result<()> {
        self.check_issuer(claims)?;
        self.check_audience(claims)?;
        self.check_issued_at(claims)?;

        let has_sub = claims.get("sub").and_then(Value::as_str).is_some();
        let has_sid = claims.get("sid").and_then(Value::as_str).is_some();
        if !has_sub && !has_sid {
            return Err(Error::claim("sub", "sub or sid present", "both absent"));
        }

        match claims.get("events") {
            Some(Value::Object(events)) if events.contains_key(BACKCHANNEL_LOGOUT_EVENT) => {}
            Some(Value::Object(_)) => {
                return Err(Error::claim(
                    "events",
                    format!("member `{BACKCHANNEL_LOGOUT_EVENT}`"),
                    "member absent",
                ));
            }
            Some(other) => {
                return Err(Error::claim("events", "a JSON object", other.to_string()));
            }
            None => return Err(Error::claim("events", "present", "<absent>")),
        }

        if claims.contains_key("nonce") {
            return Err(Error::claim("nonce", "absent", "present"));
        }

        debug!(client_id = %self.client_id, "logout token claims validated");
        Ok(())
    }

    fn check_issuer(&self, claims: &Claims) -> Result<()> {
        let iss = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::claim("iss", "present", "<absent>"))?;
        if !self.issuer_validator.is_valid(iss) {
            return Err(Error::claim("iss", "an accepted issuer", iss));
        }
        Ok(())
    }

    fn check_audience(&self, claims: &Claims) -> Result<()> {
        let aud = claims
            .get("aud")
            .ok_or_else(|| Error::claim("aud", self.client_id.clone(), "<absent>"))?;

        match aud {
            Value::String(aud) => {
                if aud != &self.client_id {
                    return Err(Error::claim("aud", self.client_id.clone(), aud.clone()));
                }
            }
            Value::Array(entries) => {
                let contains = entries
                    .iter()
                    .any(|v| v.as_str() == Some(self.client_id.as_str()));
                if !contains {
                    return Err(Error::claim("aud", self.client_id.clone(), aud.to_string()));
                }
                // multiple audiences must name the party the token was
                // issued to
                if entries.len() > 1 && !claims.contains_key("azp") {
                    return Err(Error::claim(
                        "azp",
                        "present for multi-valued aud",
                        "<absent>",
                    ));
                }
            }
            other => {
                return Err(Error::claim("aud", self.client_id.clone(), other.to_string()));
            }
        }

        if let Some(azp) = claims.get("azp") {
            let azp = azp
                .as_str()
                .ok_or_else(|| Error::claim("azp", self.client_id.clone(), azp.to_string()))?;
            if azp != self.client_id {
                return Err(Error::claim("azp", self.client_id.clone(), azp));
            }
        }
        Ok(())
    }

    fn check_expiry(&self, claims: &Claims) -> Result<()> {
        let exp = numeric_claim(claims, "exp")?;
        let now = self.clock.now_secs() as f64;
        if exp < now {
            return Err(Error::claim(
                "exp",
                format!(">= {now}"),
                format!("{exp}"),
            ));
        }
        Ok(())
    }

    fn check_issued_at(&self, claims: &Claims) -> Result<()> {
        let iat = numeric_claim(claims, "iat")?;
        let now = self.clock.now_secs() as f64;
        let leeway = self.leeway_secs as f64;
        if iat < now - leeway || iat > now + leeway {
            return Err(Error::claim(
                "iat",
                format!("within {leeway}s of {now}"),
                format!("{iat}"),
            ));
        }
        Ok(())
    }

    fn check_nonce(&self, claims: &Claims, session_nonce: Option<&str>) -> Result<()> {
        let Some(session_nonce) = session_nonce else {
            // no stored nonce means this callback cannot be tied to an
            // authorization request issued by us
            return Err(Error::claim("nonce", "a stored session nonce", "<no nonce stored>"));
        };
        let nonce = claims
            .get("nonce")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::claim("nonce", "present", "<absent>"))?;
        if !constant_time_str_eq(nonce, session_nonce) {
            return Err(Error::claim("nonce", "the stored session nonce", nonce));
        }
        Ok(())
    }

    fn check_at_hash(
        &self,
        claims: &Claims,
        header_alg: &str,
        access_token: Option<&str>,
    ) -> Result<()> {
        let (Some(at_hash), Some(access_token)) = (claims.get("at_hash"), access_token) else {
            return Ok(());
        };
        let at_hash = at_hash
            .as_str()
            .ok_or_else(|| Error::claim("at_hash", "a string", at_hash.to_string()))?;

        let expected = access_token_hash(header_alg, access_token)?;
        if !constant_time_str_eq(at_hash, &expected) {
            return Err(Error::claim("at_hash", expected, at_hash));
        }
        Ok(())
    }
}

/// Compute the expected `at_hash` for an access token
///
/// The digest is chosen by the bit length parsed from the ID-token header
/// algorithm; the value is the base64url encoding of the leftmost half of
/// the digest output.
///
/// # Errors
///
/// Returns [`Error::UnsupportedAlgorithm`] when the algorithm does not
/// carry a known bit length.
pub fn access_token_hash(header_alg: &str, access_token: &str) -> Result<String> {
    let digest: Vec<u8> = match header_alg.get(2..) {
        Some("256") => Sha256::digest(access_token.as_bytes()).to_vec(),
        Some("384") => Sha384::digest(access_token.as_bytes()).to_vec(),
        Some("512") => Sha512::digest(access_token.as_bytes()).to_vec(),
        _ => return Err(Error::UnsupportedAlgorithm(header_alg.to_string())),
    };
    Ok(base64url_encode(&digest[..digest.len() / 2]))
}

fn numeric_claim(claims: &Claims, name: &'static str) -> Result<f64> {
    let value = claims
        .get(name)
        .ok_or_else(|| Error::claim(name, "present", "<absent>"))?;
    value
        .as_f64()
        .ok_or_else(|| Error::claim(name, "a numeric timestamp", value.to_string()))
}

pub(crate) fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
