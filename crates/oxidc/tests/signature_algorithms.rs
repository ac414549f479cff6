//! Sign/verify coverage for every supported algorithm
//!
//! For each algorithm a token produced by the matching private key must
//! verify, and the same token with a tampered payload must not. The
//! verification keys are built from JWK components, exercising the same
//! key loader the resolver uses.

mod common;

use common::*;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;

use oxidc::jwt::{CompactToken, Jwk, verify};

fn claims() -> serde_json::Value {
    json!({
        "iss": "https://op.example.org",
        "sub": "alice",
        "exp": now_secs() + 600,
    })
}

fn rsa_decoding_key() -> DecodingKey {
    Jwk {
        kty: "RSA".to_string(),
        alg: None,
        kid: None,
        key_use: None,
        n: Some(RSA_N.to_string()),
        e: Some(RSA_E.to_string()),
        crv: None,
        x: None,
        y: None,
    }
    .decoding_key()
    .unwrap()
}

fn ec_decoding_key(crv: &str, x: &str, y: &str) -> DecodingKey {
    Jwk {
        kty: "EC".to_string(),
        alg: None,
        kid: None,
        key_use: None,
        n: None,
        e: None,
        crv: Some(crv.to_string()),
        x: Some(x.to_string()),
        y: Some(y.to_string()),
    }
    .decoding_key()
    .unwrap()
}

/// Flip one character of the payload segment
fn tamper(token: &str) -> String {
    let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
    let mut payload = parts[1].clone().into_bytes();
    payload[0] = if payload[0] == b'A' { b'B' } else { b'A' };
    parts[1] = String::from_utf8(payload).unwrap();
    parts.join(".")
}

fn check_algorithm(alg_name: &str, algorithm: Algorithm, enc: &EncodingKey, dec: &DecodingKey) {
    let raw = jsonwebtoken::encode(&Header::new(algorithm), &claims(), enc).unwrap();

    let token = CompactToken::parse(&raw).unwrap();
    assert_eq!(token.jose_header().unwrap().alg, alg_name);
    verify(&token, alg_name, dec).unwrap_or_else(|e| panic!("{alg_name} should verify: {e}"));

    let tampered = CompactToken::parse(&tamper(&raw)).unwrap();
    assert!(
        verify(&tampered, alg_name, dec).is_err(),
        "{alg_name} accepted a tampered payload"
    );
}

#[test]
fn rsa_pkcs1_family_verifies() {
    let enc = EncodingKey::from_rsa_pem(RSA_PRIVATE_PEM.as_bytes()).unwrap();
    let dec = rsa_decoding_key();
    check_algorithm("RS256", Algorithm::RS256, &enc, &dec);
    check_algorithm("RS384", Algorithm::RS384, &enc, &dec);
    check_algorithm("RS512", Algorithm::RS512, &enc, &dec);
}

#[test]
fn rsa_pss_family_verifies() {
    let enc = EncodingKey::from_rsa_pem(RSA_PRIVATE_PEM.as_bytes()).unwrap();
    let dec = rsa_decoding_key();
    check_algorithm("PS256", Algorithm::PS256, &enc, &dec);
    check_algorithm("PS384", Algorithm::PS384, &enc, &dec);
    check_algorithm("PS512", Algorithm::PS512, &enc, &dec);
}

#[test]
fn ecdsa_p256_verifies() {
    let enc = EncodingKey::from_ec_pem(EC256_PRIVATE_PEM.as_bytes()).unwrap();
    let dec = ec_decoding_key("P-256", EC256_X, EC256_Y);
    check_algorithm("ES256", Algorithm::ES256, &enc, &dec);
}

#[test]
fn ecdsa_p384_verifies() {
    let enc = EncodingKey::from_ec_pem(EC384_PRIVATE_PEM.as_bytes()).unwrap();
    let dec = ec_decoding_key("P-384", EC384_X, EC384_Y);
    check_algorithm("ES384", Algorithm::ES384, &enc, &dec);
}

#[test]
fn ecdsa_p521_verifies() {
    let enc = EncodingKey::from_ec_pem(EC521_PRIVATE_PEM.as_bytes()).unwrap();
    let dec = ec_decoding_key("P-521", EC521_X, EC521_Y);
    check_algorithm("ES512", Algorithm::ES512, &enc, &dec);
}

#[test]
fn hmac_family_verifies() {
    let enc = EncodingKey::from_secret(CLIENT_SECRET.as_bytes());
    let dec = DecodingKey::from_secret(CLIENT_SECRET.as_bytes());
    check_algorithm("HS256", Algorithm::HS256, &enc, &dec);
    check_algorithm("HS384", Algorithm::HS384, &enc, &dec);
    check_algorithm("HS512", Algorithm::HS512, &enc, &dec);
}

#[test]
fn cross_family_keys_never_verify() {
    // an RSA-signed token must not verify under the EC key, and vice versa
    let rsa_enc = EncodingKey::from_rsa_pem(RSA_PRIVATE_PEM.as_bytes()).unwrap();
    let raw = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims(), &rsa_enc).unwrap();
    let token = CompactToken::parse(&raw).unwrap();
    assert!(verify(&token, "RS256", &ec_decoding_key("P-256", EC256_X, EC256_Y)).is_err());
}
