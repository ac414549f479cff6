//! Non-interactive grants and auxiliary provider endpoints
//!
//! Client-credentials, password and refresh grants bypass the state
//! machine; userinfo, end-session, registration, introspection and
//! revocation are thin wrappers over the discovered endpoints. Logout
//! tokens go through the same signature pipeline as ID tokens plus their
//! own claim rule set.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use oxidc::{
    AuthOutcome, ClientAuthMethod, ClientConfig, Error, MemorySessionStore, RelyingParty,
    RequestContext,
};

// base64("test-client:test-client-secret")
const EXPECTED_BASIC: &str = "Basic dGVzdC1jbGllbnQ6dGVzdC1jbGllbnQtc2VjcmV0";

fn client_config(provider: &TestProvider) -> ClientConfig {
    ClientConfig::new(provider.issuer(), CLIENT_ID, REDIRECT_URI)
        .with_client_secret(CLIENT_SECRET)
}

#[tokio::test]
async fn client_credentials_grant_uses_basic_auth() {
    let provider = TestProvider::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("Authorization", EXPECTED_BASIC))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "cc-token",
            "token_type": "Bearer",
            "expires_in": 3600,
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    let response = client
        .request_client_credentials_token(Some("api"))
        .await
        .unwrap();
    assert_eq!(response.get("access_token").unwrap(), "cc-token");
}

#[tokio::test]
async fn resource_owner_grant_carries_the_credentials() {
    let provider = TestProvider::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("password=wonderland"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ropc-token",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    let response = client
        .request_resource_owner_token("alice", "wonderland", None)
        .await
        .unwrap();
    assert_eq!(response.get("access_token").unwrap(), "ropc-token");
}

#[tokio::test]
async fn refresh_grant_updates_the_stored_tokens() {
    let provider = TestProvider::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=old-refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "fresh-access",
            "refresh_token": "fresh-refresh",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    client.refresh_token_grant("old-refresh").await.unwrap();
    assert_eq!(client.access_token(), Some("fresh-access"));
    assert_eq!(client.refresh_token(), Some("fresh-refresh"));
}

#[tokio::test]
async fn refresh_grant_surfaces_provider_errors() {
    let provider = TestProvider::start().await;
    provider
        .mount_token_error(400, "invalid_grant", "refresh token revoked")
        .await;

    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    let err = client.refresh_token_grant("revoked").await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
    assert_eq!(client.access_token(), None);
}

#[tokio::test]
async fn client_secret_jwt_sends_a_signed_assertion() {
    let provider = TestProvider::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer",
        ))
        .and(body_string_contains("client_assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "jwt-auth-token",
            "token_type": "Bearer",
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let config = client_config(&provider)
        .with_token_endpoint_auth_method(ClientAuthMethod::SecretJwt);
    let mut client = RelyingParty::new(config).unwrap();
    let response = client
        .request_client_credentials_token(None)
        .await
        .unwrap();
    assert_eq!(response.get("access_token").unwrap(), "jwt-auth-token");
}

#[tokio::test]
async fn unadvertised_auth_method_fails_before_any_request() {
    let provider = TestProvider::start_with(json!({
        "token_endpoint_auth_methods_supported": ["client_secret_basic"],
    }))
    .await;
    provider.forbid_token_requests().await;

    let config = client_config(&provider)
        .with_token_endpoint_auth_method(ClientAuthMethod::SecretJwt);
    let mut client = RelyingParty::new(config).unwrap();

    let err = client
        .request_client_credentials_token(None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

/// Drive a full HS256 code flow so the engine holds verified claims
async fn authenticate(provider: &TestProvider, client: &mut RelyingParty) {
    let session = MemorySessionStore::new();
    let AuthOutcome::Redirect(url) = client
        .authenticate(&RequestContext::new(), &session)
        .await
        .unwrap()
    else {
        panic!("expected redirect");
    };
    let parsed = url::Url::parse(&url).unwrap();
    let param = |name: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    };

    let id_token = hs256_token(&standard_claims(&provider.issuer(), &param("nonce")));
    provider
        .mount_token_response(json!({
            "access_token": "at-123",
            "id_token": id_token,
        }))
        .await;

    let callback = RequestContext::from_pairs([
        ("code", "authz-code".to_string()),
        ("state", param("state")),
    ]);
    client.authenticate(&callback, &session).await.unwrap();
}

#[tokio::test]
async fn userinfo_returns_claims_for_the_authenticated_subject() {
    let provider = TestProvider::start().await;
    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    authenticate(&provider, &mut client).await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("Authorization", "Bearer at-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "end-user-1234",
            "email": "alice@example.org",
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let userinfo = client.request_userinfo().await.unwrap();
    assert_eq!(userinfo.get("email").unwrap(), "alice@example.org");
}

#[tokio::test]
async fn userinfo_subject_mismatch_is_rejected() {
    let provider = TestProvider::start().await;
    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    authenticate(&provider, &mut client).await;

    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "someone-else",
        })))
        .mount(&provider.server)
        .await;

    let err = client.request_userinfo().await.unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }));
}

#[tokio::test]
async fn userinfo_without_an_access_token_is_a_configuration_error() {
    let provider = TestProvider::start().await;
    let client = RelyingParty::new(client_config(&provider)).unwrap();
    assert!(matches!(
        client.request_userinfo().await,
        Err(Error::Configuration(_))
    ));
}

#[tokio::test]
async fn end_session_url_carries_the_hint_and_redirect() {
    let provider = TestProvider::start().await;
    let client = RelyingParty::new(client_config(&provider)).unwrap();

    let url = client
        .end_session_url("the-id-token", Some("https://rp.example.org/"), Some("st"))
        .await
        .unwrap();

    let parsed = url::Url::parse(&url).unwrap();
    assert_eq!(parsed.path(), "/logout");
    let params: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert!(params.contains(&("id_token_hint".to_string(), "the-id-token".to_string())));
    assert!(params.contains(&(
        "post_logout_redirect_uri".to_string(),
        "https://rp.example.org/".to_string()
    )));
    assert!(params.contains(&("state".to_string(), "st".to_string())));
}

#[tokio::test]
async fn registration_adopts_the_returned_credentials() {
    let provider = TestProvider::start_with(json!({
        "registration_endpoint": "{issuer}/register",
    }))
    .await;

    Mock::given(method("POST"))
        .and(path("/register"))
        .and(body_string_contains("redirect_uris"))
        .and(body_string_contains("my-app"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "client_id": "issued-client-id",
            "client_secret": "issued-secret",
            "client_name": "my-app",
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let mut client = RelyingParty::new(client_config(&provider)).unwrap();
    let registration = client
        .register("my-app", serde_json::Map::new())
        .await
        .unwrap();
    assert_eq!(registration.client_id, "issued-client-id");
    assert_eq!(registration.client_secret.as_deref(), Some("issued-secret"));
}

#[tokio::test]
async fn introspection_is_a_plain_wrapper() {
    let provider = TestProvider::start_with(json!({
        "introspection_endpoint": "{issuer}/introspect",
    }))
    .await;

    Mock::given(method("POST"))
        .and(path("/introspect"))
        .and(body_string_contains("token=some-access-token"))
        .and(body_string_contains("token_type_hint=access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "active": true,
            "scope": "openid",
        })))
        .expect(1)
        .mount(&provider.server)
        .await;

    let client = RelyingParty::new(client_config(&provider)).unwrap();
    let result = client
        .introspect_token("some-access-token", Some("access_token"))
        .await
        .unwrap();
    assert_eq!(result.get("active").unwrap(), &json!(true));
}

#[tokio::test]
async fn revocation_tolerates_an_empty_response_body() {
    let provider = TestProvider::start_with(json!({
        "revocation_endpoint": "{issuer}/revoke",
    }))
    .await;

    Mock::given(method("POST"))
        .and(path("/revoke"))
        .and(body_string_contains("token=dead-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&provider.server)
        .await;

    let client = RelyingParty::new(client_config(&provider)).unwrap();
    let result = client.revoke_token("dead-token", None).await.unwrap();
    assert!(result.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn logout_token_is_verified_and_validated() {
    let provider = TestProvider::start().await;
    provider.mount_jwks(vec![rsa_jwk()]).await;
    let client = RelyingParty::new(client_config(&provider)).unwrap();

    let logout_token = rs256_token(&json!({
        "iss": provider.issuer(),
        "aud": CLIENT_ID,
        "iat": now_secs(),
        "sub": "end-user-1234",
        "events": { "http://schemas.openid.net/event/backchannel-logout": {} },
        "jti": "logout-1",
    }));

    let claims = client.validate_logout_token(&logout_token).await.unwrap();
    assert_eq!(claims.get("sub").unwrap(), "end-user-1234");
}

#[tokio::test]
async fn logout_token_with_a_nonce_is_rejected() {
    let provider = TestProvider::start().await;
    provider.mount_jwks(vec![rsa_jwk()]).await;
    let client = RelyingParty::new(client_config(&provider)).unwrap();

    let logout_token = rs256_token(&json!({
        "iss": provider.issuer(),
        "aud": CLIENT_ID,
        "iat": now_secs(),
        "sub": "end-user-1234",
        "events": { "http://schemas.openid.net/event/backchannel-logout": {} },
        "nonce": "must-not-be-here",
    }));

    let err = client
        .validate_logout_token(&logout_token)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ClaimValidation { claim: "nonce", .. }
    ));
}

#[tokio::test]
async fn logout_token_with_a_bad_signature_is_rejected() {
    let provider = TestProvider::start().await;
    provider.mount_jwks(vec![rsa_jwk()]).await;
    let client = RelyingParty::new(client_config(&provider)).unwrap();

    let logout_token = rs256_token(&json!({
        "iss": provider.issuer(),
        "aud": CLIENT_ID,
        "iat": now_secs(),
        "sub": "end-user-1234",
        "events": { "http://schemas.openid.net/event/backchannel-logout": {} },
    }));
    // graft the valid signature onto a modified payload
    let mut parts: Vec<String> = logout_token.split('.').map(str::to_string).collect();
    let mut payload = parts[1].clone().into_bytes();
    payload[0] = if payload[0] == b'A' { b'B' } else { b'A' };
    parts[1] = String::from_utf8(payload).unwrap();

    let err = client
        .validate_logout_token(&parts.join("."))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SignatureVerification(_)) || matches!(err, Error::MalformedToken(_)));
}
