#![allow(dead_code)]

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use nila_bearer::prelude::*;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const REALM: &str = "reports-realm";
pub const PUBLIC_ISSUER: &str = "http://localhost:8080/realms/reports-realm";
pub const REQUIRED_ROLE: &str = "prothetic_user";
pub const DISCOVERY_PATH: &str = "/realms/reports-realm/.well-known/openid-configuration";
pub const CERTS_PATH: &str = "/realms/reports-realm/protocol/openid-connect/certs";

/// A 2048-bit PKCS#8 RSA key standing in for the realm's signing key.
const PRIVATE_KEY_PEM: &str = include_str!("../fixtures/provider_signing_key.pem");

pub fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

pub fn encoding_key() -> EncodingKey {
    EncodingKey::from_rsa_pem(PRIVATE_KEY_PEM.as_bytes()).unwrap()
}

/// The fixture key as a Keycloak-style signing JWK.
pub fn public_jwk(kid: &str) -> Value {
    let private_key = RsaPrivateKey::from_pkcs8_pem(PRIVATE_KEY_PEM).unwrap();
    let public_key = private_key.to_public_key();
    json!({
        "kid": kid,
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "n": base64_url::encode(&public_key.n().to_bytes_be()),
        "e": base64_url::encode(&public_key.e().to_bytes_be()),
    })
}

pub fn jwks(kids: &[&str]) -> Value {
    json!({ "keys": kids.iter().map(|kid| public_jwk(kid)).collect::<Vec<_>>() })
}

pub fn sign(kid: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &encoding_key()).unwrap()
}

/// The issuer under which the mock provider is reachable.
pub fn internal_issuer(server: &MockServer) -> String {
    format!("{}/realms/{}", server.uri(), REALM)
}

/// Claims that pass every check when issued by `server`.
pub fn valid_claims(server: &MockServer) -> Value {
    let now = now();
    json!({
        "iss": internal_issuer(server),
        "sub": "3f0c1a7e-5d0b-4c52-9a8e-3a1f1c1b2d4e",
        "aud": ["reports-api"],
        "exp": now + 300,
        "iat": now,
        "azp": "reports-frontend",
        "preferred_username": "alice",
        "realm_access": { "roles": ["offline_access", REQUIRED_ROLE] },
    })
}

/// Starts a mock identity provider publishing `kids` for the realm.
pub async fn provider(kids: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("GET"))
        .and(path(CERTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks(kids)))
        .mount(&server)
        .await;
    server
}

pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(DISCOVERY_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": internal_issuer(server),
            "jwks_uri": format!("{}{}", server.uri(), CERTS_PATH),
        })))
        .mount(server)
        .await;
}

pub fn config_builder(server: &MockServer) -> TrustConfigBuilder {
    TrustConfigBuilder::new()
        .provider_url(&server.uri())
        .unwrap()
        .realm(REALM)
        .issuers([PUBLIC_ISSUER.to_string(), internal_issuer(server)])
        .audiences(["reports-api", "reports-frontend"])
        .required_role(REQUIRED_ROLE)
        .http_timeout(Duration::from_millis(500))
}

pub fn config(server: &MockServer) -> Arc<TrustConfig> {
    Arc::new(config_builder(server).build().unwrap())
}

pub fn verifier(server: &MockServer) -> TokenVerifier {
    TokenVerifier::from_config(config(server)).unwrap()
}

/// Number of requests the provider received for `request_path`.
pub async fn hits(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|req| req.url.path() == request_path)
        .count()
}
