// src/model.rs

use serde::Deserialize;

/// The parts of the realm's `.well-known/openid-configuration` document we use.
#[derive(Debug, Deserialize)]
pub struct OidcDiscoveryDocument {
    pub issuer: Option<String>,
    pub jwks_uri: String,
}

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
///
/// Everything except `kty` is optional on the wire; [`KeySet`](crate::keyset::KeySet)
/// decides which entries are usable.
#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}
