// src/keyset.rs

use crate::error::FetchError;
use crate::model::{JsonWebKey, JsonWebKeySet};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// A public key the provider currently signs tokens with.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Algorithm,
    key: DecodingKey,
}

impl SigningKey {
    pub fn new(kid: impl Into<String>, algorithm: Algorithm, key: DecodingKey) -> Self {
        Self {
            kid: kid.into(),
            algorithm,
            key,
        }
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// The signing keys published by one provider, as of one fetch.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: Vec<SigningKey>,
    fetched_at: Instant,
    max_age: Option<Duration>,
}

impl KeySet {
    /// Builds a key set from already decoded keys.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::DuplicateKeyId`] if two keys share a `kid`.
    pub fn new(keys: Vec<SigningKey>) -> Result<Self, FetchError> {
        let mut seen = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key.kid.as_str()) {
                return Err(FetchError::DuplicateKeyId(key.kid.clone()));
            }
        }
        Ok(Self {
            keys,
            fetched_at: Instant::now(),
            max_age: None,
        })
    }

    /// Converts a JWKS document into RS256 verification keys.
    ///
    /// Entries that cannot verify an RS256 signature (other key types,
    /// encryption keys, other algorithms, no `kid`) are skipped.
    pub fn from_jwks(jwks: JsonWebKeySet) -> Result<Self, FetchError> {
        let mut keys = Vec::with_capacity(jwks.keys.len());
        for jwk in jwks.keys {
            if let Some(key) = signing_key_from_jwk(jwk)? {
                keys.push(key);
            }
        }
        Self::new(keys)
    }

    /// Records the `max-age` the provider advertised for this set.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn get(&self, kid: &str) -> Option<&SigningKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SigningKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// Time since the set was fetched.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

fn signing_key_from_jwk(jwk: JsonWebKey) -> Result<Option<SigningKey>, FetchError> {
    let Some(kid) = jwk.kid else {
        debug!("Skipping JWK without kid");
        return Ok(None);
    };
    if jwk.kty != "RSA" {
        debug!(kid = %kid, kty = %jwk.kty, "Skipping non-RSA JWK");
        return Ok(None);
    }
    if jwk.use_purpose.as_deref().is_some_and(|u| u != "sig") {
        debug!(kid = %kid, "Skipping JWK not intended for signatures");
        return Ok(None);
    }
    if jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
        debug!(kid = %kid, alg = ?jwk.alg, "Skipping JWK with unsupported alg");
        return Ok(None);
    }

    let n = jwk.n.as_deref().ok_or_else(|| FetchError::InvalidKey {
        kid: kid.clone(),
        reason: "RSA key missing 'n' component".to_string(),
    })?;
    let e = jwk.e.as_deref().ok_or_else(|| FetchError::InvalidKey {
        kid: kid.clone(),
        reason: "RSA key missing 'e' component".to_string(),
    })?;
    let key = DecodingKey::from_rsa_components(n, e).map_err(|err| FetchError::InvalidKey {
        kid: kid.clone(),
        reason: err.to_string(),
    })?;

    Ok(Some(SigningKey::new(kid, Algorithm::RS256, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small but well-formed base64url RSA components; validity of the
    // modulus is irrelevant to key-set assembly.
    const N: &str = concat!(
        "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXbo",
        "IRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4g",
        "s_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTT",
        "AumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw",
    );
    const E: &str = "AQAB";

    fn jwk(
        kid: Option<&str>,
        kty: &str,
        use_purpose: Option<&str>,
        alg: Option<&str>,
    ) -> JsonWebKey {
        JsonWebKey {
            kid: kid.map(str::to_string),
            kty: kty.to_string(),
            use_purpose: use_purpose.map(str::to_string),
            alg: alg.map(str::to_string),
            n: Some(N.to_string()),
            e: Some(E.to_string()),
        }
    }

    #[test]
    fn keycloak_style_set_keeps_only_signing_keys() {
        let jwks = JsonWebKeySet {
            keys: vec![
                jwk(Some("sig-1"), "RSA", Some("sig"), Some("RS256")),
                jwk(Some("enc-1"), "RSA", Some("enc"), Some("RSA-OAEP")),
                jwk(Some("ec-1"), "EC", Some("sig"), Some("ES256")),
                jwk(None, "RSA", Some("sig"), Some("RS256")),
                jwk(Some("sig-2"), "RSA", None, None),
            ],
        };

        let set = KeySet::from_jwks(jwks).unwrap();
        let kids: Vec<_> = set.iter().map(SigningKey::kid).collect();
        assert_eq!(kids, vec!["sig-1", "sig-2"]);
        assert!(set.get("enc-1").is_none());
        assert_eq!(set.get("sig-1").map(SigningKey::algorithm), Some(Algorithm::RS256));
    }

    #[test]
    fn duplicate_kid_is_rejected() {
        let jwks = JsonWebKeySet {
            keys: vec![
                jwk(Some("k1"), "RSA", Some("sig"), Some("RS256")),
                jwk(Some("k1"), "RSA", Some("sig"), Some("RS256")),
            ],
        };
        assert!(matches!(
            KeySet::from_jwks(jwks),
            Err(FetchError::DuplicateKeyId(kid)) if kid == "k1"
        ));
    }

    #[test]
    fn rsa_key_without_modulus_is_invalid() {
        let mut broken = jwk(Some("k1"), "RSA", Some("sig"), Some("RS256"));
        broken.n = None;
        let result = KeySet::from_jwks(JsonWebKeySet { keys: vec![broken] });
        assert!(matches!(result, Err(FetchError::InvalidKey { kid, .. }) if kid == "k1"));
    }
}
