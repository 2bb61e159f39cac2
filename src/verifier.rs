// src/verifier.rs

use crate::claims::TokenClaims;
use crate::client::{HttpKeySetProvider, KeySetCache, KeySetSource};
use crate::config::TrustConfig;
use crate::error::{AuthError, ConfigError};
use crate::keyset::SigningKey;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, get_current_timestamp, Algorithm, Header, Validation};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The only algorithm tokens are verified with. The header's `alg` never
/// chooses it.
const SIGNING_ALGORITHM: Algorithm = Algorithm::RS256;

/// Verifies bearer tokens against the trusted provider.
///
/// Create one at startup and share it; it owns the key-set cache.
pub struct TokenVerifier<S = HttpKeySetProvider> {
    config: Arc<TrustConfig>,
    keys: KeySetCache<S>,
}

impl<S> Clone for TokenVerifier<S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            keys: self.keys.clone(),
        }
    }
}

impl TokenVerifier<HttpKeySetProvider> {
    /// Creates a verifier that discovers keys over HTTP.
    pub fn from_config(config: Arc<TrustConfig>) -> Result<Self, ConfigError> {
        let keys = KeySetCache::from_config(&config)?;
        Ok(Self::new(config, keys))
    }
}

impl<S: KeySetSource> TokenVerifier<S> {
    pub fn new(config: Arc<TrustConfig>, keys: KeySetCache<S>) -> Self {
        Self { config, keys }
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    pub fn key_set_cache(&self) -> &KeySetCache<S> {
        &self.keys
    }

    /// Verifies `token` and returns its claims.
    ///
    /// The checks run in order and the first failure is returned:
    /// 1. the token is a three-part JWS whose header names a `kid`;
    /// 2. the provider's key set is available;
    /// 3. the set contains the `kid`;
    /// 4. the RS256 signature verifies;
    /// 5. `aud`, if present, contains an accepted audience;
    /// 6. `iss` is an accepted issuer;
    /// 7. `exp` and `nbf` hold, within the configured leeway.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let header = parse_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::MalformedToken("header has no kid".to_string()))?;

        let key = self.keys.resolve(&kid).await?;
        let payload = verify_signature(token, &key)?;
        let claims = TokenClaims::from_verified(payload)?;

        self.validate_claims(&claims, get_current_timestamp())?;
        debug!(kid = %kid, sub = ?claims.subject, "Token verified");
        Ok(claims)
    }

    fn validate_claims(&self, claims: &TokenClaims, now: u64) -> Result<(), AuthError> {
        match &claims.audience {
            Some(audience) if !audience.intersects(&self.config.audiences) => {
                return Err(AuthError::InvalidAudience);
            }
            Some(_) => {}
            None => debug!("No audience claim in token, skipping audience check."),
        }

        let accepted = claims
            .issuer()
            .is_some_and(|issuer| self.config.issuers.iter().any(|iss| iss == issuer));
        if !accepted {
            return Err(AuthError::InvalidIssuer(claims.issuer.clone()));
        }

        let leeway = self.config.leeway.as_secs();
        if claims.expires_at.saturating_add(leeway) < now {
            return Err(AuthError::TokenExpired);
        }
        if let Some(nbf) = claims.not_before {
            if nbf > now.saturating_add(leeway) {
                return Err(AuthError::TokenNotYetValid);
            }
        }
        Ok(())
    }
}

fn parse_header(token: &str) -> Result<Header, AuthError> {
    if token.split('.').count() != 3 {
        return Err(AuthError::MalformedToken("expected three dot-separated segments".to_string()));
    }
    decode_header(token).map_err(|err| AuthError::MalformedToken(err.to_string()))
}

/// Checks the signature and returns the raw claims object. Temporal, issuer
/// and audience checks are left to [`TokenVerifier::validate_claims`].
fn verify_signature(token: &str, key: &SigningKey) -> Result<Value, AuthError> {
    let mut validation = Validation::new(SIGNING_ALGORITHM);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    decode::<Value>(token, key.decoding_key(), &validation)
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => AuthError::MalformedToken(err.to_string()),
            _ => AuthError::SignatureInvalid,
        })
}
