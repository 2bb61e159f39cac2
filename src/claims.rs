// src/claims.rs

use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `aud` claim, which providers emit either as one string or as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            Audience::Single(value) => std::slice::from_ref(value),
            Audience::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }

    /// True if any value is in `accepted`.
    pub fn intersects(&self, accepted: &[String]) -> bool {
        self.iter().any(|aud| accepted.iter().any(|a| a == aud))
    }
}

/// Claims of a token whose signature has been verified.
///
/// Only [`TokenVerifier`](crate::verifier::TokenVerifier) constructs these,
/// and only after the signature check. They are never cached across requests.
///
/// ```compile_fail
/// let claims = nila_bearer::claims::TokenClaims::from_verified(serde_json::json!({
///     "iss": "http://keycloak:8080/realms/reports-realm",
///     "exp": 4_000_000_000u64,
/// }));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub(crate) issuer: Option<String>,
    pub(crate) subject: Option<String>,
    pub(crate) audience: Option<Audience>,
    pub(crate) expires_at: u64,
    pub(crate) not_before: Option<u64>,
    pub(crate) issued_at: Option<u64>,
    pub(crate) raw: Value,
}

impl TokenClaims {
    /// Decodes the payload of a token whose signature already verified.
    pub(crate) fn from_verified(value: Value) -> Result<Self, AuthError> {
        if !value.is_object() {
            return Err(AuthError::MalformedToken("claims are not a JSON object".to_string()));
        }
        let repr = ClaimsRepr::deserialize(&value)
            .map_err(|err| AuthError::MalformedToken(format!("unexpected claims shape: {err}")))?;

        Ok(Self {
            issuer: repr.iss,
            subject: repr.sub,
            audience: repr.aud,
            expires_at: repr.exp,
            not_before: repr.nbf,
            issued_at: repr.iat,
            raw: value,
        })
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn audience(&self) -> Option<&Audience> {
        self.audience.as_ref()
    }

    /// `exp`, seconds since the Unix epoch.
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// `nbf`, seconds since the Unix epoch.
    pub fn not_before(&self) -> Option<u64> {
        self.not_before
    }

    /// `iat`, seconds since the Unix epoch.
    pub fn issued_at(&self) -> Option<u64> {
        self.issued_at
    }

    /// The complete claims object, for provider-specific claims such as roles.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Looks up a claim by JSON pointer, e.g. `/realm_access/roles`.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.raw.pointer(pointer)
    }
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    exp: u64,
    #[serde(default)]
    nbf: Option<u64>,
    #[serde(default)]
    iat: Option<u64>,
}
