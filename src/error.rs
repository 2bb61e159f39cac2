// src/error.rs

use std::sync::Arc;
use thiserror::Error;

/// Errors raised while retrieving the provider's discovery document or key set.
///
/// Callers never branch on the variant: every `FetchError` means the keys are
/// unavailable for this attempt. The variants exist for logging.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or its body could not be read.
    #[error("HTTP request to the identity provider failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The request exceeded the configured timeout budget.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// The provider answered with a non-2xx status.
    #[error("HTTP {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The response body was not the expected JSON document.
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// A URL built from configuration or advertised by the provider is unusable.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// A published key could not be turned into a decoding key.
    #[error("invalid key '{kid}': {reason}")]
    InvalidKey { kid: String, reason: String },

    /// The same `kid` appears twice in one key set.
    #[error("key set contains duplicate kid '{0}'")]
    DuplicateKeyId(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            let url = err
                .url()
                .map(|u| u.to_string())
                .unwrap_or_else(|| "identity provider".to_string());
            FetchError::Timeout(url)
        } else {
            FetchError::Http(err)
        }
    }
}

/// Reasons a bearer token fails verification.
///
/// All of these are surfaced to the client as the same "unauthorized" answer;
/// the variant is only recorded in the server log.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// Not a three-part signed token, or the header or claims do not decode.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// The provider's key set could not be obtained.
    #[error("signing keys unavailable: {0}")]
    KeySetUnavailable(#[source] Arc<FetchError>),

    /// No published key matches the header's `kid`.
    #[error("no signing key published for kid '{0}'")]
    UnknownKey(String),

    /// The signature does not verify under RS256 with the resolved key.
    #[error("signature verification failed")]
    SignatureInvalid,

    /// The `aud` claim shares no value with the accepted audiences.
    #[error("token audience is not accepted")]
    InvalidAudience,

    /// The `iss` claim is absent or not one of the accepted issuers.
    #[error("token issuer {} is not accepted", .0.as_deref().unwrap_or("(none)"))]
    InvalidIssuer(Option<String>),

    #[error("token has expired")]
    TokenExpired,

    #[error("token is not valid yet")]
    TokenNotYetValid,
}

/// Authorization failure for an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    #[error("required role '{0}' is missing")]
    RoleMissing(String),
}

/// Errors raised while assembling a [`TrustConfig`](crate::config::TrustConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A configuration value is present but unusable.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// The HTTP client for the provider could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
