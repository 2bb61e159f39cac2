// src/lib.rs

//! Bearer-token verification for resource servers that trust a Keycloak-style
//! OpenID Connect provider.
//!
//! A request passes through [`TokenVerifier`](verifier::TokenVerifier), which
//! resolves the signing key from a cached copy of the realm's JWKS and checks
//! signature, audience, issuer and expiry, and then through
//! [`AuthorizationGate`](authz::AuthorizationGate), which checks for the
//! required role. [`service`] wires both into an axum extractor.

pub mod authz;
pub mod claims;
pub mod client;
pub mod config;
pub mod error;
pub mod keyset;
pub mod model;
pub mod service;
pub mod verifier;

/// The public prelude for the `nila-bearer` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::authz::AuthorizationGate;
    pub use crate::claims::{Audience, TokenClaims};
    pub use crate::client::{HttpKeySetProvider, KeySetCache, KeySetSource};
    pub use crate::config::{ServerSettings, TrustConfig, TrustConfigBuilder};
    pub use crate::error::{AuthError, AuthzError, ConfigError, FetchError};
    pub use crate::keyset::{KeySet, SigningKey};
    pub use crate::service::{AppState, Authorized, Rejection};
    pub use crate::verifier::TokenVerifier;
}
