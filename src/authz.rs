// src/authz.rs

use crate::claims::TokenClaims;
use crate::config::{TrustConfig, DEFAULT_ROLE_CLAIM_POINTER};
use crate::error::AuthzError;
use serde_json::Value;
use tracing::warn;

/// Decides whether verified claims carry a required role.
///
/// Roles are a flat set read from one place in the claims (Keycloak's
/// `realm_access.roles` by default). There is no hierarchy.
#[derive(Debug, Clone)]
pub struct AuthorizationGate {
    role_claim_pointer: String,
}

impl Default for AuthorizationGate {
    fn default() -> Self {
        Self::new(DEFAULT_ROLE_CLAIM_POINTER)
    }
}

impl AuthorizationGate {
    pub fn new(role_claim_pointer: impl Into<String>) -> Self {
        Self {
            role_claim_pointer: role_claim_pointer.into(),
        }
    }

    pub fn from_config(config: &TrustConfig) -> Self {
        Self::new(config.role_claim_pointer.clone())
    }

    /// The caller's roles. Anything other than an array of strings at the
    /// role pointer counts as no roles.
    pub fn roles<'a>(&self, claims: &'a TokenClaims) -> Vec<&'a str> {
        match claims.pointer(&self.role_claim_pointer) {
            Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
            Some(other) => {
                warn!(
                    pointer = %self.role_claim_pointer,
                    "Role claim is not an array: {}",
                    type_name(other)
                );
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    pub fn authorize(&self, claims: &TokenClaims, required_role: &str) -> Result<(), AuthzError> {
        if self.roles(claims).contains(&required_role) {
            Ok(())
        } else {
            Err(AuthzError::RoleMissing(required_role.to_string()))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
