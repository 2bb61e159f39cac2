// src/config.rs

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

const DEFAULT_PROVIDER_URL: &str = "http://keycloak:8080";
const DEFAULT_REALM: &str = "reports-realm";
const DEFAULT_AUDIENCES: &[&str] = &["reports-api", "reports-frontend"];
const DEFAULT_REQUIRED_ROLE: &str = "prothetic_user";
const DEFAULT_PUBLIC_PROVIDER_URL: &str = "http://localhost:8080";

/// JSON pointer to Keycloak's realm-level role list.
pub const DEFAULT_ROLE_CLAIM_POINTER: &str = "/realm_access/roles";

/// The trust settings every verification is checked against.
///
/// Built once at startup, shared behind an `Arc`, and never mutated. Use
/// [`TrustConfigBuilder`] or [`TrustConfig::from_env`] to construct it.
#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Base URL of the identity provider, e.g. `http://keycloak:8080`.
    pub provider_url: Url,
    /// The realm (tenant) whose keys sign the tokens.
    pub realm: String,
    /// Exact `iss` values accepted. The same realm is often reachable under
    /// an internal and an external host name, so there can be several.
    pub issuers: Vec<String>,
    /// Client identifiers accepted in the `aud` claim.
    pub audiences: Vec<String>,
    /// Role a caller must hold to use the protected operation.
    pub required_role: String,
    /// JSON pointer into the claims object where the role list lives.
    pub role_claim_pointer: String,
    /// Clock-skew tolerance applied to `exp` and `nbf`.
    pub leeway: Duration,
    /// Upper bound on how long a fetched key set is trusted.
    pub cache_ttl: Duration,
    /// A lookup for an unknown `kid` only triggers a refetch when the cached
    /// set is at least this old.
    pub min_refresh_interval: Duration,
    /// Timeout budget for each request to the provider.
    pub http_timeout: Duration,
    discovery_url: Url,
}

impl TrustConfig {
    /// The realm's `.well-known/openid-configuration` endpoint.
    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    /// Loads the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value. Unset variables fall back to the defaults of the reports
    /// deployment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider_url =
            lookup("KEYCLOAK_URL").unwrap_or_else(|| DEFAULT_PROVIDER_URL.to_string());
        let realm = lookup("KEYCLOAK_REALM").unwrap_or_else(|| DEFAULT_REALM.to_string());

        let audiences = match lookup("OIDC_AUDIENCES") {
            Some(raw) => split_list(&raw),
            None => DEFAULT_AUDIENCES.iter().map(|s| s.to_string()).collect(),
        };

        let issuers = match lookup("OIDC_ISSUERS") {
            Some(raw) => split_list(&raw),
            None => vec![
                realm_url(DEFAULT_PUBLIC_PROVIDER_URL, &realm),
                realm_url(&provider_url, &realm),
            ],
        };

        let mut builder = TrustConfigBuilder::new()
            .provider_url(&provider_url)?
            .realm(realm)
            .issuers(issuers)
            .audiences(audiences)
            .required_role(
                lookup("OIDC_REQUIRED_ROLE").unwrap_or_else(|| DEFAULT_REQUIRED_ROLE.to_string()),
            );

        if let Some(pointer) = lookup("OIDC_ROLE_CLAIM_POINTER") {
            builder = builder.role_claim_pointer(pointer);
        }
        if let Some(secs) = parse_secs(&lookup, "OIDC_LEEWAY_SECS")? {
            builder = builder.leeway(secs);
        }
        if let Some(secs) = parse_secs(&lookup, "JWKS_CACHE_TTL_SECS")? {
            builder = builder.cache_ttl(secs);
        }
        if let Some(secs) = parse_secs(&lookup, "JWKS_MIN_REFRESH_SECS")? {
            builder = builder.min_refresh_interval(secs);
        }
        if let Some(secs) = parse_secs(&lookup, "OIDC_HTTP_TIMEOUT_SECS")? {
            builder = builder.http_timeout(secs);
        }

        builder.build()
    }
}

/// A builder for creating a `TrustConfig` instance.
pub struct TrustConfigBuilder {
    provider_url: Option<Url>,
    realm: Option<String>,
    issuers: Vec<String>,
    audiences: Vec<String>,
    required_role: Option<String>,
    role_claim_pointer: String,
    leeway: Duration,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
    http_timeout: Duration,
}

impl Default for TrustConfigBuilder {
    fn default() -> Self {
        Self {
            provider_url: None,
            realm: None,
            issuers: Vec::new(),
            audiences: Vec::new(),
            required_role: None,
            role_claim_pointer: DEFAULT_ROLE_CLAIM_POINTER.to_string(),
            leeway: Duration::from_secs(60),
            cache_ttl: Duration::from_secs(5 * 60),
            min_refresh_interval: Duration::from_secs(10),
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl TrustConfigBuilder {
    /// Creates a new `TrustConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity provider's base URL. This is a required field.
    ///
    /// # Arguments
    ///
    /// * `url` - The provider root, e.g., "http://keycloak:8080".
    pub fn provider_url(mut self, url: &str) -> Result<Self, ConfigError> {
        let parsed_url =
            Url::parse(url).map_err(|e| ConfigError::InvalidUrl(format!("{url}: {e}")))?;
        self.provider_url = Some(parsed_url);
        Ok(self)
    }

    /// Sets the realm name. This is a required field.
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Adds one accepted issuer.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuers.push(issuer.into());
        self
    }

    /// Replaces the accepted issuers. When none are given, the realm URL
    /// derived from the provider URL is the only accepted issuer.
    pub fn issuers<I, S>(mut self, issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.issuers = issuers.into_iter().map(Into::into).collect();
        self
    }

    /// Adds one accepted audience.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audiences.push(audience.into());
        self
    }

    /// Replaces the accepted audiences. At least one is required.
    pub fn audiences<I, S>(mut self, audiences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audiences = audiences.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the role required by the protected operation. This is a required field.
    pub fn required_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    /// Sets where roles are read from. Defaults to `/realm_access/roles`.
    pub fn role_claim_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.role_claim_pointer = pointer.into();
        self
    }

    /// Sets the clock skew tolerance. Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Sets the maximum key-set lifetime. Defaults to 5 minutes.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets the minimum age before an unknown `kid` forces a refetch.
    /// Defaults to 10 seconds.
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Sets the per-request timeout towards the provider. Defaults to 5 seconds.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Consumes the builder and returns a `TrustConfig` object.
    ///
    /// # Errors
    ///
    /// Returns an error if `provider_url`, `realm`, `required_role` or the
    /// audiences are missing, or if a value cannot be used.
    pub fn build(self) -> Result<TrustConfig, ConfigError> {
        let provider_url = self
            .provider_url
            .ok_or_else(|| ConfigError::MissingConfiguration("provider_url".to_string()))?;
        let realm = self
            .realm
            .ok_or_else(|| ConfigError::MissingConfiguration("realm".to_string()))?;
        let required_role = self
            .required_role
            .ok_or_else(|| ConfigError::MissingConfiguration("required_role".to_string()))?;

        if realm.is_empty() || realm.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "realm".to_string(),
                reason: "must be a non-empty name without '/'".to_string(),
            });
        }
        if self.audiences.is_empty() {
            return Err(ConfigError::MissingConfiguration("audiences".to_string()));
        }
        if !self.role_claim_pointer.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                field: "role_claim_pointer".to_string(),
                reason: format!("'{}' is not a JSON pointer", self.role_claim_pointer),
            });
        }
        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "http_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let base = realm_url(provider_url.as_str(), &realm);
        let discovery_url = Url::parse(&format!("{base}/.well-known/openid-configuration"))
            .map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

        let issuers = if self.issuers.is_empty() { vec![base] } else { self.issuers };

        Ok(TrustConfig {
            provider_url,
            realm,
            issuers,
            audiences: self.audiences,
            required_role,
            role_claim_pointer: self.role_claim_pointer,
            leeway: self.leeway,
            cache_ttl: self.cache_ttl,
            min_refresh_interval: self.min_refresh_interval,
            http_timeout: self.http_timeout,
            discovery_url,
        })
    }
}

/// Listener and CORS settings for the `reports-api` binary.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: SocketAddr,
    pub cors_allowed_origins: Vec<String>,
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_addr = lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string());
        let bind_addr = raw_addr.parse().map_err(|e| ConfigError::InvalidValue {
            field: "BIND_ADDR".to_string(),
            reason: format!("{raw_addr}: {e}"),
        })?;
        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|raw| split_list(&raw))
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);
        // Credentialed CORS cannot be combined with a wildcard origin.
        if cors_allowed_origins.iter().any(|origin| origin == "*") {
            return Err(ConfigError::InvalidValue {
                field: "CORS_ALLOWED_ORIGINS".to_string(),
                reason: "'*' is not allowed, list the origins explicitly".to_string(),
            });
        }

        Ok(Self {
            bind_addr,
            cors_allowed_origins,
        })
    }
}

fn realm_url(provider_url: &str, realm: &str) -> String {
    format!("{}/realms/{}", provider_url.trim_end_matches('/'), realm)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::InvalidValue {
                    field: key.to_string(),
                    reason: format!("{raw}: {e}"),
                })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_defaults_match_reports_deployment() {
        let config = TrustConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(
            config.discovery_url().as_str(),
            "http://keycloak:8080/realms/reports-realm/.well-known/openid-configuration"
        );
        assert_eq!(
            config.issuers,
            vec![
                "http://localhost:8080/realms/reports-realm".to_string(),
                "http://keycloak:8080/realms/reports-realm".to_string(),
            ]
        );
        assert_eq!(config.audiences, vec!["reports-api", "reports-frontend"]);
        assert_eq!(config.required_role, "prothetic_user");
        assert_eq!(config.role_claim_pointer, DEFAULT_ROLE_CLAIM_POINTER);
        assert_eq!(config.leeway, Duration::from_secs(60));
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = TrustConfig::from_lookup(lookup_from(&[
            ("KEYCLOAK_URL", "https://id.example.com/"),
            ("KEYCLOAK_REALM", "billing"),
            ("OIDC_AUDIENCES", "billing-api, ,billing-ui"),
            ("OIDC_REQUIRED_ROLE", "accountant"),
            ("OIDC_LEEWAY_SECS", "5"),
            ("JWKS_CACHE_TTL_SECS", "120"),
        ]))
        .unwrap();

        assert_eq!(
            config.discovery_url().as_str(),
            "https://id.example.com/realms/billing/.well-known/openid-configuration"
        );
        assert_eq!(config.issuers[1], "https://id.example.com/realms/billing");
        assert_eq!(config.audiences, vec!["billing-api", "billing-ui"]);
        assert_eq!(config.required_role, "accountant");
        assert_eq!(config.leeway, Duration::from_secs(5));
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
    }

    #[test]
    fn non_numeric_duration_is_rejected() {
        let err =
            TrustConfig::from_lookup(lookup_from(&[("OIDC_LEEWAY_SECS", "soon")])).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { field, .. } if field == "OIDC_LEEWAY_SECS")
        );
    }

    #[test]
    fn builder_requires_core_fields() {
        let err = TrustConfigBuilder::new().realm("r").build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfiguration(f) if f == "provider_url"));

        let err = TrustConfigBuilder::new()
            .provider_url("http://idp")
            .unwrap()
            .realm("r")
            .required_role("user")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingConfiguration(f) if f == "audiences"));
    }

    #[test]
    fn builder_defaults_issuer_to_realm_url() {
        let config = TrustConfigBuilder::new()
            .provider_url("http://idp:8080/auth/")
            .unwrap()
            .realm("staff")
            .audience("staff-api")
            .required_role("user")
            .build()
            .unwrap();

        assert_eq!(config.issuers, vec!["http://idp:8080/auth/realms/staff".to_string()]);
        assert_eq!(
            config.discovery_url().as_str(),
            "http://idp:8080/auth/realms/staff/.well-known/openid-configuration"
        );
    }

    #[test]
    fn builder_rejects_bad_values() {
        assert!(matches!(
            TrustConfigBuilder::new().provider_url("not a url"),
            Err(ConfigError::InvalidUrl(_))
        ));

        let err = TrustConfigBuilder::new()
            .provider_url("http://idp")
            .unwrap()
            .realm("a/b")
            .audience("x")
            .required_role("user")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "realm"));

        let err = TrustConfigBuilder::new()
            .provider_url("http://idp")
            .unwrap()
            .realm("r")
            .audience("x")
            .required_role("user")
            .role_claim_pointer("realm_access.roles")
            .build()
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { field, .. } if field == "role_claim_pointer")
        );
    }

    #[test]
    fn server_settings_defaults() {
        let settings = ServerSettings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings.bind_addr, "0.0.0.0:8000".parse().unwrap());
        assert_eq!(settings.cors_allowed_origins, vec!["http://localhost:3000"]);

        let err =
            ServerSettings::from_lookup(lookup_from(&[("BIND_ADDR", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn wildcard_cors_origin_is_rejected() {
        let err = ServerSettings::from_lookup(lookup_from(&[(
            "CORS_ALLOWED_ORIGINS",
            "http://localhost:3000, *",
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field, .. } if field == "CORS_ALLOWED_ORIGINS"
        ));
    }
}
