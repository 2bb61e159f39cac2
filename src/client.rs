// src/client.rs

use crate::config::TrustConfig;
use crate::error::{AuthError, ConfigError, FetchError};
use crate::keyset::{KeySet, SigningKey};
use crate::model::{JsonWebKeySet, OidcDiscoveryDocument};
use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Somewhere a fresh [`KeySet`] can be fetched from.
#[async_trait]
pub trait KeySetSource: Send + Sync + 'static {
    /// Fetches the provider's current signing keys. No retries.
    async fn fetch_key_set(&self) -> Result<KeySet, FetchError>;

    /// Stable identifier of the provider, used in logs and as the cache key.
    fn source_id(&self) -> &str;
}

/// Fetches keys from a realm via OIDC discovery.
///
/// Every call performs two requests: the discovery document, then the
/// `jwks_uri` it advertises. Both carry the configured timeout.
#[derive(Clone)]
pub struct HttpKeySetProvider {
    http_client: reqwest::Client,
    discovery_url: Url,
    source_id: String,
}

impl HttpKeySetProvider {
    pub fn new(config: &TrustConfig) -> Result<Self, ConfigError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self::with_client(http_client, config.discovery_url().clone()))
    }

    pub fn with_client(http_client: reqwest::Client, discovery_url: Url) -> Self {
        Self {
            http_client,
            source_id: discovery_url.to_string(),
            discovery_url,
        }
    }

    /// Resolves the `jwks_uri` from the discovery document.
    async fn get_jwks_uri(&self) -> Result<Url, FetchError> {
        debug!("Performing OIDC discovery at: {}", self.discovery_url);
        let (discovery_doc, _) = self
            .get_json::<OidcDiscoveryDocument>(self.discovery_url.clone())
            .await?;

        let jwks_uri = Url::parse(&discovery_doc.jwks_uri)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", discovery_doc.jwks_uri)))?;
        debug!(issuer = ?discovery_doc.issuer, "Discovered JWKS URI: {}", jwks_uri);
        Ok(jwks_uri)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<(T, Option<Duration>), FetchError> {
        let response = self.http_client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let max_age = parse_cache_control(response.headers());
        let body = response.bytes().await?;
        let value = serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok((value, max_age))
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetProvider {
    #[instrument(skip(self), fields(source = %self.source_id), err)]
    async fn fetch_key_set(&self) -> Result<KeySet, FetchError> {
        let jwks_uri = self.get_jwks_uri().await?;
        let (jwks, max_age) = self.get_json::<JsonWebKeySet>(jwks_uri).await?;
        let key_set = KeySet::from_jwks(jwks)?.with_max_age(max_age);
        debug!("Fetched {} signing keys, max-age {:?}", key_set.len(), max_age);
        Ok(key_set)
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }
}

/// Parses the `Cache-Control` header to determine the TTL.
fn parse_cache_control(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}

/// Entry lifetime: the provider's `max-age`, capped by the configured TTL.
struct KeySetExpiry {
    ttl: Duration,
}

impl KeySetExpiry {
    fn lifetime(&self, key_set: &KeySet) -> Duration {
        key_set.max_age().map_or(self.ttl, |max_age| max_age.min(self.ttl))
    }
}

impl Expiry<String, Arc<KeySet>> for KeySetExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<KeySet>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<KeySet>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(self.lifetime(value))
    }
}

/// A bounded-lifetime cache of one provider's [`KeySet`].
///
/// Concurrent lookups against a missing or expired entry share a single
/// fetch. Explicit refreshes swap the new set in atomically, so readers keep
/// verifying against the previous set until the swap.
pub struct KeySetCache<S = HttpKeySetProvider> {
    // The cache is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner<S>>,
}

impl<S> Clone for KeySetCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<S> {
    source: S,
    cache_key: String,
    cache: Cache<String, Arc<KeySet>>,
    ttl: Duration,
    min_refresh_interval: Duration,
    // Held for the duration of an explicit refresh.
    refresh_lock: Mutex<()>,
}

impl KeySetCache<HttpKeySetProvider> {
    /// Creates a cache backed by OIDC discovery for the configured realm.
    pub fn from_config(config: &TrustConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            HttpKeySetProvider::new(config)?,
            config.cache_ttl,
            config.min_refresh_interval,
        ))
    }
}

impl<S: KeySetSource> KeySetCache<S> {
    pub fn new(source: S, ttl: Duration, min_refresh_interval: Duration) -> Self {
        let cache = Cache::builder()
            .expire_after(KeySetExpiry { ttl })
            .build();
        Self {
            inner: Arc::new(Inner {
                cache_key: source.source_id().to_string(),
                source,
                cache,
                ttl,
                min_refresh_interval,
                refresh_lock: Mutex::new(()),
            }),
        }
    }

    /// Returns the cached key set, fetching it if absent or expired.
    ///
    /// Failed fetches are not cached; the next call tries again.
    pub async fn current(&self) -> Result<Arc<KeySet>, Arc<FetchError>> {
        if let Some(key_set) = self.inner.cache.get(&self.inner.cache_key).await {
            return Ok(key_set);
        }

        debug!("Key set cache miss for {}. Fetching from provider.", self.inner.cache_key);
        self.inner
            .cache
            .try_get_with(self.inner.cache_key.clone(), self.fetch())
            .await
    }

    /// Looks up the signing key for `kid`.
    ///
    /// A `kid` missing from a set older than the minimum refresh interval
    /// triggers one refetch, so rotated keys are picked up before the TTL
    /// runs out.
    pub async fn resolve(&self, kid: &str) -> Result<SigningKey, AuthError> {
        let key_set = self.current().await.map_err(AuthError::KeySetUnavailable)?;
        if let Some(key) = key_set.get(kid) {
            debug!("JWK cache hit for kid: {}", kid);
            return Ok(key.clone());
        }

        if key_set.age() < self.inner.min_refresh_interval {
            return Err(AuthError::UnknownKey(kid.to_string()));
        }

        debug!("kid {} not in cached key set. Refreshing.", kid);
        let fresh = self
            .refresh_after(Some(&key_set))
            .await
            .map_err(|e| AuthError::KeySetUnavailable(Arc::new(e)))?;
        fresh
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    /// Fetches a fresh key set and replaces the cached one.
    pub async fn refresh(&self) -> Result<Arc<KeySet>, FetchError> {
        self.refresh_after(None).await
    }

    /// Drops the cached key set; the next lookup fetches again.
    pub async fn invalidate(&self) {
        self.inner.cache.invalidate(&self.inner.cache_key).await;
    }

    /// Spawns a task that keeps the cache warm.
    ///
    /// The set is refetched at 80% of its lifetime. Failures are retried with
    /// exponential back-off from 5 seconds up to 5 minutes. Abort the
    /// returned handle to stop it.
    pub fn spawn_refresh_task(&self) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            client.key_refresh_loop().await;
        })
    }

    /// The main loop for the background key refresh task.
    async fn key_refresh_loop(&self) {
        let base_retry_delay = Duration::from_secs(5);
        let max_retry_delay = Duration::from_secs(300);
        let mut current_retry_delay = base_retry_delay;
        let expiry = KeySetExpiry { ttl: self.inner.ttl };

        loop {
            let lifetime = match self.refresh().await {
                Ok(key_set) => {
                    current_retry_delay = base_retry_delay;
                    expiry.lifetime(&key_set)
                }
                Err(e) => {
                    error!(
                        "Failed to refresh key set in background: {}. Retrying in {:?}.",
                        e, current_retry_delay
                    );
                    tokio::time::sleep(current_retry_delay).await;
                    current_retry_delay = (current_retry_delay * 2).min(max_retry_delay);
                    continue;
                }
            };

            let refresh_interval = Duration::from_secs_f64(lifetime.as_secs_f64() * 0.8)
                .max(Duration::from_secs(1));
            debug!("Key set background refresh scheduled in {:?}", refresh_interval);
            tokio::time::sleep(refresh_interval).await;
        }
    }

    /// Refetches under the refresh lock. When `seen` is given and another task
    /// already replaced it while we waited, that newer set is returned
    /// without another fetch.
    async fn refresh_after(&self, seen: Option<&Arc<KeySet>>) -> Result<Arc<KeySet>, FetchError> {
        let _guard = self.inner.refresh_lock.lock().await;

        if let Some(seen) = seen {
            if let Some(cached) = self.inner.cache.get(&self.inner.cache_key).await {
                if !Arc::ptr_eq(&cached, seen) {
                    return Ok(cached);
                }
            }
        }

        let key_set = self.fetch().await?;
        self.inner
            .cache
            .insert(self.inner.cache_key.clone(), Arc::clone(&key_set))
            .await;
        Ok(key_set)
    }

    #[instrument(skip(self), fields(source = %self.inner.cache_key), err)]
    async fn fetch(&self) -> Result<Arc<KeySet>, FetchError> {
        let key_set = self.inner.source.fetch_key_set().await?;
        if key_set.is_empty() {
            warn!("Provider published no usable RS256 signing keys");
        }
        info!("Cached {} signing keys", key_set.len());
        Ok(Arc::new(key_set))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL};

    #[test]
    fn cache_control_max_age_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-transform, max-age=300, public"),
        );
        assert_eq!(parse_cache_control(&headers), Some(Duration::from_secs(300)));

        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        assert_eq!(parse_cache_control(&headers), None);

        assert_eq!(parse_cache_control(&HeaderMap::new()), None);
    }

    #[test]
    fn lifetime_is_capped_by_configured_ttl() {
        let expiry = KeySetExpiry { ttl: Duration::from_secs(60) };
        let set = KeySet::new(Vec::new()).unwrap();

        assert_eq!(expiry.lifetime(&set), Duration::from_secs(60));

        let short = set.clone().with_max_age(Some(Duration::from_secs(10)));
        assert_eq!(expiry.lifetime(&short), Duration::from_secs(10));

        let long = set.with_max_age(Some(Duration::from_secs(3600)));
        assert_eq!(expiry.lifetime(&long), Duration::from_secs(60));
    }
}
