//! Apple key set fetching and caching
//!
//! [`JwksClient`] retrieves Apple's published JWK set over HTTPS and caches
//! it process-wide:
//!
//! - **TTL-based caching**: default 10 minutes; the published set is
//!   volatile and must be re-fetched periodically
//! - **Atomic replace**: the whole set is swapped at once, readers never
//!   observe a partially-updated set
//! - **Single-flight**: concurrent misses collapse into one network fetch
//! - **Rate limiting**: an unknown `kid` triggers at most one refresh per
//!   call, and refreshes are spaced by a minimum interval so a garbage
//!   `kid` cannot drive unbounded traffic to Apple
//! - **Cancellation**: every fetch races an external [`CancellationToken`]
//!
//! The clock is injected so TTL expiry is testable without sleeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{APPLE_JWKS_URL, DEFAULT_KEY_CACHE_TTL, DEFAULT_MIN_REFRESH_INTERVAL};
use crate::errors::{AuthError, Result};

use super::PublicKeyResolver;

/// Clock abstraction for cache TTL decisions.
///
/// Production uses [`SystemTime::now`]; tests inject a controllable clock.
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// One parsed record from Apple's published key set.
///
/// Unknown JSON fields on the wire are tolerated and dropped. Records of
/// foreign key types are retained in the set but fail conversion to a
/// verification key at use time.
#[derive(Debug, Clone)]
pub struct PublicKeySetEntry {
    /// Key ID tagging the record.
    pub kid: String,
    /// Key type (`EC` for the keys this crate can verify with).
    pub kty: String,
    /// Declared algorithm, if any.
    pub alg: Option<String>,
    /// Elliptic curve name, expected `P-256`.
    pub crv: Option<String>,
    /// Base64url-encoded x coordinate.
    pub x: Option<String>,
    /// Base64url-encoded y coordinate.
    pub y: Option<String>,
    /// When the containing set was fetched.
    pub fetched_at: SystemTime,
}

impl PublicKeySetEntry {
    /// Converts the record into a key usable for ES256 verification.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidPublicKey`] if the record is not an EC
    /// P-256 key with both coordinates present and decodable.
    pub fn verification_key(&self) -> Result<DecodingKey> {
        if self.kty != "EC" {
            return Err(AuthError::InvalidPublicKey {
                kid: self.kid.clone(),
                reason: format!("unsupported key type '{}'", self.kty),
            });
        }
        if self.crv.as_deref() != Some("P-256") {
            return Err(AuthError::InvalidPublicKey {
                kid: self.kid.clone(),
                reason: format!("unsupported curve {:?}", self.crv),
            });
        }
        let x = self.x.as_deref().ok_or_else(|| AuthError::InvalidPublicKey {
            kid: self.kid.clone(),
            reason: "missing x coordinate".into(),
        })?;
        let y = self.y.as_deref().ok_or_else(|| AuthError::InvalidPublicKey {
            kid: self.kid.clone(),
            reason: "missing y coordinate".into(),
        })?;

        DecodingKey::from_ec_components(x, y).map_err(|e| AuthError::InvalidPublicKey {
            kid: self.kid.clone(),
            reason: format!("invalid EC coordinates: {e}"),
        })
    }
}

/// Wire format of one key record. Serde ignores fields we do not model.
#[derive(Debug, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    alg: Option<String>,
    crv: Option<String>,
    x: Option<String>,
    y: Option<String>,
}

/// Wire format of the key set document.
#[derive(Debug, Deserialize)]
struct JwkSetResponse {
    keys: Vec<Jwk>,
}

/// The cached set plus the timestamp it was fetched at.
struct CachedKeySet {
    entries: HashMap<String, PublicKeySetEntry>,
    fetched_at: SystemTime,
}

impl CachedKeySet {
    fn is_fresh(&self, now: SystemTime, ttl: Duration) -> bool {
        match now.duration_since(self.fetched_at) {
            Ok(age) => age < ttl,
            Err(_) => false, // clock went backwards, treat as expired
        }
    }
}

/// Client for Apple's published key set endpoint.
///
/// # Example
///
/// ```no_run
/// use siwa_auth::keys::JwksClient;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> siwa_auth::Result<()> {
/// let client = JwksClient::apple();
/// let cancel = CancellationToken::new();
///
/// let entry = client.get_key("86D88Kf", &cancel).await?;
/// let key = entry.verification_key()?;
/// # Ok(())
/// # }
/// ```
pub struct JwksClient {
    /// Key set endpoint URL.
    jwks_uri: String,
    /// HTTP client with a 10 second request timeout.
    http_client: reqwest::Client,
    /// Cached key set, swapped atomically as a whole.
    cache: Arc<RwLock<Option<CachedKeySet>>>,
    /// Serializes refresh attempts so concurrent misses collapse into one
    /// fetch. Never guards data - cache reads go through `cache` directly.
    flight: Arc<Mutex<()>>,
    /// Cache time-to-live.
    cache_ttl: Duration,
    /// Minimum interval between refreshes (rate limiting).
    min_refresh_interval: Duration,
    /// When the last refresh completed.
    last_refresh: Arc<RwLock<Option<SystemTime>>>,
    /// Injected clock for TTL decisions.
    clock: Clock,
}

impl std::fmt::Debug for JwksClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksClient")
            .field("jwks_uri", &self.jwks_uri)
            .field("cache_ttl", &self.cache_ttl)
            .field("min_refresh_interval", &self.min_refresh_interval)
            .finish_non_exhaustive()
    }
}

impl JwksClient {
    /// Creates a client for the given key set endpoint with default
    /// settings (10 minute TTL, 5 second refresh rate limit).
    pub fn new(jwks_uri: impl Into<String>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
            cache: Arc::new(RwLock::new(None)),
            flight: Arc::new(Mutex::new(())),
            cache_ttl: DEFAULT_KEY_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            last_refresh: Arc::new(RwLock::new(None)),
            clock: Arc::new(SystemTime::now),
        }
    }

    /// Creates a client for Apple's well-known endpoint.
    pub fn apple() -> Self {
        Self::new(APPLE_JWKS_URL)
    }

    /// Sets a custom cache TTL.
    ///
    /// Shorter TTL detects key rotation faster; longer TTL sends fewer
    /// requests to the endpoint.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Sets a custom minimum refresh interval.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Injects a clock for TTL decisions. Intended for tests.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// The key set endpoint this client fetches from.
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Number of entries in the cached set (0 when nothing is cached).
    pub async fn cached_key_count(&self) -> usize {
        self.cache.read().await.as_ref().map_or(0, |set| set.entries.len())
    }

    /// Drops the cached set. The next lookup fetches fresh state.
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
        tracing::debug!(jwks_uri = %self.jwks_uri, "key set cache cleared");
    }

    /// Returns the entry for `kid`, fetching or refreshing the set as
    /// needed.
    ///
    /// Concurrent calls that miss the cache collapse into a single
    /// underlying fetch; every caller observes that fetch's result. Within
    /// one call at most one fetch is attempted - if `kid` is still absent
    /// afterwards the call fails without further network I/O.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeySetFetch`] on network/HTTP failure
    /// - [`AuthError::KeyNotFound`] if `kid` is absent after a refresh (or
    ///   the refresh was rate limited)
    /// - [`AuthError::Cancelled`] if `cancel` fired mid-fetch
    #[tracing::instrument(skip(self, cancel))]
    pub async fn get_key(&self, kid: &str, cancel: &CancellationToken) -> Result<PublicKeySetEntry> {
        // Fast path: fresh cached set containing the kid
        if let Some(entry) = self.cached_entry(kid).await {
            tracing::debug!(kid, "key set cache hit");
            return Ok(entry);
        }

        // Single-flight: only one caller fetches; the rest queue here and
        // then find the refreshed cache. The mutex guards no data, so no
        // data lock is held across the fetch await.
        let _flight = self.flight.lock().await;

        if let Some(entry) = self.cached_entry(kid).await {
            tracing::debug!(kid, "key set refreshed by concurrent caller");
            return Ok(entry);
        }

        // Unknown kid on a still-fresh set: one refresh is allowed in case
        // Apple rotated keys, but only outside the rate-limit window.
        if self.has_fresh_set().await && self.refreshed_recently().await {
            tracing::warn!(
                kid,
                "key id absent from fresh key set and refresh is rate limited"
            );
            return Err(AuthError::KeyNotFound {
                kid: kid.to_owned(),
            });
        }

        let entries = self.fetch_and_swap(cancel).await?;
        entries.get(kid).cloned().ok_or_else(|| {
            tracing::warn!(kid, "key id absent from freshly fetched key set");
            AuthError::KeyNotFound {
                kid: kid.to_owned(),
            }
        })
    }

    /// Looks up `kid` in the cache, honoring the TTL.
    async fn cached_entry(&self, kid: &str) -> Option<PublicKeySetEntry> {
        let now = (self.clock)();
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|set| set.is_fresh(now, self.cache_ttl))
            .and_then(|set| set.entries.get(kid).cloned())
    }

    async fn has_fresh_set(&self) -> bool {
        let now = (self.clock)();
        self.cache
            .read()
            .await
            .as_ref()
            .is_some_and(|set| set.is_fresh(now, self.cache_ttl))
    }

    async fn refreshed_recently(&self) -> bool {
        let now = (self.clock)();
        self.last_refresh.read().await.is_some_and(|last| {
            now.duration_since(last)
                .map(|since| since < self.min_refresh_interval)
                .unwrap_or(true)
        })
    }

    /// Fetches the full set, parses every record, and replaces the cache
    /// atomically. Must be called with the flight lock held.
    async fn fetch_and_swap(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, PublicKeySetEntry>> {
        tracing::info!(jwks_uri = %self.jwks_uri, "fetching key set from endpoint");

        let fetch = async {
            let response = self
                .http_client
                .get(&self.jwks_uri)
                .send()
                .await
                .map_err(|e| AuthError::KeySetFetch {
                    reason: format!("request failed: {e}"),
                })?;

            let status = response.status();
            if !status.is_success() {
                tracing::error!(jwks_uri = %self.jwks_uri, status = %status, "key set endpoint returned error status");
                return Err(AuthError::KeySetFetch {
                    reason: format!("endpoint returned status {status}"),
                });
            }

            response
                .json::<JwkSetResponse>()
                .await
                .map_err(|e| AuthError::KeySetFetch {
                    reason: format!("invalid key set document: {e}"),
                })
        };

        let set = tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(jwks_uri = %self.jwks_uri, "key set fetch cancelled");
                return Err(AuthError::Cancelled);
            }
            set = fetch => set?,
        };

        let now = (self.clock)();
        let mut entries = HashMap::with_capacity(set.keys.len());
        for jwk in set.keys {
            let Some(kid) = jwk.kid else {
                tracing::warn!("skipping key set record without kid");
                continue;
            };
            entries.insert(
                kid.clone(),
                PublicKeySetEntry {
                    kid,
                    kty: jwk.kty,
                    alg: jwk.alg,
                    crv: jwk.crv,
                    x: jwk.x,
                    y: jwk.y,
                    fetched_at: now,
                },
            );
        }

        tracing::info!(
            jwks_uri = %self.jwks_uri,
            key_count = entries.len(),
            "key set fetched"
        );

        *self.cache.write().await = Some(CachedKeySet {
            entries: entries.clone(),
            fetched_at: now,
        });
        *self.last_refresh.write().await = Some(now);

        Ok(entries)
    }
}

#[async_trait]
impl PublicKeyResolver for JwksClient {
    async fn get_key(&self, kid: &str, cancel: &CancellationToken) -> Result<PublicKeySetEntry> {
        JwksClient::get_key(self, kid, cancel).await
    }
}
