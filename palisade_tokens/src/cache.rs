//! Caching of token responses

use std::{
    future::Future,
    time::{Duration, Instant},
};

use aliri_clock::DurationSecs;
use moka::{future::Cache, Expiry};

use crate::{config::CacheProperties, dto::CachedTokenResponse, grant::GrantRequest, ClientError};

/// How long a token response may be served from the cache
///
/// A response is evicted `skew` before the token expires. When the skew is
/// longer than the token's lifetime, the full lifetime is used.
pub fn cache_lifetime(response: &CachedTokenResponse, skew: DurationSecs) -> Duration {
    let lifetime = response.expires_in().0;
    let secs = if skew.0 > lifetime {
        lifetime
    } else {
        lifetime - skew.0
    };
    Duration::from_secs(secs)
}

struct SkewedExpiry {
    skew: DurationSecs,
}

impl Expiry<GrantRequest, CachedTokenResponse> for SkewedExpiry {
    fn expire_after_create(
        &self,
        _key: &GrantRequest,
        value: &CachedTokenResponse,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(cache_lifetime(value, self.skew))
    }
}

/// A concurrent cache of token responses keyed by the request that produced
/// them
#[derive(Clone)]
pub struct TokenCache {
    cache: Cache<GrantRequest, CachedTokenResponse>,
    properties: CacheProperties,
}

impl TokenCache {
    /// Constructs a cache sized and skewed per `properties`
    pub fn new(properties: CacheProperties) -> Self {
        let cache = Cache::builder()
            .max_capacity(properties.maximum_size)
            .expire_after(SkewedExpiry {
                skew: properties.evict_skew(),
            })
            .build();

        Self { cache, properties }
    }

    /// The configuration of this cache
    pub fn properties(&self) -> &CacheProperties {
        &self.properties
    }

    /// Returns the cached response for `request`, or computes and caches one
    ///
    /// Concurrent callers for the same request share a single computation. A
    /// failed computation is reported to each of them and is not cached.
    ///
    /// # Errors
    ///
    /// Returns the error from the computation.
    pub async fn get_or_compute<F>(
        &self,
        request: &GrantRequest,
        compute: F,
    ) -> Result<CachedTokenResponse, ClientError>
    where
        F: Future<Output = Result<CachedTokenResponse, ClientError>>,
    {
        if let Some(token) = self.cache.get(request).await {
            tracing::trace!(grant_type = %request.grant_type(), "token cache hit");
            return Ok(token);
        }

        tracing::debug!(grant_type = %request.grant_type(), "token cache miss");
        self.cache
            .try_get_with_by_ref(request, compute)
            .await
            .map_err(|err| (*err).clone())
    }

    /// Drops every cached response
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("entries", &self.cache.entry_count())
            .field("properties", &self.properties)
            .finish()
    }
}
