//! Key sets used to verify token signatures
//!
//! A [`KeySource`] is bound to a single issuer's key set location. Without
//! a cache, every lookup fetches the key set. With a [`KeyCachePolicy`],
//! fetched key sets are reused until they expire; concurrent callers that
//! find the cache stale share a single fetch, and a background task can
//! refresh the key set shortly before it expires.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use aliri::{jwa, jwk::KeyIdRef, Jwk, Jwks};
use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use url::Url;

use crate::resource::{ResourceRetriever, RetrievalError};

/// An error while obtaining a key set
#[derive(Debug, Error)]
pub enum KeySourceError {
    /// The key set could not be retrieved
    #[error("unable to retrieve JWKS")]
    Retrieval(#[from] RetrievalError),

    /// The retrieved key set was not valid
    #[error("malformed JWKS")]
    Malformed(#[from] serde_json::Error),
}

/// Caching behavior for a [`KeySource`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyCachePolicy {
    lifespan: Duration,
    refresh_ahead: Duration,
    min_refresh_interval: Duration,
}

impl KeyCachePolicy {
    /// Fetched key sets are trusted for `lifespan`
    pub fn new(lifespan: Duration) -> Self {
        Self {
            lifespan,
            refresh_ahead: Duration::from_secs(60),
            min_refresh_interval: Duration::from_secs(15),
        }
    }

    /// Starts background refreshes this long before the key set expires
    #[must_use]
    pub fn with_refresh_ahead(mut self, refresh_ahead: Duration) -> Self {
        self.refresh_ahead = refresh_ahead;
        self
    }

    /// Limits how often an unknown key ID can force a refresh
    #[must_use]
    pub fn with_min_refresh_interval(mut self, min_refresh_interval: Duration) -> Self {
        self.min_refresh_interval = min_refresh_interval;
        self
    }
}

#[derive(Debug)]
struct CachedKeys {
    jwks: Arc<Jwks>,
    fetched_at: Instant,
    expires_at: Instant,
}

#[derive(Debug)]
struct KeyCache {
    policy: KeyCachePolicy,
    data: ArcSwapOption<CachedKeys>,
    refresh_lock: Mutex<()>,
}

struct Inner {
    jwks_url: Url,
    retriever: Arc<dyn ResourceRetriever>,
    cache: Option<KeyCache>,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("jwks_url", &self.jwks_url.as_str())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// The source of verification keys for a single issuer
#[derive(Debug, Clone)]
#[must_use]
pub struct KeySource {
    inner: Arc<Inner>,
}

impl KeySource {
    /// A key source that fetches the key set on every lookup
    pub fn new(jwks_url: Url, retriever: Arc<dyn ResourceRetriever>) -> Self {
        Self {
            inner: Arc::new(Inner {
                jwks_url,
                retriever,
                cache: None,
            }),
        }
    }

    /// A key source that caches fetched key sets according to `policy`
    pub fn cached(
        jwks_url: Url,
        retriever: Arc<dyn ResourceRetriever>,
        policy: KeyCachePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jwks_url,
                retriever,
                cache: Some(KeyCache {
                    policy,
                    data: ArcSwapOption::empty(),
                    refresh_lock: Mutex::new(()),
                }),
            }),
        }
    }

    /// The location of the key set
    pub fn jwks_url(&self) -> &Url {
        &self.inner.jwks_url
    }

    /// Indicates whether fetched key sets are cached
    pub fn is_cached(&self) -> bool {
        self.inner.cache.is_some()
    }

    /// The current key set
    ///
    /// # Errors
    ///
    /// Returns an error if the key set needs to be fetched and cannot be.
    pub async fn keys(&self) -> Result<Arc<Jwks>, KeySourceError> {
        let Some(cache) = &self.inner.cache else {
            return Ok(Arc::new(self.fetch().await?));
        };

        if let Some(cached) = cache.data.load_full() {
            if Instant::now() < cached.expires_at {
                return Ok(Arc::clone(&cached.jwks));
            }
        }

        self.refresh_unless(cache, |cached| Instant::now() < cached.expires_at)
            .await
    }

    /// Finds the key matching the given key ID and algorithm
    ///
    /// When the key set is cached and no matching key is found, the key set
    /// is refreshed once, unless it was fetched within the minimum refresh
    /// interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the key set cannot be obtained.
    pub async fn verification_key(
        &self,
        kid: Option<&KeyIdRef>,
        alg: jwa::Algorithm,
    ) -> Result<Option<Jwk>, KeySourceError> {
        let jwks = self.keys().await?;
        if let Some(key) = jwks.get_key_by_opt(kid, alg) {
            return Ok(Some(key.clone()));
        }

        let Some(cache) = &self.inner.cache else {
            return Ok(None);
        };

        tracing::debug!(
            kid = kid.map(KeyIdRef::as_str),
            "no matching key in cached JWKS, refreshing"
        );

        let min_interval = cache.policy.min_refresh_interval;
        let jwks = self
            .refresh_unless(cache, |cached| cached.fetched_at.elapsed() < min_interval)
            .await?;

        Ok(jwks.get_key_by_opt(kid, alg).cloned())
    }

    /// Starts a background task that refreshes the key set before it expires
    ///
    /// The task stops once every handle to this key source has been dropped.
    /// Does nothing when the key set is not cached or no Tokio runtime is
    /// available.
    pub fn spawn_refresh(&self) {
        let Some(cache) = &self.inner.cache else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime available, JWKS will only be refreshed on demand");
            return;
        };

        let min_interval = cache.policy.min_refresh_interval;
        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            while let Some(delay) = Self::upgrade(&weak).map(|source| source.next_refresh_delay()) {
                tokio::time::sleep(delay.max(min_interval)).await;

                let Some(source) = Self::upgrade(&weak) else {
                    break;
                };

                if let Err(err) = source.refresh_ahead().await {
                    let error: &dyn std::error::Error = &err;
                    tracing::warn!(
                        error,
                        jwks.url = %source.jwks_url(),
                        "background JWKS refresh failed, lookups will fetch on demand"
                    );
                }
            }
        });
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    fn next_refresh_delay(&self) -> Duration {
        let Some(cache) = &self.inner.cache else {
            return Duration::ZERO;
        };

        cache.data.load_full().map_or(Duration::ZERO, |cached| {
            cached
                .expires_at
                .checked_sub(cache.policy.refresh_ahead)
                .map_or(Duration::ZERO, |at| at.saturating_duration_since(Instant::now()))
        })
    }

    async fn refresh_ahead(&self) -> Result<(), KeySourceError> {
        if let Some(cache) = &self.inner.cache {
            let refresh_ahead = cache.policy.refresh_ahead;
            self.refresh_unless(cache, |cached| {
                cached.expires_at.saturating_duration_since(Instant::now()) > refresh_ahead
            })
            .await?;
        }
        Ok(())
    }

    /// Fetches and stores a new key set, unless another caller already
    /// stored one that satisfies `is_current` while this one waited
    async fn refresh_unless(
        &self,
        cache: &KeyCache,
        is_current: impl Fn(&CachedKeys) -> bool,
    ) -> Result<Arc<Jwks>, KeySourceError> {
        let _guard = cache.refresh_lock.lock().await;

        if let Some(cached) = cache.data.load_full() {
            if is_current(&cached) {
                return Ok(Arc::clone(&cached.jwks));
            }
        }

        let jwks = Arc::new(self.fetch().await?);
        let fetched_at = Instant::now();
        cache.data.store(Some(Arc::new(CachedKeys {
            jwks: Arc::clone(&jwks),
            fetched_at,
            expires_at: fetched_at + cache.policy.lifespan,
        })));

        Ok(jwks)
    }

    #[tracing::instrument(skip(self), fields(jwks.url = %self.inner.jwks_url))]
    async fn fetch(&self) -> Result<Jwks, KeySourceError> {
        tracing::debug!("fetching JWKS");
        let body = self.inner.retriever.retrieve(&self.inner.jwks_url).await?;
        let jwks: Jwks = serde_json::from_slice(&body)?;
        tracing::debug!(keys = jwks.keys().len(), "JWKS fetched");
        Ok(jwks)
    }
}
