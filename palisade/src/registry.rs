use std::{collections::HashMap, sync::Arc};

use aliri::jwt::Issuer;
use thiserror::Error;

use crate::{
    config::{IssuerName, IssuerProperties, ValidationProperties},
    issuer::IssuerTrustConfig,
    oidc::{HttpMetadataResolver, MetadataError, MetadataResolver},
    resource::{HttpResourceRetriever, ProxySettings, ResourceRetriever, RetrievalError},
};

/// An error while registering a trusted issuer
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The issuer's discovery document could not be resolved
    #[error("metadata unavailable for issuer `{short_name}`")]
    MetadataUnavailable {
        /// The issuer being registered
        short_name: IssuerName,
        /// The underlying error
        #[source]
        source: MetadataError,
    },

    /// The HTTP client for the issuer could not be constructed
    #[error("unable to construct resource retriever for issuer `{short_name}`")]
    Retriever {
        /// The issuer being registered
        short_name: IssuerName,
        /// The underlying error
        #[source]
        source: RetrievalError,
    },

    /// Another issuer is already registered under the same short name
    #[error("issuer short name `{0}` is registered more than once")]
    DuplicateShortName(IssuerName),

    /// Another short name already refers to the same issuer
    #[error("issuer `{0}` is registered under more than one short name")]
    DuplicateIssuer(Issuer),
}

#[derive(Debug, Default)]
struct Inner {
    issuers: Vec<IssuerTrustConfig>,
    by_short_name: HashMap<String, usize>,
    by_issuer: HashMap<String, usize>,
}

/// The set of trusted issuers, keyed by short name and by issuer identifier
///
/// A registry is populated once, through a [`RegistryBuilder`], and is
/// read-only afterwards. Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MultiIssuerRegistry {
    inner: Arc<Inner>,
}

impl MultiIssuerRegistry {
    /// Starts building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Builds a registry from configuration, resolving each issuer over HTTP
    ///
    /// # Errors
    ///
    /// Returns an error if any issuer cannot be registered.
    pub async fn from_properties(properties: &ValidationProperties) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();

        for (short_name, issuer) in &properties.issuers {
            let proxy = ProxySettings {
                proxy_url: issuer.proxy_url.clone(),
                use_plaintext_for_https: issuer.use_plaintext_for_https,
            };

            let retriever: Arc<dyn ResourceRetriever> = Arc::new(
                HttpResourceRetriever::with_proxy(properties.retrieval, &proxy).map_err(
                    |source| RegistryError::Retriever {
                        short_name: short_name.clone(),
                        source,
                    },
                )?,
            );
            let resolver = HttpMetadataResolver::new(Arc::clone(&retriever));

            builder
                .register(short_name.clone(), issuer, &resolver, retriever)
                .await?;
        }

        Ok(builder.build())
    }

    /// Finds an issuer by short name, falling back to the issuer identifier
    pub fn lookup(&self, key: &str) -> Option<&IssuerTrustConfig> {
        self.by_short_name(key).or_else(|| self.by_issuer(key))
    }

    /// Finds an issuer by the short name under which it was registered
    pub fn by_short_name(&self, short_name: &str) -> Option<&IssuerTrustConfig> {
        self.inner
            .by_short_name
            .get(short_name)
            .map(|&idx| &self.inner.issuers[idx])
    }

    /// Finds an issuer by the identifier carried in the `iss` claim
    pub fn by_issuer(&self, issuer: &str) -> Option<&IssuerTrustConfig> {
        self.inner
            .by_issuer
            .get(issuer)
            .map(|&idx| &self.inner.issuers[idx])
    }

    /// All registered issuers, in registration order
    pub fn iter(&self) -> impl Iterator<Item = &IssuerTrustConfig> {
        self.inner.issuers.iter()
    }

    /// The number of registered issuers
    pub fn len(&self) -> usize {
        self.inner.issuers.len()
    }

    /// Indicates whether no issuers are registered
    pub fn is_empty(&self) -> bool {
        self.inner.issuers.is_empty()
    }
}

/// Collects issuers for a [`MultiIssuerRegistry`]
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    inner: Inner,
}

impl RegistryBuilder {
    /// Resolves an issuer's metadata and adds it under `short_name`
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer's metadata cannot be resolved or the
    /// issuer is already registered.
    #[tracing::instrument(skip(self, properties, resolver, retriever), fields(discovery.url = %properties.discovery_url))]
    pub async fn register(
        &mut self,
        short_name: IssuerName,
        properties: &IssuerProperties,
        resolver: &dyn MetadataResolver,
        retriever: Arc<dyn ResourceRetriever>,
    ) -> Result<&IssuerTrustConfig, RegistryError> {
        if self.inner.by_short_name.contains_key(short_name.as_str()) {
            return Err(RegistryError::DuplicateShortName(short_name));
        }

        let config = IssuerTrustConfig::resolve(short_name, properties, resolver, retriever)
            .await
            .map_err(|err| {
                let error: &dyn std::error::Error = &err;
                tracing::error!(error, "unable to register issuer");
                err
            })?;

        self.add(config)
    }

    /// Adds an issuer whose trust configuration is already built
    ///
    /// # Errors
    ///
    /// Returns an error if the short name or issuer identifier is already
    /// registered.
    pub fn add(&mut self, config: IssuerTrustConfig) -> Result<&IssuerTrustConfig, RegistryError> {
        let short_name = config.short_name().as_str();
        let issuer = config.issuer().as_str();

        if self.inner.by_short_name.contains_key(short_name) {
            return Err(RegistryError::DuplicateShortName(
                config.short_name().to_owned(),
            ));
        }

        if self.inner.by_issuer.contains_key(issuer) {
            return Err(RegistryError::DuplicateIssuer(config.issuer().to_owned()));
        }

        tracing::info!(
            short_name,
            issuer,
            jwks.url = %config.jwks_url(),
            "registered trusted issuer"
        );

        let idx = self.inner.issuers.len();
        self.inner.by_short_name.insert(short_name.to_owned(), idx);
        self.inner.by_issuer.insert(issuer.to_owned(), idx);
        self.inner.issuers.push(config);

        Ok(&self.inner.issuers[idx])
    }

    /// Freezes the collected issuers into a registry
    pub fn build(self) -> MultiIssuerRegistry {
        MultiIssuerRegistry {
            inner: Arc::new(self.inner),
        }
    }
}
