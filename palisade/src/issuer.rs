use std::{sync::Arc, time::Duration};

use aliri::jwt::{Audience, IssuerRef};
use url::Url;

use crate::{
    config::{IssuerName, IssuerNameRef, IssuerProperties, ValidatorKind},
    jwks::{KeyCachePolicy, KeySource},
    oidc::{IssuerMetadata, MetadataResolver},
    registry::RegistryError,
    resource::ResourceRetriever,
    validator::{DefaultJwtValidator, LegacyJwtValidator, TokenValidator},
};

/// Everything needed to validate tokens from one trusted issuer
///
/// Built once, when the issuer is registered, and immutable afterwards.
#[derive(Debug, Clone)]
pub struct IssuerTrustConfig {
    short_name: IssuerName,
    discovery_url: Url,
    metadata: IssuerMetadata,
    accepted_audiences: Vec<Audience>,
    cookie_name: Option<String>,
    optional_claims: Vec<String>,
    validator: TokenValidator,
}

impl IssuerTrustConfig {
    /// Resolves the issuer's metadata and builds its trust configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the discovery document cannot be resolved.
    pub async fn resolve(
        short_name: IssuerName,
        properties: &IssuerProperties,
        resolver: &dyn MetadataResolver,
        retriever: Arc<dyn ResourceRetriever>,
    ) -> Result<Self, RegistryError> {
        let metadata = resolver
            .resolve(&properties.discovery_url)
            .await
            .map_err(|source| RegistryError::MetadataUnavailable {
                short_name: short_name.clone(),
                source,
            })?;

        Ok(Self::from_metadata(short_name, properties, metadata, retriever))
    }

    /// Builds the trust configuration from already resolved metadata
    ///
    /// When key set caching is enabled and a Tokio runtime is available, a
    /// background refresh of the issuer's key set is started.
    pub fn from_metadata(
        short_name: IssuerName,
        properties: &IssuerProperties,
        metadata: IssuerMetadata,
        retriever: Arc<dyn ResourceRetriever>,
    ) -> Self {
        let keys = match properties.jwks_cache {
            Some(cache) => {
                let policy = KeyCachePolicy::new(Duration::from_secs(cache.lifespan_secs))
                    .with_refresh_ahead(Duration::from_secs(cache.refresh_ahead_secs));
                let keys = KeySource::cached(metadata.jwks_uri.clone(), retriever, policy);
                keys.spawn_refresh();
                keys
            }
            None => KeySource::new(metadata.jwks_uri.clone(), retriever),
        };

        let validator: TokenValidator = match &properties.validation {
            ValidatorKind::Default => {
                let validator = properties.accepted_audience.iter().fold(
                    DefaultJwtValidator::new(metadata.issuer.clone(), keys),
                    |v, aud| v.with_accepted_audience(aud.clone()),
                );
                properties
                    .optional_claims
                    .iter()
                    .fold(validator, |v, claim| v.with_optional_claim(claim.clone()))
                    .with_clock_skew_secs(properties.clock_skew_secs)
                    .into()
            }
            ValidatorKind::Legacy { required_claims } => LegacyJwtValidator::new(
                metadata.issuer.clone(),
                keys,
                required_claims.iter().cloned(),
            )
            .with_clock_skew_secs(properties.clock_skew_secs)
            .into(),
        };

        Self {
            short_name,
            discovery_url: properties.discovery_url.clone(),
            metadata,
            accepted_audiences: properties.accepted_audience.clone(),
            cookie_name: properties.cookie_name.clone(),
            optional_claims: properties.optional_claims.clone(),
            validator,
        }
    }

    /// The short name under which the issuer is registered
    pub fn short_name(&self) -> &IssuerNameRef {
        &self.short_name
    }

    /// The issuer identifier expected in the `iss` claim
    pub fn issuer(&self) -> &IssuerRef {
        &self.metadata.issuer
    }

    /// Location of the discovery document
    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    /// Location of the issuer's key set
    pub fn jwks_url(&self) -> &Url {
        &self.metadata.jwks_uri
    }

    /// Location of the issuer's token endpoint, if advertised
    pub fn token_endpoint(&self) -> Option<&Url> {
        self.metadata.token_endpoint.as_ref()
    }

    /// Audiences accepted in tokens from this issuer
    pub fn accepted_audiences(&self) -> &[Audience] {
        &self.accepted_audiences
    }

    /// The cookie that may carry a token from this issuer
    pub fn cookie_name(&self) -> Option<&str> {
        self.cookie_name.as_deref()
    }

    /// Claims that tokens from this issuer need not carry
    pub fn optional_claims(&self) -> &[String] {
        &self.optional_claims
    }

    /// The validator for tokens from this issuer
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }
}
