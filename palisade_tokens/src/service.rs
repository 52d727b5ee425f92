//! Acquisition of access tokens for configured clients

use std::{fmt, sync::Arc};

use aliri_clock::{Clock, System};
use moka::future::Cache;
use palisade::{
    oidc::{HttpMetadataResolver, MetadataResolver},
    resource::{HttpResourceRetriever, ProxySettings, RetrievalSettings},
    ValidationContextHolder,
};
use url::Url;

use crate::{
    auth::ClientAuthentication,
    cache::TokenCache,
    client::GrantTokenClient,
    config::{CacheProperties, ClientProperties, GrantType},
    dto::CachedTokenResponse,
    grant::{Grant, GrantRequest},
    http::{OAuth2HttpClient, ReqwestOAuth2HttpClient},
    AccessToken, ClientError,
};

/// Supplies the token that on-behalf-of and token exchange grants act upon
pub trait SubjectTokenResolver: fmt::Debug + Send + Sync {
    /// The token of the caller currently being served, if any
    fn subject_token(&self) -> Option<AccessToken>;
}

/// Resolves the subject token from the validated tokens of the request being
/// served
///
/// The first token that passed validation is used. Outside of a validation
/// scope, no token is resolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationContextTokenResolver;

impl SubjectTokenResolver for ValidationContextTokenResolver {
    fn subject_token(&self) -> Option<AccessToken> {
        let context = ValidationContextHolder::current()?;
        let token = context.first_valid_token()?;
        Some(AccessToken::from(token.encoded().as_str()))
    }
}

const MAX_TOKEN_ENDPOINTS: u64 = 100;

/// Acquires access tokens for client registrations, caching them when
/// configured to
///
/// Each grant type may have its own cache. Cached responses are keyed by
/// the complete grant request, so identical requests share a token until
/// shortly before it expires.
pub struct OAuth2AccessTokenService<H, C = System> {
    client: GrantTokenClient<H, C>,
    subject_tokens: Arc<dyn SubjectTokenResolver>,
    metadata: Option<Arc<dyn MetadataResolver>>,
    token_endpoints: Cache<Url, Url>,
    client_credentials_cache: Option<TokenCache>,
    on_behalf_of_cache: Option<TokenCache>,
    token_exchange_cache: Option<TokenCache>,
}

impl OAuth2AccessTokenService<ReqwestOAuth2HttpClient> {
    /// Constructs a service that reaches token endpoints and discovery
    /// documents over HTTP
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP clients cannot be constructed.
    pub fn http(settings: RetrievalSettings, proxy: &ProxySettings) -> Result<Self, ClientError> {
        let retriever = HttpResourceRetriever::with_proxy(settings, proxy)?;
        let client = ReqwestOAuth2HttpClient::with_proxy(settings, proxy)?;

        Ok(Self::new(GrantTokenClient::new(client))
            .with_metadata_resolver(Arc::new(HttpMetadataResolver::new(retriever))))
    }
}

impl<H, C> OAuth2AccessTokenService<H, C> {
    /// Constructs a service without caches that resolves subject tokens from
    /// the current validation context
    pub fn new(client: GrantTokenClient<H, C>) -> Self {
        Self {
            client,
            subject_tokens: Arc::new(ValidationContextTokenResolver),
            metadata: None,
            token_endpoints: Cache::new(MAX_TOKEN_ENDPOINTS),
            client_credentials_cache: None,
            on_behalf_of_cache: None,
            token_exchange_cache: None,
        }
    }

    /// Sets where subject tokens come from
    pub fn with_subject_token_resolver(
        mut self,
        resolver: impl SubjectTokenResolver + 'static,
    ) -> Self {
        self.subject_tokens = Arc::new(resolver);
        self
    }

    /// Sets how token endpoints are discovered for registrations that only
    /// name a discovery document
    pub fn with_metadata_resolver(mut self, resolver: Arc<dyn MetadataResolver>) -> Self {
        self.metadata = Some(resolver);
        self
    }

    /// Caches client credentials grants
    pub fn with_client_credentials_cache(mut self, properties: CacheProperties) -> Self {
        self.client_credentials_cache = Some(TokenCache::new(properties));
        self
    }

    /// Caches on-behalf-of grants
    pub fn with_on_behalf_of_cache(mut self, properties: CacheProperties) -> Self {
        self.on_behalf_of_cache = Some(TokenCache::new(properties));
        self
    }

    /// Caches token exchange grants
    pub fn with_token_exchange_cache(mut self, properties: CacheProperties) -> Self {
        self.token_exchange_cache = Some(TokenCache::new(properties));
        self
    }

    fn cache_for(&self, grant_type: GrantType) -> Option<&TokenCache> {
        match grant_type {
            GrantType::ClientCredentials => self.client_credentials_cache.as_ref(),
            GrantType::JwtBearer => self.on_behalf_of_cache.as_ref(),
            GrantType::TokenExchange => self.token_exchange_cache.as_ref(),
        }
    }
}

impl<H, C> OAuth2AccessTokenService<H, C>
where
    H: OAuth2HttpClient,
    C: Clock + Send + Sync,
{
    /// Acquires an access token for the client registration `props`
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is incomplete, if the grant
    /// needs a subject token and none is available, or if the token endpoint
    /// cannot issue a token.
    #[tracing::instrument(
        skip_all,
        fields(
            grant_type = %props.grant_type,
            client_id = %props.authentication.client_id,
        ),
    )]
    pub async fn get_access_token(
        &self,
        props: &ClientProperties,
    ) -> Result<CachedTokenResponse, ClientError> {
        let grant = self.grant_for(props)?;
        let auth = ClientAuthentication::from_properties(&props.authentication)?;
        let token_url = self.token_endpoint(props).await?;

        let request = GrantRequest::new(token_url, auth.credential()?, props.scope.clone(), grant);

        match self.cache_for(props.grant_type) {
            Some(cache) => {
                cache
                    .get_or_compute(&request, self.client.get_token_response(&request, &auth))
                    .await
            }
            None => self.client.get_token_response(&request, &auth).await,
        }
    }

    fn grant_for(&self, props: &ClientProperties) -> Result<Grant, ClientError> {
        match props.grant_type {
            GrantType::ClientCredentials => Ok(Grant::ClientCredentials),
            GrantType::JwtBearer => {
                let assertion = self
                    .subject_tokens
                    .subject_token()
                    .ok_or(ClientError::NoAuthenticatedToken)?;
                Ok(Grant::OnBehalfOf { assertion })
            }
            GrantType::TokenExchange => {
                let exchange = props.token_exchange.clone().ok_or_else(|| {
                    ClientError::Configuration(format!(
                        "client `{}` has no token exchange parameters",
                        props.authentication.client_id
                    ))
                })?;
                let subject_token = self
                    .subject_tokens
                    .subject_token()
                    .ok_or(ClientError::MissingSubjectToken)?;
                Ok(Grant::TokenExchange {
                    subject_token,
                    exchange,
                })
            }
        }
    }

    async fn token_endpoint(&self, props: &ClientProperties) -> Result<Url, ClientError> {
        if let Some(url) = &props.token_endpoint_url {
            return Ok(url.clone());
        }

        let Some(well_known_url) = &props.well_known_url else {
            return Err(ClientError::Configuration(format!(
                "client `{}` has neither a token endpoint nor a discovery document",
                props.authentication.client_id
            )));
        };

        let Some(metadata) = &self.metadata else {
            return Err(ClientError::Configuration(
                "no metadata resolver configured for token endpoint discovery".to_owned(),
            ));
        };

        self.token_endpoints
            .try_get_with_by_ref(well_known_url, async {
                let resolved = metadata.resolve(well_known_url).await?;
                resolved.token_endpoint.ok_or_else(|| {
                    ClientError::Configuration(format!(
                        "discovery document at {well_known_url} has no token endpoint"
                    ))
                })
            })
            .await
            .map_err(|err| (*err).clone())
    }
}

impl<H, C> fmt::Debug for OAuth2AccessTokenService<H, C>
where
    H: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OAuth2AccessTokenService")
            .field("client", &self.client)
            .field("subject_tokens", &self.subject_tokens)
            .field("metadata", &self.metadata)
            .field("client_credentials_cache", &self.client_credentials_cache)
            .field("on_behalf_of_cache", &self.on_behalf_of_cache)
            .field("token_exchange_cache", &self.token_exchange_cache)
            .finish()
    }
}
