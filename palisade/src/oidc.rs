//! OpenID Connect discovery

use std::fmt;

use aliri::jwt::Issuer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::resource::{ResourceRetriever, RetrievalError};

/// The subset of an OpenID discovery document used by this crate
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IssuerMetadata {
    /// The issuer identifier, as it appears in the `iss` claim
    pub issuer: Issuer,

    /// Location of the issuer's key set
    pub jwks_uri: Url,

    /// Location of the issuer's token endpoint, if advertised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<Url>,
}

/// An error while resolving issuer metadata
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The discovery document could not be retrieved
    #[error("unable to retrieve discovery document")]
    Retrieval(#[from] RetrievalError),

    /// The discovery document was not valid
    #[error("malformed discovery document")]
    Malformed(#[from] serde_json::Error),
}

/// Resolves issuer metadata from a discovery document location
#[async_trait]
pub trait MetadataResolver: fmt::Debug + Send + Sync {
    /// Resolves the metadata published at `discovery_url`
    async fn resolve(&self, discovery_url: &Url) -> Result<IssuerMetadata, MetadataError>;
}

/// Resolves issuer metadata by retrieving and parsing the discovery document
#[derive(Debug, Clone)]
pub struct HttpMetadataResolver<R> {
    retriever: R,
}

impl<R> HttpMetadataResolver<R> {
    /// Constructs a resolver that retrieves documents using `retriever`
    pub fn new(retriever: R) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl<R> MetadataResolver for HttpMetadataResolver<R>
where
    R: ResourceRetriever,
{
    #[tracing::instrument(skip(self), fields(discovery.url = %discovery_url))]
    async fn resolve(&self, discovery_url: &Url) -> Result<IssuerMetadata, MetadataError> {
        let body = self.retriever.retrieve(discovery_url).await?;
        let metadata: IssuerMetadata = serde_json::from_slice(&body)?;

        tracing::debug!(
            issuer = %metadata.issuer,
            jwks.url = %metadata.jwks_uri,
            "resolved issuer metadata"
        );

        Ok(metadata)
    }
}
