//! Transport to token endpoints

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use palisade::resource::{read_body_limited, ProxySettings, RetrievalError, RetrievalSettings};
use reqwest::{header, Client, Proxy};

use crate::{auth::TokenRequest, ClientError};

/// A raw response from a token endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenEndpointResponse {
    /// The response status code
    pub status: u16,
    /// The response body
    pub body: Bytes,
}

impl TokenEndpointResponse {
    /// Indicates whether the status is a success status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends form-encoded requests to token endpoints
#[async_trait]
pub trait OAuth2HttpClient: fmt::Debug + Send + Sync {
    /// POSTs `request`, returning whatever the endpoint responded with
    ///
    /// Non-success statuses are returned, not treated as errors.
    async fn post(&self, request: &TokenRequest) -> Result<TokenEndpointResponse, ClientError>;
}

#[async_trait]
impl<T> OAuth2HttpClient for std::sync::Arc<T>
where
    T: OAuth2HttpClient + ?Sized,
{
    async fn post(&self, request: &TokenRequest) -> Result<TokenEndpointResponse, ClientError> {
        (**self).post(request).await
    }
}

/// A token endpoint client backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestOAuth2HttpClient {
    client: Client,
    max_response_bytes: usize,
}

impl ReqwestOAuth2HttpClient {
    /// Constructs a client that connects directly
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(settings: RetrievalSettings) -> Result<Self, ClientError> {
        Self::with_proxy(settings, &ProxySettings::default())
    }

    /// Constructs a client with the given proxy routing
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the underlying HTTP
    /// client cannot be constructed.
    pub fn with_proxy(
        settings: RetrievalSettings,
        proxy: &ProxySettings,
    ) -> Result<Self, ClientError> {
        let mut builder = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout());

        if let Some(proxy_url) = &proxy.proxy_url {
            builder = builder.proxy(
                Proxy::all(proxy_url.as_str()).map_err(RetrievalError::ClientBuild)?,
            );
        }

        let client = builder.build().map_err(RetrievalError::ClientBuild)?;

        Ok(Self {
            client,
            max_response_bytes: settings.max_response_bytes,
        })
    }
}

#[async_trait]
impl OAuth2HttpClient for ReqwestOAuth2HttpClient {
    #[tracing::instrument(skip_all, fields(token_url = %request.url))]
    async fn post(&self, request: &TokenRequest) -> Result<TokenEndpointResponse, ClientError> {
        tracing::trace!("sending token request");

        let mut req = self
            .client
            .post(request.url.clone())
            .header(header::ACCEPT, "application/json")
            .form(&request.form);

        if let Some((client_id, client_secret)) = &request.basic_auth {
            req = req.basic_auth(client_id.as_str(), Some(client_secret.as_str()));
        }

        let resp = req.send().await.map_err(|source| RetrievalError::RequestSend {
            url: request.url.clone(),
            source,
        })?;

        let status = resp.status().as_u16();
        tracing::debug!(
            response.status = status,
            "received token response from token endpoint"
        );

        let body = read_body_limited(resp, &request.url, self.max_response_bytes).await?;

        Ok(TokenEndpointResponse { status, body })
    }
}
