//! Retrieval of remote documents, such as discovery documents and key sets

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{header, Client, Proxy};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Timeouts and limits applied to every outbound retrieval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Connection timeout, in milliseconds
    pub connect_timeout_millis: u64,

    /// Timeout for receiving the complete response, in milliseconds
    pub read_timeout_millis: u64,

    /// Responses larger than this are rejected
    pub max_response_bytes: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            connect_timeout_millis: 10_000,
            read_timeout_millis: 10_000,
            max_response_bytes: 512 * 1024,
        }
    }
}

impl RetrievalSettings {
    /// The connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_millis)
    }

    /// The read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_millis)
    }
}

/// Proxy routing for a single issuer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxySettings {
    /// A proxy to route all requests through
    pub proxy_url: Option<Url>,

    /// Rewrites `https` URLs to `http` before sending
    pub use_plaintext_for_https: bool,
}

/// An error while retrieving a remote document
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The HTTP client could not be constructed
    #[error("unable to construct HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    /// The request could not be sent or timed out
    #[error("error sending request to {url}")]
    RequestSend {
        /// The requested location
        url: Url,
        /// The underlying error
        #[source]
        source: reqwest::Error,
    },

    /// The server responded with a non-success status
    #[error("unexpected status {status} from {url}")]
    ErrorStatus {
        /// The requested location
        url: Url,
        /// The response status code
        status: u16,
    },

    /// The response body exceeded the configured limit
    #[error("response from {url} exceeds the {limit} byte limit")]
    TooLarge {
        /// The requested location
        url: Url,
        /// The configured limit
        limit: usize,
    },

    /// The response body could not be read
    #[error("error reading response body from {url}")]
    BodyRead {
        /// The requested location
        url: Url,
        /// The underlying error
        #[source]
        source: reqwest::Error,
    },
}

/// A source of remote documents
#[async_trait]
pub trait ResourceRetriever: fmt::Debug + Send + Sync {
    /// Retrieves the document at the given location
    async fn retrieve(&self, url: &Url) -> Result<Bytes, RetrievalError>;
}

#[async_trait]
impl<T> ResourceRetriever for Arc<T>
where
    T: ResourceRetriever + ?Sized,
{
    async fn retrieve(&self, url: &Url) -> Result<Bytes, RetrievalError> {
        (**self).retrieve(url).await
    }
}

/// Retrieves documents over HTTP
#[derive(Clone, Debug)]
pub struct HttpResourceRetriever {
    client: Client,
    max_response_bytes: usize,
    use_plaintext_for_https: bool,
}

impl HttpResourceRetriever {
    /// Constructs a retriever that connects directly
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(settings: RetrievalSettings) -> Result<Self, RetrievalError> {
        Self::with_proxy(settings, &ProxySettings::default())
    }

    /// Constructs a retriever with the given proxy routing
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy URL is invalid or the underlying HTTP
    /// client cannot be constructed.
    pub fn with_proxy(
        settings: RetrievalSettings,
        proxy: &ProxySettings,
    ) -> Result<Self, RetrievalError> {
        let mut builder = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.read_timeout());

        if let Some(proxy_url) = &proxy.proxy_url {
            tracing::debug!(proxy.url = %proxy_url, "routing retrieval through proxy");
            builder = builder.proxy(Proxy::all(proxy_url.as_str()).map_err(RetrievalError::ClientBuild)?);
        }

        let client = builder.build().map_err(RetrievalError::ClientBuild)?;

        Ok(Self {
            client,
            max_response_bytes: settings.max_response_bytes,
            use_plaintext_for_https: proxy.use_plaintext_for_https,
        })
    }

    fn effective_url(&self, url: &Url) -> Url {
        let mut url = url.clone();
        if self.use_plaintext_for_https && url.scheme() == "https" {
            // Switching between special schemes cannot fail
            let _ = url.set_scheme("http");
        }
        url
    }
}

#[async_trait]
impl ResourceRetriever for HttpResourceRetriever {
    #[tracing::instrument(skip(self), fields(url = %url))]
    async fn retrieve(&self, url: &Url) -> Result<Bytes, RetrievalError> {
        let url = self.effective_url(url);

        let response = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| RetrievalError::RequestSend {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "retrieval returned an error status");
            return Err(RetrievalError::ErrorStatus {
                url,
                status: status.as_u16(),
            });
        }

        read_body_limited(response, &url, self.max_response_bytes).await
    }
}

/// Reads a response body, rejecting it once it grows past `limit` bytes
///
/// A declared `Content-Length` beyond the limit is rejected before any of
/// the body is read.
///
/// # Errors
///
/// Returns an error if the body exceeds the limit or cannot be read.
pub async fn read_body_limited(
    mut response: reqwest::Response,
    url: &Url,
    limit: usize,
) -> Result<Bytes, RetrievalError> {
    let too_large = || RetrievalError::TooLarge {
        url: url.clone(),
        limit,
    };

    if response
        .content_length()
        .is_some_and(|len| len > limit as u64)
    {
        return Err(too_large());
    }

    let mut body = BytesMut::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|source| RetrievalError::BodyRead {
            url: url.clone(),
            source,
        })?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body.freeze())
}
