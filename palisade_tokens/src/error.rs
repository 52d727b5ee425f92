use std::sync::Arc;

use palisade::{oidc::MetadataError, resource::RetrievalError};
use thiserror::Error;

/// An error while acquiring a token
///
/// Cloning is cheap, so one failed acquisition can be reported to every
/// caller that was waiting on it.
#[derive(Clone, Debug, Error)]
pub enum ClientError {
    /// The token endpoint answered with a non-success status
    #[error("token endpoint responded with status {status}: {body}")]
    ErrorResponse {
        /// The response status code
        status: u16,
        /// The response body, for diagnosis
        body: String,
    },

    /// The token endpoint could not be reached, or its response could not be
    /// read
    #[error("unable to communicate with token endpoint")]
    Transport(#[source] Arc<RetrievalError>),

    /// The token endpoint returned a response that is not a token response
    #[error("malformed token response")]
    MalformedResponse(#[source] Arc<serde_json::Error>),

    /// The token endpoint could not be discovered
    #[error("unable to resolve token endpoint")]
    Metadata(#[source] Arc<MetadataError>),

    /// An on-behalf-of grant was requested without an authenticated caller
    #[error("no authenticated token available for on-behalf-of grant")]
    NoAuthenticatedToken,

    /// A token exchange was requested without a subject token
    #[error("no subject token available for token exchange")]
    MissingSubjectToken,

    /// The client registration is incomplete or inconsistent
    #[error("invalid client configuration: {0}")]
    Configuration(String),

    /// The client assertion could not be created
    #[error("unable to create client assertion")]
    ClientAssertion(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<RetrievalError> for ClientError {
    fn from(err: RetrievalError) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(Arc::new(err))
    }
}

impl From<MetadataError> for ClientError {
    fn from(err: MetadataError) -> Self {
        Self::Metadata(Arc::new(err))
    }
}
