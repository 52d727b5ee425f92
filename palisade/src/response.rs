//! Utilities for generating HTTP responses on authorization failures
//!
//! Responses never describe which claim was missing or what value a token
//! carried. The `www-authenticate` header only distinguishes a missing token
//! from an insufficient one.

use http::{header, HeaderValue, Response, StatusCode};

use crate::policy::AuthorizationError;

impl AuthorizationError {
    /// The HTTP status that this denial maps to
    ///
    /// A missing token is `401 Unauthorized`; everything else is
    /// `403 Forbidden`.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TokenMissing { .. } => StatusCode::UNAUTHORIZED,
            Self::ClaimMismatch { .. } | Self::Misconfigured => StatusCode::FORBIDDEN,
        }
    }

    /// Builds the response for this denial
    pub fn into_response<Body: Default>(&self) -> Response<Body> {
        match self {
            Self::TokenMissing { .. } => unauthorized(),
            Self::ClaimMismatch { .. } | Self::Misconfigured => forbidden(),
        }
    }
}

/// Build a `401 Unauthorized` response
///
/// ```http
/// HTTP/1.1 401 Unauthorized
/// www-authenticate: Bearer error="invalid_token"
/// ```
pub fn unauthorized<Body: Default>() -> Response<Body> {
    denial(
        StatusCode::UNAUTHORIZED,
        HeaderValue::from_static(r#"Bearer error="invalid_token""#),
    )
}

/// Build a `403 Forbidden` response
///
/// ```http
/// HTTP/1.1 403 Forbidden
/// www-authenticate: Bearer error="insufficient_scope"
/// ```
pub fn forbidden<Body: Default>() -> Response<Body> {
    denial(
        StatusCode::FORBIDDEN,
        HeaderValue::from_static(r#"Bearer error="insufficient_scope""#),
    )
}

fn denial<Body: Default>(status: StatusCode, challenge: HeaderValue) -> Response<Body> {
    let mut resp = Response::new(Body::default());
    *resp.status_mut() = status;
    resp.headers_mut().insert(header::WWW_AUTHENTICATE, challenge);
    resp
}
