//! Acquisition and caching of delegated access tokens
//!
//! A service that calls other services on behalf of its own callers needs
//! tokens for those downstream calls. This crate acquires them from an OAuth2
//! token endpoint using one of three grants:
//!
//! * _client credentials_, where the service acts on its own behalf;
//! * _on-behalf-of_ (JWT bearer), where the caller's validated token is
//!   presented as an assertion;
//! * _token exchange_, where the caller's token is exchanged for one aimed at
//!   another audience.
//!
//! The caller's token is taken from the [`ValidationContext`][palisade::ValidationContext]
//! installed by `palisade` for the request being served, so an acquisition
//! made while serving a request acts on behalf of that request's caller.
//!
//! Responses may be cached per grant type. Identical grant requests share a
//! cached token until shortly before it expires.
//!
//! ```no_run
//! use palisade::resource::{ProxySettings, RetrievalSettings};
//! use palisade_tokens::{
//!     config::{CacheProperties, ClientAuthenticationProperties, ClientProperties, GrantType},
//!     OAuth2AccessTokenService,
//! };
//!
//! # async fn acquire() -> color_eyre::Result<()> {
//! let service = OAuth2AccessTokenService::http(RetrievalSettings::default(), &ProxySettings::default())?
//!     .with_client_credentials_cache(CacheProperties::default());
//!
//! let client = ClientProperties::new(
//!     "https://login.example/oauth2/token".parse()?,
//!     GrantType::ClientCredentials,
//!     ClientAuthenticationProperties::basic("my-client", "my-secret"),
//! )
//! .with_scope("api://downstream/.default");
//!
//! let token = service.get_access_token(&client).await?;
//!
//! tracing::info!(
//!     token = format_args!("{:#?}", token.access_token()),
//!     expires_at = token.expires_at().0,
//!     "acquired access token"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! As with `palisade`, TLS support in `reqwest` comes from `default-tls`
//! unless default features are disabled and `rustls-tls` is enabled instead.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod auth;
mod braids;
pub mod cache;
pub mod client;
pub mod config;
pub mod dto;
mod error;
pub mod grant;
pub mod http;
mod service;


pub use braids::*;
pub use client::GrantTokenClient;
pub use dto::CachedTokenResponse;
pub use error::ClientError;
pub use grant::{Grant, GrantRequest};
pub use service::{OAuth2AccessTokenService, SubjectTokenResolver, ValidationContextTokenResolver};
