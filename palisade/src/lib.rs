//! Multi-issuer bearer token validation and claim-based authorization
//!
//! A service that accepts tokens from several identity providers registers
//! each provider once, at startup, in a [`MultiIssuerRegistry`]. For each
//! inbound request, the [`ValidationPipeline`] extracts candidate tokens from
//! the `Authorization` header and from configured cookies, validates each one
//! against the issuer that it claims, and installs the surviving tokens as a
//! [`ValidationContext`] for the duration of the request.
//!
//! Endpoints are then guarded by an [`AuthorizationPolicy`], which is
//! evaluated against the installed context.
//!
//! ```no_run
//! use palisade::{
//!     AuthorizationPolicy, IssuerProperties, MultiIssuerRegistry, PolicyEvaluator,
//!     ValidationPipeline, ValidationProperties,
//! };
//!
//! # async fn handle(request: http::Request<()>) -> color_eyre::Result<()> {
//! let properties = ValidationProperties::default().with_issuer(
//!     "idporten",
//!     IssuerProperties::new("https://idporten.example/.well-known/openid-configuration".parse()?)
//!         .with_accepted_audience("my-service"),
//! );
//!
//! let registry = MultiIssuerRegistry::from_properties(&properties).await?;
//! let pipeline = ValidationPipeline::new(registry);
//!
//! let policy = AuthorizationPolicy::protected_with_claims("idporten", ["acr=Level4"])?;
//!
//! pipeline
//!     .process(&request, || async {
//!         match PolicyEvaluator.evaluate(Some(&policy)) {
//!             Ok(()) => println!("access granted"),
//!             Err(denial) => println!("access denied: {denial}"),
//!         }
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//!
//! This crate does not automatically enable TLS support in `reqwest`
//! beyond its `default-tls` default. If your application already uses
//! `reqwest` with some other TLS settings, disable default features and
//! enable `rustls-tls` instead.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod claims;
pub mod config;
mod context;
mod issuer;
pub mod jwks;
pub mod oidc;
mod pipeline;
mod policy;
mod registry;
pub mod request;
pub mod resource;
pub mod response;
mod retriever;
mod validator;


pub use claims::{JwtClaims, JwtToken, MalformedClaims};
pub use config::{IssuerName, IssuerNameRef, IssuerProperties, ValidationProperties};
pub use context::{ValidationContext, ValidationContextHolder};
pub use issuer::IssuerTrustConfig;
pub use pipeline::ValidationPipeline;
pub use policy::{
    AuthorizationError, AuthorizationPolicy, ClaimRequirement, Combinator, InvalidClaimSpec,
    IssuerRequirement, PolicyEvaluator,
};
pub use registry::{MultiIssuerRegistry, RegistryBuilder, RegistryError};
pub use retriever::{TokenRetriever, UnvalidatedToken};
pub use validator::{
    DefaultJwtValidator, LegacyJwtValidator, TokenValidationError, TokenValidator,
    DEFAULT_CLOCK_SKEW_SECS, DEFAULT_REQUIRED_CLAIMS,
};
