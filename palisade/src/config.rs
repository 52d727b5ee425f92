//! Configuration for trusted issuers

use std::collections::BTreeMap;

use aliri::jwt::Audience;
use aliri_braid::braid;
use serde::Deserialize;
use url::Url;

use crate::{resource::RetrievalSettings, validator};

/// The short name under which an issuer is registered and referenced by policies
///
/// Short names are chosen by the service operator, such as `idporten` or
/// `tokenx`, and are distinct from the issuer identifier carried in the
/// `iss` claim of a token.
#[braid(serde)]
pub struct IssuerName;

/// Top-level validation configuration: one entry per trusted issuer
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ValidationProperties {
    /// Trusted issuers, keyed by short name
    pub issuers: BTreeMap<IssuerName, IssuerProperties>,

    /// Settings applied to discovery and key set retrieval
    pub retrieval: RetrievalSettings,
}

impl ValidationProperties {
    /// Adds a trusted issuer under the given short name
    #[must_use]
    pub fn with_issuer(mut self, short_name: impl Into<IssuerName>, issuer: IssuerProperties) -> Self {
        self.issuers.insert(short_name.into(), issuer);
        self
    }

    /// Overrides the retrieval settings
    #[must_use]
    pub fn with_retrieval(mut self, retrieval: RetrievalSettings) -> Self {
        self.retrieval = retrieval;
        self
    }
}

/// Configuration for a single trusted issuer
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct IssuerProperties {
    /// Location of the issuer's OpenID discovery document
    pub discovery_url: Url,

    /// Audiences that this service accepts in tokens from the issuer
    #[serde(default)]
    pub accepted_audience: Vec<Audience>,

    /// Name of a cookie that may carry a token from the issuer
    #[serde(default)]
    pub cookie_name: Option<String>,

    /// Claims that are not required to be present in tokens from the issuer
    #[serde(default)]
    pub optional_claims: Vec<String>,

    /// The validation variant to use for tokens from the issuer
    #[serde(default)]
    pub validation: ValidatorKind,

    /// A proxy to route discovery and key set requests through
    #[serde(default)]
    pub proxy_url: Option<Url>,

    /// Rewrites `https` URLs to `http` before retrieval
    ///
    /// Useful when a proxy terminates TLS on behalf of the service.
    #[serde(default)]
    pub use_plaintext_for_https: bool,

    /// Enables caching of the issuer's key set
    #[serde(default)]
    pub jwks_cache: Option<JwksCacheProperties>,

    /// Tolerance, in seconds, applied to time-based claim checks
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
}

fn default_clock_skew_secs() -> u64 {
    validator::DEFAULT_CLOCK_SKEW_SECS
}

impl IssuerProperties {
    /// Constructs issuer properties for the given discovery document location
    pub fn new(discovery_url: Url) -> Self {
        Self {
            discovery_url,
            accepted_audience: Vec::new(),
            cookie_name: None,
            optional_claims: Vec::new(),
            validation: ValidatorKind::default(),
            proxy_url: None,
            use_plaintext_for_https: false,
            jwks_cache: None,
            clock_skew_secs: validator::DEFAULT_CLOCK_SKEW_SECS,
        }
    }

    /// Adds an accepted audience
    #[must_use]
    pub fn with_accepted_audience(mut self, audience: impl Into<Audience>) -> Self {
        self.accepted_audience.push(audience.into());
        self
    }

    /// Sets the cookie that may carry a token from this issuer
    #[must_use]
    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = Some(cookie_name.into());
        self
    }

    /// Marks a claim as optional
    #[must_use]
    pub fn with_optional_claim(mut self, claim: impl Into<String>) -> Self {
        self.optional_claims.push(claim.into());
        self
    }

    /// Selects the validation variant
    #[must_use]
    pub fn with_validation(mut self, validation: ValidatorKind) -> Self {
        self.validation = validation;
        self
    }

    /// Routes retrieval through the given proxy
    #[must_use]
    pub fn with_proxy(mut self, proxy_url: Url) -> Self {
        self.proxy_url = Some(proxy_url);
        self
    }

    /// Rewrites `https` URLs to `http` before retrieval
    #[must_use]
    pub fn with_plaintext_for_https(mut self) -> Self {
        self.use_plaintext_for_https = true;
        self
    }

    /// Enables key set caching
    #[must_use]
    pub fn with_jwks_cache(mut self, cache: JwksCacheProperties) -> Self {
        self.jwks_cache = Some(cache);
        self
    }

    /// Sets the clock skew tolerance
    #[must_use]
    pub fn with_clock_skew_secs(mut self, clock_skew_secs: u64) -> Self {
        self.clock_skew_secs = clock_skew_secs;
        self
    }
}

/// Selects how tokens from an issuer are validated
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorKind {
    /// Full validation, including audience checks and the default required claims
    #[default]
    Default,

    /// Signature, issuer, and a caller-supplied set of required claims
    Legacy {
        /// Claims that must be present
        #[serde(default = "default_legacy_required_claims")]
        required_claims: Vec<String>,
    },
}

impl ValidatorKind {
    /// The legacy variant with its default required claims
    pub fn legacy() -> Self {
        Self::Legacy {
            required_claims: default_legacy_required_claims(),
        }
    }
}

fn default_legacy_required_claims() -> Vec<String> {
    validator::DEFAULT_LEGACY_REQUIRED_CLAIMS
        .iter()
        .map(|&c| c.to_owned())
        .collect()
}

/// Key set caching configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JwksCacheProperties {
    /// How long a fetched key set is trusted, in seconds
    pub lifespan_secs: u64,

    /// How long before expiry a background refresh is started, in seconds
    pub refresh_ahead_secs: u64,
}

impl Default for JwksCacheProperties {
    fn default() -> Self {
        Self {
            lifespan_secs: 900,
            refresh_ahead_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_issuer() -> color_eyre::Result<()> {
        let props: IssuerProperties = serde_json::from_str(
            r#"{"discovery_url": "https://issuer.example/.well-known/openid-configuration"}"#,
        )?;

        assert_eq!(props.validation, ValidatorKind::Default);
        assert_eq!(props.clock_skew_secs, 60);
        assert!(props.accepted_audience.is_empty());
        assert!(props.jwks_cache.is_none());
        Ok(())
    }

    #[test]
    fn deserializes_full_configuration() -> color_eyre::Result<()> {
        let props: ValidationProperties = serde_json::from_str(
            r#"{
                "issuers": {
                    "idporten": {
                        "discovery_url": "https://idporten.example/.well-known/openid-configuration",
                        "accepted_audience": ["aud-a", "aud-b"],
                        "cookie_name": "idporten-token",
                        "optional_claims": ["sub", "nbf"],
                        "jwks_cache": { "lifespan_secs": 300 }
                    },
                    "legacy": {
                        "discovery_url": "https://legacy.example/.well-known/openid-configuration",
                        "validation": { "kind": "legacy" },
                        "proxy_url": "http://proxy.example:8080",
                        "use_plaintext_for_https": true
                    }
                },
                "retrieval": { "max_response_bytes": 1024 }
            }"#,
        )?;

        let idporten = &props.issuers[IssuerNameRef::from_str("idporten")];
        assert_eq!(idporten.accepted_audience.len(), 2);
        assert_eq!(idporten.cookie_name.as_deref(), Some("idporten-token"));
        assert_eq!(
            idporten.jwks_cache,
            Some(JwksCacheProperties {
                lifespan_secs: 300,
                refresh_ahead_secs: 60
            })
        );

        let legacy = &props.issuers[IssuerNameRef::from_str("legacy")];
        assert_eq!(legacy.validation, ValidatorKind::legacy());
        assert!(legacy.use_plaintext_for_https);

        assert_eq!(props.retrieval.max_response_bytes, 1024);
        Ok(())
    }
}
