//! Configuration shapes for OAuth2 client registrations
//!
//! Loading configuration is left to the application. These types describe
//! what a registration looks like once deserialized.

use std::{collections::BTreeMap, fmt};

use aliri_clock::DurationSecs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ClientId, ClientSecret};

/// The token type assumed for subject tokens in a token exchange
pub const DEFAULT_SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";

/// An OAuth2 grant type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GrantType {
    /// The client acts on its own behalf
    #[serde(rename = "client_credentials")]
    ClientCredentials,

    /// The client presents the caller's token as an assertion to act on
    /// behalf of that caller
    #[serde(
        rename = "urn:ietf:params:oauth:grant-type:jwt-bearer",
        alias = "jwt_bearer"
    )]
    JwtBearer,

    /// The client exchanges a subject token for a token aimed at another
    /// audience
    #[serde(
        rename = "urn:ietf:params:oauth:grant-type:token-exchange",
        alias = "token_exchange"
    )]
    TokenExchange,
}

impl GrantType {
    /// The value sent as `grant_type`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientCredentials => "client_credentials",
            Self::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
            Self::TokenExchange => "urn:ietf:params:oauth:grant-type:token-exchange",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a client authenticates to the token endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// Credentials are sent in an HTTP Basic `Authorization` header
    #[default]
    ClientSecretBasic,

    /// Credentials are sent as form parameters
    ClientSecretPost,

    /// A self-signed JWT is sent as a client assertion
    PrivateKeyJwt,
}

/// An RSA signing key used for `private_key_jwt` client authentication
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientJwkProperties {
    /// The private key, PEM encoded
    pub pem: ClientSecret,

    /// The key ID advertised in the assertion header
    pub key_id: String,
}

/// Client credentials and how to present them
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAuthenticationProperties {
    /// The client ID
    pub client_id: ClientId,

    /// The authentication method
    #[serde(default)]
    pub client_auth_method: ClientAuthMethod,

    /// The client secret, for the secret-based methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<ClientSecret>,

    /// The signing key, for `private_key_jwt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_jwk: Option<ClientJwkProperties>,
}

impl ClientAuthenticationProperties {
    /// Authenticates with a client secret sent in an HTTP Basic header
    pub fn basic(client_id: impl Into<ClientId>, client_secret: impl Into<ClientSecret>) -> Self {
        Self {
            client_id: client_id.into(),
            client_auth_method: ClientAuthMethod::ClientSecretBasic,
            client_secret: Some(client_secret.into()),
            client_jwk: None,
        }
    }

    /// Authenticates with a client secret sent as form parameters
    pub fn post(client_id: impl Into<ClientId>, client_secret: impl Into<ClientSecret>) -> Self {
        Self {
            client_auth_method: ClientAuthMethod::ClientSecretPost,
            ..Self::basic(client_id, client_secret)
        }
    }

    /// Authenticates with a client assertion signed by `client_jwk`
    pub fn private_key_jwt(client_id: impl Into<ClientId>, client_jwk: ClientJwkProperties) -> Self {
        Self {
            client_id: client_id.into(),
            client_auth_method: ClientAuthMethod::PrivateKeyJwt,
            client_secret: None,
            client_jwk: Some(client_jwk),
        }
    }
}

/// Parameters specific to a token exchange
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenExchangeProperties {
    /// The audience that the exchanged token is intended for
    pub audience: String,

    /// The resource that the exchanged token is intended for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// The type of the subject token
    #[serde(default = "default_subject_token_type")]
    pub subject_token_type: String,
}

impl TokenExchangeProperties {
    /// Exchanges a JWT subject token for a token aimed at `audience`
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            resource: None,
            subject_token_type: default_subject_token_type(),
        }
    }

    /// Sets the resource that the exchanged token is intended for
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

fn default_subject_token_type() -> String {
    DEFAULT_SUBJECT_TOKEN_TYPE.to_owned()
}

/// A single OAuth2 client registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientProperties {
    /// The token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_url: Option<Url>,

    /// The issuer's discovery document, used to find the token endpoint when
    /// none is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well_known_url: Option<Url>,

    /// The grant to perform
    pub grant_type: GrantType,

    /// The scopes to request
    #[serde(default)]
    pub scope: Vec<String>,

    /// How the client authenticates
    pub authentication: ClientAuthenticationProperties,

    /// The downstream resource that tokens from this registration are used
    /// against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<Url>,

    /// Token exchange parameters, required for the token exchange grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_exchange: Option<TokenExchangeProperties>,
}

impl ClientProperties {
    /// A registration performing `grant_type` against `token_endpoint_url`
    pub fn new(
        token_endpoint_url: Url,
        grant_type: GrantType,
        authentication: ClientAuthenticationProperties,
    ) -> Self {
        Self {
            token_endpoint_url: Some(token_endpoint_url),
            well_known_url: None,
            grant_type,
            scope: Vec::new(),
            authentication,
            resource_url: None,
            token_exchange: None,
        }
    }

    /// A registration that finds its token endpoint through discovery
    pub fn discovered(
        well_known_url: Url,
        grant_type: GrantType,
        authentication: ClientAuthenticationProperties,
    ) -> Self {
        Self {
            token_endpoint_url: None,
            well_known_url: Some(well_known_url),
            grant_type,
            scope: Vec::new(),
            authentication,
            resource_url: None,
            token_exchange: None,
        }
    }

    /// Adds a scope to request
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope.push(scope.into());
        self
    }

    /// Sets the downstream resource
    pub fn with_resource_url(mut self, resource_url: Url) -> Self {
        self.resource_url = Some(resource_url);
        self
    }

    /// Sets the token exchange parameters
    pub fn with_token_exchange(mut self, token_exchange: TokenExchangeProperties) -> Self {
        self.token_exchange = Some(token_exchange);
        self
    }

    /// Indicates whether `url` addresses this registration's resource
    ///
    /// The scheme, host and port must match, and the path of `url` must equal
    /// the resource path or lie under it at a segment boundary.
    pub fn serves(&self, url: &Url) -> bool {
        let Some(resource) = &self.resource_url else {
            return false;
        };

        let prefix = resource.path().trim_end_matches('/');
        let path_matches = match url.path().strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        };

        resource.scheme() == url.scheme()
            && resource.host_str() == url.host_str()
            && resource.port_or_known_default() == url.port_or_known_default()
            && path_matches
    }
}

/// A named set of client registrations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfigurationProperties {
    /// Registrations by name
    #[serde(default)]
    pub registration: BTreeMap<String, ClientProperties>,
}

impl ClientConfigurationProperties {
    /// Adds a named registration
    pub fn with_registration(mut self, name: impl Into<String>, client: ClientProperties) -> Self {
        self.registration.insert(name.into(), client);
        self
    }

    /// The registration with the given name
    pub fn get(&self, name: &str) -> Option<&ClientProperties> {
        self.registration.get(name)
    }

    /// The first registration, by name, whose resource serves `url`
    pub fn for_resource(&self, url: &Url) -> Option<&ClientProperties> {
        self.registration.values().find(|client| client.serves(url))
    }
}

/// Sizing and eviction for a token response cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheProperties {
    /// The maximum number of cached responses
    #[serde(default = "CacheProperties::default_maximum_size")]
    pub maximum_size: u64,

    /// How many seconds before a token expires that it is evicted
    #[serde(default = "CacheProperties::default_evict_skew_secs")]
    pub evict_skew_secs: u64,
}

impl CacheProperties {
    const fn default_maximum_size() -> u64 {
        1000
    }

    const fn default_evict_skew_secs() -> u64 {
        10
    }

    /// How long before a token expires that it is evicted
    pub const fn evict_skew(&self) -> DurationSecs {
        DurationSecs(self.evict_skew_secs)
    }

    /// Sets the maximum number of cached responses
    pub fn with_maximum_size(mut self, maximum_size: u64) -> Self {
        self.maximum_size = maximum_size;
        self
    }

    /// Sets how long before expiry a token is evicted
    pub fn with_evict_skew(mut self, evict_skew: DurationSecs) -> Self {
        self.evict_skew_secs = evict_skew.0;
        self
    }
}

impl Default for CacheProperties {
    fn default() -> Self {
        Self {
            maximum_size: Self::default_maximum_size(),
            evict_skew_secs: Self::default_evict_skew_secs(),
        }
    }
}
