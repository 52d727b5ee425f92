//! Grant requests sent to a token endpoint

use url::Url;

use crate::{
    auth::ClientCredential,
    config::{GrantType, TokenExchangeProperties},
    AccessToken, ClientId,
};

/// The grant-specific part of a token request
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Grant {
    /// The client acts on its own behalf
    ClientCredentials,

    /// The client acts on behalf of the caller whose token is the assertion
    OnBehalfOf {
        /// The caller's validated token
        assertion: AccessToken,
    },

    /// The client exchanges the subject token for one aimed at another
    /// audience
    TokenExchange {
        /// The token being exchanged
        subject_token: AccessToken,
        /// The exchange parameters
        exchange: TokenExchangeProperties,
    },
}

impl Grant {
    /// The grant type of this grant
    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::ClientCredentials => GrantType::ClientCredentials,
            Self::OnBehalfOf { .. } => GrantType::JwtBearer,
            Self::TokenExchange { .. } => GrantType::TokenExchange,
        }
    }
}

/// A complete request for a token
///
/// Two requests with the same content are interchangeable, so a response to
/// one may be served for the other. The content includes the credentials
/// the client authenticates with.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GrantRequest {
    token_url: Url,
    credential: ClientCredential,
    scope: Vec<String>,
    grant: Grant,
}

impl GrantRequest {
    /// Constructs a grant request
    pub fn new(
        token_url: Url,
        credential: ClientCredential,
        scope: Vec<String>,
        grant: Grant,
    ) -> Self {
        Self {
            token_url,
            credential,
            scope,
            grant,
        }
    }

    /// The token endpoint that the request is sent to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The requesting client
    pub fn client_id(&self) -> &ClientId {
        self.credential.client_id()
    }

    /// The requesting client and the credentials it authenticates with
    pub fn credential(&self) -> &ClientCredential {
        &self.credential
    }

    /// The requested scopes
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// The grant-specific part of the request
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// The grant type of the request
    pub fn grant_type(&self) -> GrantType {
        self.grant.grant_type()
    }

    /// The form parameters describing the grant, excluding client
    /// authentication
    ///
    /// Scopes are space separated and omitted when empty. Token exchange never
    /// sends a scope.
    pub fn form_parameters(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("grant_type", self.grant_type().as_str().to_owned())];

        if !self.scope.is_empty() && !matches!(self.grant, Grant::TokenExchange { .. }) {
            params.push(("scope", self.scope.join(" ")));
        }

        match &self.grant {
            Grant::ClientCredentials => {}
            Grant::OnBehalfOf { assertion } => {
                params.push(("assertion", assertion.as_str().to_owned()));
                params.push(("requested_token_use", "on_behalf_of".to_owned()));
            }
            Grant::TokenExchange {
                subject_token,
                exchange,
            } => {
                params.push(("subject_token", subject_token.as_str().to_owned()));
                params.push(("subject_token_type", exchange.subject_token_type.clone()));
                params.push(("audience", exchange.audience.clone()));
                if let Some(resource) = &exchange.resource {
                    params.push(("resource", resource.clone()));
                }
            }
        }

        params
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::auth::ClientAuthentication;

    fn credential(secret: &str) -> ClientCredential {
        ClientAuthentication::SecretPost {
            client_id: ClientId::from_static("my-client"),
            client_secret: secret.into(),
        }
        .credential()
        .unwrap()
    }

    fn request_with(credential: ClientCredential, scope: &[&str], grant: Grant) -> GrantRequest {
        GrantRequest::new(
            "https://login.example/token".parse().unwrap(),
            credential,
            scope.iter().map(|s| (*s).to_owned()).collect(),
            grant,
        )
    }

    fn request(scope: &[&str], grant: Grant) -> GrantRequest {
        request_with(credential("my-secret"), scope, grant)
    }

    fn names(params: &[(&'static str, String)]) -> Vec<&'static str> {
        params.iter().map(|(name, _)| *name).collect()
    }

    #[test]
    fn client_credentials_parameters() {
        let params = request(&["read", "write"], Grant::ClientCredentials).form_parameters();

        assert_eq!(
            params,
            [
                ("grant_type", "client_credentials".to_owned()),
                ("scope", "read write".to_owned()),
            ]
        );
    }

    #[test]
    fn empty_scope_is_omitted() {
        let params = request(&[], Grant::ClientCredentials).form_parameters();
        assert_eq!(names(&params), ["grant_type"]);
    }

    #[test]
    fn on_behalf_of_parameters() {
        let params = request(
            &["api://downstream/.default"],
            Grant::OnBehalfOf {
                assertion: AccessToken::from_static("caller.jwt.token"),
            },
        )
        .form_parameters();

        assert_eq!(
            params,
            [
                (
                    "grant_type",
                    "urn:ietf:params:oauth:grant-type:jwt-bearer".to_owned()
                ),
                ("scope", "api://downstream/.default".to_owned()),
                ("assertion", "caller.jwt.token".to_owned()),
                ("requested_token_use", "on_behalf_of".to_owned()),
            ]
        );
    }

    #[test]
    fn token_exchange_parameters_never_carry_scope() {
        let params = request(
            &["ignored"],
            Grant::TokenExchange {
                subject_token: AccessToken::from_static("subject.jwt.token"),
                exchange: TokenExchangeProperties::new("cluster:ns:app").with_resource("res"),
            },
        )
        .form_parameters();

        assert_eq!(
            names(&params),
            [
                "grant_type",
                "subject_token",
                "subject_token_type",
                "audience",
                "resource"
            ]
        );
        assert_eq!(params[2].1, "urn:ietf:params:oauth:token-type:jwt");
    }

    #[test]
    fn identical_requests_are_interchangeable() {
        let grant = || Grant::OnBehalfOf {
            assertion: AccessToken::from_static("caller.jwt.token"),
        };
        let mut seen = HashSet::new();

        assert!(seen.insert(request(&["a"], grant())));
        assert!(!seen.insert(request(&["a"], grant())));
        assert!(seen.insert(request(&["b"], grant())));
    }

    #[test]
    fn requests_with_different_credentials_are_distinct() {
        let first = request_with(credential("secret-a"), &["a"], Grant::ClientCredentials);
        let second = request_with(credential("secret-b"), &["a"], Grant::ClientCredentials);

        assert_eq!(first.client_id(), second.client_id());
        assert_eq!(first.form_parameters(), second.form_parameters());
        assert_ne!(first, second);
    }
}
