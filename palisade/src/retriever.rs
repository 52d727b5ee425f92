use aliri::{jwt::CoreClaims, Jwt, JwtRef};

use crate::{
    claims::JwtClaims,
    config::{IssuerName, IssuerNameRef},
    registry::MultiIssuerRegistry,
    request::InboundRequest,
};

const AUTHORIZATION: &str = "authorization";

/// A candidate token, routed to the issuer that it claims to come from
///
/// The token has not been validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnvalidatedToken {
    token: Jwt,
    short_name: IssuerName,
}

impl UnvalidatedToken {
    /// The encoded token
    pub fn token(&self) -> &JwtRef {
        &self.token
    }

    /// The short name of the issuer that the token is routed to
    pub fn short_name(&self) -> &IssuerNameRef {
        &self.short_name
    }
}

/// Extracts candidate tokens from inbound requests
///
/// Tokens are taken from the `Authorization` header, which may carry several
/// comma-separated `Bearer` credentials, and from any cookie configured for
/// a registered issuer. Header tokens are kept only when the issuer claimed
/// in their unverified payload is registered. Cookie tokens are attributed
/// to the issuer whose cookie carried them.
#[derive(Debug, Clone)]
pub struct TokenRetriever {
    registry: MultiIssuerRegistry,
}

impl TokenRetriever {
    /// Constructs a retriever for the issuers in `registry`
    pub fn new(registry: MultiIssuerRegistry) -> Self {
        Self { registry }
    }

    /// Extracts every candidate token from the request
    ///
    /// Header tokens come first, in the order sent, followed by cookie tokens
    /// in issuer registration order. Malformed credentials are skipped.
    pub fn retrieve<R>(&self, request: &R) -> Vec<UnvalidatedToken>
    where
        R: InboundRequest + ?Sized,
    {
        let mut tokens = self.from_header(request);
        tokens.extend(self.from_cookies(request));

        tracing::debug!(count = tokens.len(), "extracted candidate tokens");
        tokens
    }

    fn from_header<R>(&self, request: &R) -> Vec<UnvalidatedToken>
    where
        R: InboundRequest + ?Sized,
    {
        let Some(header) = request.header(AUTHORIZATION) else {
            return Vec::new();
        };

        header
            .split(',')
            .map(str::trim)
            .filter(|credential| !credential.is_empty())
            .filter_map(|credential| {
                let Some((scheme, token)) = credential.split_once(' ') else {
                    tracing::warn!("ignoring malformed authorization credential");
                    return None;
                };

                if !scheme.eq_ignore_ascii_case("bearer") {
                    tracing::debug!(scheme, "ignoring non-bearer authorization credential");
                    return None;
                }

                let token = JwtRef::from_str(token.trim());
                let claims = match JwtClaims::peek(token) {
                    Ok(claims) => claims,
                    Err(err) => {
                        let error: &dyn std::error::Error = &err;
                        tracing::warn!(error, "ignoring unreadable bearer token");
                        return None;
                    }
                };

                let Some(iss) = claims.iss() else {
                    tracing::debug!("ignoring bearer token without an issuer");
                    return None;
                };

                let Some(config) = self.registry.by_issuer(iss.as_str()) else {
                    tracing::debug!(issuer = %iss, "ignoring bearer token from unregistered issuer");
                    return None;
                };

                Some(UnvalidatedToken {
                    token: token.to_owned(),
                    short_name: config.short_name().to_owned(),
                })
            })
            .collect()
    }

    fn from_cookies<R>(&self, request: &R) -> Vec<UnvalidatedToken>
    where
        R: InboundRequest + ?Sized,
    {
        let cookies = request.cookies();
        if cookies.is_empty() {
            return Vec::new();
        }

        self.registry
            .iter()
            .filter_map(|config| Some((config, config.cookie_name()?)))
            .flat_map(|(config, cookie_name)| {
                cookies
                    .iter()
                    .filter(move |c| {
                        c.name.eq_ignore_ascii_case(cookie_name) && !c.value.is_empty()
                    })
                    .map(move |cookie| UnvalidatedToken {
                        token: Jwt::from(cookie.value.as_str()),
                        short_name: config.short_name().to_owned(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use http::header;
    use tracing_test::traced_test;

    use super::*;
    use crate::test;

    fn retriever() -> TokenRetriever {
        TokenRetriever::new(test::registry())
    }

    fn short_names(tokens: &[UnvalidatedToken]) -> Vec<&str> {
        tokens.iter().map(|t| t.short_name().as_str()).collect()
    }

    #[test]
    fn routes_header_token_by_claimed_issuer() {
        let request = http::Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {}", test::other_token().as_str()))
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert_eq!(short_names(&tokens), ["other"]);
        assert_eq!(tokens[0].token().as_str(), test::other_token().as_str());
    }

    #[test]
    fn splits_multiple_bearer_credentials() {
        let request = http::Request::builder()
            .header(
                header::AUTHORIZATION,
                format!(
                    "Bearer {} , bearer {}",
                    test::token().as_str(),
                    test::other_token().as_str()
                ),
            )
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert_eq!(short_names(&tokens), ["local", "other"]);
    }

    #[test]
    #[traced_test]
    fn skips_unknown_issuers_and_malformed_credentials() {
        let foreign = test::key().sign(&test::claims_with(
            serde_json::json!({ "iss": "https://unknown.example" }),
        ));
        let request = http::Request::builder()
            .header(
                header::AUTHORIZATION,
                format!(
                    "Bearer {}, garbage, Basic dXNlcjpwYXNz, Bearer not-a-jwt",
                    foreign.as_str()
                ),
            )
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert!(tokens.is_empty());
        assert!(logs_contain("ignoring malformed authorization credential"));
        assert!(logs_contain("ignoring unreadable bearer token"));
    }

    #[test]
    fn reads_configured_cookies() {
        let request = http::Request::builder()
            .header(
                header::COOKIE,
                format!(
                    "unrelated=1; {}={}; {}=",
                    test::LOCAL_COOKIE,
                    test::token().as_str(),
                    test::OTHER_COOKIE
                ),
            )
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert_eq!(short_names(&tokens), ["local"]);
    }

    #[test]
    fn cookie_names_match_case_insensitively() {
        let request = http::Request::builder()
            .header(
                header::COOKIE,
                format!(
                    "{}={}",
                    test::LOCAL_COOKIE.to_ascii_uppercase(),
                    test::token().as_str()
                ),
            )
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert_eq!(short_names(&tokens), ["local"]);
        assert_eq!(tokens[0].token().as_str(), test::token().as_str());
    }

    #[test]
    fn keeps_every_matching_cookie() {
        let request = http::Request::builder()
            .header(
                header::COOKIE,
                format!(
                    "{}={}; {}={}",
                    test::LOCAL_COOKIE,
                    test::token().as_str(),
                    test::LOCAL_COOKIE.to_ascii_uppercase(),
                    test::other_token().as_str()
                ),
            )
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert_eq!(short_names(&tokens), ["local", "local"]);
        assert_eq!(tokens[1].token().as_str(), test::other_token().as_str());
    }

    #[test]
    fn cookie_tokens_follow_header_tokens() {
        let request = http::Request::builder()
            .header(header::AUTHORIZATION, format!("Bearer {}", test::other_token().as_str()))
            .header(
                header::COOKIE,
                format!("{}={}", test::LOCAL_COOKIE, test::token().as_str()),
            )
            .body(())
            .unwrap();

        let tokens = retriever().retrieve(&request);

        assert_eq!(short_names(&tokens), ["other", "local"]);
    }

    #[test]
    fn empty_request_yields_nothing() {
        let request = http::Request::builder().body(()).unwrap();
        assert!(retriever().retrieve(&request).is_empty());
    }
}
