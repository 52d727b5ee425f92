use std::future::Future;

use aliri::jwt::CoreClaims;

use crate::{
    claims::JwtClaims,
    context::{ValidationContext, ValidationContextHolder},
    registry::MultiIssuerRegistry,
    request::InboundRequest,
    retriever::TokenRetriever,
};

/// Validates the tokens carried by each inbound request and installs the
/// survivors as the request's [`ValidationContext`]
///
/// A token that fails validation is dropped and logged; the request carries
/// on with whatever tokens did pass. Whether a request without valid tokens
/// may proceed is left to the [`AuthorizationPolicy`][crate::AuthorizationPolicy]
/// guarding the endpoint.
#[derive(Debug, Clone)]
pub struct ValidationPipeline {
    registry: MultiIssuerRegistry,
    retriever: TokenRetriever,
}

impl ValidationPipeline {
    /// Constructs a pipeline for the issuers in `registry`
    pub fn new(registry: MultiIssuerRegistry) -> Self {
        Self {
            retriever: TokenRetriever::new(registry.clone()),
            registry,
        }
    }

    /// The issuers that this pipeline trusts
    pub fn registry(&self) -> &MultiIssuerRegistry {
        &self.registry
    }

    /// Validates every candidate token in the request
    #[tracing::instrument(skip_all)]
    pub async fn validate<R>(&self, request: &R) -> ValidationContext
    where
        R: InboundRequest + Sync + ?Sized,
    {
        let candidates = self.retriever.retrieve(request);
        let mut context = ValidationContext::new();

        for candidate in candidates {
            let Some(config) = self.registry.by_short_name(candidate.short_name().as_str()) else {
                continue;
            };

            match config.validator().assert_valid_token(candidate.token()).await {
                Ok(token) => context.insert(candidate.short_name().to_owned(), token),
                Err(err) => {
                    let error: &dyn std::error::Error = &err;
                    let exp = JwtClaims::peek(candidate.token())
                        .ok()
                        .and_then(|c| c.exp())
                        .map(|exp| exp.0);
                    tracing::info!(
                        error,
                        issuer = %candidate.short_name(),
                        token.exp = exp,
                        "token failed validation and was dropped"
                    );
                }
            }
        }

        tracing::debug!(
            issuers = ?context.issuers().collect::<Vec<_>>(),
            "request validation complete"
        );
        context
    }

    /// Validates the request, then runs `downstream` with the resulting
    /// context installed
    ///
    /// The context is removed once `downstream` finishes, on every path.
    pub async fn process<R, F, Fut>(&self, request: &R, downstream: F) -> Fut::Output
    where
        R: InboundRequest + Sync + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        let context = self.validate(request).await;
        ValidationContextHolder::scope(context, downstream()).await
    }
}

#[cfg(test)]
mod tests {
    use http::header;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::test;

    fn request(authorization: &str) -> http::Request<()> {
        http::Request::builder()
            .header(header::AUTHORIZATION, authorization)
            .body(())
            .unwrap()
    }

    fn live_claims(issuer: &str) -> serde_json::Value {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        json!({
            "iss": issuer,
            "aud": test::AUDIENCE,
            "sub": "subject",
            "iat": now,
            "nbf": now,
            "exp": now + 300,
        })
    }

    #[tokio::test]
    async fn validates_tokens_from_every_issuer() {
        let local = test::key().sign(&live_claims(test::ISSUER));
        let other = test::rotated_key().sign(&live_claims(test::OTHER_ISSUER));
        let pipeline = ValidationPipeline::new(test::registry());

        let context = pipeline
            .validate(&request(&format!(
                "Bearer {}, Bearer {}",
                local.as_str(),
                other.as_str()
            )))
            .await;

        assert_eq!(
            context.issuers().map(|i| i.as_str()).collect::<Vec<_>>(),
            ["local", "other"]
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn drops_invalid_tokens_and_keeps_the_rest() {
        let valid = test::key().sign(&live_claims(test::ISSUER));
        let forged = test::key().sign(&live_claims(test::OTHER_ISSUER));
        let pipeline = ValidationPipeline::new(test::registry());

        let context = pipeline
            .validate(&request(&format!(
                "Bearer {}, Bearer {}",
                forged.as_str(),
                valid.as_str()
            )))
            .await;

        assert_eq!(
            context.issuers().map(|i| i.as_str()).collect::<Vec<_>>(),
            ["local"]
        );
        assert!(logs_contain("token failed validation and was dropped"));
    }

    #[tokio::test]
    async fn expired_token_yields_empty_context() {
        let pipeline = ValidationPipeline::new(test::registry());

        let context = pipeline
            .validate(&request(&format!("Bearer {}", test::token().as_str())))
            .await;

        assert!(!context.has_valid_token());
    }

    #[tokio::test]
    async fn process_installs_context_for_downstream_only() {
        let token = test::key().sign(&live_claims(test::ISSUER));
        let pipeline = ValidationPipeline::new(test::registry());
        let request = request(&format!("Bearer {}", token.as_str()));

        let subject = pipeline
            .process(&request, || async {
                ValidationContextHolder::current()
                    .and_then(|ctx| ctx.claims("local").and_then(|c| c.get_str("sub")).map(str::to_owned))
            })
            .await;

        assert_eq!(subject.as_deref(), Some("subject"));
        assert!(ValidationContextHolder::current().is_none());
    }
}
