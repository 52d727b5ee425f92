use std::{future::Future, sync::Arc};

use crate::{
    claims::{JwtClaims, JwtToken},
    config::{IssuerName, IssuerNameRef},
};

/// The tokens that passed validation for the current request, keyed by the
/// short name of their issuer
///
/// Only validated tokens can be added, so every entry is trustworthy. At
/// most one token is kept per issuer; a later token replaces an earlier one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationContext {
    tokens: Vec<(IssuerName, JwtToken)>,
}

impl ValidationContext {
    /// An empty context
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, short_name: IssuerName, token: JwtToken) {
        match self.tokens.iter_mut().find(|(name, _)| *name == short_name) {
            Some((_, existing)) => *existing = token,
            None => self.tokens.push((short_name, token)),
        }
    }

    /// Indicates whether any token passed validation
    pub fn has_valid_token(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// The validated token from the named issuer
    pub fn jwt_token(&self, short_name: &str) -> Option<&JwtToken> {
        self.tokens
            .iter()
            .find(|(name, _)| name.as_str() == short_name)
            .map(|(_, token)| token)
    }

    /// The claims of the validated token from the named issuer
    pub fn claims(&self, short_name: &str) -> Option<&JwtClaims> {
        self.jwt_token(short_name).map(JwtToken::claims)
    }

    /// The issuers that contributed a validated token, in extraction order
    pub fn issuers(&self) -> impl Iterator<Item = &IssuerNameRef> {
        self.tokens.iter().map(|(name, _)| &**name)
    }

    /// The first validated token, in extraction order
    pub fn first_valid_token(&self) -> Option<&JwtToken> {
        self.tokens.first().map(|(_, token)| token)
    }

    /// All validated tokens with the short names of their issuers
    pub fn iter(&self) -> impl Iterator<Item = (&IssuerNameRef, &JwtToken)> {
        self.tokens.iter().map(|(name, token)| (&**name, token))
    }
}

tokio::task_local! {
    static CURRENT: Arc<ValidationContext>;
}

/// Installs a [`ValidationContext`] for the duration of a request
///
/// The context is visible to everything that runs inside the scope on the
/// same task, and is removed when the scope ends, whether it completes,
/// returns early, or unwinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContextHolder;

impl ValidationContextHolder {
    /// The context installed for the current request, if any
    pub fn current() -> Option<Arc<ValidationContext>> {
        CURRENT.try_with(Arc::clone).ok()
    }

    /// Indicates whether a context is installed for the current request
    pub fn is_installed() -> bool {
        CURRENT.try_with(|_| ()).is_ok()
    }

    /// Runs `f` with `context` installed
    ///
    /// # Panics
    ///
    /// Panics if a context is already installed. Scopes do not nest.
    pub async fn scope<F>(context: ValidationContext, f: F) -> F::Output
    where
        F: Future,
    {
        assert!(
            !Self::is_installed(),
            "a validation context is already installed for this request"
        );
        CURRENT.scope(Arc::new(context), f).await
    }

    /// Runs the synchronous closure `f` with `context` installed
    ///
    /// # Panics
    ///
    /// Panics if a context is already installed. Scopes do not nest.
    pub fn sync_scope<F, R>(context: ValidationContext, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        assert!(
            !Self::is_installed(),
            "a validation context is already installed for this request"
        );
        CURRENT.sync_scope(Arc::new(context), f)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use aliri::jwt::CoreClaims;

    use super::*;
    use crate::test;

    fn token(raw: aliri::Jwt) -> JwtToken {
        let claims = JwtClaims::peek(&raw).unwrap();
        JwtToken::new(raw, claims)
    }

    fn context() -> ValidationContext {
        let mut context = ValidationContext::new();
        context.insert("local".into(), token(test::token()));
        context.insert("other".into(), token(test::other_token()));
        context
    }

    #[test]
    fn exposes_tokens_by_issuer() {
        let context = context();

        assert!(context.has_valid_token());
        assert_eq!(
            context.issuers().map(IssuerNameRef::as_str).collect::<Vec<_>>(),
            ["local", "other"]
        );
        assert_eq!(
            context
                .claims("other")
                .and_then(|c| c.iss())
                .map(|i| i.as_str()),
            Some(test::OTHER_ISSUER)
        );
        assert!(context.jwt_token("missing").is_none());
        assert_eq!(
            context.first_valid_token().and_then(JwtToken::issuer).map(|i| i.as_str()),
            Some(test::ISSUER)
        );
    }

    #[test]
    fn replaces_token_from_same_issuer() {
        let mut context = context();
        context.insert("local".into(), token(test::other_token()));

        assert_eq!(context.iter().count(), 2);
        assert_eq!(
            context.jwt_token("local").map(|t| t.encoded().as_str().to_owned()),
            Some(test::other_token().as_str().to_owned())
        );
    }

    #[test]
    fn empty_context_has_no_valid_token() {
        assert!(!ValidationContext::new().has_valid_token());
        assert!(ValidationContext::new().first_valid_token().is_none());
    }

    #[tokio::test]
    async fn scope_installs_and_clears_context() {
        assert!(ValidationContextHolder::current().is_none());

        let seen = ValidationContextHolder::scope(context(), async {
            ValidationContextHolder::current().map(|c| c.has_valid_token())
        })
        .await;

        assert_eq!(seen, Some(true));
        assert!(ValidationContextHolder::current().is_none());
    }

    #[test]
    fn context_is_cleared_after_panic() {
        let result = catch_unwind(AssertUnwindSafe(|| {
            ValidationContextHolder::sync_scope(context(), || panic!("downstream failure"))
        }));

        assert!(result.is_err());
        assert!(!ValidationContextHolder::is_installed());
    }

    #[test]
    #[should_panic(expected = "already installed")]
    fn nested_scopes_are_rejected() {
        ValidationContextHolder::sync_scope(ValidationContext::new(), || {
            ValidationContextHolder::sync_scope(ValidationContext::new(), || ())
        });
    }

    #[tokio::test]
    async fn context_does_not_leak_into_spawned_tasks() {
        let seen = ValidationContextHolder::scope(context(), async {
            tokio::spawn(async { ValidationContextHolder::is_installed() })
                .await
                .unwrap()
        })
        .await;

        assert!(!seen);
    }
}
