use std::fmt;

use compact_str::CompactString;
use thiserror::Error;

use crate::{
    claims::JwtClaims,
    config::IssuerName,
    context::{ValidationContext, ValidationContextHolder},
};

/// Indicates why a request was denied access to a protected resource
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// No valid token from a required issuer was presented
    #[error("no valid token presented{}", describe_issuers(.issuers))]
    TokenMissing {
        /// The issuers from which a token would have been accepted
        issuers: Vec<IssuerName>,
    },

    /// A valid token was presented, but its claims do not satisfy the policy
    #[error("token claims do not satisfy the policy{}", describe_unmet(.unmet))]
    ClaimMismatch {
        /// The requirements of each issuer whose token was present but
        /// insufficient
        unmet: Vec<IssuerRequirement>,
    },

    /// The endpoint has no resolvable authorization policy
    #[error("no authorization policy is configured for this endpoint")]
    Misconfigured,
}

fn describe_issuers(issuers: &[IssuerName]) -> String {
    if issuers.is_empty() {
        String::new()
    } else {
        let names: Vec<&str> = issuers.iter().map(|i| i.as_str()).collect();
        format!(" for issuer(s) {}", names.join(", "))
    }
}

fn describe_unmet(unmet: &[IssuerRequirement]) -> String {
    let issuers: Vec<IssuerName> = unmet.iter().map(|r| r.issuer.clone()).collect();
    describe_issuers(&issuers)
}

/// A claim requirement could not be parsed
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid claim requirement `{0}`, expected `name=value`")]
pub struct InvalidClaimSpec(String);

/// A requirement that a named claim carry a specific value
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClaimRequirement {
    name: CompactString,
    value: CompactString,
}

impl ClaimRequirement {
    /// Constructs a requirement that the claim `name` carry `value`
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Parses a `name=value` requirement
    ///
    /// The spec is split on the first `=`, and both sides are trimmed. A
    /// blank spec yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec has no `=` or an empty name.
    pub fn parse(spec: &str) -> Result<Option<Self>, InvalidClaimSpec> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(None);
        }

        match spec.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok(Some(Self::new(name.trim(), value.trim())))
            }
            _ => Err(InvalidClaimSpec(spec.to_owned())),
        }
    }

    /// The claim name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The required value
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Indicates whether `claims` satisfy this requirement
    pub fn is_satisfied_by(&self, claims: &JwtClaims) -> bool {
        claims.has_claim_value(&self.name, &self.value)
    }
}

impl fmt::Display for ClaimRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// How multiple claim requirements combine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Combinator {
    /// Every requirement must be satisfied
    #[default]
    All,

    /// At least one requirement must be satisfied
    Any,
}

/// A requirement for a valid token from one issuer, optionally carrying
/// specific claims
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuerRequirement {
    issuer: IssuerName,
    claims: Vec<ClaimRequirement>,
    combinator: Combinator,
}

enum Outcome {
    Allowed,
    NoToken,
    Mismatch,
}

impl IssuerRequirement {
    /// Requires any valid token from `issuer`
    pub fn new(issuer: impl Into<IssuerName>) -> Self {
        Self {
            issuer: issuer.into(),
            claims: Vec::new(),
            combinator: Combinator::All,
        }
    }

    /// Requires a valid token from `issuer` whose claims satisfy `specs`,
    /// combined with `combinator`
    ///
    /// Blank specs are ignored. With no remaining specs, any valid token
    /// from the issuer is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if any spec is not of the form `name=value`.
    pub fn with_claims<I, S>(
        issuer: impl Into<IssuerName>,
        specs: I,
        combinator: Combinator,
    ) -> Result<Self, InvalidClaimSpec>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let claims = specs
            .into_iter()
            .filter_map(|spec| ClaimRequirement::parse(spec.as_ref()).transpose())
            .collect::<Result<_, _>>()?;

        Ok(Self {
            issuer: issuer.into(),
            claims,
            combinator,
        })
    }

    /// The issuer that must have presented a token
    pub fn issuer(&self) -> &IssuerName {
        &self.issuer
    }

    /// The claim requirements
    pub fn claims(&self) -> &[ClaimRequirement] {
        &self.claims
    }

    /// How the claim requirements combine
    pub fn combinator(&self) -> Combinator {
        self.combinator
    }

    fn evaluate(&self, context: &ValidationContext) -> Outcome {
        let Some(claims) = context.claims(self.issuer.as_str()) else {
            return Outcome::NoToken;
        };

        let satisfied = match self.combinator {
            Combinator::All => self.claims.iter().all(|c| c.is_satisfied_by(claims)),
            Combinator::Any => {
                self.claims.is_empty() || self.claims.iter().any(|c| c.is_satisfied_by(claims))
            }
        };

        if satisfied {
            Outcome::Allowed
        } else {
            Outcome::Mismatch
        }
    }
}

/// The authorization policy guarding an endpoint
///
/// # Examples
///
/// ## Unprotected endpoints allow everything
/// ```
/// use aliri_traits::Policy;
/// use palisade::{AuthorizationPolicy, ValidationContext};
///
/// let policy = AuthorizationPolicy::unprotected();
/// assert!(policy.evaluate(&ValidationContext::new()).is_ok());
/// ```
///
/// ## Protected endpoints require a valid token
/// ```
/// use aliri_traits::Policy;
/// use palisade::{AuthorizationError, AuthorizationPolicy, ValidationContext};
///
/// let policy = AuthorizationPolicy::protected();
/// assert!(matches!(
///     policy.evaluate(&ValidationContext::new()),
///     Err(AuthorizationError::TokenMissing { .. })
/// ));
/// ```
///
/// ## Claims can be required of a specific issuer's token
/// ```
/// use aliri_traits::Policy;
/// use palisade::{AuthorizationError, AuthorizationPolicy, ValidationContext};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = AuthorizationPolicy::protected_with_claims("idporten", ["acr=Level4"])?;
///
/// assert!(matches!(
///     policy.evaluate(&ValidationContext::new()),
///     Err(AuthorizationError::TokenMissing { issuers }) if issuers[0].as_str() == "idporten"
/// ));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct AuthorizationPolicy {
    inner: PolicyInner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PolicyInner {
    Unprotected,
    Protected,
    ProtectedWithClaims(IssuerRequirement),
    RequiredIssuers(Vec<IssuerRequirement>),
}

impl AuthorizationPolicy {
    /// Allows every request
    #[inline]
    pub const fn unprotected() -> Self {
        Self {
            inner: PolicyInner::Unprotected,
        }
    }

    /// Requires at least one valid token from any registered issuer
    #[inline]
    pub const fn protected() -> Self {
        Self {
            inner: PolicyInner::Protected,
        }
    }

    /// Requires a valid token from `issuer` carrying every claim in `specs`
    ///
    /// # Errors
    ///
    /// Returns an error if any spec is not of the form `name=value`.
    pub fn protected_with_claims<I, S>(
        issuer: impl Into<IssuerName>,
        specs: I,
    ) -> Result<Self, InvalidClaimSpec>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self::requiring(IssuerRequirement::with_claims(
            issuer,
            specs,
            Combinator::All,
        )?))
    }

    /// Requires a valid token satisfying `requirement`
    pub fn requiring(requirement: IssuerRequirement) -> Self {
        Self {
            inner: PolicyInner::ProtectedWithClaims(requirement),
        }
    }

    /// Allows the request if any one of `requirements` is satisfied
    pub fn required_issuers(requirements: impl IntoIterator<Item = IssuerRequirement>) -> Self {
        Self {
            inner: PolicyInner::RequiredIssuers(requirements.into_iter().collect()),
        }
    }

    fn evaluate_requirements<'a>(
        requirements: impl IntoIterator<Item = &'a IssuerRequirement>,
        context: &ValidationContext,
    ) -> Result<(), AuthorizationError> {
        let mut missing = Vec::new();
        let mut mismatched = Vec::new();

        for requirement in requirements {
            match requirement.evaluate(context) {
                Outcome::Allowed => return Ok(()),
                Outcome::NoToken => missing.push(requirement.issuer.clone()),
                Outcome::Mismatch => mismatched.push(requirement.clone()),
            }
        }

        if mismatched.is_empty() {
            Err(AuthorizationError::TokenMissing { issuers: missing })
        } else {
            Err(AuthorizationError::ClaimMismatch { unmet: mismatched })
        }
    }
}

impl aliri_traits::Policy for AuthorizationPolicy {
    type Request = ValidationContext;
    type Denial = AuthorizationError;

    fn evaluate(&self, context: &Self::Request) -> Result<(), Self::Denial> {
        match &self.inner {
            PolicyInner::Unprotected => Ok(()),
            PolicyInner::Protected if context.has_valid_token() => Ok(()),
            PolicyInner::Protected => Err(AuthorizationError::TokenMissing {
                issuers: Vec::new(),
            }),
            PolicyInner::ProtectedWithClaims(requirement) => {
                Self::evaluate_requirements([requirement], context)
            }
            PolicyInner::RequiredIssuers(requirements) => {
                Self::evaluate_requirements(requirements, context)
            }
        }
    }
}

/// Evaluates the policy resolved for an endpoint against the current
/// request's [`ValidationContext`]
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    /// Evaluates `policy` against the installed context
    ///
    /// With no installed context, the request is treated as carrying no
    /// valid tokens. With no policy, access is denied.
    ///
    /// # Errors
    ///
    /// Returns the reason that access was denied.
    pub fn evaluate(&self, policy: Option<&AuthorizationPolicy>) -> Result<(), AuthorizationError> {
        let context = ValidationContextHolder::current().unwrap_or_default();
        self.evaluate_with(policy, &context)
    }

    /// Evaluates `policy` against an explicit context
    ///
    /// # Errors
    ///
    /// Returns the reason that access was denied.
    pub fn evaluate_with(
        &self,
        policy: Option<&AuthorizationPolicy>,
        context: &ValidationContext,
    ) -> Result<(), AuthorizationError> {
        let Some(policy) = policy else {
            tracing::error!("endpoint has no authorization policy, denying access");
            return Err(AuthorizationError::Misconfigured);
        };

        let result = aliri_traits::Policy::evaluate(policy, context);
        if let Err(denial) = &result {
            tracing::debug!(%denial, "access denied by policy");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use aliri_traits::Policy;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::{claims::JwtToken, test};

    fn context(tokens: &[(&str, serde_json::Value)]) -> ValidationContext {
        let mut context = ValidationContext::new();
        for (issuer, claims) in tokens {
            let raw = test::key().sign(claims);
            let claims = JwtClaims::peek(&raw).unwrap();
            context.insert((*issuer).into(), JwtToken::new(raw, claims));
        }
        context
    }

    fn acr(level: &str) -> serde_json::Value {
        test::claims_with(json!({ "acr": level, "roles": ["reader", "writer"] }))
    }

    #[test]
    fn parses_claim_specs() {
        assert_eq!(
            ClaimRequirement::parse(" acr = Level4 "),
            Ok(Some(ClaimRequirement::new("acr", "Level4")))
        );
        assert_eq!(
            ClaimRequirement::parse("url=https://x.example/?a=b"),
            Ok(Some(ClaimRequirement::new("url", "https://x.example/?a=b")))
        );
        assert_eq!(ClaimRequirement::parse("   "), Ok(None));
        assert!(ClaimRequirement::parse("acr").is_err());
        assert!(ClaimRequirement::parse("=Level4").is_err());
    }

    #[test]
    fn invalid_spec_fails_policy_construction() {
        let result = AuthorizationPolicy::protected_with_claims("local", ["acr=Level4", "oops"]);
        assert_eq!(result, Err(InvalidClaimSpec("oops".to_owned())));
    }

    #[test]
    fn unprotected_allows_everything() {
        assert!(AuthorizationPolicy::unprotected()
            .evaluate(&ValidationContext::new())
            .is_ok());
    }

    #[test]
    fn protected_requires_any_token() {
        let policy = AuthorizationPolicy::protected();

        assert!(policy.evaluate(&context(&[("other", test::claims())])).is_ok());
        assert_eq!(
            policy.evaluate(&ValidationContext::new()),
            Err(AuthorizationError::TokenMissing { issuers: vec![] })
        );
    }

    #[test]
    fn claims_must_all_match_by_default() -> color_eyre::Result<()> {
        let requirement =
            IssuerRequirement::with_claims("local", ["acr=Level4", "roles=writer"], Combinator::All)?;
        let policy =
            AuthorizationPolicy::protected_with_claims("local", ["acr=Level4", "roles=writer"])?;

        assert!(policy.evaluate(&context(&[("local", acr("Level4"))])).is_ok());
        assert_eq!(
            policy.evaluate(&context(&[("local", acr("Level3"))])),
            Err(AuthorizationError::ClaimMismatch {
                unmet: vec![requirement]
            })
        );
        Ok(())
    }

    #[test]
    fn combinators_over_alternative_values() -> color_eyre::Result<()> {
        let any = AuthorizationPolicy::requiring(IssuerRequirement::with_claims(
            "local",
            ["a=1", "a=2"],
            Combinator::Any,
        )?);
        let all = AuthorizationPolicy::requiring(IssuerRequirement::with_claims(
            "local",
            ["a=1", "a=2"],
            Combinator::All,
        )?);

        let has_a2 = context(&[("local", test::claims_with(json!({ "a": "2" })))]);
        assert!(any.evaluate(&has_a2).is_ok());
        assert!(matches!(
            all.evaluate(&has_a2),
            Err(AuthorizationError::ClaimMismatch { .. })
        ));

        let has_neither = context(&[("local", test::claims_with(json!({ "a": "3" })))]);
        assert!(matches!(
            any.evaluate(&has_neither),
            Err(AuthorizationError::ClaimMismatch { .. })
        ));
        assert!(matches!(
            all.evaluate(&has_neither),
            Err(AuthorizationError::ClaimMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn claims_from_the_wrong_issuer_do_not_count() -> color_eyre::Result<()> {
        let policy = AuthorizationPolicy::protected_with_claims("local", ["acr=Level4"])?;

        assert_eq!(
            policy.evaluate(&context(&[("other", acr("Level4"))])),
            Err(AuthorizationError::TokenMissing {
                issuers: vec!["local".into()]
            })
        );
        Ok(())
    }

    #[test]
    fn any_combinator_needs_one_match() -> color_eyre::Result<()> {
        let policy = AuthorizationPolicy::requiring(IssuerRequirement::with_claims(
            "local",
            ["acr=Level4", "acr=Level3"],
            Combinator::Any,
        )?);

        assert!(policy.evaluate(&context(&[("local", acr("Level3"))])).is_ok());
        assert!(policy.evaluate(&context(&[("local", acr("Level2"))])).is_err());
        Ok(())
    }

    #[test]
    fn empty_claim_set_is_vacuously_satisfied() -> color_eyre::Result<()> {
        for combinator in [Combinator::All, Combinator::Any] {
            let policy = AuthorizationPolicy::requiring(IssuerRequirement::with_claims(
                "local",
                ["", "  "],
                combinator,
            )?);
            assert!(policy.evaluate(&context(&[("local", test::claims())])).is_ok());
        }
        Ok(())
    }

    #[test]
    fn required_issuers_allows_first_satisfied_alternative() -> color_eyre::Result<()> {
        let policy = AuthorizationPolicy::required_issuers([
            IssuerRequirement::with_claims("local", ["acr=Level4"], Combinator::All)?,
            IssuerRequirement::new("other"),
        ]);

        assert!(policy.evaluate(&context(&[("other", test::claims())])).is_ok());
        assert!(policy.evaluate(&context(&[("local", acr("Level4"))])).is_ok());
        Ok(())
    }

    #[test]
    fn required_issuers_aggregates_denials() -> color_eyre::Result<()> {
        let local = IssuerRequirement::with_claims("local", ["acr=Level4"], Combinator::All)?;
        let policy =
            AuthorizationPolicy::required_issuers([local.clone(), IssuerRequirement::new("other")]);

        assert_eq!(
            policy.evaluate(&ValidationContext::new()),
            Err(AuthorizationError::TokenMissing {
                issuers: vec!["local".into(), "other".into()]
            })
        );
        assert_eq!(
            policy.evaluate(&context(&[("local", acr("Level3"))])),
            Err(AuthorizationError::ClaimMismatch { unmet: vec![local] })
        );
        Ok(())
    }

    #[test]
    fn claim_mismatch_carries_each_unmet_requirement() -> color_eyre::Result<()> {
        let local = IssuerRequirement::with_claims("local", ["acr=Level4"], Combinator::All)?;
        let other = IssuerRequirement::with_claims("other", ["roles=admin"], Combinator::All)?;
        let policy = AuthorizationPolicy::required_issuers([local.clone(), other.clone()]);

        let denial = policy
            .evaluate(&context(&[("local", acr("Level3")), ("other", acr("Level3"))]))
            .unwrap_err();

        let AuthorizationError::ClaimMismatch { unmet } = &denial else {
            panic!("expected a claim mismatch, got {denial:?}");
        };
        assert_eq!(unmet, &[local, other]);
        assert_eq!(unmet[1].claims()[0].to_string(), "roles=admin");
        assert_eq!(
            denial.to_string(),
            "token claims do not satisfy the policy for issuer(s) local, other"
        );
        Ok(())
    }

    #[test]
    #[traced_test]
    fn missing_policy_is_a_misconfiguration() {
        let result = PolicyEvaluator.evaluate_with(None, &context(&[("local", test::claims())]));

        assert_eq!(result, Err(AuthorizationError::Misconfigured));
        assert!(logs_contain("endpoint has no authorization policy"));
    }

    #[tokio::test]
    async fn evaluator_reads_installed_context() {
        let policy = AuthorizationPolicy::protected();

        assert!(PolicyEvaluator.evaluate(Some(&policy)).is_err());

        let result = ValidationContextHolder::scope(context(&[("local", test::claims())]), async {
            PolicyEvaluator.evaluate(Some(&policy))
        })
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn denial_messages_name_issuers_only() {
        let denial = AuthorizationError::ClaimMismatch {
            unmet: vec![IssuerRequirement::with_claims(
                "local",
                ["acr=Level4"],
                Combinator::All,
            )
            .unwrap()],
        };
        assert_eq!(
            denial.to_string(),
            "token claims do not satisfy the policy for issuer(s) local"
        );
    }
}
