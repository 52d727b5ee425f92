use std::collections::BTreeSet;

use aliri::{
    error::JwtVerifyError,
    jwa,
    jwt::{self, Audience, BasicHeaders, CoreClaims, CoreHeaders, HasAlgorithm, Issuer, IssuerRef},
    JwtRef,
};
use aliri_clock::{Clock, System, UnixTime};
use thiserror::Error;

use crate::{
    claims::{JwtClaims, JwtToken},
    jwks::{KeySource, KeySourceError},
};

/// Claims that must be present unless explicitly marked optional
pub const DEFAULT_REQUIRED_CLAIMS: [&str; 6] = ["sub", "aud", "iss", "iat", "exp", "nbf"];

/// Claims required by the legacy validator unless configured otherwise
pub(crate) const DEFAULT_LEGACY_REQUIRED_CLAIMS: [&str; 4] = ["sub", "iss", "iat", "exp"];

/// Default tolerance, in seconds, for time-based claim checks
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 60;

/// Indicates why a token was rejected
#[derive(Debug, Error)]
pub enum TokenValidationError {
    /// The token is not a well-formed JWT
    #[error("malformed token")]
    Malformed(#[source] JwtVerifyError),

    /// The token is signed with an algorithm that is not accepted
    #[error("token algorithm {0} is not accepted")]
    AlgorithmNotAccepted(jwa::Algorithm),

    /// No key in the issuer's key set matches the token header
    #[error("no matching key found to validate token")]
    UnknownKey,

    /// The issuer's key set could not be obtained
    #[error("unable to obtain verification keys")]
    KeySource(#[from] KeySourceError),

    /// The token signature does not verify
    #[error("token signature is invalid")]
    SignatureInvalid(#[source] JwtVerifyError),

    /// A required claim is absent
    #[error("required claim `{0}` is missing")]
    MissingClaim(String),

    /// The token was issued by a different issuer
    #[error("token issuer does not match expected issuer `{expected}`")]
    IssuerMismatch {
        /// The issuer that the token must come from
        expected: Issuer,
        /// The issuer claimed by the token
        found: Option<Issuer>,
    },

    /// The token has expired
    #[error("token has expired")]
    TokenExpired,

    /// The token is not valid yet, according to the named claim
    #[error("token is not yet valid according to the `{0}` claim")]
    TokenNotYetValid(&'static str),

    /// None of the token's audiences are accepted
    #[error("token audience is not accepted")]
    AudienceMismatch,
}

/// Validates tokens from a single issuer
///
/// The variant is fixed when the issuer is registered.
#[derive(Debug, Clone)]
pub enum TokenValidator {
    /// Full validation, including audience checks
    Default(DefaultJwtValidator),

    /// Signature, issuer, and a minimal set of required claims
    Legacy(LegacyJwtValidator),
}

impl TokenValidator {
    /// The issuer whose tokens this validator accepts
    pub fn issuer(&self) -> &IssuerRef {
        match self {
            Self::Default(v) => &v.issuer,
            Self::Legacy(v) => &v.issuer,
        }
    }

    /// The source of this validator's verification keys
    pub fn keys(&self) -> &KeySource {
        match self {
            Self::Default(v) => &v.keys,
            Self::Legacy(v) => &v.keys,
        }
    }

    /// Validates a token against the system clock
    ///
    /// # Errors
    ///
    /// Returns an error describing the first check that the token fails.
    pub async fn assert_valid_token(
        &self,
        token: &JwtRef,
    ) -> Result<JwtToken, TokenValidationError> {
        self.assert_valid_token_with_clock(token, &System).await
    }

    /// Validates a token against the given clock
    ///
    /// # Errors
    ///
    /// Returns an error describing the first check that the token fails.
    #[tracing::instrument(skip(self, token, clock), fields(issuer = %self.issuer()))]
    pub async fn assert_valid_token_with_clock<C>(
        &self,
        token: &JwtRef,
        clock: &C,
    ) -> Result<JwtToken, TokenValidationError>
    where
        C: Clock + Sync,
    {
        let claims = verify_signature(self.keys(), token).await?;
        let now = clock.now();

        match self {
            Self::Default(v) => v.check_claims(&claims, now)?,
            Self::Legacy(v) => v.check_claims(&claims, now)?,
        }

        tracing::trace!(sub = claims.sub().map(|s| s.as_str()), "token accepted");
        Ok(JwtToken::new(token.to_owned(), claims))
    }
}

impl From<DefaultJwtValidator> for TokenValidator {
    fn from(validator: DefaultJwtValidator) -> Self {
        Self::Default(validator)
    }
}

impl From<LegacyJwtValidator> for TokenValidator {
    fn from(validator: LegacyJwtValidator) -> Self {
        Self::Legacy(validator)
    }
}

/// Validates signature, issuer, required claims, token times, and audience
#[derive(Debug, Clone)]
pub struct DefaultJwtValidator {
    issuer: Issuer,
    keys: KeySource,
    accepted_audiences: Vec<Audience>,
    optional_claims: BTreeSet<String>,
    clock_skew_secs: u64,
}

impl DefaultJwtValidator {
    /// Constructs a validator for tokens from `issuer`, signed by keys from `keys`
    pub fn new(issuer: Issuer, keys: KeySource) -> Self {
        Self {
            issuer,
            keys,
            accepted_audiences: Vec::new(),
            optional_claims: BTreeSet::new(),
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
        }
    }

    /// Adds an accepted audience
    #[must_use]
    pub fn with_accepted_audience(mut self, audience: impl Into<Audience>) -> Self {
        self.accepted_audiences.push(audience.into());
        self
    }

    /// Marks a claim as optional
    #[must_use]
    pub fn with_optional_claim(mut self, claim: impl Into<String>) -> Self {
        self.optional_claims.insert(claim.into());
        self
    }

    /// Sets the tolerance for time-based checks
    #[must_use]
    pub fn with_clock_skew_secs(mut self, clock_skew_secs: u64) -> Self {
        self.clock_skew_secs = clock_skew_secs;
        self
    }

    fn check_claims(&self, claims: &JwtClaims, now: UnixTime) -> Result<(), TokenValidationError> {
        DEFAULT_REQUIRED_CLAIMS
            .iter()
            .filter(|&&claim| !self.optional_claims.contains(claim))
            .try_for_each(|claim| require_claim(claims, claim))?;

        check_issuer(&self.issuer, claims)?;
        check_times(claims, now, self.clock_skew_secs)?;
        self.check_audience(claims)
    }

    fn check_audience(&self, claims: &JwtClaims) -> Result<(), TokenValidationError> {
        let aud_optional = self.optional_claims.contains("aud");

        if aud_optional && self.accepted_audiences.is_empty() {
            return Ok(());
        }

        if claims.aud().is_empty() {
            return if aud_optional {
                Ok(())
            } else {
                Err(TokenValidationError::MissingClaim("aud".to_owned()))
            };
        }

        if claims
            .aud()
            .iter()
            .any(|a| self.accepted_audiences.iter().any(|e| a == e))
        {
            Ok(())
        } else {
            Err(TokenValidationError::AudienceMismatch)
        }
    }
}

/// Validates signature, issuer, a configured set of required claims, and
/// token times
///
/// Audiences are not checked.
#[derive(Debug, Clone)]
pub struct LegacyJwtValidator {
    issuer: Issuer,
    keys: KeySource,
    required_claims: Vec<String>,
    clock_skew_secs: u64,
}

impl LegacyJwtValidator {
    /// Constructs a validator for tokens from `issuer` requiring `required_claims`
    pub fn new<I>(issuer: Issuer, keys: KeySource, required_claims: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            issuer,
            keys,
            required_claims: required_claims.into_iter().map(Into::into).collect(),
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
        }
    }

    /// Sets the tolerance for time-based checks
    #[must_use]
    pub fn with_clock_skew_secs(mut self, clock_skew_secs: u64) -> Self {
        self.clock_skew_secs = clock_skew_secs;
        self
    }

    fn check_claims(&self, claims: &JwtClaims, now: UnixTime) -> Result<(), TokenValidationError> {
        self.required_claims
            .iter()
            .try_for_each(|claim| require_claim(claims, claim))?;

        check_issuer(&self.issuer, claims)?;
        check_times(claims, now, self.clock_skew_secs)
    }
}

async fn verify_signature(
    keys: &KeySource,
    token: &JwtRef,
) -> Result<JwtClaims, TokenValidationError> {
    let decomposed: jwt::Decomposed<BasicHeaders> =
        token.decompose().map_err(TokenValidationError::Malformed)?;

    let alg = decomposed.alg();
    if alg != jwa::Algorithm::RS256 {
        return Err(TokenValidationError::AlgorithmNotAccepted(alg));
    }

    let key = keys
        .verification_key(decomposed.kid(), alg)
        .await?
        .ok_or(TokenValidationError::UnknownKey)?;

    let validator = jwt::CoreValidator::default()
        .ignore_expiration()
        .add_approved_algorithm(jwa::Algorithm::RS256);

    let validated: jwt::Validated<JwtClaims> =
        decomposed
            .verify(&key, &validator)
            .map_err(|err| match err {
                JwtVerifyError::JwkVerifyError(_) | JwtVerifyError::ClaimsRejected(_) => {
                    TokenValidationError::SignatureInvalid(err)
                }
                _ => TokenValidationError::Malformed(err),
            })?;

    let (_, claims) = validated.extract();
    Ok(claims)
}

fn require_claim(claims: &JwtClaims, claim: &str) -> Result<(), TokenValidationError> {
    if claims.contains(claim) {
        Ok(())
    } else {
        Err(TokenValidationError::MissingClaim(claim.to_owned()))
    }
}

fn check_issuer(expected: &IssuerRef, claims: &JwtClaims) -> Result<(), TokenValidationError> {
    match claims.iss() {
        Some(iss) if iss == expected => Ok(()),
        found => Err(TokenValidationError::IssuerMismatch {
            expected: expected.to_owned(),
            found: found.map(ToOwned::to_owned),
        }),
    }
}

fn check_times(claims: &JwtClaims, now: UnixTime, skew: u64) -> Result<(), TokenValidationError> {
    if let Some(exp) = claims.exp() {
        if exp.0 <= now.0.saturating_sub(skew) {
            return Err(TokenValidationError::TokenExpired);
        }
    }

    let latest = now.0.saturating_add(skew);

    if claims.iat().is_some_and(|iat| iat.0 > latest) {
        return Err(TokenValidationError::TokenNotYetValid("iat"));
    }

    if claims.nbf().is_some_and(|nbf| nbf.0 > latest) {
        return Err(TokenValidationError::TokenNotYetValid("nbf"));
    }

    Ok(())
}
