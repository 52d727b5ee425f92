use std::fmt;

use aliri::{
    jwt::{Audiences, CoreClaims, Issuer, IssuerRef, Subject, SubjectRef},
    Jwt, JwtRef,
};
use aliri_base64::Base64Url;
use aliri_clock::UnixTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A claim in a token payload had an unexpected form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedClaims {
    /// The payload is not a base64url-encoded JSON object
    #[error("token payload is not a JSON object")]
    NotAnObject,

    /// A registered claim had an invalid value
    #[error("claim `{0}` has an invalid value")]
    InvalidClaim(&'static str),
}

/// The full set of claims carried by a token
///
/// Registered claims (`iss`, `sub`, `aud`, `exp`, `nbf`, `iat`) are parsed
/// eagerly; all claims, registered or not, remain available by name.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct JwtClaims {
    all: Map<String, Value>,
    aud: Audiences,
    iss: Option<Issuer>,
    sub: Option<Subject>,
    exp: Option<UnixTime>,
    nbf: Option<UnixTime>,
    iat: Option<UnixTime>,
}

impl fmt::Debug for JwtClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtClaims")
            .field("iss", &self.iss)
            .field("sub", &self.sub)
            .field("aud", &self.aud)
            .field("exp", &self.exp)
            .field("claims", &self.all.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TryFrom<Map<String, Value>> for JwtClaims {
    type Error = MalformedClaims;

    fn try_from(all: Map<String, Value>) -> Result<Self, Self::Error> {
        let aud = match all.get("aud") {
            None | Some(Value::Null) => Audiences::empty(),
            Some(aud) => serde_json::from_value(aud.clone())
                .map_err(|_| MalformedClaims::InvalidClaim("aud"))?,
        };

        Ok(Self {
            aud,
            iss: string_claim(&all, "iss")?.map(Issuer::from),
            sub: string_claim(&all, "sub")?.map(Subject::from),
            exp: time_claim(&all, "exp")?,
            nbf: time_claim(&all, "nbf")?,
            iat: time_claim(&all, "iat")?,
            all,
        })
    }
}

impl From<JwtClaims> for Map<String, Value> {
    fn from(claims: JwtClaims) -> Self {
        claims.all
    }
}

fn string_claim<'a>(
    all: &'a Map<String, Value>,
    name: &'static str,
) -> Result<Option<&'a str>, MalformedClaims> {
    match all.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(MalformedClaims::InvalidClaim(name)),
    }
}

fn time_claim(
    all: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<UnixTime>, MalformedClaims> {
    match all.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u64))
            .map(|secs| Some(UnixTime(secs)))
            .ok_or(MalformedClaims::InvalidClaim(name)),
        Some(_) => Err(MalformedClaims::InvalidClaim(name)),
    }
}

impl JwtClaims {
    /// Reads the claims from a token without verifying its signature
    ///
    /// The result must not be trusted; it is only suitable for routing a
    /// token to the issuer that it claims to be from.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a well-formed JWT with a JSON
    /// object payload.
    pub fn peek(token: &JwtRef) -> Result<Self, MalformedClaims> {
        let mut parts = token.as_str().split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(MalformedClaims::NotAnObject),
        };

        let decoded =
            Base64Url::from_encoded(payload).map_err(|_| MalformedClaims::NotAnObject)?;
        let all: Map<String, Value> = serde_json::from_slice(decoded.as_slice())
            .map_err(|_| MalformedClaims::NotAnObject)?;

        Self::try_from(all)
    }

    /// Gets a claim by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.all.get(name).filter(|v| !v.is_null())
    }

    /// Indicates whether a claim is present and not null
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Gets a claim by name, if it is a string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Indicates whether the named claim carries `expected`
    ///
    /// A claim matches when it is a string equal to `expected`, an array
    /// containing such a string, or a number or boolean whose JSON rendering
    /// equals `expected`.
    pub fn has_claim_value(&self, name: &str, expected: &str) -> bool {
        fn matches(value: &Value, expected: &str) -> bool {
            match value {
                Value::String(s) => s == expected,
                Value::Number(n) => n.to_string() == expected,
                Value::Bool(b) => b.to_string() == expected,
                _ => false,
            }
        }

        match self.get(name) {
            Some(Value::Array(values)) => values.iter().any(|v| matches(v, expected)),
            Some(value) => matches(value, expected),
            None => false,
        }
    }

    /// The time at which the token was issued
    pub fn iat(&self) -> Option<UnixTime> {
        self.iat
    }

    /// All claims, by name
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.all
    }
}

impl CoreClaims for JwtClaims {
    fn nbf(&self) -> Option<UnixTime> {
        self.nbf
    }

    fn exp(&self) -> Option<UnixTime> {
        self.exp
    }

    fn aud(&self) -> &Audiences {
        &self.aud
    }

    fn iss(&self) -> Option<&IssuerRef> {
        self.iss.as_deref()
    }

    fn sub(&self) -> Option<&SubjectRef> {
        self.sub.as_deref()
    }
}

/// A token that has passed validation, along with its claims
#[derive(Clone, PartialEq)]
pub struct JwtToken {
    raw: Jwt,
    claims: JwtClaims,
}

impl fmt::Debug for JwtToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtToken")
            .field("raw", &self.raw)
            .field("claims", &self.claims)
            .finish()
    }
}

impl JwtToken {
    pub(crate) fn new(raw: Jwt, claims: JwtClaims) -> Self {
        Self { raw, claims }
    }

    /// The encoded token, suitable for forwarding
    pub fn encoded(&self) -> &JwtRef {
        &self.raw
    }

    /// The validated claims
    pub fn claims(&self) -> &JwtClaims {
        &self.claims
    }

    /// The issuer of the token
    pub fn issuer(&self) -> Option<&IssuerRef> {
        self.claims.iss()
    }

    /// The subject of the token
    pub fn subject(&self) -> Option<&SubjectRef> {
        self.claims.sub()
    }
}
