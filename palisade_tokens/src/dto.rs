//! Token endpoint responses

use aliri_clock::{DurationSecs, UnixTime};
use serde::Deserialize;

use crate::{AccessToken, AccessTokenRef};

/// A token received from a token endpoint, with its absolute expiry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedTokenResponse {
    access_token: AccessToken,
    token_type: Option<String>,
    expires_in: DurationSecs,
    expires_at: UnixTime,
}

impl CachedTokenResponse {
    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the token type, if the endpoint reported one
    #[inline]
    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Gets the lifetime reported by the token endpoint
    #[inline]
    pub fn expires_in(&self) -> DurationSecs {
        self.expires_in
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }
}

/// A lifetime given either as a number or as a numeric string
#[derive(Deserialize)]
#[serde(untagged)]
enum LenientSecs {
    Number(u64),
    Text(String),
}

impl LenientSecs {
    fn into_secs(self) -> Result<u64, String> {
        match self {
            Self::Number(secs) => Ok(secs),
            Self::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| format!("invalid lifetime `{text}`")),
        }
    }
}

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: AccessToken,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<LenientSecs>,
    #[serde(default)]
    ext_expires_in: Option<LenientSecs>,
    #[serde(default)]
    expires_at: Option<LenientSecs>,
}

/// A token response as sent by a token endpoint
///
/// `ext_expires_in` stands in for `expires_in` when the latter is missing.
#[derive(Debug, Deserialize)]
#[serde(try_from = "RawTokenResponse")]
pub(crate) struct TokenResponse {
    access_token: AccessToken,
    token_type: Option<String>,
    expires_in: DurationSecs,
    expires_at: Option<UnixTime>,
}

impl TryFrom<RawTokenResponse> for TokenResponse {
    type Error = String;

    fn try_from(raw: RawTokenResponse) -> Result<Self, Self::Error> {
        let expires_in = raw
            .expires_in
            .or(raw.ext_expires_in)
            .ok_or("missing `expires_in`")?
            .into_secs()?;

        let expires_at = raw
            .expires_at
            .map(LenientSecs::into_secs)
            .transpose()?
            .map(UnixTime);

        Ok(Self {
            access_token: raw.access_token,
            token_type: raw.token_type,
            expires_in: DurationSecs(expires_in),
            expires_at,
        })
    }
}

impl TokenResponse {
    /// Fixes the expiry relative to `now` unless the endpoint supplied one
    pub(crate) fn received_at(self, now: UnixTime) -> CachedTokenResponse {
        CachedTokenResponse {
            expires_at: self
                .expires_at
                .unwrap_or(UnixTime(now.0.saturating_add(self.expires_in.0))),
            access_token: self.access_token,
            token_type: self.token_type,
            expires_in: self.expires_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn parse(value: serde_json::Value) -> Result<CachedTokenResponse, serde_json::Error> {
        serde_json::from_value::<TokenResponse>(value).map(|r| r.received_at(NOW))
    }

    #[test]
    fn computes_expiry_from_lifetime() -> color_eyre::Result<()> {
        let token = parse(json!({
            "access_token": "abc",
            "token_type": "Bearer",
            "expires_in": 3600,
        }))?;

        assert_eq!(token.access_token().as_str(), "abc");
        assert_eq!(token.token_type(), Some("Bearer"));
        assert_eq!(token.expires_in(), DurationSecs(3600));
        assert_eq!(token.expires_at(), UnixTime(NOW.0 + 3600));
        Ok(())
    }

    #[test]
    fn accepts_string_lifetimes() -> color_eyre::Result<()> {
        let token = parse(json!({ "access_token": "abc", "expires_in": "120" }))?;
        assert_eq!(token.expires_in(), DurationSecs(120));
        Ok(())
    }

    #[test]
    fn falls_back_to_extended_lifetime() -> color_eyre::Result<()> {
        let token = parse(json!({ "access_token": "abc", "ext_expires_in": 900 }))?;
        assert_eq!(token.expires_in(), DurationSecs(900));

        let token = parse(json!({
            "access_token": "abc",
            "expires_in": 60,
            "ext_expires_in": 900,
        }))?;
        assert_eq!(token.expires_in(), DurationSecs(60));
        Ok(())
    }

    #[test]
    fn honors_supplied_expiry() -> color_eyre::Result<()> {
        let token = parse(json!({
            "access_token": "abc",
            "expires_in": 60,
            "expires_at": 1_800_000_000u64,
        }))?;
        assert_eq!(token.expires_at(), UnixTime(1_800_000_000));
        Ok(())
    }

    #[test]
    fn rejects_responses_without_lifetime() {
        assert!(parse(json!({ "access_token": "abc" })).is_err());
        assert!(parse(json!({ "access_token": "abc", "expires_in": "soon" })).is_err());
        assert!(parse(json!({ "expires_in": 60 })).is_err());
    }
}
