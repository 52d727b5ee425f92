//! Performing grants against a token endpoint

use aliri_clock::{Clock, System};

use crate::{
    auth::{ClientAuthentication, TokenRequest},
    dto::{CachedTokenResponse, TokenResponse},
    grant::GrantRequest,
    http::OAuth2HttpClient,
    ClientError,
};

/// Performs grant requests against token endpoints
///
/// Each grant contributes its own form parameters; client authentication is
/// attached the same way for every grant.
#[derive(Debug, Clone)]
pub struct GrantTokenClient<H, C = System> {
    http: H,
    clock: C,
}

impl<H> GrantTokenClient<H, System> {
    /// Constructs a client that sends requests through `http`
    pub fn new(http: H) -> Self {
        Self {
            http,
            clock: System,
        }
    }
}

impl<H, C> GrantTokenClient<H, C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> GrantTokenClient<H, D> {
        GrantTokenClient {
            http: self.http,
            clock,
        }
    }
}

impl<H, C> GrantTokenClient<H, C>
where
    H: OAuth2HttpClient,
    C: Clock + Send + Sync,
{
    /// Requests a token, authenticating as `auth`
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be reached, responds with a
    /// non-success status, or responds with something other than a token.
    #[tracing::instrument(
        err,
        skip_all,
        fields(
            token_url = %request.token_url(),
            grant_type = %request.grant_type(),
            client_id = %request.client_id(),
        ),
    )]
    pub async fn get_token_response(
        &self,
        request: &GrantRequest,
        auth: &ClientAuthentication,
    ) -> Result<CachedTokenResponse, ClientError> {
        let mut token_request =
            TokenRequest::new(request.token_url().clone(), request.form_parameters());
        auth.apply(request.token_url(), &self.clock, &mut token_request)?;

        let resp = self.http.post(&token_request).await?;

        if !resp.is_success() {
            return Err(ClientError::ErrorResponse {
                status: resp.status,
                body: String::from_utf8_lossy(&resp.body).into_owned(),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&resp.body)?;
        let token = token.received_at(self.clock.now());

        tracing::info!(
            lifetime = token.expires_in().0,
            expiry = token.expires_at().0,
            "received new token"
        );

        Ok(token)
    }
}
