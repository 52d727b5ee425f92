//! Client authentication at the token endpoint

use std::sync::Arc;

use aliri::{
    jwa,
    jwk::KeyId,
    jwt::BasicHeaders,
    Jwk, Jwt,
};
use aliri_base64::Base64Url;
use aliri_clock::{Clock, DurationSecs};
use rand::RngCore;
use serde::Serialize;
use url::Url;

use crate::{
    config::{ClientAuthMethod, ClientAuthenticationProperties},
    ClientError, ClientId, ClientSecret,
};

/// The lifetime of a client assertion
pub const CLIENT_ASSERTION_LIFETIME: DurationSecs = DurationSecs(60);

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// A client's credentials, ready to be attached to a token request
#[derive(Clone, Debug)]
pub enum ClientAuthentication {
    /// `client_secret_basic`
    SecretBasic {
        /// The client ID
        client_id: ClientId,
        /// The client secret
        client_secret: ClientSecret,
    },

    /// `client_secret_post`
    SecretPost {
        /// The client ID
        client_id: ClientId,
        /// The client secret
        client_secret: ClientSecret,
    },

    /// `private_key_jwt`
    PrivateKeyJwt {
        /// The client ID
        client_id: ClientId,
        /// The RSA signing key, carrying its key ID
        key: Arc<Jwk>,
    },
}

impl ClientAuthentication {
    /// Prepares the credentials described by `props`
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials needed by the authentication
    /// method are missing, or if the signing key cannot be parsed.
    pub fn from_properties(props: &ClientAuthenticationProperties) -> Result<Self, ClientError> {
        let client_id = props.client_id.clone();
        let secret = || {
            props.client_secret.clone().ok_or_else(|| {
                ClientError::Configuration(format!(
                    "client `{}` has no client secret",
                    props.client_id
                ))
            })
        };

        match props.client_auth_method {
            ClientAuthMethod::ClientSecretBasic => Ok(Self::SecretBasic {
                client_id,
                client_secret: secret()?,
            }),
            ClientAuthMethod::ClientSecretPost => Ok(Self::SecretPost {
                client_id,
                client_secret: secret()?,
            }),
            ClientAuthMethod::PrivateKeyJwt => {
                let jwk = props.client_jwk.as_ref().ok_or_else(|| {
                    ClientError::Configuration(format!(
                        "client `{}` has no signing key",
                        props.client_id
                    ))
                })?;

                let rsa = jwa::Rsa::private_key_from_pem(jwk.pem.as_str())
                    .map_err(|err| ClientError::ClientAssertion(Arc::new(err)))?;

                Ok(Self::private_key_jwt(
                    client_id,
                    Jwk::from(rsa).with_key_id(KeyId::from(jwk.key_id.clone())),
                ))
            }
        }
    }

    /// Authenticates with assertions signed by `key`
    pub fn private_key_jwt(client_id: ClientId, key: Jwk) -> Self {
        Self::PrivateKeyJwt {
            client_id,
            key: Arc::new(key.with_algorithm(jwa::Algorithm::RS256)),
        }
    }

    /// The authenticating client
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::SecretBasic { client_id, .. }
            | Self::SecretPost { client_id, .. }
            | Self::PrivateKeyJwt { client_id, .. } => client_id,
        }
    }

    /// The authentication method
    pub fn method(&self) -> ClientAuthMethod {
        match self {
            Self::SecretBasic { .. } => ClientAuthMethod::ClientSecretBasic,
            Self::SecretPost { .. } => ClientAuthMethod::ClientSecretPost,
            Self::PrivateKeyJwt { .. } => ClientAuthMethod::PrivateKeyJwt,
        }
    }

    /// The identity that tokens obtained with these credentials are issued to
    ///
    /// # Errors
    ///
    /// Returns an error if the public part of a signing key cannot be
    /// encoded.
    pub fn credential(&self) -> Result<ClientCredential, ClientError> {
        let material = match self {
            Self::SecretBasic { client_secret, .. } | Self::SecretPost { client_secret, .. } => {
                CredentialMaterial::Secret(client_secret.clone())
            }
            Self::PrivateKeyJwt { key, .. } => {
                let public = Jwk::clone(key).public_only();
                let encoded = serde_json::to_string(&public)
                    .map_err(|err| ClientError::ClientAssertion(Arc::new(err)))?;
                CredentialMaterial::PublicKey(encoded)
            }
        };

        Ok(ClientCredential {
            client_id: self.client_id().clone(),
            method: self.method(),
            material,
        })
    }

    /// Attaches the credentials to a request for `token_url`
    ///
    /// # Errors
    ///
    /// Returns an error if a client assertion cannot be signed.
    pub fn apply<C: Clock>(
        &self,
        token_url: &Url,
        clock: &C,
        request: &mut TokenRequest,
    ) -> Result<(), ClientError> {
        match self {
            Self::SecretBasic {
                client_id,
                client_secret,
            } => {
                request.basic_auth = Some((client_id.clone(), client_secret.clone()));
            }
            Self::SecretPost {
                client_id,
                client_secret,
            } => {
                request.form.push(("client_id", client_id.as_str().to_owned()));
                request
                    .form
                    .push(("client_secret", client_secret.as_str().to_owned()));
            }
            Self::PrivateKeyJwt { client_id, key } => {
                let assertion = client_assertion(client_id, key, token_url, clock)?;
                request.form.push(("client_id", client_id.as_str().to_owned()));
                request
                    .form
                    .push(("client_assertion_type", CLIENT_ASSERTION_TYPE.to_owned()));
                request
                    .form
                    .push(("client_assertion", assertion.as_str().to_owned()));
            }
        }

        Ok(())
    }
}

/// A client together with the credentials it authenticates with
///
/// Tokens issued to one credential are never served for another, even when
/// the client ID matches.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientCredential {
    client_id: ClientId,
    method: ClientAuthMethod,
    material: CredentialMaterial,
}

impl ClientCredential {
    /// The authenticating client
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The authentication method
    pub fn method(&self) -> ClientAuthMethod {
        self.method
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CredentialMaterial {
    Secret(ClientSecret),
    PublicKey(String),
}

/// A form-encoded request to a token endpoint
#[derive(Clone)]
pub struct TokenRequest {
    /// The token endpoint
    pub url: Url,
    /// The form parameters
    pub form: Vec<(&'static str, String)>,
    /// Credentials for an HTTP Basic `Authorization` header
    pub basic_auth: Option<(ClientId, ClientSecret)>,
}

impl TokenRequest {
    /// A request carrying `form` to `url`
    pub fn new(url: Url, form: Vec<(&'static str, String)>) -> Self {
        Self {
            url,
            form,
            basic_auth: None,
        }
    }

    /// The value of the named form parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("url", &self.url.as_str())
            .field(
                "form",
                &self.form.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .field(
                "basic_auth",
                &self.basic_auth.as_ref().map(|(id, _)| id.as_str()),
            )
            .finish()
    }
}

#[derive(Serialize)]
struct ClientAssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    jti: String,
    iat: u64,
    nbf: u64,
    exp: u64,
}

fn client_assertion<C: Clock>(
    client_id: &ClientId,
    key: &Jwk,
    token_url: &Url,
    clock: &C,
) -> Result<Jwt, ClientError> {
    let now = clock.now();
    let mut jti = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut jti);

    let claims = ClientAssertionClaims {
        iss: client_id.as_str(),
        sub: client_id.as_str(),
        aud: token_url.as_str(),
        jti: Base64Url::from_raw(jti.to_vec()).to_string(),
        iat: now.0,
        nbf: now.0,
        exp: now.0 + CLIENT_ASSERTION_LIFETIME.0,
    };

    let headers = match key.key_id() {
        Some(kid) => BasicHeaders::with_key_id(jwa::Algorithm::RS256, kid.to_owned()),
        None => BasicHeaders::new(jwa::Algorithm::RS256),
    };

    Jwt::try_from_parts_with_signature(&headers, &claims, key)
        .map_err(|err| ClientError::ClientAssertion(Arc::new(err)))
}

#[cfg(test)]
mod tests {
    use aliri::jwt::{self, CoreHeaders, CoreValidator};
    use aliri_clock::{TestClock, UnixTime};
    use palisade::JwtClaims;
    use serde_json::json;

    use super::*;

    const NOW: UnixTime = UnixTime(1_700_000_000);

    fn token_url() -> Url {
        "https://login.example/token".parse().unwrap()
    }

    fn signing_key() -> Jwk {
        Jwk::from(jwa::Rsa::generate().unwrap()).with_key_id(KeyId::from_static("client-key"))
    }

    fn request() -> TokenRequest {
        TokenRequest::new(token_url(), vec![("grant_type", "client_credentials".to_owned())])
    }

    #[test]
    fn basic_auth_uses_header() -> color_eyre::Result<()> {
        let auth = ClientAuthentication::from_properties(&ClientAuthenticationProperties::basic(
            "my-client",
            "my-secret",
        ))?;
        let mut request = request();
        auth.apply(&token_url(), &TestClock::new(NOW), &mut request)?;

        let (id, secret) = request.basic_auth.as_ref().unwrap();
        assert_eq!(id.as_str(), "my-client");
        assert_eq!(secret.as_str(), "my-secret");
        assert_eq!(request.param("client_secret"), None);
        Ok(())
    }

    #[test]
    fn post_auth_uses_form() -> color_eyre::Result<()> {
        let auth = ClientAuthentication::from_properties(&ClientAuthenticationProperties::post(
            "my-client",
            "my-secret",
        ))?;
        let mut request = request();
        auth.apply(&token_url(), &TestClock::new(NOW), &mut request)?;

        assert!(request.basic_auth.is_none());
        assert_eq!(request.param("client_id"), Some("my-client"));
        assert_eq!(request.param("client_secret"), Some("my-secret"));
        Ok(())
    }

    #[test]
    fn secret_methods_require_a_secret() {
        let mut props = ClientAuthenticationProperties::basic("my-client", "unused");
        props.client_secret = None;

        assert!(matches!(
            ClientAuthentication::from_properties(&props),
            Err(ClientError::Configuration(_))
        ));
    }

    #[test]
    fn private_key_jwt_sends_signed_assertion() -> color_eyre::Result<()> {
        let key = signing_key();
        let public = key.clone().public_only().with_algorithm(jwa::Algorithm::RS256);
        let auth = ClientAuthentication::private_key_jwt(ClientId::from_static("my-client"), key);

        let mut request = request();
        auth.apply(&token_url(), &TestClock::new(NOW), &mut request)?;

        assert_eq!(request.param("client_id"), Some("my-client"));
        assert_eq!(request.param("client_assertion_type"), Some(CLIENT_ASSERTION_TYPE));

        let assertion = aliri::JwtRef::from_str(request.param("client_assertion").unwrap());
        let decomposed: jwt::Decomposed<BasicHeaders> = assertion.decompose()?;
        assert_eq!(decomposed.kid().map(|k| k.as_str()), Some("client-key"));

        let validator = CoreValidator::default()
            .ignore_expiration()
            .add_approved_algorithm(jwa::Algorithm::RS256);
        let validated: jwt::Validated<JwtClaims> = decomposed.verify(&public, &validator)?;
        let (_, claims) = validated.extract();

        assert_eq!(claims.get_str("iss"), Some("my-client"));
        assert_eq!(claims.get_str("sub"), Some("my-client"));
        assert_eq!(claims.get_str("aud"), Some("https://login.example/token"));
        assert_eq!(claims.get("iat"), Some(&json!(NOW.0)));
        assert_eq!(claims.get("nbf"), Some(&json!(NOW.0)));
        assert_eq!(claims.get("exp"), Some(&json!(NOW.0 + 60)));
        assert!(claims.get_str("jti").is_some_and(|jti| !jti.is_empty()));
        Ok(())
    }

    #[test]
    fn assertions_are_unique() -> color_eyre::Result<()> {
        let auth =
            ClientAuthentication::private_key_jwt(ClientId::from_static("c"), signing_key());
        let mut first = request();
        let mut second = request();
        auth.apply(&token_url(), &TestClock::new(NOW), &mut first)?;
        auth.apply(&token_url(), &TestClock::new(NOW), &mut second)?;

        assert_ne!(
            first.param("client_assertion"),
            second.param("client_assertion")
        );
        Ok(())
    }

    #[test]
    fn credentials_differ_by_method_and_material() -> color_eyre::Result<()> {
        let basic_a = ClientAuthentication::from_properties(
            &ClientAuthenticationProperties::basic("my-client", "secret-a"),
        )?
        .credential()?;
        let basic_b = ClientAuthentication::from_properties(
            &ClientAuthenticationProperties::basic("my-client", "secret-b"),
        )?
        .credential()?;
        let post_a = ClientAuthentication::from_properties(
            &ClientAuthenticationProperties::post("my-client", "secret-a"),
        )?
        .credential()?;

        assert_eq!(basic_a.client_id().as_str(), "my-client");
        assert_ne!(basic_a, basic_b);
        assert_ne!(basic_a, post_a);
        Ok(())
    }

    #[test]
    fn signing_key_credentials_use_the_public_key() -> color_eyre::Result<()> {
        let key = signing_key();
        let same = ClientAuthentication::private_key_jwt(ClientId::from_static("c"), key.clone());
        let again = ClientAuthentication::private_key_jwt(ClientId::from_static("c"), key);
        let other = ClientAuthentication::private_key_jwt(ClientId::from_static("c"), signing_key());

        let credential = same.credential()?;
        assert_eq!(credential, again.credential()?);
        assert_ne!(credential, other.credential()?);
        assert_eq!(credential.method(), ClientAuthMethod::PrivateKeyJwt);
        Ok(())
    }

    #[test]
    fn debug_hides_form_values() {
        let mut request = request();
        request.form.push(("client_secret", "hidden-value".to_owned()));

        let debug = format!("{request:?}");
        assert!(debug.contains("client_secret"));
        assert!(!debug.contains("hidden-value"));
    }
}
