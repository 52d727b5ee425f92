use std::fmt;

use aliri_braid::braid;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

/// Writes at most `max_len` characters of a secret, eliding the rest
///
/// The width of the formatter, when given, overrides `default_len`.
fn limited_reveal(secret: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        return f.write_str("…");
    }

    if max_len > secret.len() {
        return f.write_str(secret);
    }

    match secret.char_indices().nth(max_len - 2) {
        Some((idx, c)) if idx + c.len_utf8() < secret.len() => {
            f.write_str(&secret[..idx + c.len_utf8()])?;
            f.write_str("…")
        }
        _ => f.write_str(secret),
    }
}

/// An OAuth2 client ID
#[braid(serde)]
pub struct ClientId;

/// An OAuth2 client secret
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// An access token, or a token presented as a grant
///
/// Used both for tokens received from a token endpoint and for the subject
/// tokens and assertions sent to one.
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let secret = ClientSecret::from_static("super-secret-value");

        assert_eq!(format!("{secret:?}"), "***CLIENT SECRET***");
        assert_eq!(format!("{secret}"), "***CLIENT SECRET***");
    }

    #[test]
    fn alternate_format_reveals_a_prefix() {
        let secret = ClientSecret::from_static("super-secret-value");
        let token = AccessToken::from_static("abc");

        assert_eq!(format!("{secret:#?}"), "\"supe…\"");
        assert_eq!(format!("{secret:#}"), "super-secret-value");
        assert_eq!(format!("{secret:#3}"), "su…");
        assert_eq!(format!("{token:#?}"), "\"abc\"");
    }

    #[test]
    fn client_ids_are_not_secret() {
        let id = ClientId::from_static("my-client");
        assert_eq!(format!("{id}"), "my-client");
    }
}
