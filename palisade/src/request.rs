//! Access to the parts of an inbound request that can carry tokens

use http::{header, HeaderMap};

/// A cookie sent with a request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestCookie {
    /// The cookie name
    pub name: String,
    /// The cookie value
    pub value: String,
}

/// An inbound request, as seen by token extraction
pub trait InboundRequest {
    /// The first value of the named header, if present and valid text
    fn header(&self, name: &str) -> Option<&str>;

    /// Every cookie sent with the request, in the order sent
    fn cookies(&self) -> Vec<RequestCookie>;
}

impl InboundRequest for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    fn cookies(&self) -> Vec<RequestCookie> {
        self.get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_cookie_header)
            .collect()
    }
}

impl<B> InboundRequest for http::Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().header(name)
    }

    fn cookies(&self) -> Vec<RequestCookie> {
        self.headers().cookies()
    }
}

impl InboundRequest for http::request::Parts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.header(name)
    }

    fn cookies(&self) -> Vec<RequestCookie> {
        self.headers.cookies()
    }
}

impl<T: InboundRequest + ?Sized> InboundRequest for &'_ T {
    fn header(&self, name: &str) -> Option<&str> {
        (**self).header(name)
    }

    fn cookies(&self) -> Vec<RequestCookie> {
        (**self).cookies()
    }
}

fn parse_cookie_header(value: &str) -> impl Iterator<Item = RequestCookie> + '_ {
    value.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);

        Some(RequestCookie {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    })
}
