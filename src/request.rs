// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Narrow interface over the inbound HTTP request.
//!
//! The firewall consumes requests through this trait and never owns the HTTP
//! layer. An adapter for the `http` crate is available behind the `http`
//! cargo feature.

/// Read access to the parts of a request the authentication system needs.
///
/// Body access returns a byte slice rather than a stream so the body stays
/// readable downstream of `auth-int` digest verification.
pub trait HttpRequest {
    /// The HTTP method, uppercase, such as `GET`.
    fn method(&self) -> &str;

    /// The request URI exactly as it appeared on the request line; digest
    /// HA2 computation and form-auth redirects use this verbatim.
    fn raw_uri(&self) -> &str;

    /// The decoded path component of the URI.
    fn path(&self) -> &str;

    /// The host the request was addressed to.
    fn host(&self) -> &str;

    /// Returns the value of the named header, or `None` when absent.
    /// Multi-valued headers return the first value.
    fn header(&self, name: &str) -> Option<&str>;

    fn is_secure(&self) -> bool {
        false
    }

    fn is_post(&self) -> bool {
        self.method().eq_ignore_ascii_case("POST")
    }

    /// True when the request carries an `application/x-www-form-urlencoded`
    /// body.
    fn is_form_encoded(&self) -> bool;

    /// Returns the decoded value of a form field from the request body.
    /// Field names use the PHP-style nested syntax, e.g.
    /// `auth[my-form][username]`.
    fn form_field(&self, name: &str) -> Option<&str>;

    /// The raw request body, or `None` for bodyless requests.
    fn body(&self) -> Option<&[u8]>;
}

/// Returns the value of the `Authorization` header with surrounding
/// whitespace trimmed, or `None` when absent/blank.
pub(crate) fn authorization(request: &dyn HttpRequest) -> Option<&str> {
    let value = request.header("Authorization")?.trim_matches(|c| c == ' ' || c == '\t');
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(feature = "http")]
#[cfg_attr(docsrs, doc(cfg(feature = "http")))]
pub use self::http_adapter::HttpCrateRequest;

#[cfg(feature = "http")]
mod http_adapter {
    use super::HttpRequest;

    /// Adapter implementing [`HttpRequest`] for [`http::Request`] with a
    /// buffered body.
    ///
    /// Form fields are decoded once at construction when the request carries
    /// a form-encoded body.
    pub struct HttpCrateRequest {
        inner: http::Request<Vec<u8>>,
        fields: Vec<(String, String)>,
    }

    impl HttpCrateRequest {
        pub fn new(inner: http::Request<Vec<u8>>) -> Self {
            let form_encoded = content_type_is_form(&inner);
            let fields = if form_encoded {
                parse_form_fields(inner.body())
            } else {
                Vec::new()
            };
            HttpCrateRequest { inner, fields }
        }
    }

    fn content_type_is_form(req: &http::Request<Vec<u8>>) -> bool {
        req.headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .eq_ignore_ascii_case("application/x-www-form-urlencoded")
            })
            .unwrap_or(false)
    }

    fn parse_form_fields(body: &[u8]) -> Vec<(String, String)> {
        let body = match std::str::from_utf8(body) {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        body.split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = match pair.split_once('=') {
                    Some((k, v)) => (k, v),
                    None => (pair, ""),
                };
                (percent_decode(k), percent_decode(v))
            })
            .collect()
    }

    fn percent_decode(input: &str) -> String {
        let bytes = input.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'+' => out.push(b' '),
                b'%' => {
                    let hi = bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16));
                    let lo = bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16));
                    match (hi, lo) {
                        (Some(hi), Some(lo)) => {
                            out.push((hi * 16 + lo) as u8);
                            i += 2;
                        }
                        _ => out.push(b'%'),
                    }
                }
                b => out.push(b),
            }
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    impl HttpRequest for HttpCrateRequest {
        fn method(&self) -> &str {
            self.inner.method().as_str()
        }

        fn raw_uri(&self) -> &str {
            self.inner
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/")
        }

        fn path(&self) -> &str {
            self.inner.uri().path()
        }

        fn host(&self) -> &str {
            self.inner
                .uri()
                .host()
                .or_else(|| {
                    self.inner
                        .headers()
                        .get(http::header::HOST)
                        .and_then(|v| v.to_str().ok())
                })
                .unwrap_or("")
        }

        fn header(&self, name: &str) -> Option<&str> {
            self.inner.headers().get(name).and_then(|v| v.to_str().ok())
        }

        fn is_secure(&self) -> bool {
            self.inner.uri().scheme_str() == Some("https")
        }

        fn is_form_encoded(&self) -> bool {
            content_type_is_form(&self.inner)
        }

        fn form_field(&self, name: &str) -> Option<&str> {
            self.fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        }

        fn body(&self) -> Option<&[u8]> {
            if self.inner.body().is_empty() {
                None
            } else {
                Some(self.inner.body())
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use pretty_assertions::assert_eq;

        use super::super::HttpRequest;
        use super::HttpCrateRequest;

        #[test]
        fn form_decoding() {
            let req = http::Request::builder()
                .method("POST")
                .uri("http://host.example/login?next=%2F")
                .header("Content-Type", "application/x-www-form-urlencoded; charset=utf-8")
                .body(b"auth%5Bf%5D%5Busername%5D=a+b&x=%41".to_vec())
                .unwrap();
            let req = HttpCrateRequest::new(req);
            assert!(req.is_post());
            assert!(req.is_form_encoded());
            assert_eq!(req.form_field("auth[f][username]"), Some("a b"));
            assert_eq!(req.form_field("x"), Some("A"));
            assert_eq!(req.form_field("missing"), None);
            assert_eq!(req.path(), "/login");
            assert_eq!(req.raw_uri(), "/login?next=%2F");
            assert_eq!(req.host(), "host.example");
        }
    }
}
