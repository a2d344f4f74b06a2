// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parsing of `Authorization` header credentials as in [RFC 7235 section
//! 2.1](https://datatracker.ietf.org/doc/html/rfc7235#section-2.1).
//!
//! A credential is a scheme name followed by either a `token68` payload
//! (`Basic`, `NTLM`) or a comma-separated list of `name=value` parameters
//! (`Digest`). The firewall's tokens know which form their scheme uses, so
//! the two forms are parsed through separate entry points:
//! [`strip_scheme`] + [`parse_token68`] or [`strip_scheme`] + [`ParamParser`].
//!
//! All parse failures are recoverable: the caller leaves its token at
//! "no credentials" and the firewall proceeds to challenge the client.

use crate::table::{char_classes, C_ESCAPABLE, C_OWS, C_QDTEXT, C_TCHAR, C_TOKEN68};

/// Parse error within a credential, including an approximate byte position.
#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    pos: usize,
    msg: &'static str,
}

impl Error {
    fn new(pos: usize, msg: &'static str) -> Self {
        Error { pos, msg }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at byte {}", self.msg, self.pos)
    }
}

impl std::error::Error for Error {}

/// Parsed parameter value.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ParamValue<'i> {
    /// The number of backslash escapes in a quoted-text parameter; 0 for a plain token.
    escapes: usize,

    /// The raw string, which must be pure ASCII (no bytes >= 128) and be consistent with `escapes`.
    raw: &'i str,
}

impl<'i> ParamValue<'i> {
    /// Appends the unescaped form of this parameter to the supplied string.
    fn append_unescaped(&self, to: &mut String) {
        to.reserve(self.raw.len() - self.escapes);
        let mut first_unwritten = 0;
        for _ in 0..self.escapes {
            let i = match memchr::memchr(b'\\', &self.raw.as_bytes()[first_unwritten..]) {
                Some(rel_i) => first_unwritten + rel_i,
                None => panic!("bad ParamValue; not as many backslash escapes as promised"),
            };
            to.push_str(&self.raw[first_unwritten..i]);
            to.push_str(&self.raw[i + 1..i + 2]);
            first_unwritten = i + 2;
        }
        to.push_str(&self.raw[first_unwritten..]);
    }

    /// Returns the unescaped length of this parameter; cheap.
    #[inline]
    pub fn unescaped_len(&self) -> usize {
        self.raw.len() - self.escapes
    }

    /// Returns the unescaped form of this parameter as a fresh `String`.
    pub fn to_unescaped(&self) -> String {
        let mut to = String::new();
        self.append_unescaped(&mut to);
        to
    }
}

impl<'i> std::fmt::Debug for ParamValue<'i> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{}\"", self.raw)
    }
}

/// Strips `scheme` (compared case-insensitively) and the following whitespace
/// from a header value, returning the remaining payload.
///
/// Returns `None` when the header names a different scheme. A header
/// consisting of the scheme alone yields an empty payload.
pub fn strip_scheme<'i>(header: &'i str, scheme: &str) -> Option<&'i str> {
    let header = header.trim_matches(|c| c == ' ' || c == '\t');
    if header.len() == scheme.len() && header.eq_ignore_ascii_case(scheme) {
        return Some("");
    }
    if header.len() > scheme.len() && header[..scheme.len()].eq_ignore_ascii_case(scheme) {
        let rest = &header[scheme.len()..];
        let trimmed = rest.trim_start_matches(|c| c == ' ' || c == '\t');
        if trimmed.len() < rest.len() {
            return Some(trimmed);
        }
    }
    None
}

/// Validates and returns a `token68` payload (base64 and friends).
pub fn parse_token68(payload: &str) -> Result<&str, Error> {
    let payload = payload.trim_end_matches(|c| c == ' ' || c == '\t');
    if payload.is_empty() {
        return Err(Error::new(0, "empty token68 payload"));
    }
    for (i, &b) in payload.as_bytes().iter().enumerate() {
        if char_classes(b) & C_TOKEN68 == 0 {
            return Err(Error::new(i, "invalid token68 character"));
        }
    }
    Ok(payload)
}

/// Appends `value` to `out` as a `quoted-string`, escaping embedded quotes
/// and backslashes.
///
/// Challenge builders use this when emitting `WWW-Authenticate` parameters.
pub fn append_quoted(out: &mut String, value: &str) {
    out.push('"');
    for c in value.trim().chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Iterator over the `name=value` parameters of a credential payload.
///
/// Yields `Ok((name, value))` until the payload is exhausted or a syntax
/// error is found; after an `Err` the iterator is done. Quoted values may
/// contain backslash-escaped quotes; unescaping is deferred to
/// [`ParamValue::to_unescaped`].
pub struct ParamParser<'i> {
    input: &'i [u8],
    pos: usize,
    failed: bool,
}

impl<'i> ParamParser<'i> {
    pub fn new(payload: &'i str) -> Self {
        ParamParser {
            input: payload.as_bytes(),
            pos: 0,
            failed: false,
        }
    }

    fn skip_ows(&mut self) {
        while self.pos < self.input.len() && char_classes(self.input[self.pos]) & C_OWS != 0 {
            self.pos += 1;
        }
    }

    fn take_token(&mut self) -> &'i str {
        let start = self.pos;
        while self.pos < self.input.len() && char_classes(self.input[self.pos]) & C_TCHAR != 0 {
            self.pos += 1;
        }
        // tchar bytes are ASCII, so the slice is valid UTF-8.
        std::str::from_utf8(&self.input[start..self.pos]).unwrap_or("")
    }

    fn take_quoted(&mut self) -> Result<ParamValue<'i>, Error> {
        debug_assert_eq!(self.input[self.pos], b'"');
        self.pos += 1;
        let start = self.pos;
        let mut escapes = 0;
        loop {
            let b = match self.input.get(self.pos) {
                Some(&b) => b,
                None => return Err(Error::new(self.pos, "unterminated quoted-string")),
            };
            if b == b'"' {
                let raw = std::str::from_utf8(&self.input[start..self.pos])
                    .map_err(|_| Error::new(start, "non-ASCII quoted-string"))?;
                self.pos += 1;
                return Ok(ParamValue { escapes, raw });
            }
            if b == b'\\' {
                let next = match self.input.get(self.pos + 1) {
                    Some(&n) => n,
                    None => return Err(Error::new(self.pos, "trailing backslash")),
                };
                if char_classes(next) & C_ESCAPABLE == 0 {
                    return Err(Error::new(self.pos + 1, "invalid escaped character"));
                }
                escapes += 1;
                self.pos += 2;
                continue;
            }
            if char_classes(b) & C_QDTEXT == 0 {
                return Err(Error::new(self.pos, "invalid quoted-string character"));
            }
            self.pos += 1;
        }
    }
}

impl<'i> Iterator for ParamParser<'i> {
    type Item = Result<(&'i str, ParamValue<'i>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_ows();
        // Tolerate empty list items, as in `a=1,,b=2`.
        while self.pos < self.input.len() && self.input[self.pos] == b',' {
            self.pos += 1;
            self.skip_ows();
        }
        if self.pos >= self.input.len() {
            return None;
        }

        let name = self.take_token();
        if name.is_empty() {
            self.failed = true;
            return Some(Err(Error::new(self.pos, "expected parameter name")));
        }
        self.skip_ows();
        if self.input.get(self.pos) != Some(&b'=') {
            self.failed = true;
            return Some(Err(Error::new(self.pos, "expected '='")));
        }
        self.pos += 1;
        self.skip_ows();

        let value = match self.input.get(self.pos) {
            Some(&b'"') => match self.take_quoted() {
                Ok(v) => v,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            },
            Some(_) => {
                let raw = self.take_token();
                if raw.is_empty() {
                    self.failed = true;
                    return Some(Err(Error::new(self.pos, "expected parameter value")));
                }
                ParamValue { escapes: 0, raw }
            }
            None => {
                self.failed = true;
                return Some(Err(Error::new(self.pos, "expected parameter value")));
            }
        };
        self.skip_ows();
        match self.input.get(self.pos) {
            None => {}
            Some(&b',') => self.pos += 1,
            Some(_) => {
                self.failed = true;
                return Some(Err(Error::new(self.pos, "expected ','")));
            }
        }
        log::trace!("parsed credential param {}={:?}", name, value);
        Some(Ok((name, value)))
    }
}

/// Parses a full parameter list into a `Vec`, failing on the first error.
pub fn parse_params(payload: &str) -> Result<Vec<(&str, ParamValue<'_>)>, Error> {
    ParamParser::new(payload).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn unescaped(payload: &str) -> Vec<(String, String)> {
        parse_params(payload)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_unescaped()))
            .collect()
    }

    #[test]
    fn scheme_stripping() {
        assert_eq!(strip_scheme("Basic QWxhZGRpbg==", "Basic"), Some("QWxhZGRpbg=="));
        assert_eq!(strip_scheme("basic  QWxhZGRpbg==", "Basic"), Some("QWxhZGRpbg=="));
        assert_eq!(strip_scheme("NTLM", "NTLM"), Some(""));
        assert_eq!(strip_scheme("Digest realm=\"x\"", "Basic"), None);
        assert_eq!(strip_scheme("Basicx y", "Basic"), None);
    }

    #[test]
    fn token68() {
        assert_eq!(parse_token68("QWxhZGRpbjo=").unwrap(), "QWxhZGRpbjo=");
        parse_token68("").unwrap_err();
        parse_token68("a b").unwrap_err();
    }

    #[test]
    fn simple_params() {
        assert_eq!(
            unescaped("username=\"Mufasa\", realm=\"testrealm@host.com\", nc=00000001, qop=auth"),
            vec![
                ("username".to_owned(), "Mufasa".to_owned()),
                ("realm".to_owned(), "testrealm@host.com".to_owned()),
                ("nc".to_owned(), "00000001".to_owned()),
                ("qop".to_owned(), "auth".to_owned()),
            ],
        );
    }

    #[test]
    fn quoted_escapes() {
        assert_eq!(
            unescaped(r#"opaque="a\"b\\c""#),
            vec![("opaque".to_owned(), "a\"b\\c".to_owned())],
        );
    }

    #[test]
    fn empty_list_items() {
        assert_eq!(
            unescaped("a=1,,  b=2,"),
            vec![("a".to_owned(), "1".to_owned()), ("b".to_owned(), "2".to_owned())],
        );
    }

    #[test]
    fn malformed() {
        parse_params("username=").unwrap_err();
        parse_params("=x").unwrap_err();
        parse_params("username=\"open").unwrap_err();
        parse_params("a=1 b=2").unwrap_err();
    }

    #[test]
    fn quoting() {
        let mut s = String::new();
        append_quoted(&mut s, "say \"hi\"");
        assert_eq!(s, r#""say \"hi\"""#);
    }
}
