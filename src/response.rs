// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Minimal HTTP response builder populated by entry points and interceptors.

/// A response under construction.
///
/// Entry points append challenge headers to a shared 401 response; the form
/// entry point replaces status and `Location` instead. The embedding server
/// converts this into its own response type.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Response {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A bare `401 Unauthorized` awaiting `WWW-Authenticate` headers.
    pub fn unauthorized() -> Self {
        Response::new(401, "Unauthorized")
    }

    /// A `307 Temporary Redirect` to the given location.
    pub fn temporary_redirect(location: impl Into<String>) -> Self {
        let mut response = Response::new(307, "Temporary Redirect");
        response.set_header("Location", location);
        response
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn set_status(&mut self, status: u16, reason: impl Into<String>) {
        self.status = status;
        self.reason = reason.into();
    }

    /// Replaces all values of the named header.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Appends a value to the named header, keeping existing values.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Returns the first value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value of the named header in insertion order.
    pub fn headers(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}
