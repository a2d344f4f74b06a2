// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory fakes for the consumed collaborator interfaces, test-only.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::context::{RandomGenerator, SecurityContext, Session, Strength};
use crate::principal::{Principal, PrincipalProvider};
use crate::request::HttpRequest;

/// A request assembled field by field.
#[derive(Default)]
pub struct FakeRequest {
    pub method: String,
    pub raw_uri: String,
    pub path: String,
    pub host: String,
    pub secure: bool,
    pub form_encoded: bool,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl FakeRequest {
    pub fn get(uri: &str) -> Self {
        FakeRequest {
            method: "GET".to_owned(),
            raw_uri: uri.to_owned(),
            path: uri.split('?').next().unwrap_or("").to_owned(),
            host: "host.example".to_owned(),
            ..Default::default()
        }
    }

    pub fn post_form(uri: &str, fields: &[(&str, &str)]) -> Self {
        let mut req = Self::get(uri);
        req.method = "POST".to_owned();
        req.form_encoded = true;
        req.form = fields
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        req
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = Some(body.to_vec());
        self
    }
}

impl HttpRequest for FakeRequest {
    fn method(&self) -> &str {
        &self.method
    }
    fn raw_uri(&self) -> &str {
        &self.raw_uri
    }
    fn path(&self) -> &str {
        &self.path
    }
    fn host(&self) -> &str {
        &self.host
    }
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
    fn is_secure(&self) -> bool {
        self.secure
    }
    fn is_form_encoded(&self) -> bool {
        self.form_encoded
    }
    fn form_field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
    fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

/// Session over a plain map.
#[derive(Default)]
pub struct MemorySession {
    pub values: HashMap<String, String>,
    pub initialized: bool,
}

impl MemorySession {
    pub fn initialized() -> Self {
        MemorySession {
            initialized: true,
            ..Default::default()
        }
    }
}

impl Session for MemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
    fn set(&mut self, key: &str, value: String) {
        self.values.insert(key.to_owned(), value);
    }
    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Deterministic "randomness": an incrementing byte sequence.
#[derive(Default)]
pub struct FixedRandom {
    counter: Mutex<u8>,
}

impl RandomGenerator for FixedRandom {
    fn generate_bytes(&self, count: usize) -> Vec<u8> {
        let mut counter = self.counter.lock().unwrap();
        *counter = counter.wrapping_add(1);
        vec![*counter; count]
    }

    fn generate_hex_string(&self, byte_count: usize, _strength: Strength) -> String {
        hex::encode(self.generate_bytes(byte_count))
    }
}

/// Principal lookup over maps, recording the notification hooks.
#[derive(Default)]
pub struct MapPrincipalProvider {
    /// identity -> (password, display name)
    pub passwords: HashMap<String, (String, String)>,
    /// (identity, realm) -> HA1 hex
    pub ha1s: HashMap<(String, String), String>,
    /// (identity, domain) -> MD4 hash bytes
    pub md4s: HashMap<(String, String), Vec<u8>>,
    pub found: Mutex<Vec<String>>,
    pub not_found: Mutex<Vec<String>>,
}

impl MapPrincipalProvider {
    pub fn with_password(identity: &str, password: &str) -> Self {
        let mut p = Self::default();
        p.passwords.insert(
            identity.to_owned(),
            (password.to_owned(), identity.to_owned()),
        );
        p
    }
}

impl PrincipalProvider for MapPrincipalProvider {
    fn find_principal(&self, identity: &str) -> Option<Principal> {
        let (_, name) = self.passwords.get(identity)?;
        Some(Principal::new(identity, name.clone()))
    }

    fn find_principal_using_password(&self, identity: &str, password: &str) -> Option<Principal> {
        let (expected, name) = self.passwords.get(identity)?;
        if expected == password {
            Some(Principal::new(identity, name.clone()))
        } else {
            None
        }
    }

    fn find_principal_ha1(&self, identity: &str, realm: &str) -> Option<String> {
        self.ha1s
            .get(&(identity.to_owned(), realm.to_owned()))
            .cloned()
    }

    fn find_principal_md4(&self, identity: &str, domain: &str) -> Option<Vec<u8>> {
        self.md4s
            .get(&(identity.to_owned(), domain.to_owned()))
            .cloned()
    }

    fn principal_found(&self, principal: &Principal) {
        self.found.lock().unwrap().push(principal.identity().to_owned());
    }

    fn principal_not_found(&self, identity: &str) {
        self.not_found.lock().unwrap().push(identity.to_owned());
    }
}

/// A context over an initialized in-memory session and fixed randomness.
pub fn test_context() -> SecurityContext {
    SecurityContext::new(
        Box::new(MemorySession::initialized()),
        Box::new(FixedRandom::default()),
    )
}
