// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP Digest authentication as in [RFC
//! 2617](https://datatracker.ietf.org/doc/html/rfc2617): token, provider,
//! and entry point, with optional nonce replay protection.

use std::any::Any;
use std::sync::Arc;

use digest::Digest as _;
use md5::Md5;

use crate::context::{SecurityContext, Strength};
use crate::nonce::{NonceCheck, NonceTracker};
use crate::parser::{append_quoted, parse_params, strip_scheme};
use crate::principal::{Principal, PrincipalProvider};
use crate::provider::{AuthenticationProvider, EntryPoint};
use crate::request::{authorization, HttpRequest};
use crate::response::Response;
use crate::token::{AuthStatus, Token, TokenState};
use crate::util::timing_safe_str_eq;
use crate::Error;

/// Quality of protection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Qop {
    /// Authentication only, as specified in RFC 2617.
    Auth,

    /// Like `Auth` but additionally covers an MD5 hash of the request body.
    /// Many clients do not support this.
    AuthInt,
}

impl Qop {
    fn as_str(self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Token used in HTTP Digest authentication.
pub struct DigestToken {
    state: TokenState,

    /// Quality of protection configured on the owning provider; HA2
    /// computation depends on it.
    config_qop: Qop,

    username: Option<String>,
    realm: Option<String>,
    nonce: Option<String>,
    uri: Option<String>,
    qop: Option<String>,
    nc: Option<String>,
    cnonce: Option<String>,
    opaque: Option<String>,
    response: Option<String>,

    /// HA2 hash computed from data provided by the client.
    ha2: Option<String>,

    /// Stale state of the nonce, set by the authentication provider.
    stale: bool,
}

impl DigestToken {
    fn new(config_qop: Qop) -> Self {
        DigestToken {
            state: TokenState::default(),
            config_qop,
            username: None,
            realm: None,
            nonce: None,
            uri: None,
            qop: None,
            nc: None,
            cnonce: None,
            opaque: None,
            response: None,
            ha2: None,
            stale: false,
        }
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Nonce count parsed from its hex representation.
    pub fn nonce_count(&self) -> u32 {
        self.nc
            .as_deref()
            .and_then(|nc| u32::from_str_radix(nc, 16).ok())
            .unwrap_or(0)
    }

    pub fn client_nonce(&self) -> Option<&str> {
        self.cnonce.as_deref()
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    /// Checks the client's response hash against the given HA1 value.
    ///
    /// Both the `opaque` echo and the response hash are compared in constant
    /// time.
    pub fn is_valid_response(&self, expected_opaque: &str, ha1: &str) -> bool {
        let opaque = match self.opaque.as_deref() {
            Some(o) => o,
            None => return false,
        };
        if !timing_safe_str_eq(expected_opaque, opaque) {
            return false;
        }
        let expected = md5_hex(
            format!(
                "{}:{}:{}:{}:{}:{}",
                ha1,
                self.nonce.as_deref().unwrap_or(""),
                self.nc.as_deref().unwrap_or(""),
                self.cnonce.as_deref().unwrap_or(""),
                self.config_qop.as_str(),
                self.ha2.as_deref().unwrap_or(""),
            )
            .as_bytes(),
        );
        timing_safe_str_eq(&expected, self.response.as_deref().unwrap_or(""))
    }

    fn compute_ha2(&self, request: &dyn HttpRequest, uri: &str) -> String {
        match self.config_qop {
            Qop::Auth => md5_hex(format!("{}:{}", request.method(), uri).as_bytes()),
            Qop::AuthInt => {
                // The body hash covers the empty string for bodyless
                // requests; the body itself stays readable downstream.
                let body_md5 = md5_hex(request.body().unwrap_or(b""));
                md5_hex(format!("{}:{}:{}", request.method(), uri, body_md5).as_bytes())
            }
        }
    }
}

impl Token for DigestToken {
    fn status(&self) -> AuthStatus {
        self.state.status()
    }
    fn set_status(&mut self, status: AuthStatus) {
        self.state.set_status(status);
    }
    fn principal(&self) -> Option<&Principal> {
        self.state.principal()
    }
    fn set_principal(&mut self, principal: Principal) {
        self.state.set_principal(principal);
    }

    fn update_credentials(&mut self, _ctx: &mut SecurityContext, request: &dyn HttpRequest) {
        self.state.reset();
        self.stale = false;
        self.username = None;
        self.realm = None;
        self.nonce = None;
        self.uri = None;
        self.qop = None;
        self.nc = None;
        self.cnonce = None;
        self.opaque = None;
        self.response = None;
        self.ha2 = None;

        let payload = match authorization(request).and_then(|h| strip_scheme(h, "Digest")) {
            Some(p) => p,
            None => return,
        };
        let params = match parse_params(payload) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("malformed Digest authorization payload: {}", e);
                return;
            }
        };
        for (name, value) in params {
            let target = match name {
                "username" => &mut self.username,
                "realm" => &mut self.realm,
                "nonce" => &mut self.nonce,
                "qop" => &mut self.qop,
                "nc" => &mut self.nc,
                "cnonce" => &mut self.cnonce,
                "opaque" => &mut self.opaque,
                "response" => &mut self.response,
                _ => continue,
            };
            *target = Some(value.to_unescaped());
        }

        // All of these must be present for the response to be verifiable.
        if self.username.is_none()
            || self.nonce.is_none()
            || self.response.is_none()
            || self.cnonce.is_none()
            || self.nc.is_none()
        {
            log::debug!("Digest authorization is missing required parameters");
            self.username = None;
            return;
        }

        // `domain\user` form: keep the user part when the domain names this
        // host.
        if let Some(username) = self.username.take() {
            self.username = Some(match username.rsplit_once('\\') {
                Some((domain, user)) if domain == request.host() => user.to_owned(),
                _ => username,
            });
        }

        let uri = request.raw_uri().to_owned();
        self.ha2 = Some(self.compute_ha2(request, &uri));
        self.uri = Some(uri);
        self.state.set_status(AuthStatus::AuthenticationNeeded);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// HTTP Digest authentication provider. Doubles as its own entry point,
/// emitting the `WWW-Authenticate: Digest` challenge.
pub struct DigestProvider {
    realm: String,
    qop: Qop,
    nonce_byte_count: usize,
    nonce_strength: Strength,
    nonce_tracker: Option<Arc<dyn NonceTracker>>,
    principals: Arc<dyn PrincipalProvider>,
    level_of_trust: i32,
}

impl DigestProvider {
    pub fn new(realm: impl Into<String>, principals: Arc<dyn PrincipalProvider>) -> Self {
        DigestProvider {
            realm: realm.into(),
            qop: Qop::Auth,
            nonce_byte_count: 16,
            nonce_strength: Strength::Low,
            nonce_tracker: None,
            principals,
            level_of_trust: crate::provider::DEFAULT_LEVEL_OF_TRUST,
        }
    }

    pub fn with_qop(mut self, qop: Qop) -> Self {
        self.qop = qop;
        self
    }

    pub fn with_nonce_tracker(mut self, tracker: Arc<dyn NonceTracker>) -> Self {
        self.nonce_tracker = Some(tracker);
        self
    }

    /// Sets the byte count of generated nonces; values below 4 are raised
    /// to 4.
    pub fn with_nonce_byte_count(mut self, count: usize) -> Self {
        self.nonce_byte_count = count.max(4);
        self
    }

    pub fn with_nonce_strength(mut self, strength: Strength) -> Self {
        self.nonce_strength = strength;
        self
    }

    pub fn with_level_of_trust(mut self, level: i32) -> Self {
        self.level_of_trust = level;
        self
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn qop(&self) -> Qop {
        self.qop
    }

    /// The `opaque` challenge value; clients must echo it back verbatim.
    pub fn opaque(&self) -> String {
        md5_hex(self.realm.as_bytes())
    }

    /// Creates a one-time nonce, tracked when a nonce tracker is configured
    /// and plain random otherwise.
    pub fn create_nonce(&self, ctx: &SecurityContext) -> String {
        match &self.nonce_tracker {
            None => ctx
                .random()
                .generate_hex_string(self.nonce_byte_count, self.nonce_strength),
            Some(tracker) => {
                tracker.initialize();
                tracker.create_nonce()
            }
        }
    }
}

impl AuthenticationProvider for DigestProvider {
    fn name(&self) -> &str {
        "http-digest"
    }

    fn level_of_trust(&self) -> i32 {
        self.level_of_trust
    }

    fn create_token(&self) -> Box<dyn Token> {
        Box::new(DigestToken::new(self.qop))
    }

    fn entry_point(&self) -> &dyn EntryPoint {
        self
    }

    fn authenticate(
        &self,
        _ctx: &mut SecurityContext,
        token: &mut dyn Token,
        _request: &dyn HttpRequest,
    ) -> Result<Option<Response>, Error> {
        let token = token
            .as_any_mut()
            .downcast_mut::<DigestToken>()
            .ok_or(Error::UnsupportedToken("http-digest"))?;

        if let Some(tracker) = &self.nonce_tracker {
            tracker.initialize();
            let nonce = token.nonce.clone().unwrap_or_default();
            match tracker.check_nonce(&nonce, token.nonce_count()) {
                NonceCheck::Ok => {}
                NonceCheck::Stale => {
                    token.set_stale(true);
                    return Ok(None);
                }
                NonceCheck::Invalid => {
                    log::debug!("rejecting Digest auth with invalid nonce");
                    return Ok(None);
                }
            }
        }

        let identity = token.username.clone().unwrap_or_default();

        // A missing HA1 still goes through the full comparison so that an
        // unknown username is indistinguishable from a wrong password.
        let ha1 = self
            .principals
            .find_principal_ha1(&identity, &self.realm)
            .unwrap_or_default();

        if !token.is_valid_response(&self.opaque(), &ha1) {
            self.principals.principal_not_found(&identity);
            token.set_status(AuthStatus::WrongCredentials);
            return Ok(None);
        }

        let principal = match self.principals.find_principal(&identity) {
            Some(p) => p,
            None => {
                token.set_status(AuthStatus::WrongCredentials);
                return Ok(None);
            }
        };

        token.set_principal(principal.clone());
        token.set_status(AuthStatus::AuthenticationSuccessful);
        self.principals.principal_found(&principal);
        Ok(None)
    }

    fn process_response(
        &self,
        ctx: &mut SecurityContext,
        token: &dyn Token,
        _request: &dyn HttpRequest,
        response: &mut Response,
    ) {
        if token.status() != AuthStatus::AuthenticationSuccessful {
            return;
        }
        response.add_header(
            "Authentication-Info",
            format!(
                "nextnonce=\"{}\", qop={}",
                self.create_nonce(ctx),
                self.qop.as_str()
            ),
        );
    }
}

impl EntryPoint for DigestProvider {
    fn start_authentication(
        &self,
        ctx: &mut SecurityContext,
        token: &dyn Token,
        _request: &dyn HttpRequest,
        response: &mut Response,
    ) -> Result<(), Error> {
        let token = token
            .as_any()
            .downcast_ref::<DigestToken>()
            .ok_or(Error::UnsupportedToken("http-digest"))?;

        let mut challenge = String::with_capacity(128);
        challenge.push_str("Digest realm=");
        append_quoted(&mut challenge, &self.realm);
        challenge.push_str(",qop=");
        append_quoted(&mut challenge, self.qop.as_str());
        challenge.push_str(",opaque=");
        append_quoted(&mut challenge, &self.opaque());
        challenge.push_str(",nonce=");
        append_quoted(&mut challenge, &self.create_nonce(ctx));
        if token.is_stale() {
            challenge.push_str(",stale=true");
        }

        response.set_status(401, "Unauthorized");
        response.add_header("WWW-Authenticate", challenge);
        Ok(())
    }
}
