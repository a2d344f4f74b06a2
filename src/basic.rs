// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP Basic authentication as in [RFC
//! 7617](https://datatracker.ietf.org/doc/html/rfc7617): token, provider,
//! and entry point.

use std::any::Any;
use std::sync::Arc;

use base64::Engine as _;

use crate::context::SecurityContext;
use crate::parser::{parse_token68, strip_scheme};
use crate::principal::{Principal, PrincipalProvider};
use crate::provider::{AuthenticationProvider, EntryPoint};
use crate::request::{authorization, HttpRequest};
use crate::response::Response;
use crate::token::{AuthStatus, Token, TokenState};
use crate::Error;

/// Token used in HTTP Basic authentication.
#[derive(Default)]
pub struct BasicToken {
    state: TokenState,
    username: Option<String>,
    password: Option<String>,
}

impl BasicToken {
    /// The identity of the principal, with any `DOMAIN\` prefix stripped.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The cleartext password of the principal; extracted from the request,
    /// never persisted.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl Token for BasicToken {
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
        self.username = None;
        self.password = None;

        let payload = match authorization(request).and_then(|h| strip_scheme(h, "Basic")) {
            Some(p) => p,
            None => return,
        };
        let payload = match parse_token68(payload) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("malformed Basic authorization payload: {}", e);
                return;
            }
        };
        let decoded = match base64::engine::general_purpose::STANDARD.decode(payload) {
            Ok(d) => d,
            Err(_) => {
                log::debug!("Basic authorization payload is not valid base64");
                return;
            }
        };
        let decoded = match String::from_utf8(decoded) {
            Ok(d) => d,
            Err(_) => return,
        };
        let (username, password) = match decoded.split_once(':') {
            Some(parts) => parts,
            None => return,
        };

        // `DOMAIN\user` form: keep only the user part.
        let username = match username.rsplit_once('\\') {
            Some((_domain, user)) => user,
            None => username,
        };

        self.username = Some(username.trim().to_owned());
        self.password = Some(password.trim().to_owned());
        self.state.set_status(AuthStatus::AuthenticationNeeded);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// HTTP Basic authentication provider. Doubles as its own entry point,
/// emitting the `WWW-Authenticate: Basic` challenge.
pub struct BasicProvider {
    realm: String,
    principals: Arc<dyn PrincipalProvider>,
    level_of_trust: i32,
}

impl BasicProvider {
    pub fn new(realm: impl Into<String>, principals: Arc<dyn PrincipalProvider>) -> Self {
        BasicProvider {
            realm: realm.into(),
            principals,
            level_of_trust: crate::provider::DEFAULT_LEVEL_OF_TRUST,
        }
    }

    pub fn with_level_of_trust(mut self, level: i32) -> Self {
        self.level_of_trust = level;
        self
    }

    /// The realm advertised in challenges.
    pub fn realm(&self) -> &str {
        &self.realm
    }
}

impl AuthenticationProvider for BasicProvider {
    fn name(&self) -> &str {
        "http-basic"
    }

    fn level_of_trust(&self) -> i32 {
        self.level_of_trust
    }

    fn create_token(&self) -> Box<dyn Token> {
        Box::new(BasicToken::default())
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
            .downcast_mut::<BasicToken>()
            .ok_or(Error::UnsupportedToken("http-basic"))?;

        let identity = token.username.clone().unwrap_or_default();
        let password = token.password.clone().unwrap_or_default();

        match self
            .principals
            .find_principal_using_password(&identity, &password)
        {
            Some(principal) => {
                token.set_principal(principal);
                token.set_status(AuthStatus::AuthenticationSuccessful);
            }
            None => token.set_status(AuthStatus::WrongCredentials),
        }
        Ok(None)
    }
}

impl EntryPoint for BasicProvider {
    fn start_authentication(
        &self,
        _ctx: &mut SecurityContext,
        token: &dyn Token,
        _request: &dyn HttpRequest,
        response: &mut Response,
    ) -> Result<(), Error> {
        if !token.as_any().is::<BasicToken>() {
            return Err(Error::UnsupportedToken("http-basic"));
        }
        response.set_status(401, "Unauthorized");
        response.add_header(
            "WWW-Authenticate",
            format!("Basic realm=\"{}\"", self.realm),
        );
        Ok(())
    }
}
