// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Form-based (login page) authentication backed by a session.
//!
//! A successful login stores the identity in the session; later requests
//! re-authenticate silently from it. Login POSTs carry an anti-CSRF guard
//! value that is rotated on every attempt.

use std::any::Any;
use std::sync::Arc;

use crate::context::{SecurityContext, Strength};
use crate::principal::{Principal, PrincipalProvider};
use crate::provider::{AuthenticationProvider, EntryPoint};
use crate::request::HttpRequest;
use crate::response::Response;
use crate::token::{AuthStatus, Token, TokenState};
use crate::Error;

/// Strips the query string and surrounding slashes so that `/login`,
/// `login`, and `/login/?next=x` all compare equal.
fn normalize_path(uri: &str) -> &str {
    let path = uri.split('?').next().unwrap_or("");
    path.trim_matches('/')
}

/// Configuration shared between a form provider and the tokens it creates.
struct FormConfig {
    /// Session key prefix, derived from the provider name.
    key: String,
    login_uri: String,
    logout_uri: String,
    principals: Arc<dyn PrincipalProvider>,
}

impl FormConfig {
    fn identity_key(&self) -> String {
        format!("{}.identity", self.key)
    }
    fn guard_key(&self) -> String {
        format!("{}.guard", self.key)
    }
    fn uri_key(&self) -> String {
        format!("{}.uri", self.key)
    }

    fn is_login(&self, request: &dyn HttpRequest) -> bool {
        normalize_path(request.path()) == normalize_path(&self.login_uri)
    }
    fn is_logout(&self, request: &dyn HttpRequest) -> bool {
        normalize_path(request.path()) == normalize_path(&self.logout_uri)
    }
}

/// Token used by form-based authentication.
pub struct FormToken {
    state: TokenState,
    config: Arc<FormConfig>,
    username: String,
    password: String,

    /// True when the POSTed guard value matched the one in the session.
    guarded: bool,

    /// True when a login POST was processed and rejected.
    failed_login: bool,
}

impl FormToken {
    fn new(config: Arc<FormConfig>) -> Self {
        FormToken {
            state: TokenState::default(),
            config,
            username: String::new(),
            password: String::new(),
            guarded: false,
            failed_login: false,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    /// True when the last login attempt carried credentials that were
    /// rejected; a login page can use this to show an error message.
    pub fn is_failed_login(&self) -> bool {
        self.failed_login
    }
}

impl Token for FormToken {
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

    fn update_credentials(&mut self, ctx: &mut SecurityContext, request: &dyn HttpRequest) {
        self.state.reset();
        self.username.clear();
        self.password.clear();
        self.guarded = false;
        self.failed_login = false;
        self.state.set_status(AuthStatus::AuthenticationNeeded);

        // A logout request must not be satisfied from the session.
        if self.config.is_logout(request) {
            return;
        }

        if ctx.session().is_initialized() {
            if let Some(identity) = ctx.session().get(&self.config.identity_key()) {
                if let Some(principal) = self.config.principals.find_principal(&identity) {
                    self.state.set_principal(principal);
                    self.state.set_status(AuthStatus::AuthenticationSuccessful);
                    return;
                }
            }
        }

        if request.method() != "POST" || !request.is_form_encoded() {
            return;
        }
        let key = self.config.key.clone();
        let field = move |name: &str| format!("auth[{}][{}]", key, name);
        if let Some(username) = request.form_field(&field("username")) {
            self.username = username.to_owned();
        }
        if let Some(password) = request.form_field(&field("password")) {
            self.password = password.to_owned();
        }
        if let Some(guard) = request.form_field(&field("guard")) {
            if let Some(expected) = ctx.session().get(&self.config.guard_key()) {
                if expected == guard {
                    self.guarded = true;
                }
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Form-based authentication provider. Doubles as its own entry point,
/// redirecting unauthenticated requests to the login page.
pub struct FormProvider {
    name: String,
    config: Arc<FormConfig>,
    guard_byte_count: usize,
    guard_strength: Strength,
    level_of_trust: i32,
}

impl FormProvider {
    pub fn new(
        name: impl Into<String>,
        login_uri: impl Into<String>,
        logout_uri: impl Into<String>,
        principals: Arc<dyn PrincipalProvider>,
    ) -> Self {
        let name = name.into();
        let key = name.to_lowercase().replace('\\', "-").replace(' ', "-");
        FormProvider {
            name,
            config: Arc::new(FormConfig {
                key,
                login_uri: login_uri.into(),
                logout_uri: logout_uri.into(),
                principals,
            }),
            guard_byte_count: 16,
            guard_strength: Strength::Medium,
            level_of_trust: crate::provider::DEFAULT_LEVEL_OF_TRUST,
        }
    }

    /// Sets the byte count of generated guard values; values below 4 are
    /// raised to 4.
    pub fn with_guard_byte_count(mut self, count: usize) -> Self {
        self.guard_byte_count = count.max(4);
        self
    }

    pub fn with_guard_strength(mut self, strength: Strength) -> Self {
        self.guard_strength = strength;
        self
    }

    pub fn with_level_of_trust(mut self, level: i32) -> Self {
        self.level_of_trust = level;
        self
    }

    /// Session key prefix and form field namespace of this provider.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    pub fn username_field(&self) -> String {
        format!("auth[{}][username]", self.config.key)
    }

    pub fn password_field(&self) -> String {
        format!("auth[{}][password]", self.config.key)
    }

    pub fn guard_field(&self) -> String {
        format!("auth[{}][guard]", self.config.key)
    }

    /// The guard value a login form must embed, creating one if the session
    /// does not hold one yet.
    pub fn current_guard(&self, ctx: &mut SecurityContext) -> String {
        match ctx.session().get(&self.config.guard_key()) {
            Some(guard) => guard,
            None => self.rotate_guard(ctx),
        }
    }

    fn rotate_guard(&self, ctx: &mut SecurityContext) -> String {
        let guard = ctx
            .random()
            .generate_hex_string(self.guard_byte_count, self.guard_strength);
        ctx.session_mut()
            .set(&self.config.guard_key(), guard.clone());
        guard
    }
}

impl AuthenticationProvider for FormProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn level_of_trust(&self) -> i32 {
        self.level_of_trust
    }

    fn create_token(&self) -> Box<dyn Token> {
        Box::new(FormToken::new(self.config.clone()))
    }

    fn entry_point(&self) -> &dyn EntryPoint {
        self
    }

    fn authenticate(
        &self,
        ctx: &mut SecurityContext,
        token: &mut dyn Token,
        request: &dyn HttpRequest,
    ) -> Result<Option<Response>, Error> {
        let token = token
            .as_any_mut()
            .downcast_mut::<FormToken>()
            .ok_or(Error::UnsupportedToken("form"))?;

        if self.config.is_logout(request) {
            ctx.session_mut().remove(&self.config.identity_key());
            ctx.session_mut().remove(&self.config.uri_key());
            self.rotate_guard(ctx);
            token.set_principal(Principal::anonymous());
            token.set_status(AuthStatus::AuthenticationSuccessful);
            return Ok(None);
        }

        if !self.config.is_login(request) {
            return Ok(None);
        }

        // Every visit to the login page invalidates the previous guard,
        // including failed attempts.
        self.rotate_guard(ctx);

        if request.method() == "POST" && request.is_form_encoded() {
            // The lookup always runs so that a wrong guard is not
            // distinguishable from a wrong password by response timing.
            let principal = self
                .config
                .principals
                .find_principal_using_password(&token.username, &token.password);
            let principal = if token.guarded { principal } else { None };

            if let Some(principal) = principal {
                ctx.session_mut()
                    .set(&self.config.identity_key(), principal.identity().to_owned());
                if let Some(uri) = ctx.session().get(&self.config.uri_key()) {
                    ctx.session_mut().remove(&self.config.uri_key());
                    return Ok(Some(Response::temporary_redirect(uri)));
                }
                token.set_principal(principal);
                token.set_status(AuthStatus::AuthenticationSuccessful);
                return Ok(None);
            }
            token.failed_login = true;
        }

        // The login page itself renders for anonymous visitors.
        token.set_principal(Principal::anonymous());
        token.set_status(AuthStatus::AuthenticationSuccessful);
        Ok(None)
    }
}

impl EntryPoint for FormProvider {
    fn start_authentication(
        &self,
        ctx: &mut SecurityContext,
        _token: &dyn Token,
        request: &dyn HttpRequest,
        response: &mut Response,
    ) -> Result<(), Error> {
        // Remember where the visitor wanted to go, unless they are already
        // on the login page.
        if !self.config.is_login(request) {
            ctx.session_mut()
                .set(&self.config.uri_key(), request.raw_uri().to_owned());
        }

        *response = Response::temporary_redirect(self.config.login_uri.clone());
        Ok(())
    }
}
