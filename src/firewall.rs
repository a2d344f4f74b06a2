// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The firewall: orchestrates authentication providers over a request and
//! decides, per the configured quorum, whether a challenge goes out.

use std::sync::Arc;

use crate::context::SecurityContext;
use crate::principal::Principal;
use crate::provider::{
    AuthenticationProvider, RequestInterceptor, RequestMatcher, ResponseInterceptor,
};
use crate::request::HttpRequest;
use crate::response::Response;
use crate::token::{AuthStatus, Token};
use crate::Error;

/// How many of the participating providers must authenticate before the
/// request passes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// The first successful provider wins and evaluation stops.
    ExactlyOne,

    /// Every participating provider runs; at least one must succeed.
    AtLeastOne,

    /// Every participating provider must succeed.
    All,
}

struct RunToken {
    /// Index into `Firewall::providers`.
    provider: usize,
    token: Box<dyn Token>,
}

/// Per-request outcome of a firewall pass.
///
/// Providers are long-lived and shared; everything tied to one request lives
/// here or in the [`SecurityContext`].
pub struct FirewallRun {
    tokens: Vec<RunToken>,
    authenticated: Vec<usize>,

    /// A response that ends the request without reaching the application:
    /// a challenge, a redirect, or an interceptor's answer.
    response: Option<Response>,
}

impl FirewallRun {
    fn new() -> Self {
        FirewallRun {
            tokens: Vec::new(),
            authenticated: Vec::new(),
            response: None,
        }
    }

    fn with_response(response: Response) -> Self {
        FirewallRun {
            tokens: Vec::new(),
            authenticated: Vec::new(),
            response: Some(response),
        }
    }

    /// The response that should be sent instead of invoking the application,
    /// if any.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Tokens prepared for this request, in provider trust order.
    pub fn tokens(&self) -> impl Iterator<Item = &dyn Token> {
        self.tokens.iter().map(|t| &*t.token)
    }
}

/// Orchestrates a trust-ordered list of authentication providers.
///
/// The firewall itself is immutable during request processing and may be
/// shared across threads; per-request state lives in the [`FirewallRun`]
/// each pass returns.
pub struct Firewall {
    mode: AuthMode,

    /// When true, a quorum failure challenges the client even though the
    /// request might be served anonymously.
    eager: bool,

    matchers: Vec<Box<dyn RequestMatcher>>,
    providers: Vec<Arc<dyn AuthenticationProvider>>,
    request_interceptors: Vec<(i32, Box<dyn RequestInterceptor>)>,
    response_interceptors: Vec<(i32, Box<dyn ResponseInterceptor>)>,
}

impl Firewall {
    pub fn new(mode: AuthMode) -> Self {
        Firewall {
            mode,
            eager: true,
            matchers: Vec::new(),
            providers: Vec::new(),
            request_interceptors: Vec::new(),
            response_interceptors: Vec::new(),
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn set_eager(&mut self, eager: bool) {
        self.eager = eager;
    }

    pub fn with_eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    /// Registers a provider, keeping the list sorted by descending level of
    /// trust. Providers with equal trust stay in registration order.
    pub fn register_provider(&mut self, provider: Arc<dyn AuthenticationProvider>) {
        let level = provider.level_of_trust();
        let at = self
            .providers
            .iter()
            .position(|p| p.level_of_trust() < level)
            .unwrap_or(self.providers.len());
        self.providers.insert(at, provider);
    }

    pub fn register_matcher(&mut self, matcher: Box<dyn RequestMatcher>) {
        self.matchers.push(matcher);
    }

    /// Registers a request interceptor; higher priorities run first, equal
    /// priorities in registration order.
    pub fn register_request_interceptor(
        &mut self,
        interceptor: Box<dyn RequestInterceptor>,
        priority: i32,
    ) {
        let at = self
            .request_interceptors
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.request_interceptors.len());
        self.request_interceptors.insert(at, (priority, interceptor));
    }

    /// Registers a response interceptor; higher priorities run first, equal
    /// priorities in registration order.
    pub fn register_response_interceptor(
        &mut self,
        interceptor: Box<dyn ResponseInterceptor>,
        priority: i32,
    ) {
        let at = self
            .response_interceptors
            .iter()
            .position(|(p, _)| *p < priority)
            .unwrap_or(self.response_interceptors.len());
        self.response_interceptors.insert(at, (priority, interceptor));
    }

    /// Whether this firewall is responsible for the request. A firewall
    /// without matchers matches everything.
    pub fn matches_request(&self, request: &dyn HttpRequest) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|m| m.matches_request(request))
    }

    /// Runs the authentication pass over the request.
    ///
    /// When the returned run carries a response, the request is finished:
    /// send that response instead of invoking the application. Otherwise the
    /// context principal is bound and the request may proceed.
    pub fn intercept_request(
        &self,
        ctx: &mut SecurityContext,
        request: &dyn HttpRequest,
    ) -> Result<FirewallRun, Error> {
        for (_, interceptor) in &self.request_interceptors {
            if let Some(response) = interceptor.intercept_request(ctx, request) {
                return Ok(FirewallRun::with_response(response));
            }
        }

        let mut run = FirewallRun::new();

        // First phase: every matching provider gets a token fed from the
        // request. The firewall sees the credentials of all mechanisms
        // before any verification starts.
        for (i, provider) in self.providers.iter().enumerate() {
            if !provider.matches_request(request) {
                continue;
            }
            if let Some(response) = provider.intercept_request(ctx, request) {
                run.response = Some(response);
                return Ok(run);
            }
            let mut token = provider.create_token();
            token.update_credentials(ctx, request);
            run.tokens.push(RunToken { provider: i, token });
        }

        // Second phase: verification, in trust order.
        for (slot, entry) in run.tokens.iter_mut().enumerate() {
            let provider = &self.providers[entry.provider];
            if entry.token.status() == AuthStatus::AuthenticationNeeded {
                if let Some(response) =
                    provider.authenticate(ctx, &mut *entry.token, request)?
                {
                    run.response = Some(response);
                    return Ok(run);
                }
            }
            if entry.token.status() == AuthStatus::AuthenticationSuccessful {
                run.authenticated.push(slot);
                if self.mode == AuthMode::ExactlyOne {
                    if let Some(principal) = entry.token.principal() {
                        ctx.set_principal(principal.clone());
                    }
                    return Ok(run);
                }
            }
        }

        let mut need_auth = self.eager;
        match self.mode {
            AuthMode::All if run.authenticated.len() == run.tokens.len() => need_auth = false,
            AuthMode::AtLeastOne | AuthMode::ExactlyOne if !run.authenticated.is_empty() => {
                need_auth = false
            }
            _ => {}
        }
        if need_auth {
            run.response = Some(self.challenge(ctx, &run, request)?);
            return Ok(run);
        }

        if let Some(principal) = self.quorum_principal(&run) {
            ctx.set_principal(principal);
        }
        Ok(run)
    }

    /// The principal bound after a passed quorum: the first authenticated
    /// token's principal, with any further authenticated principals
    /// aggregated into it.
    fn quorum_principal(&self, run: &FirewallRun) -> Option<Principal> {
        let mut principals = run
            .authenticated
            .iter()
            .filter_map(|&slot| run.tokens[slot].token.principal().cloned());
        let first = principals.next()?;
        Some(first.aggregating(principals))
    }

    /// Whether the quorum passed for this run.
    pub fn is_authenticated(&self, run: &FirewallRun) -> bool {
        match self.mode {
            AuthMode::All => run.tokens.len() == run.authenticated.len(),
            AuthMode::AtLeastOne | AuthMode::ExactlyOne => !run.authenticated.is_empty(),
        }
    }

    /// Builds the aggregated challenge: every non-successful token's entry
    /// point writes into one 401 response.
    pub fn challenge(
        &self,
        ctx: &mut SecurityContext,
        run: &FirewallRun,
        request: &dyn HttpRequest,
    ) -> Result<Response, Error> {
        let pending: Vec<&RunToken> = run
            .tokens
            .iter()
            .filter(|t| t.token.status() != AuthStatus::AuthenticationSuccessful)
            .collect();
        if pending.is_empty() {
            return Err(Error::AccessDenied);
        }

        let mut response = Response::unauthorized();
        for entry in pending {
            self.providers[entry.provider].entry_point().start_authentication(
                ctx,
                &*entry.token,
                request,
                &mut response,
            )?;
        }
        Ok(response)
    }

    /// Runs the response path: `process_response` for every authenticated
    /// token, then the response interceptors.
    pub fn intercept_response(
        &self,
        ctx: &mut SecurityContext,
        run: &FirewallRun,
        request: &dyn HttpRequest,
        mut response: Response,
    ) -> Response {
        for &slot in &run.authenticated {
            let entry = &run.tokens[slot];
            self.providers[entry.provider].process_response(
                ctx,
                &*entry.token,
                request,
                &mut response,
            );
        }
        for (_, interceptor) in &self.response_interceptors {
            response = interceptor.intercept_response(ctx, request, response);
        }
        response
    }
}
