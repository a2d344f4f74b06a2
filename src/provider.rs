// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contracts between the firewall and the pluggable authentication
//! mechanisms.

use crate::context::SecurityContext;
use crate::request::HttpRequest;
use crate::response::Response;
use crate::token::Token;
use crate::Error;

/// Default level of trust for authentication providers.
pub const DEFAULT_LEVEL_OF_TRUST: i32 = 1;

/// Populates a challenge response for an unauthenticated token: a 401 with
/// `WWW-Authenticate` header(s), or a redirect for form login.
pub trait EntryPoint: Send + Sync {
    /// Starts authentication by populating the given response with headers
    /// and/or a body. Multiple entry points may write to the same response.
    fn start_authentication(
        &self,
        ctx: &mut SecurityContext,
        token: &dyn Token,
        request: &dyn HttpRequest,
        response: &mut Response,
    ) -> Result<(), Error>;
}

/// A pluggable authentication mechanism.
///
/// Providers are long-lived and shared across concurrent requests: they hold
/// configuration only, never per-request state. All per-request state lives
/// in the [`Token`] they create.
pub trait AuthenticationProvider: Send + Sync {
    /// The unique name of this provider.
    fn name(&self) -> &str;

    /// Providers with a higher level of trust are evaluated before providers
    /// with a lower level.
    fn level_of_trust(&self) -> i32 {
        DEFAULT_LEVEL_OF_TRUST
    }

    /// Whether this provider participates in authenticating the request.
    fn matches_request(&self, _request: &dyn HttpRequest) -> bool {
        true
    }

    /// Hook allowing a provider to answer a matched request directly before
    /// any token work happens. Rarely useful; kept for parity with request
    /// interceptors.
    fn intercept_request(
        &self,
        _ctx: &mut SecurityContext,
        _request: &dyn HttpRequest,
    ) -> Option<Response> {
        None
    }

    /// Creates the per-request token of this mechanism.
    fn create_token(&self) -> Box<dyn Token>;

    /// The entry point used to challenge clients of this mechanism.
    fn entry_point(&self) -> &dyn EntryPoint;

    /// Tries to authenticate the given token. Returning `Ok(Some(response))`
    /// short-circuits the whole firewall pipeline (used by form login
    /// redirects).
    fn authenticate(
        &self,
        ctx: &mut SecurityContext,
        token: &mut dyn Token,
        request: &dyn HttpRequest,
    ) -> Result<Option<Response>, Error>;

    /// Post-processes the response for a token that authenticated
    /// successfully (e.g. Digest `Authentication-Info`).
    fn process_response(
        &self,
        _ctx: &mut SecurityContext,
        _token: &dyn Token,
        _request: &dyn HttpRequest,
        _response: &mut Response,
    ) {
    }
}

/// Restricts a firewall to a subset of requests.
pub trait RequestMatcher: Send + Sync {
    fn matches_request(&self, request: &dyn HttpRequest) -> bool;
}

/// Intercepts requests before any authentication work; returning a response
/// short-circuits the pipeline.
pub trait RequestInterceptor: Send + Sync {
    fn intercept_request(
        &self,
        ctx: &mut SecurityContext,
        request: &dyn HttpRequest,
    ) -> Option<Response>;
}

/// Post-processes responses; may replace the response entirely.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept_response(
        &self,
        ctx: &mut SecurityContext,
        request: &dyn HttpRequest,
        response: Response,
    ) -> Response;
}
