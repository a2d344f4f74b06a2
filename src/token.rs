// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication tokens: per-request, per-mechanism credential state.

use std::any::Any;

use crate::context::SecurityContext;
use crate::principal::Principal;
use crate::request::HttpRequest;

/// Authentication status of a token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    /// No credentials have been passed to the application.
    NoCredentials,

    /// Credentials have been passed to the application and a provider must
    /// determine a security principal for them.
    AuthenticationNeeded,

    /// Credentials have been passed but no principal was found for them.
    WrongCredentials,

    /// A principal has been authenticated successfully.
    AuthenticationSuccessful,
}

/// Shared state of every token: status and the resolved principal.
///
/// Status moves forward only; once a token reached
/// [`AuthStatus::AuthenticationSuccessful`] within a request, attempts to
/// downgrade it are ignored. `reset` (at the start of credential extraction)
/// is the only way back.
#[derive(Debug)]
pub struct TokenState {
    status: AuthStatus,
    principal: Option<Principal>,
}

impl Default for TokenState {
    fn default() -> Self {
        TokenState {
            status: AuthStatus::NoCredentials,
            principal: None,
        }
    }
}

impl TokenState {
    pub fn status(&self) -> AuthStatus {
        self.status
    }

    pub fn set_status(&mut self, status: AuthStatus) {
        if self.status == AuthStatus::AuthenticationSuccessful
            && status != AuthStatus::AuthenticationSuccessful
        {
            log::warn!("ignoring downgrade of authenticated token to {:?}", status);
            return;
        }
        self.status = status;
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = Some(principal);
    }

    /// Clears status and principal at the start of credential extraction.
    pub fn reset(&mut self) {
        self.status = AuthStatus::NoCredentials;
        self.principal = None;
    }
}

/// Every authentication provider uses a token to keep track of
/// authentication details. Tokens live for exactly one request.
pub trait Token {
    fn status(&self) -> AuthStatus;

    fn set_status(&mut self, status: AuthStatus);

    fn principal(&self) -> Option<&Principal>;

    fn set_principal(&mut self, principal: Principal);

    /// Resets the token and re-extracts credentials from the given request.
    fn update_credentials(&mut self, ctx: &mut SecurityContext, request: &dyn HttpRequest);

    /// Downcast support; providers recover their concrete token type with it.
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_downgrade_from_successful() {
        let mut state = TokenState::default();
        state.set_status(AuthStatus::AuthenticationNeeded);
        state.set_status(AuthStatus::AuthenticationSuccessful);
        state.set_status(AuthStatus::WrongCredentials);
        assert_eq!(state.status(), AuthStatus::AuthenticationSuccessful);
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = TokenState::default();
        state.set_principal(Principal::new("a", "A"));
        state.set_status(AuthStatus::AuthenticationSuccessful);
        state.reset();
        assert_eq!(state.status(), AuthStatus::NoCredentials);
        assert!(state.principal().is_none());
    }
}
