// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side HTTP authentication firewall.
//!
//! A firewall chains independent authentication providers (HTTP Basic, HTTP
//! Digest, NTLMv2, form login), runs them against each inbound request, and
//! either binds an authenticated [`Principal`] to the [`SecurityContext`] or
//! synthesizes a single challenge response aggregating the `WWW-Authenticate`
//! headers of every provider that did not succeed.
//!
//! As described in the following documents and specifications:
//!
//! *   [RFC 7235](https://datatracker.ietf.org/doc/html/rfc7235):
//!     Hypertext Transfer Protocol (HTTP/1.1): Authentication.
//! *   [RFC 7617](https://datatracker.ietf.org/doc/html/rfc7617):
//!     The 'Basic' HTTP Authentication Scheme
//! *   [RFC 2617](https://datatracker.ietf.org/doc/html/rfc2617) /
//!     [RFC 7616](https://datatracker.ietf.org/doc/html/rfc7616):
//!     HTTP Digest Access Authentication
//! *   [The NTLM Authentication Protocol](http://davenport.sourceforge.net/ntlm.html)
//!
//! Quick example:
//!
//! ```rust
//! use std::sync::Arc;
//! use http_auth_firewall::basic::BasicProvider;
//! use http_auth_firewall::firewall::{AuthMode, Firewall};
//! use http_auth_firewall::principal::{Principal, PrincipalProvider};
//!
//! struct SingleUser;
//!
//! impl PrincipalProvider for SingleUser {
//!     fn find_principal(&self, identity: &str) -> Option<Principal> {
//!         (identity == "admin").then(|| Principal::new("admin", "Administrator"))
//!     }
//!     fn find_principal_using_password(&self, identity: &str, password: &str) -> Option<Principal> {
//!         (identity == "admin" && password == "open sesame")
//!             .then(|| Principal::new("admin", "Administrator"))
//!     }
//! }
//!
//! let mut firewall = Firewall::new(AuthMode::ExactlyOne);
//! firewall.register_provider(Arc::new(BasicProvider::new("wonderland", Arc::new(SingleUser))));
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod context;
pub mod firewall;
pub mod nonce;
pub mod parser;
pub mod principal;
pub mod provider;
pub mod request;
pub mod response;
pub mod token;
pub mod util;

mod table;

#[cfg(feature = "basic-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "basic-scheme")))]
pub mod basic;

#[cfg(feature = "digest-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "digest-scheme")))]
pub mod digest;

#[cfg(feature = "ntlm-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "ntlm-scheme")))]
pub mod ntlm;

#[cfg(feature = "form-scheme")]
#[cfg_attr(docsrs, doc(cfg(feature = "form-scheme")))]
pub mod form;

#[cfg(feature = "cipher")]
#[cfg_attr(docsrs, doc(cfg(feature = "cipher")))]
pub mod cipher;

#[cfg(test)]
pub(crate) mod testutil;

pub use crate::context::SecurityContext;
pub use crate::firewall::Firewall;
pub use crate::principal::Principal;
pub use crate::token::AuthStatus;
pub use crate::util::timing_safe_eq;

/// Error raised by the security system.
///
/// Malformed wire data (a bad `Authorization` header, a truncated NTLM
/// message) is deliberately *not* represented here: it degrades the affected
/// token to [`AuthStatus::NoCredentials`] and the firewall proceeds to
/// challenge the client. Wrong credentials likewise surface as token status,
/// not as an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid construction parameters, raised at setup time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A forced challenge found no entry point to challenge with. This is a
    /// firewall configuration defect, not a client-facing retry case.
    #[error("access denied: authentication failed and no entry point is available")]
    AccessDenied,

    /// The MAC of an encrypted message did not verify.
    #[error("integrity check failed on encrypted message")]
    IntegrityCheckFailed,

    /// A provider was handed a token created by a different provider.
    #[error("token not supported by provider {0}")]
    UnsupportedToken(&'static str),
}
