// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-request security context and its injected collaborators.

use rand::RngCore;

use crate::principal::Principal;

/// Session storage scoped to the current request. Consumed, never
/// implemented here beyond test fakes.
pub trait Session {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: String);

    fn remove(&mut self, key: &str);

    /// Returns true when a session has actually been started for this
    /// request. Form authentication skips silent re-auth otherwise.
    fn is_initialized(&self) -> bool;
}

/// A session that stores nothing; useful when no session-backed provider is
/// registered.
#[derive(Default)]
pub struct NullSession;

impl Session for NullSession {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }
    fn set(&mut self, _key: &str, _value: String) {}
    fn remove(&mut self, _key: &str) {}
    fn is_initialized(&self) -> bool {
        false
    }
}

/// Requested entropy strength for generated random values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Low,
    Medium,
    High,
}

/// Process-wide randomness, injected at construction rather than discovered
/// through hidden global state.
pub trait RandomGenerator: Send + Sync {
    /// Returns `count` random bytes.
    fn generate_bytes(&self, count: usize) -> Vec<u8>;

    /// Returns a lowercase hex string covering `byte_count` random bytes of
    /// at least the requested strength.
    fn generate_hex_string(&self, byte_count: usize, strength: Strength) -> String {
        let _ = strength;
        hex::encode(self.generate_bytes(byte_count))
    }
}

/// Randomness from the operating system via [`rand::rngs::OsRng`].
///
/// The OS entropy pool satisfies every [`Strength`] level, so the strength
/// hint is accepted and ignored.
#[derive(Default)]
pub struct OsRandomGenerator;

impl RandomGenerator for OsRandomGenerator {
    fn generate_bytes(&self, count: usize) -> Vec<u8> {
        let mut buf = vec![0u8; count];
        rand::rngs::OsRng.fill_bytes(&mut buf);
        buf
    }
}

/// Per-request security state: the bound principal plus access to the
/// session and randomness collaborators.
///
/// A fresh context is created for every request; it must never be shared
/// between requests. Long-lived components (providers, the firewall) receive
/// it by reference on every call instead of storing it.
pub struct SecurityContext {
    principal: Principal,
    session: Box<dyn Session>,
    random: Box<dyn RandomGenerator>,
}

impl SecurityContext {
    pub fn new(session: Box<dyn Session>, random: Box<dyn RandomGenerator>) -> Self {
        SecurityContext {
            principal: Principal::anonymous(),
            session,
            random,
        }
    }

    /// The currently authenticated principal; anonymous until the firewall
    /// binds one.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn set_principal(&mut self, principal: Principal) {
        self.principal = principal;
    }

    pub fn session(&self) -> &dyn Session {
        &*self.session
    }

    pub fn session_mut(&mut self) -> &mut dyn Session {
        &mut *self.session
    }

    pub fn random(&self) -> &dyn RandomGenerator {
        &*self.random
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_random_hex_string_length() {
        let gen = OsRandomGenerator;
        let hex = gen.generate_hex_string(16, Strength::Low);
        assert_eq!(hex.len(), 32);
        assert!(hex.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn context_starts_anonymous() {
        let ctx = SecurityContext::new(Box::new(NullSession), Box::new(OsRandomGenerator));
        assert!(ctx.principal().is_anonymous());
    }
}
