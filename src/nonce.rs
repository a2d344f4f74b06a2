// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Replay protection for Digest nonces.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::context::{OsRandomGenerator, RandomGenerator, Strength};

/// Outcome of checking a client-supplied nonce.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NonceCheck {
    /// Nonce is known and the count moves forward.
    Ok,

    /// Nonce would be acceptable but has expired; the client should retry
    /// against a fresh nonce (`stale=true` in the challenge).
    Stale,

    /// Nonce is unknown or the count was replayed.
    Invalid,
}

/// Tracks server-issued nonces so a nonce+count pair can be accepted at most
/// once.
///
/// Implementations backed by shared storage must make `check_nonce` an
/// atomic check-and-mark: two concurrent requests presenting the same
/// nonce+count pair must not both pass.
pub trait NonceTracker: Send + Sync {
    /// Prepares backing storage; called before every use.
    fn initialize(&self);

    /// Creates and records a fresh nonce value.
    fn create_nonce(&self) -> String;

    /// Checks the given nonce and client nonce count (parsed from hex).
    fn check_nonce(&self, nonce: &str, count: u32) -> NonceCheck;
}

/// In-memory nonce tracker for tests and single-process deployments.
///
/// Nonces expire after a configurable lifetime; an expired nonce reports
/// [`NonceCheck::Stale`] exactly as a storage-backed tracker would.
pub struct MemoryNonceTracker {
    lifetime: Duration,
    random: Box<dyn RandomGenerator>,
    nonces: Mutex<HashMap<String, NonceEntry>>,
}

struct NonceEntry {
    created: Instant,
    highest_count: u32,
}

impl MemoryNonceTracker {
    pub fn new(lifetime: Duration) -> Self {
        MemoryNonceTracker::with_random(lifetime, Box::new(OsRandomGenerator))
    }

    /// Like [`MemoryNonceTracker::new`] with an explicit randomness source.
    pub fn with_random(lifetime: Duration, random: Box<dyn RandomGenerator>) -> Self {
        MemoryNonceTracker {
            lifetime,
            random,
            nonces: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryNonceTracker {
    fn default() -> Self {
        MemoryNonceTracker::new(Duration::from_secs(300))
    }
}

impl NonceTracker for MemoryNonceTracker {
    fn initialize(&self) {}

    fn create_nonce(&self) -> String {
        let nonce = self.random.generate_hex_string(16, Strength::Medium);
        let mut nonces = self.nonces.lock().unwrap();
        nonces.insert(
            nonce.clone(),
            NonceEntry {
                created: Instant::now(),
                highest_count: 0,
            },
        );
        nonce
    }

    fn check_nonce(&self, nonce: &str, count: u32) -> NonceCheck {
        let mut nonces = self.nonces.lock().unwrap();
        let entry = match nonces.get_mut(nonce) {
            Some(e) => e,
            None => return NonceCheck::Invalid,
        };
        if entry.created.elapsed() > self.lifetime {
            nonces.remove(nonce);
            return NonceCheck::Stale;
        }
        if count <= entry.highest_count {
            return NonceCheck::Invalid;
        }
        entry.highest_count = count;
        NonceCheck::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FixedRandom;

    #[test]
    fn nonces_come_from_the_injected_generator() {
        let tracker =
            MemoryNonceTracker::with_random(Duration::from_secs(300), Box::new(FixedRandom::default()));
        // FixedRandom's first draw is all 0x01 bytes.
        let nonce = tracker.create_nonce();
        assert_eq!(nonce, "01".repeat(16));
        assert_eq!(tracker.check_nonce(&nonce, 1), NonceCheck::Ok);
    }

    #[test]
    fn unknown_nonce_is_invalid() {
        let tracker = MemoryNonceTracker::default();
        assert_eq!(tracker.check_nonce("bogus", 1), NonceCheck::Invalid);
    }

    #[test]
    fn count_must_move_forward() {
        let tracker = MemoryNonceTracker::default();
        let nonce = tracker.create_nonce();
        assert_eq!(tracker.check_nonce(&nonce, 1), NonceCheck::Ok);
        assert_eq!(tracker.check_nonce(&nonce, 2), NonceCheck::Ok);
        // Replayed count.
        assert_eq!(tracker.check_nonce(&nonce, 2), NonceCheck::Invalid);
        assert_eq!(tracker.check_nonce(&nonce, 1), NonceCheck::Invalid);
    }

    #[test]
    fn expired_nonce_is_stale() {
        let tracker = MemoryNonceTracker::new(Duration::from_secs(0));
        let nonce = tracker.create_nonce();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.check_nonce(&nonce, 1), NonceCheck::Stale);
        // Stale removal: a second check no longer knows the nonce.
        assert_eq!(tracker.check_nonce(&nonce, 1), NonceCheck::Invalid);
    }
}
