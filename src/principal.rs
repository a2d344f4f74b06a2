// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security principals and the lookup collaborator interface.

/// An authenticated identity.
///
/// Principals are immutable value objects. A principal may aggregate further
/// principals (group or composite identities); [`Principal::aggregated`]
/// flattens the aggregate, de-duplicated by identity with the first
/// occurrence winning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    identity: String,
    name: String,
    privileged: bool,
    aggregated: Vec<Principal>,
}

impl Principal {
    /// Creates a principal with the given unique identity and display name.
    pub fn new(identity: impl Into<String>, name: impl Into<String>) -> Self {
        Principal {
            identity: identity.into(),
            name: name.into(),
            privileged: false,
            aggregated: Vec::new(),
        }
    }

    /// Creates the anonymous principal: empty identity and name, never
    /// privileged, aggregates only itself.
    pub fn anonymous() -> Self {
        Principal::new("", "")
    }

    /// Marks the principal as privileged. Privileged principals bypass
    /// authorization checks. The anonymous principal cannot be privileged.
    pub fn privileged(mut self) -> Self {
        self.privileged = !self.is_anonymous();
        self
    }

    /// Adds aggregated sub-principals to this principal.
    pub fn aggregating(mut self, others: impl IntoIterator<Item = Principal>) -> Self {
        self.aggregated.extend(others);
        self
    }

    /// The unique identity of this principal (e.g. a username).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Display-ready name of this principal.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.identity.is_empty()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Returns this principal followed by all transitively aggregated
    /// principals, de-duplicated by identity.
    pub fn aggregated(&self) -> Vec<&Principal> {
        let mut out: Vec<&Principal> = Vec::new();
        self.collect_aggregated(&mut out);
        out
    }

    fn collect_aggregated<'a>(&'a self, out: &mut Vec<&'a Principal>) {
        if !out.iter().any(|p| p.identity == self.identity) {
            out.push(self);
        }
        for p in &self.aggregated {
            p.collect_aggregated(out);
        }
    }
}

/// Finds principals for the authentication providers.
///
/// The mechanism-specific lookups default to `None`; a provider wired to a
/// mechanism that needs them (Digest HA1, NTLM MD4) must override them.
/// The notification hooks default to no-ops.
pub trait PrincipalProvider: Send + Sync {
    /// Find a principal by identity. Does not involve any password checking.
    fn find_principal(&self, identity: &str) -> Option<Principal>;

    /// Find a principal by identity and cleartext password.
    fn find_principal_using_password(&self, identity: &str, password: &str) -> Option<Principal>;

    /// Find the Digest HA1 value (`MD5(user:realm:password)`, lowercase hex)
    /// for the given identity.
    fn find_principal_ha1(&self, _identity: &str, _realm: &str) -> Option<String> {
        None
    }

    /// Find the MD4 hash of the UTF-16LE encoded password for the given
    /// identity within a domain.
    fn find_principal_md4(&self, _identity: &str, _domain: &str) -> Option<Vec<u8>> {
        None
    }

    /// Called when a principal authenticated successfully.
    fn principal_found(&self, _principal: &Principal) {}

    /// Called when credentials did not resolve to a principal.
    fn principal_not_found(&self, _identity: &str) {}
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn anonymous_is_never_privileged() {
        let p = Principal::anonymous().privileged();
        assert!(p.is_anonymous());
        assert!(!p.is_privileged());
        assert_eq!(p.aggregated().len(), 1);
    }

    #[test]
    fn aggregation_dedups_by_identity() {
        let ops = Principal::new("ops", "Operations");
        let dev = Principal::new("dev", "Developers").aggregating([ops.clone()]);
        let p = Principal::new("alice", "Alice").aggregating([ops.clone(), dev]);
        let ids: Vec<&str> = p.aggregated().iter().map(|p| p.identity()).collect();
        assert_eq!(ids, vec!["alice", "ops", "dev"]);
    }

    #[test]
    fn first_occurrence_wins() {
        let a1 = Principal::new("a", "first");
        let a2 = Principal::new("a", "second");
        let p = Principal::new("root", "Root").aggregating([a1, a2]);
        let agg = p.aggregated();
        assert_eq!(agg.len(), 2);
        assert_eq!(agg[1].name(), "first");
    }
}
