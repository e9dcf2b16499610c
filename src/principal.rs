//! Principals: users, groups and the pseudo-principals used by ACLs.
//! Authentication itself is an external collaborator; this module only models
//! validated principal identities and the resolver boundary the core consumes
//! when materializing ACL entries and PRINCIPAL-typed property values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Marker names for the pseudo-principals. Kept with an explicit prefix so they
/// can never collide with real user or group names.
pub const PSEUDO_ALL: &str = "pseudo:all";
pub const PSEUDO_AUTHENTICATED: &str = "pseudo:authenticated";
pub const PSEUDO_OWNER: &str = "pseudo:owner";

/// Internal system identity. Store-internal operations (index rebuild, snapshot
/// restore) run as this principal; it is the only caller the query layer does
/// not wrap in an authorization filter.
pub const SYSTEM: &str = "system";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    User,
    Group,
    Pseudo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal {
    pub name: String,
    pub kind: PrincipalKind,
}

impl Principal {
    pub fn user<S: Into<String>>(name: S) -> Self {
        Principal { name: name.into(), kind: PrincipalKind::User }
    }
    pub fn group<S: Into<String>>(name: S) -> Self {
        Principal { name: name.into(), kind: PrincipalKind::Group }
    }
    pub fn pseudo(name: &str) -> Self {
        Principal { name: name.to_string(), kind: PrincipalKind::Pseudo }
    }
    pub fn all() -> Self { Principal::pseudo(PSEUDO_ALL) }
    pub fn authenticated() -> Self { Principal::pseudo(PSEUDO_AUTHENTICATED) }
    pub fn owner() -> Self { Principal::pseudo(PSEUDO_OWNER) }
    pub fn system() -> Self { Principal::user(SYSTEM) }

    pub fn is_pseudo(&self) -> bool { self.kind == PrincipalKind::Pseudo }
    pub fn is_group(&self) -> bool { self.kind == PrincipalKind::Group }
    pub fn is_system(&self) -> bool { self.kind == PrincipalKind::User && self.name == SYSTEM }
}

/// Boundary contract: maps names to validated principals and answers group
/// membership. Implementations live outside the core (directory services);
/// `StaticPrincipalResolver` below is the in-memory stand-in.
pub trait PrincipalResolver: Send + Sync {
    /// Resolve a name of the given kind to a validated principal, or None if
    /// the name is unknown.
    fn resolve(&self, name: &str, kind: PrincipalKind) -> Option<Principal>;

    /// All groups the principal belongs to, transitively.
    fn member_groups(&self, principal: &Principal) -> BTreeSet<String>;
}

/// Fixed in-memory resolver. Group membership is expanded transitively at
/// lookup time; cycles are tolerated (visited set).
#[derive(Debug, Default, Clone)]
pub struct StaticPrincipalResolver {
    users: BTreeSet<String>,
    /// group name -> direct members (users or other groups)
    groups: HashMap<String, BTreeSet<String>>,
}

impl StaticPrincipalResolver {
    pub fn new() -> Self { Self::default() }

    pub fn with_user<S: Into<String>>(mut self, name: S) -> Self {
        self.users.insert(name.into());
        self
    }

    pub fn with_group<S: Into<String>>(mut self, name: S, members: &[&str]) -> Self {
        self.groups
            .entry(name.into())
            .or_default()
            .extend(members.iter().map(|m| m.to_string()));
        self
    }
}

impl PrincipalResolver for StaticPrincipalResolver {
    fn resolve(&self, name: &str, kind: PrincipalKind) -> Option<Principal> {
        match kind {
            PrincipalKind::User => {
                if name == SYSTEM || self.users.contains(name) {
                    Some(Principal::user(name))
                } else {
                    None
                }
            }
            PrincipalKind::Group => {
                if self.groups.contains_key(name) { Some(Principal::group(name)) } else { None }
            }
            PrincipalKind::Pseudo => match name {
                PSEUDO_ALL | PSEUDO_AUTHENTICATED | PSEUDO_OWNER => Some(Principal::pseudo(name)),
                _ => None,
            },
        }
    }

    fn member_groups(&self, principal: &Principal) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = BTreeSet::new();
        // direct memberships
        let mut frontier: Vec<&str> = self
            .groups
            .iter()
            .filter(|(_, members)| members.contains(&principal.name))
            .map(|(g, _)| g.as_str())
            .collect();
        while let Some(g) = frontier.pop() {
            if !out.insert(g.to_string()) {
                continue;
            }
            // groups containing this group
            for (parent, members) in self.groups.iter() {
                if members.contains(g) && !out.contains(parent) {
                    frontier.push(parent.as_str());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_resolves_known_names_only() {
        let r = StaticPrincipalResolver::new()
            .with_user("alice")
            .with_group("staff", &["alice"]);
        assert!(r.resolve("alice", PrincipalKind::User).is_some());
        assert!(r.resolve("bob", PrincipalKind::User).is_none());
        assert!(r.resolve("staff", PrincipalKind::Group).is_some());
        assert!(r.resolve(PSEUDO_ALL, PrincipalKind::Pseudo).is_some());
        assert!(r.resolve("pseudo:nobody", PrincipalKind::Pseudo).is_none());
    }

    #[test]
    fn transitive_group_membership() {
        let r = StaticPrincipalResolver::new()
            .with_user("alice")
            .with_group("editors", &["alice"])
            .with_group("staff", &["editors"])
            .with_group("everyone", &["staff"]);
        let groups = r.member_groups(&Principal::user("alice"));
        assert!(groups.contains("editors"));
        assert!(groups.contains("staff"));
        assert!(groups.contains("everyone"));
    }
}
