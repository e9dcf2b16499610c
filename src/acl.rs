//! Access-control lists: a mapping privilege -> set of principals.
//! An `Acl` value is always a fully materialized, *effective* ACL; whether a
//! resource owns it or inherits it is tracked by the store (the
//! `acl_inherited_from` pointer), not by the Acl itself.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::principal::{Principal, PSEUDO_ALL, PSEUDO_AUTHENTICATED, PSEUDO_OWNER};

/// Privileges ordered by implication: a grant at one level implies everything
/// below it. `ReadProcessed` is the weakest (search visibility / rendered view
/// only); `All` is full control including ACL administration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Privilege {
    ReadProcessed,
    Read,
    Write,
    Admin,
    All,
}

impl Privilege {
    fn rank(self) -> u8 {
        match self {
            Privilege::ReadProcessed => 0,
            Privilege::Read => 1,
            Privilege::Write => 2,
            Privilege::Admin => 3,
            Privilege::All => 4,
        }
    }

    /// True when a grant of `self` satisfies a requirement of `required`.
    pub fn implies(self, required: Privilege) -> bool { self.rank() >= required.rank() }

    pub fn as_str(self) -> &'static str {
        match self {
            Privilege::ReadProcessed => "read-processed",
            Privilege::Read => "read",
            Privilege::Write => "write",
            Privilege::Admin => "admin",
            Privilege::All => "all",
        }
    }

}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acl {
    entries: BTreeMap<Privilege, BTreeSet<Principal>>,
}

impl Acl {
    pub fn new() -> Self { Self::default() }

    /// Default ACL for a freshly initialized repository root: the system user
    /// holds full control and the world may read. The root must always own an
    /// explicit ACL; this is the value it starts with.
    pub fn default_root() -> Self {
        let mut acl = Acl::new();
        acl.add(Privilege::All, Principal::system());
        acl.add(Privilege::Read, Principal::all());
        acl
    }

    pub fn add(&mut self, privilege: Privilege, principal: Principal) -> &mut Self {
        self.entries.entry(privilege).or_default().insert(principal);
        self
    }

    pub fn remove(&mut self, privilege: Privilege, principal: &Principal) -> bool {
        let removed = self
            .entries
            .get_mut(&privilege)
            .map(|s| s.remove(principal))
            .unwrap_or(false);
        if let Some(s) = self.entries.get(&privilege) {
            if s.is_empty() {
                self.entries.remove(&privilege);
            }
        }
        removed
    }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (Privilege, &Principal)> {
        self.entries
            .iter()
            .flat_map(|(p, set)| set.iter().map(move |pr| (*p, pr)))
    }

    pub fn has_entry(&self, privilege: Privilege, principal: &Principal) -> bool {
        self.entries.get(&privilege).map(|s| s.contains(principal)).unwrap_or(false)
    }

    /// World-readable test used by the "read-for-all" query node: pseudo:all
    /// granted at any privilege satisfying Read.
    pub fn is_read_for_all(&self) -> bool {
        self.iter().any(|(priv_, p)| {
            priv_.implies(Privilege::ReadProcessed) && p.is_pseudo() && p.name == PSEUDO_ALL
        })
    }

    /// Names of every principal that can at least see the resource in search
    /// results, i.e. entries at any privilege (all privileges imply
    /// read-processed visibility). This is the set the index synchronizer
    /// stores per document.
    pub fn read_principal_names(&self) -> BTreeSet<String> {
        self.iter().map(|(_, p)| p.name.clone()).collect()
    }

    /// Membership check against this ACL. `principal` is None for anonymous
    /// callers. `groups` are the caller's resolved group names; `owner` is the
    /// owner of the resource the ACL protects (for pseudo:owner grants).
    pub fn authorizes(
        &self,
        principal: Option<&Principal>,
        groups: &BTreeSet<String>,
        required: Privilege,
        owner: &str,
    ) -> bool {
        if principal.map(|p| p.is_system()).unwrap_or(false) {
            return true;
        }
        for (granted, entry) in self.iter() {
            if !granted.implies(required) {
                continue;
            }
            if entry.is_pseudo() {
                match entry.name.as_str() {
                    PSEUDO_ALL => return true,
                    PSEUDO_AUTHENTICATED => {
                        if principal.is_some() {
                            return true;
                        }
                    }
                    PSEUDO_OWNER => {
                        if principal.map(|p| p.name == owner).unwrap_or(false) {
                            return true;
                        }
                    }
                    _ => {}
                }
                continue;
            }
            match principal {
                Some(p) => {
                    if entry.is_group() {
                        if groups.contains(&entry.name) {
                            return true;
                        }
                    } else if entry.name == p.name {
                        return true;
                    }
                }
                None => {}
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn implication_chain() {
        assert!(Privilege::All.implies(Privilege::Read));
        assert!(Privilege::Write.implies(Privilege::ReadProcessed));
        assert!(!Privilege::Read.implies(Privilege::Write));
        assert!(Privilege::Admin.implies(Privilege::Write));
    }

    #[test]
    fn entry_bookkeeping() {
        let mut acl = Acl::new();
        acl.add(Privilege::Write, Principal::user("alice"));
        acl.add(Privilege::Write, Principal::group("staff"));
        assert!(acl.has_entry(Privilege::Write, &Principal::user("alice")));
        assert!(!acl.has_entry(Privilege::Read, &Principal::user("alice")));

        assert!(acl.remove(Privilege::Write, &Principal::user("alice")));
        assert!(!acl.remove(Privilege::Write, &Principal::user("alice")));
        assert!(acl.has_entry(Privilege::Write, &Principal::group("staff")));

        // dropping the last grant at a privilege drops the privilege itself
        acl.remove(Privilege::Write, &Principal::group("staff"));
        assert!(acl.is_empty());
    }

    #[test]
    fn authorizes_users_groups_and_pseudos() {
        let mut acl = Acl::new();
        acl.add(Privilege::Read, Principal::all());
        acl.add(Privilege::Write, Principal::group("editors"));
        acl.add(Privilege::All, Principal::user("alice"));

        let alice = Principal::user("alice");
        let bob = Principal::user("bob");
        let no_groups = BTreeSet::new();
        let editor_groups: BTreeSet<String> = ["editors".to_string()].into_iter().collect();

        // anonymous gets read via pseudo:all, nothing more
        assert!(acl.authorizes(None, &no_groups, Privilege::Read, "alice"));
        assert!(!acl.authorizes(None, &no_groups, Privilege::Write, "alice"));
        // group grant
        assert!(acl.authorizes(Some(&bob), &editor_groups, Privilege::Write, "alice"));
        assert!(!acl.authorizes(Some(&bob), &no_groups, Privilege::Write, "alice"));
        // direct full control implies admin
        assert!(acl.authorizes(Some(&alice), &no_groups, Privilege::Admin, "alice"));
    }

    #[test]
    fn owner_pseudo_matches_resource_owner() {
        let mut acl = Acl::new();
        acl.add(Privilege::Admin, Principal::owner());
        let alice = Principal::user("alice");
        let none = BTreeSet::new();
        assert!(acl.authorizes(Some(&alice), &none, Privilege::Write, "alice"));
        assert!(!acl.authorizes(Some(&alice), &none, Privilege::Write, "bob"));
    }

    #[test]
    fn read_principals_aggregate_all_privileges() {
        let mut acl = Acl::new();
        acl.add(Privilege::Read, Principal::group("staff"));
        acl.add(Privilege::All, Principal::user("alice"));
        let names = acl.read_principal_names();
        assert!(names.contains("staff"));
        assert!(names.contains("alice"));
        assert!(!acl.is_read_for_all());
        acl.add(Privilege::ReadProcessed, Principal::all());
        assert!(acl.is_read_for_all());
    }
}
