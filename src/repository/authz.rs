//! Authorization boundary. The repository asks an oracle before every
//! operation; the default oracle answers from the resource's effective ACL
//! plus the principal resolver's group memberships. Deny decisions carry a
//! short reason for logging, never for callers to branch on.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::acl::Privilege;
use crate::error::RepoResult;
use crate::path::Uri;
use crate::principal::{Principal, PrincipalResolver};
use crate::store::ResourceStore;

/// Outcome of one authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub reason: Option<String>,
}

impl Decision {
    pub fn allow(reason: &str) -> Self {
        Decision { allow: true, reason: Some(reason.to_string()) }
    }

    pub fn deny(reason: &str) -> Self {
        Decision { allow: false, reason: Some(reason.to_string()) }
    }
}

/// Allow/deny per action. `principal` is None for anonymous callers. Errors
/// are reserved for lookup failures (missing resource, broken ACL chain);
/// a plain denial is a [`Decision`], not an error.
pub trait AuthorizationOracle: Send + Sync {
    fn decide(&self, principal: Option<&Principal>, required: Privilege, uri: &Uri) -> RepoResult<Decision>;
}

/// Default oracle over the stored effective ACLs.
pub struct AclOracle {
    store: ResourceStore,
    resolver: Arc<dyn PrincipalResolver>,
}

impl AclOracle {
    pub fn new(store: ResourceStore, resolver: Arc<dyn PrincipalResolver>) -> Self {
        AclOracle { store, resolver }
    }
}

impl AuthorizationOracle for AclOracle {
    fn decide(&self, principal: Option<&Principal>, required: Privilege, uri: &Uri) -> RepoResult<Decision> {
        if principal.map(|p| p.is_system()).unwrap_or(false) {
            return Ok(Decision::allow("system"));
        }
        let acl = self.store.effective_acl(uri)?;
        let owner = self.store.owner_of(uri)?;
        let groups: BTreeSet<String> = principal
            .map(|p| self.resolver.member_groups(p))
            .unwrap_or_default();
        if acl.authorizes(principal, &groups, required, &owner) {
            Ok(Decision::allow("acl"))
        } else {
            debug!(
                target: "depot::repository",
                uri = %uri,
                required = required.as_str(),
                principal = principal.map(|p| p.name.as_str()).unwrap_or("anonymous"),
                "denied"
            );
            Ok(Decision::deny("acl"))
        }
    }
}
