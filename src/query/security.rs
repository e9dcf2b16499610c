//! Search-time authorization. Every compiled search is ANDed with a filter
//! over the `readPrincipals` field built from the caller's identity; only the
//! system principal bypasses it. The published-only and
//! unpublished-collection filters depend on fixed field/value pairs, so they
//! are built once and shared.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;

use crate::principal::{Principal, PSEUDO_ALL, PSEUDO_AUTHENTICATED};

use super::fields::{FIELD_IS_COLLECTION, FIELD_PUBLISHED, FIELD_READ_PRINCIPALS};
use super::ir::{FieldValue, IndexQuery};

/// Read-visibility filter for the given caller. Anonymous callers match only
/// `pseudo:all` grants; authenticated callers additionally match
/// `pseudo:authenticated`, their own name and their groups. `pseudo:owner`
/// grants are resolved to the owner's name at index time, so an owner matches
/// through the name term here.
pub fn authorization_filter(principal: Option<&Principal>, groups: &BTreeSet<String>) -> IndexQuery {
    let mut values = vec![FieldValue::str(PSEUDO_ALL)];
    if let Some(p) = principal {
        values.push(FieldValue::str(PSEUDO_AUTHENTICATED));
        values.push(FieldValue::Str(p.name.clone()));
        values.extend(groups.iter().map(|g| FieldValue::Str(g.clone())));
    }
    IndexQuery::Terms { field: FIELD_READ_PRINCIPALS.to_string(), values }
}

/// The mandatory per-search filter; None only for the system principal.
pub fn security_filter(
    principal: Option<&Principal>,
    groups: &BTreeSet<String>,
) -> Option<IndexQuery> {
    if principal.map(|p| p.is_system()).unwrap_or(false) {
        return None;
    }
    Some(authorization_filter(principal, groups))
}

static PUBLISHED_ONLY: Lazy<IndexQuery> =
    Lazy::new(|| IndexQuery::term(FIELD_PUBLISHED, FieldValue::Bool(true)));

static UNPUBLISHED_COLLECTIONS: Lazy<IndexQuery> = Lazy::new(|| {
    IndexQuery::Not(Box::new(IndexQuery::all_of(vec![
        IndexQuery::term(FIELD_IS_COLLECTION, FieldValue::Bool(true)),
        IndexQuery::term(FIELD_PUBLISHED, FieldValue::Bool(false)),
    ])))
});

pub fn published_filter() -> &'static IndexQuery {
    &PUBLISHED_ONLY
}

/// Excludes collections whose `published` property is false; non-collection
/// resources pass regardless.
pub fn unpublished_collection_filter() -> &'static IndexQuery {
    &UNPUBLISHED_COLLECTIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_filter_is_read_for_all_only() {
        let f = authorization_filter(None, &BTreeSet::new());
        assert_eq!(
            f,
            IndexQuery::Terms {
                field: FIELD_READ_PRINCIPALS.to_string(),
                values: vec![FieldValue::str(PSEUDO_ALL)],
            }
        );
    }

    #[test]
    fn test_user_filter_carries_groups() {
        let groups: BTreeSet<String> = ["staff".to_string()].into_iter().collect();
        let f = authorization_filter(Some(&Principal::user("anna")), &groups);
        match f {
            IndexQuery::Terms { field, values } => {
                assert_eq!(field, FIELD_READ_PRINCIPALS);
                assert_eq!(
                    values,
                    vec![
                        FieldValue::str(PSEUDO_ALL),
                        FieldValue::str(PSEUDO_AUTHENTICATED),
                        FieldValue::str("anna"),
                        FieldValue::str("staff"),
                    ]
                );
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn test_only_system_bypasses() {
        assert!(security_filter(Some(&Principal::system()), &BTreeSet::new()).is_none());
        assert!(security_filter(Some(&Principal::user("anna")), &BTreeSet::new()).is_some());
        assert!(security_filter(None, &BTreeSet::new()).is_some());
    }

    #[test]
    fn test_published_filter_is_shared() {
        assert!(std::ptr::eq(published_filter(), published_filter()));
        assert_eq!(
            published_filter(),
            &IndexQuery::term(FIELD_PUBLISHED, FieldValue::Bool(true))
        );
    }
}
