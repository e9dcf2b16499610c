use super::*;
use crate::acl::Privilege;
use crate::principal::Principal;
use crate::resource::{NULL_RESOURCE_ID, PropName, PropValue, PropertySet, Value};

fn res(uri: &str, collection: bool) -> Resource {
    let now = Utc::now();
    Resource {
        id: NULL_RESOURCE_ID,
        uri: Uri::parse(uri).unwrap(),
        is_collection: collection,
        resource_type: if collection { "collection" } else { "file" }.to_string(),
        owner: "alice".to_string(),
        created_by: "alice".to_string(),
        created_at: now,
        content_modified_by: "alice".to_string(),
        content_modified_at: now,
        properties_modified_by: "alice".to_string(),
        properties_modified_at: now,
        modified_by: "alice".to_string(),
        modified_at: now,
        acl_inherited_from: None,
        props: PropertySet::new(),
    }
}

fn user_acl(names: &[&str]) -> Acl {
    let mut acl = Acl::new();
    acl.add(Privilege::All, Principal::system());
    for n in names {
        acl.add(Privilege::Read, Principal::user(*n));
    }
    acl
}

fn pointer(store: &ResourceStore, uri: &str) -> Option<i64> {
    store.load(&Uri::parse(uri).unwrap()).unwrap().acl_inherited_from
}

fn id(store: &ResourceStore, uri: &str) -> i64 {
    store.resource_id(&Uri::parse(uri).unwrap()).unwrap()
}

#[test]
fn test_new_store_has_root_with_explicit_acl() {
    let store = ResourceStore::new();
    let root = store.load(&Uri::root()).unwrap();
    assert_eq!(root.id, ROOT_ID);
    assert!(root.is_collection);
    assert_eq!(root.acl_inherited_from, None);
    assert_eq!(store.effective_acl(&Uri::root()).unwrap(), Acl::default_root());
}

#[test]
fn test_create_points_at_parent_acl_node() {
    let store = ResourceStore::new();
    let a = store.create(&res("/a", true)).unwrap();
    assert_eq!(a.acl_inherited_from, Some(ROOT_ID));
    let b = store.create(&res("/a/b", true)).unwrap();
    // /a itself inherits, so the pointer goes straight to the root node
    assert_eq!(b.acl_inherited_from, Some(ROOT_ID));
    assert!(a.id > ROOT_ID && b.id > a.id);
}

#[test]
fn test_create_constraints() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    let err = store.create(&res("/a", true)).unwrap_err();
    assert!(err.is_constraint());
    let err = store.create(&res("/missing/child", false)).unwrap_err();
    assert!(err.is_not_found());
    store.create(&res("/f", false)).unwrap();
    let err = store.create(&res("/f/under-file", false)).unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn test_acl_break_and_clear_repoints_descendants() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/b", true)).unwrap();
    store.create(&res("/a/b/c", false)).unwrap();
    let acl_a = user_acl(&["anna"]);
    let acl_b = user_acl(&["ben"]);

    // break at /a: both descendants previously inherited from the root
    store.store_acl(&Uri::parse("/a").unwrap(), AclUpdate::SetExplicit(acl_a.clone())).unwrap();
    assert_eq!(pointer(&store, "/a"), None);
    assert_eq!(pointer(&store, "/a/b"), Some(id(&store, "/a")));
    assert_eq!(pointer(&store, "/a/b/c"), Some(id(&store, "/a")));

    // deeper break at /a/b captures only /a/b/c
    store.store_acl(&Uri::parse("/a/b").unwrap(), AclUpdate::SetExplicit(acl_b.clone())).unwrap();
    assert_eq!(pointer(&store, "/a/b"), None);
    assert_eq!(pointer(&store, "/a/b/c"), Some(id(&store, "/a/b")));
    assert_eq!(store.effective_acl(&Uri::parse("/a/b/c").unwrap()).unwrap(), acl_b);

    // clearing the /a/b break resolves the nearest owner, which is /a
    store.store_acl(&Uri::parse("/a/b").unwrap(), AclUpdate::Inherit).unwrap();
    assert_eq!(pointer(&store, "/a/b"), Some(id(&store, "/a")));
    assert_eq!(pointer(&store, "/a/b/c"), Some(id(&store, "/a")));
    assert_eq!(store.effective_acl(&Uri::parse("/a/b/c").unwrap()).unwrap(), acl_a);

    // clearing /a as well lands everything back on the root
    store.store_acl(&Uri::parse("/a").unwrap(), AclUpdate::Inherit).unwrap();
    assert_eq!(pointer(&store, "/a"), Some(ROOT_ID));
    assert_eq!(pointer(&store, "/a/b"), Some(ROOT_ID));
    assert_eq!(pointer(&store, "/a/b/c"), Some(ROOT_ID));
    assert_eq!(store.effective_acl(&Uri::parse("/a/b/c").unwrap()).unwrap(), Acl::default_root());
}

#[test]
fn test_acl_break_is_scoped_to_the_subtree() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/b", true)).unwrap();
    store.store_acl(&Uri::parse("/a").unwrap(), AclUpdate::SetExplicit(user_acl(&["anna"]))).unwrap();
    // sibling keeps inheriting from the root
    assert_eq!(pointer(&store, "/b"), Some(ROOT_ID));
}

#[test]
fn test_inherit_on_inherited_resource_is_a_noop() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    let before = store.load(&Uri::parse("/a").unwrap()).unwrap();
    store.store_acl(&Uri::parse("/a").unwrap(), AclUpdate::Inherit).unwrap();
    let after = store.load(&Uri::parse("/a").unwrap()).unwrap();
    assert_eq!(before.acl_inherited_from, after.acl_inherited_from);
}

#[test]
fn test_root_guards() {
    let store = ResourceStore::new();
    assert!(store.store_acl(&Uri::root(), AclUpdate::Inherit).unwrap_err().is_constraint());
    assert!(store.delete(&Uri::root()).unwrap_err().is_constraint());
    store.create(&res("/dst", true)).unwrap();
    assert!(store
        .move_resource(&Uri::root(), &Uri::parse("/dst/root").unwrap())
        .unwrap_err()
        .is_constraint());
}

#[test]
fn test_delete_removes_subtree() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/b", true)).unwrap();
    store.create(&res("/a/b/c", false)).unwrap();
    store.create(&res("/keep", false)).unwrap();
    store.delete(&Uri::parse("/a").unwrap()).unwrap();
    assert!(!store.exists(&Uri::parse("/a").unwrap()));
    assert!(!store.exists(&Uri::parse("/a/b/c").unwrap()));
    assert!(store.exists(&Uri::parse("/keep").unwrap()));
}

#[test]
fn test_copy_without_preserve_inherits_at_destination() {
    let store = ResourceStore::new();
    store.create(&res("/src", true)).unwrap();
    store.create(&res("/src/inner", true)).unwrap();
    store.store_acl(&Uri::parse("/src/inner").unwrap(), AclUpdate::SetExplicit(user_acl(&["anna"]))).unwrap();
    store.create(&res("/dst", true)).unwrap();
    let now = Utc::now();
    store.copy(&Uri::parse("/src").unwrap(), &Uri::parse("/dst/copy").unwrap(), "bob", now, false).unwrap();
    // the break inside the source is discarded, everything inherits at /dst
    assert_eq!(pointer(&store, "/dst/copy"), Some(ROOT_ID));
    assert_eq!(pointer(&store, "/dst/copy/inner"), Some(ROOT_ID));
    assert_eq!(store.effective_acl(&Uri::parse("/dst/copy/inner").unwrap()).unwrap(), Acl::default_root());
    // the source still has its break
    assert_eq!(pointer(&store, "/src/inner"), None);
}

#[test]
fn test_copy_preserve_remaps_internal_breaks() {
    let store = ResourceStore::new();
    store.create(&res("/src", true)).unwrap();
    store.create(&res("/src/open", false)).unwrap();
    store.create(&res("/src/locked", true)).unwrap();
    store.create(&res("/src/locked/doc", false)).unwrap();
    let locked_acl = user_acl(&["anna"]);
    store.store_acl(&Uri::parse("/src/locked").unwrap(), AclUpdate::SetExplicit(locked_acl.clone())).unwrap();
    store.create(&res("/dst", true)).unwrap();
    let now = Utc::now();
    store.copy(&Uri::parse("/src").unwrap(), &Uri::parse("/dst/copy").unwrap(), "bob", now, true).unwrap();

    // head inherited above the source, so it lands on the destination's node
    assert_eq!(pointer(&store, "/dst/copy"), Some(ROOT_ID));
    assert_eq!(pointer(&store, "/dst/copy/open"), Some(ROOT_ID));
    // the internal break is carried over and remapped to the new id
    assert_eq!(pointer(&store, "/dst/copy/locked"), None);
    assert_eq!(pointer(&store, "/dst/copy/locked/doc"), Some(id(&store, "/dst/copy/locked")));
    assert_eq!(store.effective_acl(&Uri::parse("/dst/copy/locked/doc").unwrap()).unwrap(), locked_acl);
    // fresh ids throughout
    assert_ne!(id(&store, "/dst/copy/locked"), id(&store, "/src/locked"));
}

#[test]
fn test_copy_stamps_creation_fields() {
    let store = ResourceStore::new();
    store.create(&res("/src", false)).unwrap();
    let now = Utc::now();
    let copied = store.copy(&Uri::parse("/src").unwrap(), &Uri::parse("/c").unwrap(), "bob", now, false).unwrap();
    assert_eq!(copied.created_by, "bob");
    assert_eq!(copied.owner, "bob");
    assert_eq!(copied.created_at, now);
}

#[test]
fn test_copy_move_destination_checks() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/b", false)).unwrap();
    let now = Utc::now();
    let a = Uri::parse("/a").unwrap();
    assert!(store.copy(&a, &Uri::parse("/a/sub").unwrap(), "x", now, false).unwrap_err().is_constraint());
    assert!(store.copy(&a, &Uri::parse("/b").unwrap(), "x", now, false).unwrap_err().is_constraint());
    assert!(store.copy(&a, &Uri::parse("/missing/c").unwrap(), "x", now, false).unwrap_err().is_not_found());
    assert!(store.copy(&a, &Uri::parse("/b/c").unwrap(), "x", now, false).unwrap_err().is_constraint());
    assert!(store
        .copy(&Uri::parse("/nope").unwrap(), &Uri::parse("/c").unwrap(), "x", now, false)
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_move_rewrites_uris_and_keeps_ids() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/b", true)).unwrap();
    store.create(&res("/a/b/c", false)).unwrap();
    store.create(&res("/x", true)).unwrap();
    let old_id = id(&store, "/a/b/c");
    store.move_resource(&Uri::parse("/a/b").unwrap(), &Uri::parse("/x/b").unwrap()).unwrap();
    assert!(!store.exists(&Uri::parse("/a/b").unwrap()));
    assert!(store.exists(&Uri::parse("/x/b/c").unwrap()));
    assert_eq!(id(&store, "/x/b/c"), old_id);
    let moved = store.load(&Uri::parse("/x/b/c").unwrap()).unwrap();
    assert_eq!(moved.depth(), 3);
}

#[test]
fn test_id_lookups_follow_moves_and_deletes() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    let doc = store.create(&res("/a/doc.txt", false)).unwrap();
    assert_eq!(store.uri_of(doc.id).as_deref(), Some("/a/doc.txt"));
    assert_eq!(store.load_by_id(doc.id).unwrap().uri.as_str(), "/a/doc.txt");

    store.move_resource(&Uri::parse("/a").unwrap(), &Uri::parse("/b").unwrap()).unwrap();
    assert_eq!(store.uri_of(doc.id).as_deref(), Some("/b/doc.txt"));

    store.delete(&Uri::parse("/b").unwrap()).unwrap();
    assert_eq!(store.uri_of(doc.id), None);
    assert!(store.load_by_id(doc.id).unwrap_err().is_not_found());
}

#[test]
fn test_move_preserves_effective_acl_by_materializing() {
    let store = ResourceStore::new();
    store.create(&res("/secure", true)).unwrap();
    store.create(&res("/secure/doc", false)).unwrap();
    store.create(&res("/public", true)).unwrap();
    let secure_acl = user_acl(&["anna"]);
    let public_acl = user_acl(&["everyone-else"]);
    store.store_acl(&Uri::parse("/secure").unwrap(), AclUpdate::SetExplicit(secure_acl.clone())).unwrap();
    store.store_acl(&Uri::parse("/public").unwrap(), AclUpdate::SetExplicit(public_acl)).unwrap();

    store.move_resource(&Uri::parse("/secure/doc").unwrap(), &Uri::parse("/public/doc").unwrap()).unwrap();
    // the old effective ACL is carried along as a break on the moved head
    assert_eq!(pointer(&store, "/public/doc"), None);
    assert_eq!(store.effective_acl(&Uri::parse("/public/doc").unwrap()).unwrap(), secure_acl);
}

#[test]
fn test_move_repoints_without_materializing_when_acl_is_identical() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/doc", false)).unwrap();
    store.create(&res("/b", true)).unwrap();
    store.move_resource(&Uri::parse("/a/doc").unwrap(), &Uri::parse("/b/doc").unwrap()).unwrap();
    // both locations resolve to the root ACL, so the pointer is just updated
    assert_eq!(pointer(&store, "/b/doc"), Some(ROOT_ID));
    assert_eq!(store.effective_acl(&Uri::parse("/b/doc").unwrap()).unwrap(), Acl::default_root());
}

#[test]
fn test_move_keeps_internal_breaks_intact() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/sub", true)).unwrap();
    store.create(&res("/a/sub/doc", false)).unwrap();
    let sub_acl = user_acl(&["anna"]);
    store.store_acl(&Uri::parse("/a/sub").unwrap(), AclUpdate::SetExplicit(sub_acl.clone())).unwrap();
    store.create(&res("/x", true)).unwrap();
    store.move_resource(&Uri::parse("/a").unwrap(), &Uri::parse("/x/a").unwrap()).unwrap();
    assert_eq!(pointer(&store, "/x/a/sub"), None);
    assert_eq!(pointer(&store, "/x/a/sub/doc"), Some(id(&store, "/x/a/sub")));
    assert_eq!(store.effective_acl(&Uri::parse("/x/a/sub/doc").unwrap()).unwrap(), sub_acl);
}

#[test]
fn test_store_replaces_property_rows() {
    let store = ResourceStore::new();
    let mut r = store.create(&res("/doc", false)).unwrap();
    r.props.set(PropName::default_ns("title"), Value::String("first".into()));
    r.props.set(
        PropName::default_ns("tags"),
        PropValue::Multi(vec![Value::String("x".into()), Value::String("y".into())]),
    );
    store.store(&r).unwrap();
    let loaded = store.load(&Uri::parse("/doc").unwrap()).unwrap();
    assert_eq!(loaded.props.get_default("title").unwrap().value.first().unwrap().as_str(), Some("first"));
    assert_eq!(loaded.props.get_default("tags").unwrap().value.values().len(), 2);

    let mut again = loaded.clone();
    again.props.remove(&PropName::default_ns("tags"));
    again.props.set(PropName::default_ns("title"), Value::String("second".into()));
    store.store(&again).unwrap();
    let reloaded = store.load(&Uri::parse("/doc").unwrap()).unwrap();
    assert_eq!(reloaded.props.get_default("title").unwrap().value.first().unwrap().as_str(), Some("second"));
    assert!(reloaded.props.get_default("tags").is_none());
}

#[test]
fn test_children_in_uri_order() {
    let store = ResourceStore::new();
    store.create(&res("/c", true)).unwrap();
    store.create(&res("/c/z", false)).unwrap();
    store.create(&res("/c/a", false)).unwrap();
    store.create(&res("/c/a/deep", false)).unwrap_err(); // /c/a is not a collection
    let names: Vec<String> = store
        .children(&Uri::parse("/c").unwrap())
        .unwrap()
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(names, vec!["a", "z"]);
    assert!(store.children(&Uri::parse("/c/a").unwrap()).unwrap_err().is_constraint());
}

#[test]
fn test_changelog_records_and_drains() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/b", false)).unwrap();
    let rows = store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, 100);
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.op == ChangeOp::Created));
    assert!(rows[0].seq < rows[1].seq);
    // drained rows are gone
    assert!(store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, 100).is_empty());
}

#[test]
fn test_changelog_recursive_delete_stages_descendants() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/b", true)).unwrap();
    store.create(&res("/a/b/c", false)).unwrap();
    store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, 100);
    store.delete(&Uri::parse("/a").unwrap()).unwrap();
    let rows = store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, 100);
    assert_eq!(rows.len(), 3);
    assert!(rows[0].recursive);
    assert_eq!(rows[0].uri, "/a");
    assert!(rows.iter().skip(1).all(|r| !r.recursive));
}

#[test]
fn test_changelog_limit_leaves_the_rest() {
    let store = ResourceStore::new();
    for n in 0..5 {
        store.create(&res(&format!("/r{n}"), false)).unwrap();
    }
    let first = store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, 2);
    assert_eq!(first.len(), 2);
    assert_eq!(store.pending_changes(), 3);
    let rest = store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, 10);
    assert_eq!(rest.len(), 3);
    assert!(first[1].seq < rest[0].seq);
}

#[test]
fn test_index_scan_outer_join_shape() {
    let store = ResourceStore::new();
    let mut doc = res("/doc", false);
    doc.props.set(PropName::default_ns("title"), Value::String("A".into()));
    doc.props.set(
        PropName::default_ns("tag"),
        PropValue::Multi(vec![Value::String("x".into()), Value::String("y".into())]),
    );
    store.create(&doc).unwrap();
    store.create(&res("/empty", false)).unwrap();

    let rows = store.index_scan(None);
    // root and /empty contribute one prop-less row each, /doc three prop rows
    let doc_rows: Vec<_> = rows.iter().filter(|r| r.uri == "/doc").collect();
    assert_eq!(doc_rows.len(), 3);
    assert!(doc_rows.iter().all(|r| r.prop.is_some()));
    let empty_rows: Vec<_> = rows.iter().filter(|r| r.uri == "/empty").collect();
    assert_eq!(empty_rows.len(), 1);
    assert!(empty_rows[0].prop.is_none());
    // uri order puts the root first
    assert_eq!(rows[0].uri, "/");
}

#[test]
fn test_index_scan_scope_limits_to_subtree() {
    let store = ResourceStore::new();
    store.create(&res("/a", true)).unwrap();
    store.create(&res("/a/doc", false)).unwrap();
    store.create(&res("/ab", false)).unwrap();
    let scope = Uri::parse("/a").unwrap();
    let rows = store.index_scan(Some(&scope));
    let uris: Vec<&str> = rows.iter().map(|r| r.uri.as_str()).collect();
    assert_eq!(uris, vec!["/a", "/a/doc"]);
}

#[test]
fn test_multi_value_order_survives_round_trip() {
    let store = ResourceStore::new();
    let mut doc = res("/doc", false);
    doc.props.set(
        PropName::default_ns("seq"),
        PropValue::Multi(vec![
            Value::String("first".into()),
            Value::String("second".into()),
            Value::String("third".into()),
        ]),
    );
    store.create(&doc).unwrap();
    let loaded = store.load(&Uri::parse("/doc").unwrap()).unwrap();
    let vals: Vec<&str> = loaded
        .props
        .get_default("seq")
        .unwrap()
        .value
        .values()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(vals, vec!["first", "second", "third"]);
}
