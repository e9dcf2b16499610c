use super::*;
use chrono::Utc;

use crate::path::Uri;
use crate::principal::Principal;
use crate::resource::{PropValue, PropertySet, Resource, Value, NULL_RESOURCE_ID};
use crate::types::model::builtin;

fn ctx<'a>(
    event: LifecycleEvent,
    uri: &'a Uri,
    principal: &'a Principal,
    is_collection: bool,
    content: Option<&'a [u8]>,
) -> EvalContext<'a> {
    EvalContext {
        event,
        principal,
        now: Utc::now(),
        uri,
        is_collection,
        is_admin: false,
        content,
        content_type_hint: None,
    }
}

fn previous(uri: &str, resource_type: &str, props: PropertySet) -> Resource {
    let now = Utc::now();
    Resource {
        id: NULL_RESOURCE_ID,
        uri: Uri::parse(uri).unwrap(),
        is_collection: false,
        resource_type: resource_type.to_string(),
        owner: "alice".to_string(),
        created_by: "alice".to_string(),
        created_at: now,
        content_modified_by: "alice".to_string(),
        content_modified_at: now,
        properties_modified_by: "alice".to_string(),
        properties_modified_at: now,
        modified_by: "alice".to_string(),
        modified_at: now,
        acl_inherited_from: Some(1),
        props,
    }
}

#[test]
fn test_create_resolves_text_and_evaluates_content_props() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/notes.txt").unwrap();
    let alice = Principal::user("alice");
    let body = b"hello world".as_slice();
    let mut supplied = PropertySet::new();
    supplied.set(PropName::default_ns(PROP_TITLE), Value::String("Notes".into()));

    let out = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, false, Some(body)), &supplied)
        .unwrap();
    assert_eq!(out.resource_type, TYPE_TEXT);
    assert_eq!(
        out.props.get_default(PROP_CONTENT_LENGTH).unwrap().value.first().unwrap().as_long(),
        Some(11)
    );
    assert_eq!(
        out.props.get_default(PROP_CONTENT_TYPE).unwrap().value.first().unwrap().as_str(),
        Some("text/plain")
    );
    assert!(out.props.get_default(PROP_ETAG).is_some());
    // mandatory default applied
    assert_eq!(
        out.props.get_default(PROP_PUBLISHED).unwrap().value.first().unwrap().as_bool(),
        Some(true)
    );
    // client supplied editable property accepted
    assert_eq!(out.props.get_default(PROP_TITLE).unwrap().value.first().unwrap().as_str(), Some("Notes"));
}

#[test]
fn test_create_resolves_collection() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/folder").unwrap();
    let alice = Principal::user("alice");
    let out = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, true, None), &PropertySet::new())
        .unwrap();
    assert_eq!(out.resource_type, TYPE_COLLECTION);
    assert!(out.props.get_default(PROP_CONTENT_LENGTH).is_none());
}

#[test]
fn test_create_fills_the_audit_suite_and_title_fallback() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/reports").unwrap();
    let alice = Principal::user("alice");
    let out = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, true, None), &PropertySet::new())
        .unwrap();
    // nothing supplied, so the title falls back to the resource name
    assert_eq!(
        out.props.get_default(PROP_TITLE).unwrap().value.first().unwrap().as_str(),
        Some("reports")
    );
    assert!(out.props.get_default(PROP_CREATION_TIME).is_some());
    assert!(out.props.get_default(PROP_LAST_MODIFIED).is_some());
    match out.props.get_default(PROP_CREATED_BY).unwrap().value.first().unwrap() {
        Value::Principal(p) => assert_eq!(p.name, "alice"),
        other => panic!("createdBy holds {other:?}"),
    }
    match out.props.get_default(PROP_OWNER).unwrap().value.first().unwrap() {
        Value::Principal(p) => assert_eq!(p.name, "alice"),
        other => panic!("owner holds {other:?}"),
    }
    // collections have no content, so the content suite stays absent
    assert!(out.props.get_default(PROP_CHARACTER_ENCODING).is_none());
}

#[test]
fn test_create_json_document_via_hint() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/config").unwrap();
    let alice = Principal::user("alice");
    let mut c = ctx(LifecycleEvent::Create, &uri, &alice, false, Some(b"{}".as_slice()));
    c.content_type_hint = Some("application/json");
    let out = ev.evaluate_create(&c, &PropertySet::new()).unwrap();
    assert_eq!(out.resource_type, TYPE_JSON_DOCUMENT);
}

#[test]
fn test_create_rejects_supplied_protected_property() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.bin").unwrap();
    let alice = Principal::user("alice");
    let mut supplied = PropertySet::new();
    supplied.set(PropName::default_ns(PROP_ETAG), Value::String("forged".into()));
    // no content, so the etag evaluator yields nothing and the supplied value
    // reaches the protection gate
    let err = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, false, None), &supplied)
        .unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn test_create_vocabulary_terms_are_validated() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let mut ok = PropertySet::new();
    ok.set(
        PropName::default_ns(PROP_CATEGORY),
        PropValue::Multi(vec![Value::String("physics".into()), Value::String("music".into())]),
    );
    ev.evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, false, Some(b"x".as_slice())), &ok)
        .unwrap();

    let mut bad = PropertySet::new();
    bad.set(PropName::default_ns(PROP_CATEGORY), Value::String("astrology".into()));
    let err = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, false, Some(b"x".as_slice())), &bad)
        .unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn test_create_mandatory_without_default_is_fatal() {
    let root = PrimaryTypeDef::new("thing", None).property(
        PropertyTypeDefinition::new(PropName::default_ns("serial"), PropType::String).mandatory(),
    );
    let reg = TypeRegistryBuilder::new(root).build().unwrap();
    let ev = PropertyEvaluator::new(&reg);
    let uri = Uri::parse("/t").unwrap();
    let alice = Principal::user("alice");
    let err = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, false, None), &PropertySet::new())
        .unwrap_err();
    assert!(err.is_consistency());
}

#[test]
fn test_content_change_reevaluates_and_preserves() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");

    let mut props = PropertySet::new();
    props.set(PropName::default_ns(PROP_TITLE), Value::String("Keep me".into()));
    props.set(PropName::default_ns(PROP_CONTENT_LENGTH), Value::Long(1));
    props.set(PropName::default_ns(PROP_ETAG), Value::String("old".into()));
    props.set(PropName::default_ns(PROP_PUBLISHED), Value::Boolean(false));
    props.set(
        PropName::new(crate::resource::Namespace::custom("x"), "dead"),
        Value::String("verbatim".into()),
    );
    let prev = previous("/doc.txt", TYPE_TEXT, props);

    let body = b"new content".as_slice();
    let out = ev
        .evaluate_content_change(&ctx(LifecycleEvent::ContentChange, &uri, &alice, false, Some(body)), &prev)
        .unwrap();
    assert_eq!(
        out.props.get_default(PROP_CONTENT_LENGTH).unwrap().value.first().unwrap().as_long(),
        Some(body.len() as i64)
    );
    assert_ne!(
        out.props.get_default(PROP_ETAG).unwrap().value.first().unwrap().as_str(),
        Some("old")
    );
    // untouched values survive
    assert_eq!(out.props.get_default(PROP_TITLE).unwrap().value.first().unwrap().as_str(), Some("Keep me"));
    assert_eq!(out.props.get_default(PROP_PUBLISHED).unwrap().value.first().unwrap().as_bool(), Some(false));
    let dead = PropName::new(crate::resource::Namespace::custom("x"), "dead");
    assert_eq!(out.props.get(&dead).unwrap().value.first().unwrap().as_str(), Some("verbatim"));
}

#[test]
fn test_content_change_can_migrate_the_type() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/data").unwrap();
    let alice = Principal::user("alice");
    let prev = previous("/data", TYPE_TEXT, PropertySet::new());
    let mut c = ctx(LifecycleEvent::ContentChange, &uri, &alice, false, Some(b"{}".as_slice()));
    c.content_type_hint = Some("application/json");
    let out = ev.evaluate_content_change(&c, &prev).unwrap();
    assert_eq!(out.resource_type, TYPE_JSON_DOCUMENT);
}

fn text_resource_with(title: &str) -> Resource {
    let mut props = PropertySet::new();
    props.set(PropName::default_ns(PROP_TITLE), Value::String(title.into()));
    props.set(PropName::default_ns(PROP_PUBLISHED), Value::Boolean(true));
    props.set(PropName::default_ns(PROP_ETAG), Value::String("e1".into()));
    props.set(PropName::default_ns(PROP_CONTENT_TYPE), Value::String("text/plain".into()));
    props.set(PropName::default_ns(PROP_CONTENT_LENGTH), Value::Long(5));
    previous("/doc.txt", TYPE_TEXT, props)
}

#[test]
fn test_props_change_partition() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let prev = text_resource_with("Old");

    // client echoes everything, changes the title and adds a dead property
    let mut supplied = prev.props.clone();
    supplied.set(PropName::default_ns(PROP_TITLE), Value::String("New".into()));
    let dead = PropName::new(crate::resource::Namespace::custom("x"), "note");
    supplied.set(dead.clone(), Value::String("kept".into()));

    let out = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap();
    assert_eq!(out.props.get_default(PROP_TITLE).unwrap().value.first().unwrap().as_str(), Some("New"));
    // unchanged protected value kept as-is
    assert_eq!(out.props.get_default(PROP_ETAG).unwrap().value.first().unwrap().as_str(), Some("e1"));
    assert_eq!(out.props.get(&dead).unwrap().value.first().unwrap().as_str(), Some("kept"));
}

#[test]
fn test_props_change_rejects_protected_edit() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let prev = text_resource_with("Old");
    let mut supplied = prev.props.clone();
    supplied.set(PropName::default_ns(PROP_ETAG), Value::String("forged".into()));
    let err = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn test_props_change_rejects_protected_delete() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let prev = text_resource_with("Old");
    let mut supplied = prev.props.clone();
    supplied.remove(&PropName::default_ns(PROP_ETAG));
    let err = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn test_props_change_rejects_mandatory_delete() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let prev = text_resource_with("Old");
    let mut supplied = prev.props.clone();
    supplied.remove(&PropName::default_ns(PROP_PUBLISHED));
    let err = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap_err();
    assert!(err.is_constraint());
    assert_eq!(err.code_str(), "mandatory_property_delete");
}

#[test]
fn test_props_change_deletes_editable_and_dead() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let mut prev = text_resource_with("Old");
    let dead = PropName::new(crate::resource::Namespace::custom("x"), "note");
    prev.props.set(dead.clone(), Value::String("bye".into()));

    let mut supplied = prev.props.clone();
    supplied.remove(&PropName::default_ns(PROP_TITLE));
    supplied.remove(&dead);
    let out = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap();
    assert!(out.props.get_default(PROP_TITLE).is_none());
    assert!(out.props.get(&dead).is_none());
}

#[test]
fn test_props_change_rejects_multi_value_on_single_def() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let prev = text_resource_with("Old");
    let mut supplied = prev.props.clone();
    supplied.set(
        PropName::default_ns(PROP_TITLE),
        PropValue::Multi(vec![Value::String("a".into()), Value::String("b".into())]),
    );
    let err = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn test_props_change_admin_only_property() {
    let root = PrimaryTypeDef::new("thing", None).property(
        PropertyTypeDefinition::new(PropName::default_ns("quota"), PropType::Long)
            .admin_only()
            .with_default(Value::Long(10)),
    );
    let reg = TypeRegistryBuilder::new(root).build().unwrap();
    let ev = PropertyEvaluator::new(&reg);
    let uri = Uri::parse("/t").unwrap();
    let alice = Principal::user("alice");
    let prev = previous("/t", "thing", {
        let mut p = PropertySet::new();
        p.set(PropName::default_ns("quota"), Value::Long(10));
        p
    });
    let mut supplied = prev.props.clone();
    supplied.set(PropName::default_ns("quota"), Value::Long(99));

    let denied = ev
        .evaluate_props_change(&ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None), &prev, &supplied)
        .unwrap_err();
    assert!(denied.is_constraint());

    let mut admin_ctx = ctx(LifecycleEvent::PropertiesChange, &uri, &alice, false, None);
    admin_ctx.is_admin = true;
    let out = ev.evaluate_props_change(&admin_ctx, &prev, &supplied).unwrap();
    assert_eq!(out.props.get_default("quota").unwrap().value.first().unwrap().as_long(), Some(99));
}

#[test]
fn test_type_mismatch_is_rejected() {
    let reg = builtin();
    let ev = PropertyEvaluator::new(reg);
    let uri = Uri::parse("/doc.txt").unwrap();
    let alice = Principal::user("alice");
    let mut supplied = PropertySet::new();
    supplied.set(PropName::default_ns(PROP_TITLE), Value::Long(7));
    let err = ev
        .evaluate_create(&ctx(LifecycleEvent::Create, &uri, &alice, false, Some(b"x".as_slice())), &supplied)
        .unwrap_err();
    assert!(err.is_constraint());
}
