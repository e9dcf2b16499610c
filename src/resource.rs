//! Core resource data contracts: typed property values, property sets and the
//! `Resource` record itself. Keep this module about types/serde and light
//! helpers; evaluation logic lives in `types`, persistence in `store`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::path::Uri;
use crate::principal::Principal;

/// Sentinel id meaning "no resource" (e.g. ACL queries against a uri that is
/// not indexed resolve to this).
pub const NULL_RESOURCE_ID: i64 = -1;

/// Property namespace. The empty namespace is the DEFAULT namespace carrying
/// the standard repository properties; everything else is a short prefix used
/// verbatim in index field names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Namespace(pub String);

impl Namespace {
    pub const DEFAULT: &'static str = "";

    pub fn default_ns() -> Self { Namespace(String::new()) }
    pub fn custom<S: Into<String>>(prefix: S) -> Self { Namespace(prefix.into()) }
    pub fn is_default(&self) -> bool { self.0.is_empty() }
    pub fn prefix(&self) -> &str { &self.0 }
}

/// Property identity: `(namespace, name)`, unique per resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropName {
    pub ns: Namespace,
    pub name: String,
}

impl PropName {
    pub fn new(ns: Namespace, name: &str) -> Self { PropName { ns, name: name.to_string() } }
    pub fn default_ns(name: &str) -> Self { PropName::new(Namespace::default_ns(), name) }
}

impl fmt::Display for PropName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_default() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}:{}", self.ns.prefix(), self.name)
        }
    }
}

/// Declared value types for properties.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    String,
    Int,
    Long,
    Date,
    Timestamp,
    Boolean,
    Principal,
    Binary,
    Json,
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(text.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A single scalar property value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    String(String),
    Int(i32),
    Long(i64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Boolean(bool),
    Principal(Principal),
    #[serde(with = "base64_bytes")]
    Binary(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    pub fn prop_type(&self) -> PropType {
        match self {
            Value::String(_) => PropType::String,
            Value::Int(_) => PropType::Int,
            Value::Long(_) => PropType::Long,
            Value::Date(_) => PropType::Date,
            Value::Timestamp(_) => PropType::Timestamp,
            Value::Boolean(_) => PropType::Boolean,
            Value::Principal(_) => PropType::Principal,
            Value::Binary(_) => PropType::Binary,
            Value::Json(_) => PropType::Json,
        }
    }

    pub fn is_binary(&self) -> bool { matches!(self, Value::Binary(_)) }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Int(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Principal(p) => f.write_str(&p.name),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

/// Single- or multi-valued logical property value. Multi-valued properties are
/// persisted as one row per scalar and reassembled into the `Multi` form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropValue {
    Single(Value),
    Multi(Vec<Value>),
}

impl PropValue {
    pub fn values(&self) -> &[Value] {
        match self {
            PropValue::Single(v) => std::slice::from_ref(v),
            PropValue::Multi(vs) => vs.as_slice(),
        }
    }

    pub fn first(&self) -> Option<&Value> { self.values().first() }

    pub fn is_multi(&self) -> bool { matches!(self, PropValue::Multi(_)) }

    pub fn is_binary(&self) -> bool { self.values().iter().any(|v| v.is_binary()) }
}

impl From<Value> for PropValue {
    fn from(v: Value) -> Self { PropValue::Single(v) }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Property {
    pub name: PropName,
    pub value: PropValue,
}

impl Property {
    pub fn new(name: PropName, value: PropValue) -> Self { Property { name, value } }
}

/// Ordered set of properties keyed by `(namespace, name)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PropertySet {
    props: BTreeMap<PropName, Property>,
}

impl PropertySet {
    pub fn new() -> Self { Self::default() }

    pub fn set(&mut self, name: PropName, value: impl Into<PropValue>) {
        self.props.insert(name.clone(), Property::new(name, value.into()));
    }

    pub fn insert(&mut self, prop: Property) { self.props.insert(prop.name.clone(), prop); }

    pub fn get(&self, name: &PropName) -> Option<&Property> { self.props.get(name) }

    pub fn get_value(&self, name: &PropName) -> Option<&PropValue> {
        self.props.get(name).map(|p| &p.value)
    }

    /// Convenience lookup in the DEFAULT namespace.
    pub fn get_default(&self, name: &str) -> Option<&Property> {
        self.props.get(&PropName::default_ns(name))
    }

    pub fn remove(&mut self, name: &PropName) -> Option<Property> { self.props.remove(name) }

    pub fn contains(&self, name: &PropName) -> bool { self.props.contains_key(name) }

    pub fn iter(&self) -> impl Iterator<Item = &Property> { self.props.values() }

    pub fn names(&self) -> impl Iterator<Item = &PropName> { self.props.keys() }

    pub fn len(&self) -> usize { self.props.len() }

    pub fn is_empty(&self) -> bool { self.props.is_empty() }
}

impl FromIterator<Property> for PropertySet {
    fn from_iter<T: IntoIterator<Item = Property>>(iter: T) -> Self {
        let mut set = PropertySet::new();
        for p in iter {
            set.insert(p);
        }
        set
    }
}

/// A materialized repository resource: row attributes plus its property set.
/// The three modification pairs are independent: content, properties, and the
/// aggregate (whichever happened last).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: i64,
    pub uri: Uri,
    pub is_collection: bool,
    pub resource_type: String,
    pub owner: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub content_modified_by: String,
    pub content_modified_at: DateTime<Utc>,
    pub properties_modified_by: String,
    pub properties_modified_at: DateTime<Utc>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
    /// None when this resource owns its ACL; otherwise the id of the nearest
    /// strict ancestor owning an explicit ACL.
    pub acl_inherited_from: Option<i64>,
    pub props: PropertySet,
}

impl Resource {
    pub fn is_inherited_acl(&self) -> bool { self.acl_inherited_from.is_some() }

    pub fn depth(&self) -> usize { self.uri.depth() }

    pub fn name(&self) -> &str { self.uri.name() }
}
