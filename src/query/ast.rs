//! Typed search AST. The node set is closed: the compiler in `compile` does
//! an exhaustive match over it, so adding a variant is a compile-time event,
//! not a runtime dispatch failure.

use serde::{Deserialize, Serialize};

use crate::resource::{PropName, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermOperator { Eq, Ne, Gt, Ge, Lt, Le, In, Ni }

impl TermOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            TermOperator::Eq => "=",
            TermOperator::Ne => "!=",
            TermOperator::Gt => ">",
            TermOperator::Ge => ">=",
            TermOperator::Lt => "<",
            TermOperator::Le => "<=",
            TermOperator::In => "in",
            TermOperator::Ni => "not in",
        }
    }
}

/// Property reference in a query term or sort key. `attribute` selects a key
/// inside a JSON-typed property (`prop@attr`); it is mandatory for JSON
/// properties and forbidden for every other type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropSelector {
    pub name: PropName,
    pub attribute: Option<String>,
}

impl PropSelector {
    pub fn prop(name: PropName) -> Self {
        PropSelector { name, attribute: None }
    }

    pub fn attr(name: PropName, attribute: &str) -> Self {
        PropSelector { name, attribute: Some(attribute.to_string()) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll,
    And(Vec<Query>),
    Or(Vec<Query>),
    // uri predicates
    UriTerm { uri: String, op: TermOperator },
    UriPrefix { uri: String, inverted: bool },
    UriRange { from: String, to: String, inclusive: bool },
    UriDepth { depth: i64, op: TermOperator },
    UriSet { uris: Vec<String>, op: TermOperator },
    // name predicates
    NameTerm { name: String, op: TermOperator },
    NamePrefix { prefix: String, inverted: bool },
    NameRange { from: String, to: String, inclusive: bool },
    NameWildcard { pattern: String, inverted: bool, ignore_case: bool },
    // type predicates; In/Ni expand over the resource-type tree
    TypeTerm { type_name: String, op: TermOperator },
    // property predicates; all require a declared property definition
    PropertyTerm { prop: PropSelector, value: Value, op: TermOperator },
    PropertyRange {
        prop: PropSelector,
        from: Option<Value>,
        to: Option<Value>,
        from_inclusive: bool,
        to_inclusive: bool,
    },
    PropertyPrefix { prop: PropSelector, prefix: String, inverted: bool },
    PropertyWildcard { prop: PropSelector, pattern: String, inverted: bool },
    PropertyExists { prop: PropSelector, inverted: bool },
    // acl predicates
    AclExists { inverted: bool },
    AclInheritedFrom { uri: String, inverted: bool },
    AclReadForAll { inverted: bool },
}

impl Query {
    /// Convenience for the common equality case.
    pub fn prop_eq(name: PropName, value: Value) -> Query {
        Query::PropertyTerm { prop: PropSelector::prop(name), value, op: TermOperator::Eq }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder { Asc, Desc }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Uri,
    Name,
    ResourceType,
    Property(PropSelector),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub key: SortKey,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(key: SortKey) -> Self {
        SortField { key, order: SortOrder::Asc }
    }

    pub fn desc(key: SortKey) -> Self {
        SortField { key, order: SortOrder::Desc }
    }
}

/// Ordered list of sort fields; earlier fields dominate.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Sorting {
    pub fields: Vec<SortField>,
}

impl Sorting {
    pub fn new(fields: Vec<SortField>) -> Self {
        Sorting { fields }
    }

    pub fn by(key: SortKey) -> Self {
        Sorting { fields: vec![SortField::asc(key)] }
    }
}
