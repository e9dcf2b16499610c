//! Compiled form of a search: the flat query tree the index engine evaluates,
//! plus sort specs with their comparator kind already decided. Field values
//! are reduced to the three scalar shapes the index stores (dates and
//! timestamps become epoch milliseconds).

use chrono::NaiveTime;

use crate::resource::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Long(i64),
    Bool(bool),
}

impl FieldValue {
    pub fn str<S: Into<String>>(s: S) -> Self {
        FieldValue::Str(s.into())
    }

    /// Index-side form of a stored property value. Binary values are not
    /// indexed and JSON values only enter the index through their flattened
    /// attribute leaves, so both map to None here.
    pub fn from_value(v: &Value) -> Option<FieldValue> {
        match v {
            Value::String(s) => Some(FieldValue::Str(s.clone())),
            Value::Int(n) => Some(FieldValue::Long(i64::from(*n))),
            Value::Long(n) => Some(FieldValue::Long(*n)),
            Value::Date(d) => {
                Some(FieldValue::Long(d.and_time(NaiveTime::MIN).and_utc().timestamp_millis()))
            }
            Value::Timestamp(t) => Some(FieldValue::Long(t.timestamp_millis())),
            Value::Boolean(b) => Some(FieldValue::Bool(*b)),
            Value::Principal(p) => Some(FieldValue::Str(p.name.clone())),
            Value::Binary(_) | Value::Json(_) => None,
        }
    }

    /// Scalar leaf of a JSON property value; non-scalar leaves are skipped.
    pub fn from_json_leaf(v: &serde_json::Value) -> Option<FieldValue> {
        match v {
            serde_json::Value::String(s) => Some(FieldValue::Str(s.clone())),
            serde_json::Value::Number(n) => n.as_i64().map(FieldValue::Long),
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            FieldValue::Long(n) => Some(*n),
            _ => None,
        }
    }

    /// Ordering within one shape; values of different shapes do not compare
    /// (a range over a Long field silently misses Str values, matching how a
    /// real index treats a type clash).
    pub fn compare(&self, other: &FieldValue) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (FieldValue::Str(a), FieldValue::Str(b)) => Some(a.cmp(b)),
            (FieldValue::Long(a), FieldValue::Long(b)) => Some(a.cmp(b)),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexQuery {
    MatchAll,
    MatchNone,
    Term { field: String, value: FieldValue },
    /// Any-of match over one field.
    Terms { field: String, values: Vec<FieldValue> },
    Range {
        field: String,
        from: Option<FieldValue>,
        to: Option<FieldValue>,
        from_inclusive: bool,
        to_inclusive: bool,
    },
    Prefix { field: String, prefix: String },
    /// Glob pattern (`*` and `?`), anchored over the whole value.
    Wildcard { field: String, pattern: String },
    Exists { field: String },
    Not(Box<IndexQuery>),
    Bool {
        must: Vec<IndexQuery>,
        should: Vec<IndexQuery>,
        must_not: Vec<IndexQuery>,
    },
}

impl IndexQuery {
    pub fn term<S: Into<String>>(field: S, value: FieldValue) -> Self {
        IndexQuery::Term { field: field.into(), value }
    }

    pub fn all_of(queries: Vec<IndexQuery>) -> Self {
        IndexQuery::Bool { must: queries, should: Vec::new(), must_not: Vec::new() }
    }

    pub fn any_of(queries: Vec<IndexQuery>) -> Self {
        IndexQuery::Bool { must: Vec::new(), should: queries, must_not: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind { Str, Long }

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSort {
    pub field: String,
    pub order: super::ast::SortOrder,
    pub kind: SortKind,
}

/// Everything the engine needs to run one search. `filter` carries the
/// mandatory authorization filter (plus any flag filters) and is always
/// ANDed with `query`; the compiler builds it, callers never see it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSearch {
    pub query: IndexQuery,
    pub filter: IndexQuery,
    pub sorts: Vec<IndexSort>,
    pub limit: usize,
    pub offset: usize,
}
