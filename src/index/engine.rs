//! In-memory index engine. Documents live in a uri-keyed map, so unscored
//! results come back in URI order by construction; everything a query can
//! touch is a field in the document's field map, reserved names and property
//! names alike.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use tracing::error;

use crate::query::ast::SortOrder;
use crate::query::compile::IndexLookup;
use crate::query::fields::FIELD_ACL_INHERITED_FROM;
use crate::query::ir::{CompiledSearch, FieldValue, IndexQuery, IndexSort, SortKind};
use crate::resource::NULL_RESOURCE_ID;

#[derive(Debug, Clone)]
pub struct IndexDoc {
    pub id: i64,
    pub uri: String,
    pub fields: BTreeMap<String, Vec<FieldValue>>,
}

impl IndexDoc {
    pub fn first(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).and_then(|vs| vs.first())
    }

    pub fn first_long(&self, field: &str) -> Option<i64> {
        self.first(field).and_then(|v| v.as_long())
    }

    pub fn first_str(&self, field: &str) -> Option<&str> {
        self.first(field).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: i64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
    /// Matches before offset/limit were applied.
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct IndexEngine {
    docs: BTreeMap<String, IndexDoc>,
    ids: HashMap<i64, String>,
}

impl IndexEngine {
    pub fn new() -> Self {
        IndexEngine::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn doc(&self, uri: &str) -> Option<&IndexDoc> {
        self.docs.get(uri)
    }

    /// Insert or replace the document at its uri. Handles the move shape
    /// (same id, new uri) and the delete-and-recreate shape (same uri, new
    /// id) without leaving stale id mappings behind.
    pub fn upsert(&mut self, doc: IndexDoc) {
        if let Some(prev) = self.docs.get(&doc.uri) {
            if prev.id != doc.id {
                self.ids.remove(&prev.id);
            }
        }
        if let Some(old_uri) = self.ids.insert(doc.id, doc.uri.clone()) {
            if old_uri != doc.uri {
                self.docs.remove(&old_uri);
            }
        }
        self.docs.insert(doc.uri.clone(), doc);
    }

    pub fn remove(&mut self, uri: &str) -> bool {
        match self.docs.remove(uri) {
            Some(doc) => {
                self.ids.remove(&doc.id);
                true
            }
            None => false,
        }
    }

    /// Remove the document at `uri` and everything below it.
    pub fn remove_subtree(&mut self, uri: &str) -> usize {
        let mut victims = Vec::new();
        if self.docs.contains_key(uri) {
            victims.push(uri.to_string());
        }
        let child_prefix = if uri == "/" { "/".to_string() } else { format!("{uri}/") };
        for key in self.docs.range(child_prefix.clone()..).map(|(k, _)| k) {
            if !key.starts_with(&child_prefix) {
                break;
            }
            if key != uri {
                victims.push(key.clone());
            }
        }
        for v in &victims {
            if let Some(doc) = self.docs.remove(v) {
                self.ids.remove(&doc.id);
            }
        }
        victims.len()
    }

    pub fn wipe(&mut self, scope: Option<&str>) {
        match scope {
            None => {
                self.docs.clear();
                self.ids.clear();
            }
            Some(uri) => {
                self.remove_subtree(uri);
            }
        }
    }

    pub fn search(&self, search: &CompiledSearch) -> SearchResults {
        let mut wildcards = WildcardSet::default();
        wildcards.collect(&search.query);
        wildcards.collect(&search.filter);

        let mut matched: Vec<&IndexDoc> = self
            .docs
            .values()
            .filter(|d| {
                matches(d, &search.query, &wildcards) && matches(d, &search.filter, &wildcards)
            })
            .collect();
        let total = matched.len();

        matched.sort_by(|a, b| compare_docs(a, b, &search.sorts));

        let hits = matched
            .into_iter()
            .skip(search.offset)
            .take(search.limit)
            .map(|d| SearchHit { id: d.id, uri: d.uri.clone() })
            .collect();
        SearchResults { hits, total }
    }
}

impl IndexLookup for IndexEngine {
    fn resource_id(&self, uri: &str) -> Option<i64> {
        self.docs.get(uri).map(|d| d.id)
    }

    fn acl_node_of(&self, uri: &str) -> Option<i64> {
        self.docs.get(uri).map(|d| match d.first_long(FIELD_ACL_INHERITED_FROM) {
            Some(n) if n != NULL_RESOURCE_ID => n,
            _ => d.id,
        })
    }
}

fn matches(doc: &IndexDoc, q: &IndexQuery, wildcards: &WildcardSet) -> bool {
    match q {
        IndexQuery::MatchAll => true,
        IndexQuery::MatchNone => false,
        IndexQuery::Term { field, value } => {
            doc.fields.get(field).map_or(false, |vs| vs.contains(value))
        }
        IndexQuery::Terms { field, values } => doc
            .fields
            .get(field)
            .map_or(false, |vs| vs.iter().any(|v| values.contains(v))),
        IndexQuery::Range { field, from, to, from_inclusive, to_inclusive } => {
            doc.fields.get(field).map_or(false, |vs| {
                vs.iter().any(|v| in_range(v, from.as_ref(), to.as_ref(), *from_inclusive, *to_inclusive))
            })
        }
        IndexQuery::Prefix { field, prefix } => doc.fields.get(field).map_or(false, |vs| {
            vs.iter().any(|v| v.as_str().map_or(false, |s| s.starts_with(prefix)))
        }),
        IndexQuery::Wildcard { field, pattern } => doc.fields.get(field).map_or(false, |vs| {
            vs.iter().any(|v| v.as_str().map_or(false, |s| wildcards.is_match(pattern, s)))
        }),
        IndexQuery::Exists { field } => doc.fields.get(field).map_or(false, |vs| !vs.is_empty()),
        IndexQuery::Not(inner) => !matches(doc, inner, wildcards),
        IndexQuery::Bool { must, should, must_not } => {
            must.iter().all(|m| matches(doc, m, wildcards))
                && (should.is_empty() || should.iter().any(|s| matches(doc, s, wildcards)))
                && !must_not.iter().any(|m| matches(doc, m, wildcards))
        }
    }
}

fn in_range(
    v: &FieldValue,
    from: Option<&FieldValue>,
    to: Option<&FieldValue>,
    from_inclusive: bool,
    to_inclusive: bool,
) -> bool {
    if let Some(f) = from {
        match v.compare(f) {
            Some(Ordering::Greater) => {}
            Some(Ordering::Equal) if from_inclusive => {}
            _ => return false,
        }
    }
    if let Some(t) = to {
        match v.compare(t) {
            Some(Ordering::Less) => {}
            Some(Ordering::Equal) if to_inclusive => {}
            _ => return false,
        }
    }
    true
}

fn compare_docs(a: &IndexDoc, b: &IndexDoc, sorts: &[IndexSort]) -> Ordering {
    for s in sorts {
        let ord = match s.kind {
            SortKind::Long => cmp_options(a.first_long(&s.field), b.first_long(&s.field)),
            SortKind::Str => cmp_options(a.first_str(&s.field), b.first_str(&s.field)),
        };
        let ord = if s.order == SortOrder::Desc { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.uri.cmp(&b.uri)
}

/// Documents without the sort field go after those that have it.
fn cmp_options<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Wildcard patterns compiled once per search, not once per document.
#[derive(Default)]
struct WildcardSet {
    compiled: HashMap<String, Option<Regex>>,
}

impl WildcardSet {
    fn collect(&mut self, q: &IndexQuery) {
        match q {
            IndexQuery::Wildcard { pattern, .. } => {
                self.compiled.entry(pattern.clone()).or_insert_with(|| glob_regex(pattern));
            }
            IndexQuery::Not(inner) => self.collect(inner),
            IndexQuery::Bool { must, should, must_not } => {
                for sub in must.iter().chain(should).chain(must_not) {
                    self.collect(sub);
                }
            }
            _ => {}
        }
    }

    fn is_match(&self, pattern: &str, value: &str) -> bool {
        match self.compiled.get(pattern) {
            Some(Some(re)) => re.is_match(value),
            _ => false,
        }
    }
}

/// `*` and `?` glob, anchored over the whole value.
fn glob_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    match Regex::new(&re) {
        Ok(r) => Some(r),
        Err(e) => {
            error!(target: "depot::index", pattern, error = %e, "wildcard pattern did not compile");
            None
        }
    }
}
