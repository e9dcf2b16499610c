//! Index maintenance. Rebuild folds the store's ordered outer-join scan into
//! one document per resource; incremental sync drains the change log and
//! reindexes per changed uri. Both run through the same row fold, so the
//! aggregation rules (value grouping, binary exclusion, read-principal
//! resolution) live in exactly one place.

pub mod engine;

pub use engine::{IndexDoc, IndexEngine, SearchHit, SearchResults};

use std::collections::{hash_map::Entry, BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::RepoResult;
use crate::path::Uri;
use crate::principal::PSEUDO_OWNER;
use crate::query::fields;
use crate::query::ir::FieldValue;
use crate::resource::{Namespace, PropName, Value, NULL_RESOURCE_ID};
use crate::store::changelog::{StagingBuffer, STAGING_BATCH_SIZE};
use crate::store::{ChangeOp, IndexScanRow, ResourceStore, INDEX_LOGGER_ID, INDEX_LOGGER_TYPE};

/// Change-log rows drained per sync round.
const SYNC_BATCH: usize = 1000;

pub struct IndexSynchronizer {
    store: ResourceStore,
    engine: Arc<RwLock<IndexEngine>>,
}

impl IndexSynchronizer {
    pub fn new(store: ResourceStore, engine: Arc<RwLock<IndexEngine>>) -> Self {
        IndexSynchronizer { store, engine }
    }

    /// Rebuild the whole index, or just the subtree under `scope`, from a
    /// fresh store scan. Returns the number of documents written.
    pub fn rebuild(&self, scope: Option<&Uri>) -> RepoResult<usize> {
        let rows = self.store.index_scan(scope);
        let mut ctx = IndexContext::new(&self.store);
        let docs = fold_rows(rows, &mut ctx)?;

        let mut engine = self.engine.write();
        engine.wipe(scope.map(|u| u.as_str()));
        let written = docs.len();
        for doc in docs {
            engine.upsert(doc);
        }
        drop(engine);

        info!(
            target: "depot::index",
            scope = scope.map(|u| u.as_str()).unwrap_or("/"),
            docs = written,
            "index rebuilt"
        );
        Ok(written)
    }

    /// Drain pending change-log rows and bring the index up to date. Returns
    /// the number of rows consumed.
    pub fn sync(&self) -> RepoResult<usize> {
        let mut processed = 0;
        loop {
            let rows =
                self.store.consume_changes(INDEX_LOGGER_TYPE, INDEX_LOGGER_ID, SYNC_BATCH);
            if rows.is_empty() {
                break;
            }
            processed += rows.len();

            let mut to_reindex: BTreeSet<String> = BTreeSet::new();
            {
                let mut engine = self.engine.write();
                for row in &rows {
                    match row.op {
                        ChangeOp::Deleted => {
                            if row.recursive {
                                engine.remove_subtree(&row.uri);
                            } else {
                                engine.remove(&row.uri);
                            }
                            to_reindex.remove(&row.uri);
                        }
                        _ => {
                            to_reindex.insert(row.uri.clone());
                        }
                    }
                }
            }
            self.reindex_uris(to_reindex)?;
        }
        if processed > 0 {
            debug!(target: "depot::index", rows = processed, "change log drained");
        }
        Ok(processed)
    }

    /// Reindex an explicit uri list. Uris are staged into bounded batches
    /// first so one oversized request cannot turn into one oversized unit of
    /// work; a uri with no resource behind it anymore is dropped from the
    /// index instead.
    pub fn reindex_uris<I>(&self, uris: I) -> RepoResult<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let mut batches: Vec<Vec<String>> = Vec::new();
        let mut staging = StagingBuffer::new(STAGING_BATCH_SIZE, |_, batch| batches.push(batch));
        let session = staging.session();
        for uri in uris {
            staging.push(uri);
        }
        staging.finish();
        if batches.is_empty() {
            return Ok(0);
        }
        debug!(
            target: "depot::index",
            session = %session,
            batches = batches.len(),
            "staged reindex batch list"
        );

        let mut ctx = IndexContext::new(&self.store);
        let mut touched = 0;
        for batch in batches {
            for uri in batch {
                let rows = self.store.index_scan_one(&uri);
                if rows.is_empty() {
                    self.engine.write().remove(&uri);
                    touched += 1;
                    continue;
                }
                let docs = fold_rows(rows, &mut ctx)?;
                let mut engine = self.engine.write();
                for doc in docs {
                    engine.upsert(doc);
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }
}

/// Per-run caches, discarded when the iteration ends. Ancestor ids come from
/// the uri→id map, which a full scan populates in uri order (ancestors are
/// always seen first); read-principal sets are resolved once per ACL-owning
/// node.
struct IndexContext<'s> {
    store: &'s ResourceStore,
    ids: HashMap<String, i64>,
    acl_cache: HashMap<i64, (BTreeSet<String>, bool)>,
}

impl<'s> IndexContext<'s> {
    fn new(store: &'s ResourceStore) -> Self {
        IndexContext { store, ids: HashMap::new(), acl_cache: HashMap::new() }
    }

    fn ancestor_ids(&mut self, uri: &str) -> Vec<i64> {
        let mut out = Vec::new();
        for ancestor in ancestor_uris(uri) {
            let id = match self.ids.get(&ancestor) {
                Some(id) => Some(*id),
                None => {
                    // point reindex: the ancestor was not part of this scan
                    let found = Uri::parse(&ancestor)
                        .ok()
                        .and_then(|u| self.store.resource_id(&u));
                    if let Some(id) = found {
                        self.ids.insert(ancestor, id);
                    }
                    found
                }
            };
            if let Some(id) = id {
                out.push(id);
            }
        }
        out
    }

    /// Read-principal names for a document governed by `node`, with a
    /// `pseudo:owner` grant resolved to the document's owner.
    fn read_principals(&mut self, node: i64, owner: &str) -> RepoResult<BTreeSet<String>> {
        let store = self.store;
        let (names, grants_owner) = match self.acl_cache.entry(node) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(v) => {
                let acl = store.acl_for_node(node)?;
                let mut names = acl.read_principal_names();
                let grants_owner = names.remove(PSEUDO_OWNER);
                v.insert((names, grants_owner))
            }
        };
        let mut out = names.clone();
        if *grants_owner && !owner.is_empty() {
            out.insert(owner.to_string());
        }
        Ok(out)
    }
}

/// Reduce an ordered scan into one document per resource. Rows for one
/// resource are contiguous; a row with a different id is the flush signal,
/// and the last group is flushed explicitly once the rows run out.
fn fold_rows(rows: Vec<IndexScanRow>, ctx: &mut IndexContext<'_>) -> RepoResult<Vec<IndexDoc>> {
    let mut out = Vec::new();
    let mut current: Option<DocBuilder> = None;
    for row in rows {
        if current.as_ref().map_or(false, |b| b.id != row.resource_id) {
            if let Some(done) = current.take() {
                out.push(done.finish(ctx)?);
            }
        }
        let ids = &mut ctx.ids;
        let builder = current.get_or_insert_with(|| {
            ids.insert(row.uri.clone(), row.resource_id);
            DocBuilder::start(&row)
        });
        if let Some(prop) = row.prop {
            // binary values never reach the index
            if !prop.is_binary() {
                builder.props.entry((prop.ns, prop.name)).or_default().push(prop.value);
            }
        }
    }
    if let Some(done) = current.take() {
        out.push(done.finish(ctx)?);
    }
    Ok(out)
}

/// Accumulator for one resource's scan rows. `props` groups values by the
/// `(namespace, name)` identity, concatenating in row order.
struct DocBuilder {
    id: i64,
    uri: String,
    is_collection: bool,
    resource_type: String,
    depth: i32,
    owner: String,
    acl_inherited_from: Option<i64>,
    props: BTreeMap<(String, String), Vec<Value>>,
}

impl DocBuilder {
    fn start(row: &IndexScanRow) -> Self {
        DocBuilder {
            id: row.resource_id,
            uri: row.uri.clone(),
            is_collection: row.is_collection,
            resource_type: row.resource_type.clone(),
            depth: row.depth,
            owner: row.owner.clone(),
            acl_inherited_from: row.acl_inherited_from,
            props: BTreeMap::new(),
        }
    }

    fn finish(self, ctx: &mut IndexContext<'_>) -> RepoResult<IndexDoc> {
        let mut doc_fields: BTreeMap<String, Vec<FieldValue>> = BTreeMap::new();

        let name = resource_name(&self.uri).to_string();
        doc_fields.insert(fields::FIELD_ID.to_string(), vec![FieldValue::Long(self.id)]);
        doc_fields.insert(fields::FIELD_URI.to_string(), vec![FieldValue::Str(self.uri.clone())]);
        doc_fields
            .insert(fields::FIELD_URI_DEPTH.to_string(), vec![FieldValue::Long(self.depth as i64)]);
        doc_fields.insert(fields::FIELD_NAME_LC.to_string(), vec![FieldValue::Str(name.to_lowercase())]);
        doc_fields.insert(fields::FIELD_NAME.to_string(), vec![FieldValue::Str(name)]);
        doc_fields.insert(
            fields::FIELD_RESOURCE_TYPE.to_string(),
            vec![FieldValue::Str(self.resource_type.clone())],
        );
        doc_fields.insert(
            fields::FIELD_IS_COLLECTION.to_string(),
            vec![FieldValue::Bool(self.is_collection)],
        );
        doc_fields.insert(
            fields::FIELD_ACL_INHERITED_FROM.to_string(),
            vec![FieldValue::Long(self.acl_inherited_from.unwrap_or(NULL_RESOURCE_ID))],
        );
        let ancestors = ctx.ancestor_ids(&self.uri);
        doc_fields.insert(
            fields::FIELD_ANCESTOR_IDS.to_string(),
            ancestors.into_iter().map(FieldValue::Long).collect(),
        );

        let acl_node = self.acl_inherited_from.unwrap_or(self.id);
        let read = ctx.read_principals(acl_node, &self.owner)?;
        doc_fields.insert(
            fields::FIELD_READ_PRINCIPALS.to_string(),
            read.into_iter().map(FieldValue::Str).collect(),
        );

        for ((ns, prop_name), values) in self.props {
            let pn = PropName::new(Namespace(ns), &prop_name);
            let field = fields::property_field(&pn);
            for value in values {
                if let Some(fv) = FieldValue::from_value(&value) {
                    doc_fields.entry(field.clone()).or_default().push(fv);
                } else if let Value::Json(serde_json::Value::Object(map)) = &value {
                    // JSON enters the index as flattened attribute leaves
                    for (attr, leaf) in map {
                        let attr_field = fields::attribute_field(&pn, attr);
                        match leaf {
                            serde_json::Value::Array(items) => {
                                for item in items {
                                    if let Some(fv) = FieldValue::from_json_leaf(item) {
                                        doc_fields.entry(attr_field.clone()).or_default().push(fv);
                                    }
                                }
                            }
                            other => {
                                if let Some(fv) = FieldValue::from_json_leaf(other) {
                                    doc_fields.entry(attr_field.clone()).or_default().push(fv);
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(IndexDoc { id: self.id, uri: self.uri, fields: doc_fields })
    }
}

fn resource_name(uri: &str) -> &str {
    if uri == "/" {
        return "/";
    }
    uri.rsplit('/').next().unwrap_or(uri)
}

fn ancestor_uris(uri: &str) -> Vec<String> {
    if uri == "/" {
        return Vec::new();
    }
    let mut out = vec!["/".to_string()];
    let mut pos = 1;
    while let Some(i) = uri[pos..].find('/') {
        out.push(uri[..pos + i].to_string());
        pos += i + 1;
    }
    out
}
