//! Resource store: hierarchical DAO over the row tables. Compound mutations
//! (copy, move, delete, ACL transitions) run under one write guard, so a
//! reader never observes a half-applied operation. ACL inheritance is stored
//! as a pointer to the nearest ancestor that owns an explicit ACL; every
//! mutation here keeps that pointer graph consistent.

pub mod changelog;
pub mod snapshot;
mod tables;

pub use changelog::{ChangeOp, ChangelogRow, INDEX_LOGGER_ID, INDEX_LOGGER_TYPE};
pub use tables::{AclEntryRow, IndexScanRow, PropertyRow, ResourceRow, ROOT_ID};

use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error};

use crate::acl::Acl;
use crate::error::{RepoError, RepoResult};
use crate::path::Uri;
use crate::principal::SYSTEM;
use crate::resource::Resource;
use crate::store::changelog::{StagingBuffer, STAGING_BATCH_SIZE};
use crate::store::tables::Tables;
use crate::types::TYPE_COLLECTION;

/// Requested ACL state for [`ResourceStore::store_acl`].
#[derive(Debug, Clone)]
pub enum AclUpdate {
    /// Store an explicit ACL on the resource (an inheritance break).
    SetExplicit(Acl),
    /// Drop the explicit ACL and inherit from the nearest ancestor again.
    Inherit,
}

/// Shared handle to the store; clones see the same tables.
#[derive(Clone)]
pub struct ResourceStore {
    tables: Arc<RwLock<Tables>>,
}

impl ResourceStore {
    /// Fresh store holding only the root collection with its default ACL.
    pub fn new() -> Self {
        let now = Utc::now();
        let mut t = Tables { next_id: ROOT_ID, ..Tables::default() };
        let id = t.allocate_id();
        t.insert_row(ResourceRow {
            id,
            uri: crate::path::ROOT.to_string(),
            parent_uri: None,
            is_collection: true,
            resource_type: TYPE_COLLECTION.to_string(),
            depth: 0,
            owner: SYSTEM.to_string(),
            created_by: SYSTEM.to_string(),
            created_at: now,
            content_modified_by: SYSTEM.to_string(),
            content_modified_at: now,
            properties_modified_by: SYSTEM.to_string(),
            properties_modified_at: now,
            modified_by: SYSTEM.to_string(),
            modified_at: now,
            acl_inherited_from: None,
        });
        t.set_acl_rows(id, &Acl::default_root());
        ResourceStore { tables: Arc::new(RwLock::new(t)) }
    }

    pub(crate) fn from_tables(t: Tables) -> Self {
        ResourceStore { tables: Arc::new(RwLock::new(t)) }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> { self.tables.read() }
    fn write(&self) -> RwLockWriteGuard<'_, Tables> { self.tables.write() }

    pub fn exists(&self, uri: &Uri) -> bool { self.read().row(uri.as_str()).is_some() }

    pub fn resource_count(&self) -> usize { self.read().resources.len() }

    pub fn resource_id(&self, uri: &Uri) -> Option<i64> {
        self.read().row(uri.as_str()).map(|r| r.id)
    }

    pub fn uri_of(&self, id: i64) -> Option<String> { self.read().id_index.get(&id).cloned() }

    pub fn owner_of(&self, uri: &Uri) -> RepoResult<String> {
        let t = self.read();
        Ok(require_row(&t, uri)?.owner.clone())
    }

    pub fn load(&self, uri: &Uri) -> RepoResult<Resource> {
        let t = self.read();
        let row = require_row(&t, uri)?;
        Ok(t.assemble_resource(row))
    }

    pub fn load_by_id(&self, id: i64) -> RepoResult<Resource> {
        let t = self.read();
        let row = t
            .row_by_id(id)
            .ok_or_else(|| RepoError::not_found("resource_not_found", format!("no resource with id {id}")))?;
        Ok(t.assemble_resource(row))
    }

    /// Immediate children of a collection, in URI order.
    pub fn children(&self, uri: &Uri) -> RepoResult<Vec<Resource>> {
        let t = self.read();
        let row = require_row(&t, uri)?;
        if !row.is_collection {
            return Err(RepoError::constraint("not_a_collection", format!("{uri} is not a collection")));
        }
        Ok(t.child_uris(uri)
            .iter()
            .filter_map(|u| t.row(u))
            .map(|r| t.assemble_resource(r))
            .collect())
    }

    /// Persist a newly evaluated resource. The store assigns the id and the
    /// inheritance pointer (new resources always start inherited, pointing at
    /// the parent's ACL node); everything else comes in evaluated.
    pub fn create(&self, resource: &Resource) -> RepoResult<Resource> {
        let mut t = self.write();
        let uri = &resource.uri;
        let parent = uri
            .parent()
            .ok_or_else(|| RepoError::constraint("root_exists", "the root collection always exists"))?;
        let acl_source = {
            let parent_row = t
                .row(parent.as_str())
                .ok_or_else(|| RepoError::not_found("parent_not_found", format!("parent of {uri} does not exist")))?;
            if !parent_row.is_collection {
                return Err(RepoError::constraint("parent_not_collection", format!("{parent} is not a collection")));
            }
            parent_row.acl_node_id()
        };
        if t.row(uri.as_str()).is_some() {
            return Err(RepoError::constraint("resource_exists", format!("{uri} already exists")));
        }
        let id = t.allocate_id();
        let mut stored = resource.clone();
        stored.id = id;
        stored.acl_inherited_from = Some(acl_source);
        t.insert_row(row_from(&stored));
        t.set_property_rows(id, Tables::explode_props(id, &stored.props));
        record_one(&mut t, ChangeOp::Created, id, uri.as_str(), stored.is_collection, false);
        debug!(target: "depot::store", uri = %uri, id, "created resource");
        Ok(stored)
    }

    /// Write back a loaded resource: type, owner, the modification fields and
    /// the property rows. Uri, id, collection flag and the inheritance
    /// pointer are not touched here.
    pub fn store(&self, resource: &Resource) -> RepoResult<Resource> {
        let mut t = self.write();
        let uri = resource.uri.as_str();
        let (id, pointer, is_collection) = {
            let row = t
                .resources
                .get_mut(uri)
                .ok_or_else(|| RepoError::resource_not_found(&resource.uri))?;
            row.resource_type = resource.resource_type.clone();
            row.owner = resource.owner.clone();
            row.created_by = resource.created_by.clone();
            row.created_at = resource.created_at;
            row.content_modified_by = resource.content_modified_by.clone();
            row.content_modified_at = resource.content_modified_at;
            row.properties_modified_by = resource.properties_modified_by.clone();
            row.properties_modified_at = resource.properties_modified_at;
            row.modified_by = resource.modified_by.clone();
            row.modified_at = resource.modified_at;
            (row.id, row.acl_inherited_from, row.is_collection)
        };
        t.set_property_rows(id, Tables::explode_props(id, &resource.props));
        record_one(&mut t, ChangeOp::Modified, id, uri, is_collection, false);
        let mut stored = resource.clone();
        stored.id = id;
        stored.acl_inherited_from = pointer;
        stored.is_collection = is_collection;
        Ok(stored)
    }

    /// Delete a subtree. Descendant change-log rows are staged in batches.
    pub fn delete(&self, uri: &Uri) -> RepoResult<()> {
        let mut t = self.write();
        if uri.is_root() {
            return Err(RepoError::constraint("root_undeletable", "the root collection cannot be deleted"));
        }
        let head = require_row(&t, uri)?.clone();
        let subtree = t.subtree_uris(uri);
        let descendants = collect_lite(&t, &subtree, uri.as_str());
        for u in &subtree {
            t.remove_row(u);
        }
        record_one(&mut t, ChangeOp::Deleted, head.id, uri.as_str(), head.is_collection, true);
        record_staged(&mut t, ChangeOp::Deleted, descendants);
        debug!(target: "depot::store", uri = %uri, removed = subtree.len(), "deleted subtree");
        Ok(())
    }

    /// Apply an ACL transition and keep descendant inheritance pointers
    /// consistent.
    ///
    /// * inherited -> explicit: store the entries, clear the pointer, and
    ///   repoint descendants that inherited from the old source to this node.
    /// * explicit -> explicit: replace the entries; pointers are unaffected.
    /// * explicit -> inherited: drop the entries, resolve the nearest
    ///   ACL-owning ancestor (most specific first), point this node at it and
    ///   repoint descendants that inherited from this node to that ancestor.
    /// * inherited -> inherited: nothing to do.
    pub fn store_acl(&self, uri: &Uri, update: AclUpdate) -> RepoResult<Resource> {
        let mut t = self.write();
        let head = require_row(&t, uri)?.clone();
        match update {
            AclUpdate::SetExplicit(acl) => {
                if let Some(prev) = head.acl_inherited_from {
                    t.set_acl_rows(head.id, &acl);
                    if let Some(r) = t.resources.get_mut(uri.as_str()) {
                        r.acl_inherited_from = None;
                    }
                    repoint_descendants(&mut t, uri, prev, head.id);
                    debug!(target: "depot::store", uri = %uri, prev_source = prev, "acl break");
                } else {
                    t.set_acl_rows(head.id, &acl);
                }
            }
            AclUpdate::Inherit => {
                if uri.is_root() {
                    return Err(RepoError::constraint("root_acl_required", "the root collection must hold an explicit acl"));
                }
                if head.acl_inherited_from.is_none() {
                    let source = nearest_acl_ancestor(&t, uri)?;
                    t.acl_entries.remove(&head.id);
                    if let Some(r) = t.resources.get_mut(uri.as_str()) {
                        r.acl_inherited_from = Some(source);
                    }
                    repoint_descendants(&mut t, uri, head.id, source);
                    debug!(target: "depot::store", uri = %uri, source, "acl break cleared");
                }
            }
        }
        let subtree = t.subtree_uris(uri);
        let descendants = collect_lite(&t, &subtree, uri.as_str());
        record_one(&mut t, ChangeOp::AclModified, head.id, uri.as_str(), head.is_collection, true);
        record_staged(&mut t, ChangeOp::AclModified, descendants);
        let row = require_row(&t, uri)?.clone();
        Ok(t.assemble_resource(&row))
    }

    /// Copy a subtree. Ids are re-assigned; `preserve_acl` keeps explicit
    /// ACLs and remaps in-subtree inheritance pointers through the old->new
    /// id join, while pointers that led above the source land on the nearest
    /// ACL node at the destination. Without it the whole copy inherits from
    /// the destination.
    pub fn copy(&self, src: &Uri, dest: &Uri, by: &str, now: DateTime<Utc>, preserve_acl: bool) -> RepoResult<Resource> {
        let mut t = self.write();
        let dest_target = resolve_destination(&t, src, dest)?;
        let src_uris = t.subtree_uris(src);
        let mut source_rows: Vec<ResourceRow> = Vec::with_capacity(src_uris.len());
        for u in &src_uris {
            if let Some(r) = t.row(u) {
                source_rows.push(r.clone());
            }
        }
        let mut id_map: HashMap<i64, i64> = HashMap::new();
        for r in &source_rows {
            id_map.insert(r.id, t.allocate_id());
        }
        for r in &source_rows {
            let new_id = id_map[&r.id];
            let new_uri = rebase_str(&r.uri, src.as_str(), dest.as_str());
            if preserve_acl && r.owns_acl() {
                if let Some(entries) = t.acl_entries.get(&r.id).cloned() {
                    let rows: Vec<AclEntryRow> = entries
                        .into_iter()
                        .map(|mut e| {
                            e.resource_id = new_id;
                            e
                        })
                        .collect();
                    t.acl_entries.insert(new_id, rows);
                }
            }
            if let Some(props) = t.properties.get(&r.id).cloned() {
                let rows: Vec<PropertyRow> = props
                    .into_iter()
                    .map(|mut p| {
                        p.resource_id = new_id;
                        p
                    })
                    .collect();
                t.set_property_rows(new_id, rows);
            }
            t.insert_row(ResourceRow {
                id: new_id,
                parent_uri: parent_of(&new_uri),
                depth: depth_of(&new_uri),
                uri: new_uri,
                is_collection: r.is_collection,
                resource_type: r.resource_type.clone(),
                owner: by.to_string(),
                created_by: by.to_string(),
                created_at: now,
                content_modified_by: by.to_string(),
                content_modified_at: now,
                properties_modified_by: by.to_string(),
                properties_modified_at: now,
                modified_by: by.to_string(),
                modified_at: now,
                acl_inherited_from: copied_pointer(r, &id_map, dest_target, preserve_acl),
            });
        }
        let head_id = id_map[&source_rows[0].id];
        record_one(&mut t, ChangeOp::Created, head_id, dest.as_str(), source_rows[0].is_collection, true);
        let subtree = t.subtree_uris(dest);
        let descendants = collect_lite(&t, &subtree, dest.as_str());
        record_staged(&mut t, ChangeOp::Created, descendants);
        debug!(target: "depot::store", src = %src, dest = %dest, copied = source_rows.len(), preserve_acl, "copied subtree");
        let row = require_row(&t, dest)?.clone();
        Ok(t.assemble_resource(&row))
    }

    /// Move a subtree. Ids are stable; uris and depths are rewritten.
    /// Inheritance pointers into the moved subtree stay as they are, pointers
    /// that led above the source are repointed to the nearest ACL node at the
    /// destination. When that node's ACL differs in value from the old
    /// source, the old effective ACL is first materialized as an explicit ACL
    /// on the moved head, so every moved resource resolves to the same ACL it
    /// had before.
    pub fn move_resource(&self, src: &Uri, dest: &Uri) -> RepoResult<Resource> {
        let mut t = self.write();
        if src.is_root() {
            return Err(RepoError::constraint("root_immovable", "the root collection cannot be moved"));
        }
        let dest_target = resolve_destination(&t, src, dest)?;
        let head = require_row(&t, src)?.clone();
        let materialize: Option<Acl> = match head.acl_inherited_from {
            Some(old_source) if old_source != dest_target => {
                let old_acl = acl_of_node(&t, old_source)?;
                let new_acl = acl_of_node(&t, dest_target)?;
                if old_acl != new_acl { Some(old_acl) } else { None }
            }
            _ => None,
        };
        let moved_uris = t.subtree_uris(src);
        let moved_ids: HashSet<i64> = moved_uris.iter().filter_map(|u| t.row(u)).map(|r| r.id).collect();
        let mut moved_rows = Vec::with_capacity(moved_uris.len());
        for u in &moved_uris {
            if let Some(mut row) = t.resources.remove(u) {
                t.id_index.remove(&row.id);
                let new_uri = rebase_str(&row.uri, src.as_str(), dest.as_str());
                row.parent_uri = parent_of(&new_uri);
                row.depth = depth_of(&new_uri);
                row.uri = new_uri;
                if let Some(p) = row.acl_inherited_from {
                    if !moved_ids.contains(&p) {
                        row.acl_inherited_from = Some(dest_target);
                    }
                }
                moved_rows.push(row);
            }
        }
        for row in moved_rows {
            t.insert_row(row);
        }
        if let Some(acl) = materialize {
            t.set_acl_rows(head.id, &acl);
            if let Some(r) = t.resources.get_mut(dest.as_str()) {
                r.acl_inherited_from = None;
            }
            repoint_descendants(&mut t, dest, dest_target, head.id);
            debug!(target: "depot::store", uri = %dest, "materialized inherited acl on move");
        }
        record_one(&mut t, ChangeOp::Deleted, head.id, src.as_str(), head.is_collection, true);
        record_one(&mut t, ChangeOp::Moved, head.id, dest.as_str(), head.is_collection, true);
        let subtree = t.subtree_uris(dest);
        let descendants = collect_lite(&t, &subtree, dest.as_str());
        record_staged(&mut t, ChangeOp::Moved, descendants);
        debug!(target: "depot::store", src = %src, dest = %dest, moved = moved_ids.len(), "moved subtree");
        let row = require_row(&t, dest)?.clone();
        Ok(t.assemble_resource(&row))
    }

    /// The ACL that actually governs a resource, inherited or not.
    pub fn effective_acl(&self, uri: &Uri) -> RepoResult<Acl> {
        let t = self.read();
        let row = require_row(&t, uri)?;
        acl_of_node(&t, row.acl_node_id())
    }

    /// Explicit ACL stored at the given node id. Consistency error when the
    /// node holds no entries.
    pub fn acl_for_node(&self, id: i64) -> RepoResult<Acl> {
        let t = self.read();
        acl_of_node(&t, id)
    }

    /// `(id, uri, is_collection)` triples of the subtree rooted at `uri`, in
    /// URI order. Empty when the base does not exist.
    pub fn subtree_index(&self, uri: &Uri) -> Vec<(i64, String, bool)> {
        let t = self.read();
        t.subtree_uris(uri)
            .iter()
            .filter_map(|u| t.row(u))
            .map(|r| (r.id, r.uri.clone(), r.is_collection))
            .collect()
    }

    /// Ordered outer-join scan for the index synchronizer.
    pub fn index_scan(&self, scope: Option<&Uri>) -> Vec<IndexScanRow> {
        self.read().index_scan(scope)
    }

    /// Scan rows for a single uri; empty when nothing lives there.
    pub fn index_scan_one(&self, uri: &str) -> Vec<IndexScanRow> {
        self.read().index_scan_one(uri)
    }

    /// Drain up to `limit` change-log rows for one consumer, oldest first.
    /// Drained rows are removed.
    pub fn consume_changes(&self, logger_type: i32, logger_id: i32, limit: usize) -> Vec<ChangelogRow> {
        let mut t = self.write();
        let rows = std::mem::take(&mut t.changelog);
        let mut taken = Vec::new();
        let mut rest = Vec::new();
        for row in rows {
            if row.logger_type == logger_type && row.logger_id == logger_id && taken.len() < limit {
                taken.push(row);
            } else {
                rest.push(row);
            }
        }
        t.changelog = rest;
        taken
    }

    pub fn pending_changes(&self) -> usize { self.read().changelog.len() }
}

impl Default for ResourceStore {
    fn default() -> Self { Self::new() }
}

fn require_row<'t>(t: &'t Tables, uri: &Uri) -> RepoResult<&'t ResourceRow> {
    t.row(uri.as_str()).ok_or_else(|| RepoError::resource_not_found(uri))
}

fn acl_of_node(t: &Tables, node: i64) -> RepoResult<Acl> {
    match t.assemble_acl(node) {
        Some(acl) => Ok(acl),
        None => {
            error!(target: "depot::store", node, "acl entries missing for acl-owning node");
            Err(RepoError::consistency("acl_rows_missing", format!("node {node} holds no acl entries")))
        }
    }
}

/// Nearest ancestor owning an explicit ACL, walking most specific first.
/// The chain must terminate at the root, which always owns one.
fn nearest_acl_ancestor(t: &Tables, uri: &Uri) -> RepoResult<i64> {
    for ancestor in uri.ancestors() {
        match t.row(ancestor.as_str()) {
            Some(row) if row.owns_acl() => return Ok(row.id),
            Some(_) => continue,
            None => {
                error!(target: "depot::store", uri = %uri, ancestor = %ancestor, "ancestor row missing while resolving acl source");
                return Err(RepoError::consistency("missing_ancestor", format!("ancestor {ancestor} of {uri} is not stored")));
            }
        }
    }
    error!(target: "depot::store", uri = %uri, "inheritance chain reached past the root");
    Err(RepoError::consistency("acl_chain_broken", format!("no ancestor of {uri} holds an explicit acl")))
}

/// Rewrite descendants of `base` (excluding `base` itself) whose inheritance
/// pointer names `from` so they point at `to`. Pointers only ever name
/// ancestors, so rows outside the subtree cannot be affected.
fn repoint_descendants(t: &mut Tables, base: &Uri, from: i64, to: i64) {
    let uris = t.subtree_uris(base);
    for u in uris {
        if u == base.as_str() {
            continue;
        }
        if let Some(row) = t.resources.get_mut(&u) {
            if row.acl_inherited_from == Some(from) {
                row.acl_inherited_from = Some(to);
            }
        }
    }
}

/// Shared target checks for copy and move; returns the ACL node governing the
/// destination parent.
fn resolve_destination(t: &Tables, src: &Uri, dest: &Uri) -> RepoResult<i64> {
    if t.row(src.as_str()).is_none() {
        return Err(RepoError::resource_not_found(src));
    }
    if t.row(dest.as_str()).is_some() {
        return Err(RepoError::constraint("destination_exists", format!("{dest} already exists")));
    }
    if src == dest || src.is_ancestor_of(dest) {
        return Err(RepoError::constraint("destination_inside_source", format!("{dest} is inside {src}")));
    }
    let parent = dest
        .parent()
        .ok_or_else(|| RepoError::constraint("destination_is_root", "the root collection cannot be a destination"))?;
    let parent_row = t
        .row(parent.as_str())
        .ok_or_else(|| RepoError::not_found("parent_not_found", format!("parent of {dest} does not exist")))?;
    if !parent_row.is_collection {
        return Err(RepoError::constraint("parent_not_collection", format!("{parent} is not a collection")));
    }
    Ok(parent_row.acl_node_id())
}

fn copied_pointer(r: &ResourceRow, id_map: &HashMap<i64, i64>, dest_target: i64, preserve: bool) -> Option<i64> {
    if !preserve {
        return Some(dest_target);
    }
    match r.acl_inherited_from {
        None => None,
        Some(p) => Some(id_map.get(&p).copied().unwrap_or(dest_target)),
    }
}

fn row_from(resource: &Resource) -> ResourceRow {
    ResourceRow {
        id: resource.id,
        uri: resource.uri.as_str().to_string(),
        parent_uri: resource.uri.parent().map(|p| p.as_str().to_string()),
        is_collection: resource.is_collection,
        resource_type: resource.resource_type.clone(),
        depth: resource.uri.depth() as i32,
        owner: resource.owner.clone(),
        created_by: resource.created_by.clone(),
        created_at: resource.created_at,
        content_modified_by: resource.content_modified_by.clone(),
        content_modified_at: resource.content_modified_at,
        properties_modified_by: resource.properties_modified_by.clone(),
        properties_modified_at: resource.properties_modified_at,
        modified_by: resource.modified_by.clone(),
        modified_at: resource.modified_at,
        acl_inherited_from: resource.acl_inherited_from,
    }
}

fn rebase_str(uri: &str, from: &str, to: &str) -> String {
    if uri == from {
        to.to_string()
    } else {
        format!("{to}{}", &uri[from.len()..])
    }
}

fn parent_of(uri: &str) -> Option<String> {
    if uri == crate::path::ROOT {
        return None;
    }
    match uri.rfind('/') {
        Some(0) => Some(crate::path::ROOT.to_string()),
        Some(i) => Some(uri[..i].to_string()),
        None => None,
    }
}

fn depth_of(uri: &str) -> i32 {
    if uri == crate::path::ROOT {
        0
    } else {
        uri.matches('/').count() as i32
    }
}

fn collect_lite(t: &Tables, subtree: &[String], skip: &str) -> Vec<(i64, String, bool)> {
    subtree
        .iter()
        .filter(|u| u.as_str() != skip)
        .filter_map(|u| t.row(u))
        .map(|r| (r.id, r.uri.clone(), r.is_collection))
        .collect()
}

fn record_one(t: &mut Tables, op: ChangeOp, id: i64, uri: &str, is_collection: bool, recursive: bool) {
    let seq = t.changelog_seq;
    t.changelog_seq += 1;
    t.changelog.push(ChangelogRow {
        seq,
        logger_type: INDEX_LOGGER_TYPE,
        logger_id: INDEX_LOGGER_ID,
        op,
        resource_id: id,
        uri: uri.to_string(),
        is_collection,
        recursive,
        timestamp: Utc::now(),
    });
}

fn record_staged(t: &mut Tables, op: ChangeOp, items: Vec<(i64, String, bool)>) {
    if items.is_empty() {
        return;
    }
    let mut staged: Vec<Vec<(i64, String, bool)>> = Vec::new();
    {
        let mut buf = StagingBuffer::new(STAGING_BATCH_SIZE, |session, batch: Vec<(i64, String, bool)>| {
            debug!(target: "depot::store", session = %session, rows = batch.len(), "staged changelog batch");
            staged.push(batch);
        });
        for item in items {
            buf.push(item);
        }
        buf.finish();
    }
    for batch in staged {
        for (id, uri, is_collection) in batch {
            record_one(t, op, id, &uri, is_collection, false);
        }
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
