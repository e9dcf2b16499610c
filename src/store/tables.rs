//! Row-level representation of the relational store: one arena of resource
//! rows keyed by uri (which is URI order, so ordered scans visit ancestors
//! before descendants), an id side-index, and per-resource property and ACL
//! entry rows. Multi-valued properties are one row per scalar value, in list
//! order. Everything here is plain data; the DAO logic lives in `store::mod`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::acl::{Acl, Privilege};
use crate::path::Uri;
use crate::principal::{Principal, PrincipalKind};
use crate::resource::{PropName, PropValue, Property, PropertySet, Resource, Value};
use crate::store::changelog::ChangelogRow;

/// Id of the repository root resource.
pub const ROOT_ID: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRow {
    pub id: i64,
    pub uri: String,
    pub parent_uri: Option<String>,
    pub is_collection: bool,
    pub resource_type: String,
    pub depth: i32,
    pub owner: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub content_modified_by: String,
    pub content_modified_at: DateTime<Utc>,
    pub properties_modified_by: String,
    pub properties_modified_at: DateTime<Utc>,
    pub modified_by: String,
    pub modified_at: DateTime<Utc>,
    /// None when this row owns an explicit ACL (rows in `acl_entries`).
    pub acl_inherited_from: Option<i64>,
}

impl ResourceRow {
    /// The id of the node whose explicit ACL governs this resource.
    pub fn acl_node_id(&self) -> i64 { self.acl_inherited_from.unwrap_or(self.id) }

    pub fn owns_acl(&self) -> bool { self.acl_inherited_from.is_none() }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PropertyRow {
    pub resource_id: i64,
    pub ns: String,
    pub name: String,
    pub value: Value,
}

impl PropertyRow {
    pub fn is_binary(&self) -> bool { self.value.is_binary() }

    pub fn prop_name(&self) -> PropName {
        PropName::new(crate::resource::Namespace(self.ns.clone()), &self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AclEntryRow {
    pub resource_id: i64,
    pub privilege: Privilege,
    pub principal: String,
    pub is_group: bool,
}

impl AclEntryRow {
    pub fn to_principal(&self) -> Principal {
        if self.principal.starts_with("pseudo:") {
            Principal { name: self.principal.clone(), kind: PrincipalKind::Pseudo }
        } else if self.is_group {
            Principal::group(self.principal.clone())
        } else {
            Principal::user(self.principal.clone())
        }
    }
}

/// One element of the ordered index scan: the resource row joined with one of
/// its property rows, or with no property row at all for property-less
/// resources (outer-join shape). Rows for one resource are contiguous and the
/// scan is URI-ordered.
#[derive(Debug, Clone)]
pub struct IndexScanRow {
    pub resource_id: i64,
    pub uri: String,
    pub parent_uri: Option<String>,
    pub is_collection: bool,
    pub resource_type: String,
    pub depth: i32,
    pub owner: String,
    pub acl_inherited_from: Option<i64>,
    pub prop: Option<PropertyRow>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub next_id: i64,
    /// uri -> row; BTreeMap iteration order is URI order.
    pub resources: BTreeMap<String, ResourceRow>,
    /// id -> uri
    pub id_index: HashMap<i64, String>,
    /// resource id -> property rows (scalar rows, list order preserved)
    pub properties: HashMap<i64, Vec<PropertyRow>>,
    /// resource id -> explicit ACL entry rows; only ACL-owning rows have keys
    pub acl_entries: HashMap<i64, Vec<AclEntryRow>>,
    pub changelog: Vec<ChangelogRow>,
    pub changelog_seq: u64,
}

impl Tables {
    pub fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn row(&self, uri: &str) -> Option<&ResourceRow> { self.resources.get(uri) }

    pub fn row_by_id(&self, id: i64) -> Option<&ResourceRow> {
        self.id_index.get(&id).and_then(|uri| self.resources.get(uri))
    }

    pub fn insert_row(&mut self, row: ResourceRow) {
        self.id_index.insert(row.id, row.uri.clone());
        self.resources.insert(row.uri.clone(), row);
    }

    pub fn remove_row(&mut self, uri: &str) -> Option<ResourceRow> {
        if let Some(row) = self.resources.remove(uri) {
            self.id_index.remove(&row.id);
            self.properties.remove(&row.id);
            self.acl_entries.remove(&row.id);
            Some(row)
        } else {
            None
        }
    }

    /// Uris of the subtree rooted at `base` (inclusive), in URI order. The
    /// descendant keys all carry the `base/` prefix and are contiguous in the
    /// map; the base itself sorts before them.
    pub fn subtree_uris(&self, base: &Uri) -> Vec<String> {
        if base.is_root() {
            return self.resources.keys().cloned().collect();
        }
        let mut out = Vec::new();
        if self.resources.contains_key(base.as_str()) {
            out.push(base.as_str().to_string());
        }
        let prefix = format!("{}/", base.as_str());
        for (uri, _) in self.resources.range(prefix.clone()..) {
            if !uri.starts_with(&prefix) {
                break;
            }
            out.push(uri.clone());
        }
        out
    }

    /// Immediate children of `base`, in URI order.
    pub fn child_uris(&self, base: &Uri) -> Vec<String> {
        let base_depth = base.depth() as i32;
        self.subtree_uris(base)
            .into_iter()
            .filter(|u| u != base.as_str())
            .filter(|u| self.resources.get(u).map(|r| r.depth == base_depth + 1).unwrap_or(false))
            .collect()
    }

    /// Replace all property rows for a resource.
    pub fn set_property_rows(&mut self, id: i64, rows: Vec<PropertyRow>) {
        if rows.is_empty() {
            self.properties.remove(&id);
        } else {
            self.properties.insert(id, rows);
        }
    }

    /// Reassemble the logical property set for a resource: rows sharing
    /// `(ns, name)` collapse into one multi-valued property, in row order.
    pub fn assemble_props(&self, id: i64) -> PropertySet {
        let mut grouped: BTreeMap<PropName, Vec<Value>> = BTreeMap::new();
        if let Some(rows) = self.properties.get(&id) {
            for row in rows {
                grouped.entry(row.prop_name()).or_default().push(row.value.clone());
            }
        }
        grouped
            .into_iter()
            .map(|(name, mut values)| {
                let value = if values.len() == 1 {
                    PropValue::Single(values.remove(0))
                } else {
                    PropValue::Multi(values)
                };
                Property::new(name, value)
            })
            .collect()
    }

    /// Flatten a property set into rows, one per scalar value.
    pub fn explode_props(id: i64, props: &PropertySet) -> Vec<PropertyRow> {
        let mut rows = Vec::new();
        for prop in props.iter() {
            for value in prop.value.values() {
                rows.push(PropertyRow {
                    resource_id: id,
                    ns: prop.name.ns.prefix().to_string(),
                    name: prop.name.name.clone(),
                    value: value.clone(),
                });
            }
        }
        rows
    }

    pub fn assemble_resource(&self, row: &ResourceRow) -> Resource {
        Resource {
            id: row.id,
            uri: Uri::parse(&row.uri).expect("row uri validated on insert"),
            is_collection: row.is_collection,
            resource_type: row.resource_type.clone(),
            owner: row.owner.clone(),
            created_by: row.created_by.clone(),
            created_at: row.created_at,
            content_modified_by: row.content_modified_by.clone(),
            content_modified_at: row.content_modified_at,
            properties_modified_by: row.properties_modified_by.clone(),
            properties_modified_at: row.properties_modified_at,
            modified_by: row.modified_by.clone(),
            modified_at: row.modified_at,
            acl_inherited_from: row.acl_inherited_from,
            props: self.assemble_props(row.id),
        }
    }

    /// Materialize the explicit ACL stored at `id`, if any.
    pub fn assemble_acl(&self, id: i64) -> Option<Acl> {
        let rows = self.acl_entries.get(&id)?;
        let mut acl = Acl::new();
        for row in rows {
            acl.add(row.privilege, row.to_principal());
        }
        Some(acl)
    }

    pub fn set_acl_rows(&mut self, id: i64, acl: &Acl) {
        let rows: Vec<AclEntryRow> = acl
            .iter()
            .map(|(privilege, p)| AclEntryRow {
                resource_id: id,
                privilege,
                principal: p.name.clone(),
                is_group: p.is_group(),
            })
            .collect();
        self.acl_entries.insert(id, rows);
    }

    /// Ordered outer-join scan feeding the index synchronizer. Property-less
    /// resources still yield exactly one row (prop = None).
    pub fn index_scan(&self, scope: Option<&Uri>) -> Vec<IndexScanRow> {
        let mut out = Vec::new();
        for (uri, row) in self.resources.iter() {
            if let Some(base) = scope {
                let inside = base.is_root()
                    || uri == base.as_str()
                    || (uri.starts_with(base.as_str()) && uri.as_bytes().get(base.as_str().len()) == Some(&b'/'));
                if !inside {
                    continue;
                }
            }
            self.push_scan_rows(row, &mut out);
        }
        out
    }

    /// Scan rows for exactly one uri; empty when the uri is gone. Incremental
    /// sync reindexes per changed row, so it never wants the whole subtree.
    pub fn index_scan_one(&self, uri: &str) -> Vec<IndexScanRow> {
        let mut out = Vec::new();
        if let Some(row) = self.resources.get(uri) {
            self.push_scan_rows(row, &mut out);
        }
        out
    }

    fn push_scan_rows(&self, row: &ResourceRow, out: &mut Vec<IndexScanRow>) {
        let core = IndexScanRow {
            resource_id: row.id,
            uri: row.uri.clone(),
            parent_uri: row.parent_uri.clone(),
            is_collection: row.is_collection,
            resource_type: row.resource_type.clone(),
            depth: row.depth,
            owner: row.owner.clone(),
            acl_inherited_from: row.acl_inherited_from,
            prop: None,
        };
        match self.properties.get(&row.id) {
            Some(rows) if !rows.is_empty() => {
                for p in rows {
                    out.push(IndexScanRow { prop: Some(p.clone()), ..core.clone() });
                }
            }
            _ => out.push(core),
        }
    }
}
