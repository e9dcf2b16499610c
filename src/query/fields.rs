//! Index field name mapping. Reserved fields describe the resource itself;
//! property fields are derived from the property identity with a `p_` prefix
//! so they can never collide with reserved names.

use crate::resource::PropName;

use super::ast::PropSelector;

pub const FIELD_ID: &str = "id";
pub const FIELD_URI: &str = "uri";
pub const FIELD_URI_DEPTH: &str = "uriDepth";
pub const FIELD_NAME: &str = "name";
pub const FIELD_NAME_LC: &str = "nameLc";
pub const FIELD_RESOURCE_TYPE: &str = "resourceType";
pub const FIELD_IS_COLLECTION: &str = "isCollection";
/// Ids of every ancestor of the document, nearest last. Subtree queries
/// compile to a term match against this field.
pub const FIELD_ANCESTOR_IDS: &str = "ancestorIds";
/// Id of the ACL-owning node the document inherits from, or
/// `NULL_RESOURCE_ID` when the document owns its ACL.
pub const FIELD_ACL_INHERITED_FROM: &str = "aclInheritedFrom";
/// Names of every principal with at least read-processed visibility,
/// `pseudo:owner` grants resolved to the document owner at index time.
pub const FIELD_READ_PRINCIPALS: &str = "readPrincipals";
pub const FIELD_PUBLISHED: &str = "published";

/// Index field for a property. The default-namespace `published` property is
/// promoted to its reserved field so the cached published filter and property
/// queries agree on one name.
pub fn property_field(name: &PropName) -> String {
    if name.ns.is_default() && name.name == crate::types::PROP_PUBLISHED {
        return FIELD_PUBLISHED.to_string();
    }
    format!("p_{}", name)
}

/// Field for a JSON attribute sub-key: `p_<prop>@<attr>`.
pub fn attribute_field(name: &PropName, attribute: &str) -> String {
    format!("{}@{}", property_field(name), attribute)
}

pub fn selector_field(sel: &PropSelector) -> String {
    match &sel.attribute {
        Some(attr) => attribute_field(&sel.name, attr),
        None => property_field(&sel.name),
    }
}
