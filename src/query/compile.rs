//! AST → index query compiler. One exhaustive match maps each node kind to
//! the index query it stands for; anything the index cannot answer is
//! rejected here as a constraint violation rather than surfacing as a
//! runtime surprise.

use std::collections::BTreeSet;

use tracing::error;

use crate::error::{RepoError, RepoResult};
use crate::principal::Principal;
use crate::resource::{PropType, Value, NULL_RESOURCE_ID};
use crate::types::{PropertyTypeDefinition, TypeRegistry};

use super::ast::{PropSelector, Query, SortKey, SortOrder, Sorting, TermOperator};
use super::fields;
use super::ir::{CompiledSearch, FieldValue, IndexQuery, IndexSort, SortKind};
use super::security;
use super::Search;

/// Point lookups against the live index. ACL and subtree predicates resolve
/// a uri to an id once at compile time; a uri that is not indexed resolves
/// to `NULL_RESOURCE_ID`, which no document carries in the looked-up fields.
pub trait IndexLookup {
    /// Id of the document at `uri`, if indexed.
    fn resource_id(&self, uri: &str) -> Option<i64>;

    /// Id of the ACL-owning node governing `uri`: the document itself when
    /// it owns an ACL, otherwise the node it inherits from.
    fn acl_node_of(&self, uri: &str) -> Option<i64>;
}

pub struct CompileCtx<'a> {
    pub registry: &'a TypeRegistry,
    pub lookup: &'a dyn IndexLookup,
}

/// Compile a full search request for the given caller. The returned search
/// always carries the mandatory authorization filter (unless the caller is
/// the system principal) plus whatever flag filters the request opted into.
pub fn compile_search(
    search: &Search,
    principal: Option<&Principal>,
    groups: &BTreeSet<String>,
    ctx: &CompileCtx<'_>,
) -> RepoResult<CompiledSearch> {
    let query = compile(&search.query, ctx)?;

    let mut filters = Vec::new();
    if let Some(f) = security::security_filter(principal, groups) {
        filters.push(f);
    }
    if search.only_published {
        filters.push(security::published_filter().clone());
    }
    if search.exclude_unpublished_collections {
        filters.push(security::unpublished_collection_filter().clone());
    }
    let filter = match filters.len() {
        0 => IndexQuery::MatchAll,
        1 => filters.remove(0),
        _ => IndexQuery::all_of(filters),
    };

    let sorts = match &search.sorting {
        Some(s) => compile_sorting(s, ctx.registry)?,
        None => vec![IndexSort {
            field: fields::FIELD_URI.to_string(),
            order: SortOrder::Asc,
            kind: SortKind::Str,
        }],
    };

    Ok(CompiledSearch { query, filter, sorts, limit: search.limit, offset: search.offset })
}

pub fn compile(query: &Query, ctx: &CompileCtx<'_>) -> RepoResult<IndexQuery> {
    match query {
        Query::MatchAll => Ok(IndexQuery::MatchAll),

        // AND over nothing matches everything, OR over nothing matches
        // nothing; non-trivial lists compile each child independently.
        Query::And(children) => {
            if children.is_empty() {
                return Ok(IndexQuery::MatchAll);
            }
            let compiled =
                children.iter().map(|c| compile(c, ctx)).collect::<RepoResult<Vec<_>>>()?;
            Ok(IndexQuery::all_of(compiled))
        }
        Query::Or(children) => {
            if children.is_empty() {
                return Ok(IndexQuery::MatchNone);
            }
            let compiled =
                children.iter().map(|c| compile(c, ctx)).collect::<RepoResult<Vec<_>>>()?;
            Ok(IndexQuery::any_of(compiled))
        }

        Query::UriTerm { uri, op } => string_term(fields::FIELD_URI, uri, *op),
        Query::UriPrefix { uri, inverted } => {
            // self plus subtree; the subtree half keys on the prefix node's id
            let id = ctx.lookup.resource_id(uri).unwrap_or(NULL_RESOURCE_ID);
            let q = IndexQuery::any_of(vec![
                IndexQuery::term(fields::FIELD_URI, FieldValue::str(uri.as_str())),
                IndexQuery::term(fields::FIELD_ANCESTOR_IDS, FieldValue::Long(id)),
            ]);
            Ok(invert(q, *inverted))
        }
        Query::UriRange { from, to, inclusive } => Ok(IndexQuery::Range {
            field: fields::FIELD_URI.to_string(),
            from: Some(FieldValue::Str(from.clone())),
            to: Some(FieldValue::Str(to.clone())),
            from_inclusive: true,
            to_inclusive: *inclusive,
        }),
        Query::UriDepth { depth, op } => numeric_term(fields::FIELD_URI_DEPTH, *depth, *op),
        Query::UriSet { uris, op } => {
            let terms = IndexQuery::Terms {
                field: fields::FIELD_URI.to_string(),
                values: uris.iter().map(|u| FieldValue::str(u.as_str())).collect(),
            };
            match op {
                TermOperator::In => Ok(terms),
                TermOperator::Ni => Ok(IndexQuery::Not(Box::new(terms))),
                other => Err(unsupported(*other, "uri set")),
            }
        }

        Query::NameTerm { name, op } => string_term(fields::FIELD_NAME, name, *op),
        Query::NamePrefix { prefix, inverted } => Ok(invert(
            IndexQuery::Prefix { field: fields::FIELD_NAME.to_string(), prefix: prefix.clone() },
            *inverted,
        )),
        Query::NameRange { from, to, inclusive } => Ok(IndexQuery::Range {
            field: fields::FIELD_NAME.to_string(),
            from: Some(FieldValue::Str(from.clone())),
            to: Some(FieldValue::Str(to.clone())),
            from_inclusive: true,
            to_inclusive: *inclusive,
        }),
        Query::NameWildcard { pattern, inverted, ignore_case } => {
            let (field, pattern) = if *ignore_case {
                (fields::FIELD_NAME_LC, pattern.to_lowercase())
            } else {
                (fields::FIELD_NAME, pattern.clone())
            };
            Ok(invert(IndexQuery::Wildcard { field: field.to_string(), pattern }, *inverted))
        }

        Query::TypeTerm { type_name, op } => match op {
            TermOperator::Eq | TermOperator::Ne => {
                let term =
                    IndexQuery::term(fields::FIELD_RESOURCE_TYPE, FieldValue::str(type_name.as_str()));
                Ok(invert(term, *op == TermOperator::Ne))
            }
            // hierarchical membership: the type plus all its descendants
            TermOperator::In | TermOperator::Ni => {
                let values = ctx
                    .registry
                    .descendant_names(type_name)
                    .into_iter()
                    .map(FieldValue::Str)
                    .collect();
                let terms =
                    IndexQuery::Terms { field: fields::FIELD_RESOURCE_TYPE.to_string(), values };
                Ok(invert(terms, *op == TermOperator::Ni))
            }
            other => Err(unsupported(*other, "type")),
        },

        Query::PropertyTerm { prop, value, op } => compile_property_term(prop, value, *op, ctx),
        Query::PropertyRange { prop, from, to, from_inclusive, to_inclusive } => {
            compile_property_range(
                prop,
                from.as_ref(),
                to.as_ref(),
                *from_inclusive,
                *to_inclusive,
                ctx,
            )
        }
        Query::PropertyPrefix { prop, prefix, inverted } => {
            let def = declared(ctx.registry, prop)?;
            require_string_shape(def, prop, "prefix")?;
            Ok(invert(
                IndexQuery::Prefix { field: fields::selector_field(prop), prefix: prefix.clone() },
                *inverted,
            ))
        }
        Query::PropertyWildcard { prop, pattern, inverted } => {
            let def = declared(ctx.registry, prop)?;
            require_string_shape(def, prop, "wildcard")?;
            Ok(invert(
                IndexQuery::Wildcard { field: fields::selector_field(prop), pattern: pattern.clone() },
                *inverted,
            ))
        }
        Query::PropertyExists { prop, inverted } => {
            declared(ctx.registry, prop)?;
            Ok(invert(IndexQuery::Exists { field: fields::selector_field(prop) }, *inverted))
        }

        Query::AclExists { inverted } => {
            // ACL-owning documents index the null sentinel in aclInheritedFrom
            let own = IndexQuery::term(
                fields::FIELD_ACL_INHERITED_FROM,
                FieldValue::Long(NULL_RESOURCE_ID),
            );
            Ok(invert(own, *inverted))
        }
        Query::AclInheritedFrom { uri, inverted } => {
            let node = ctx.lookup.acl_node_of(uri).unwrap_or(NULL_RESOURCE_ID);
            Ok(invert(
                IndexQuery::term(fields::FIELD_ACL_INHERITED_FROM, FieldValue::Long(node)),
                *inverted,
            ))
        }
        Query::AclReadForAll { inverted } => {
            // same builder that produces the mandatory filter, for an
            // anonymous caller: matches exactly the read-for-all documents
            Ok(invert(security::authorization_filter(None, &BTreeSet::new()), *inverted))
        }
    }
}

pub fn compile_sorting(sorting: &Sorting, registry: &TypeRegistry) -> RepoResult<Vec<IndexSort>> {
    let mut out = Vec::with_capacity(sorting.fields.len());
    for field in &sorting.fields {
        let (name, kind) = match &field.key {
            SortKey::Uri => (fields::FIELD_URI.to_string(), SortKind::Str),
            SortKey::Name => (fields::FIELD_NAME.to_string(), SortKind::Str),
            SortKey::ResourceType => (fields::FIELD_RESOURCE_TYPE.to_string(), SortKind::Str),
            SortKey::Property(sel) => {
                let def = declared(registry, sel)?;
                if def.multi_value {
                    return Err(RepoError::constraint(
                        "multi_valued_sort_key",
                        format!("property {} is multi-valued and cannot order results", sel.name),
                    ));
                }
                let kind = if sel.attribute.is_some() {
                    // attribute leaves are dynamically typed
                    SortKind::Str
                } else {
                    match def.value_type {
                        PropType::Int | PropType::Long | PropType::Date | PropType::Timestamp => {
                            SortKind::Long
                        }
                        PropType::Binary => {
                            return Err(RepoError::constraint(
                                "binary_sort_key",
                                format!("binary property {} cannot order results", sel.name),
                            ));
                        }
                        _ => SortKind::Str,
                    }
                };
                (fields::selector_field(sel), kind)
            }
        };
        out.push(IndexSort { field: name, order: field.order, kind });
    }
    Ok(out)
}

fn compile_property_term(
    prop: &PropSelector,
    value: &Value,
    op: TermOperator,
    ctx: &CompileCtx<'_>,
) -> RepoResult<IndexQuery> {
    let def = declared(ctx.registry, prop)?;
    match op {
        TermOperator::Eq | TermOperator::Ne => {
            let fv = term_value(def, prop, value)?;
            let term = IndexQuery::Term { field: fields::selector_field(prop), value: fv };
            Ok(invert(term, op == TermOperator::Ne))
        }
        // GE/GT and LE/LT normalize onto the range path; they are not their
        // own compile rules.
        TermOperator::Gt => compile_property_range(prop, Some(value), None, false, false, ctx),
        TermOperator::Ge => compile_property_range(prop, Some(value), None, true, false, ctx),
        TermOperator::Lt => compile_property_range(prop, None, Some(value), false, false, ctx),
        TermOperator::Le => compile_property_range(prop, None, Some(value), false, true, ctx),
        TermOperator::In | TermOperator::Ni => {
            let vocab_name = def.vocabulary.as_deref().ok_or_else(|| {
                RepoError::constraint(
                    "vocabulary_required",
                    format!("property {} has no vocabulary; in/not-in needs one", prop.name),
                )
            })?;
            let Some(vocab) = ctx.registry.vocabulary(vocab_name) else {
                error!(
                    target: "depot::query",
                    vocabulary = vocab_name,
                    property = %prop.name,
                    "declared vocabulary missing from registry"
                );
                return Err(RepoError::consistency(
                    "vocabulary_missing",
                    format!("vocabulary {vocab_name} is not registered"),
                ));
            };
            let term = value.as_str().ok_or_else(|| {
                RepoError::constraint(
                    "property_type_mismatch",
                    format!("in/not-in over {} takes a string term", prop.name),
                )
            })?;
            let values =
                vocab.with_descendants(term).into_iter().map(FieldValue::Str).collect();
            let terms = IndexQuery::Terms { field: fields::selector_field(prop), values };
            Ok(invert(terms, op == TermOperator::Ni))
        }
    }
}

fn compile_property_range(
    prop: &PropSelector,
    from: Option<&Value>,
    to: Option<&Value>,
    from_inclusive: bool,
    to_inclusive: bool,
    ctx: &CompileCtx<'_>,
) -> RepoResult<IndexQuery> {
    let def = declared(ctx.registry, prop)?;
    let from = from.map(|v| term_value(def, prop, v)).transpose()?;
    let to = to.map(|v| term_value(def, prop, v)).transpose()?;
    Ok(IndexQuery::Range {
        field: fields::selector_field(prop),
        from,
        to,
        from_inclusive,
        to_inclusive,
    })
}

/// Resolve the property definition and police the JSON attribute rule: JSON
/// properties must name an attribute, every other type must not.
fn declared<'r>(
    registry: &'r TypeRegistry,
    prop: &PropSelector,
) -> RepoResult<&'r PropertyTypeDefinition> {
    let def = registry.property_definition(&prop.name).ok_or_else(|| {
        RepoError::constraint(
            "undeclared_property",
            format!("property {} is not declared by any resource type", prop.name),
        )
    })?;
    if def.value_type == PropType::Json && prop.attribute.is_none() {
        return Err(RepoError::constraint(
            "attribute_required",
            format!("JSON property {} needs an @attribute specifier", prop.name),
        ));
    }
    if def.value_type != PropType::Json && prop.attribute.is_some() {
        return Err(RepoError::constraint(
            "attribute_forbidden",
            format!("property {} is not JSON typed; @attribute is not allowed", prop.name),
        ));
    }
    Ok(def)
}

fn term_value(
    def: &PropertyTypeDefinition,
    prop: &PropSelector,
    value: &Value,
) -> RepoResult<FieldValue> {
    // attribute leaves are dynamically typed; everything else must match the
    // declaration
    if prop.attribute.is_none() && value.prop_type() != def.value_type {
        return Err(RepoError::constraint(
            "property_type_mismatch",
            format!(
                "property {} is declared {:?}, query value is {:?}",
                prop.name,
                def.value_type,
                value.prop_type()
            ),
        ));
    }
    FieldValue::from_value(value).ok_or_else(|| {
        RepoError::constraint(
            "unqueryable_value",
            format!("{:?} values cannot appear in query terms", value.prop_type()),
        )
    })
}

fn require_string_shape(
    def: &PropertyTypeDefinition,
    prop: &PropSelector,
    what: &str,
) -> RepoResult<()> {
    if prop.attribute.is_none() && def.value_type != PropType::String {
        return Err(RepoError::constraint(
            "string_property_required",
            format!("{what} queries need a string property, {} is {:?}", prop.name, def.value_type),
        ));
    }
    Ok(())
}

fn string_term(field: &str, value: &str, op: TermOperator) -> RepoResult<IndexQuery> {
    let fv = FieldValue::str(value);
    match op {
        TermOperator::Eq => Ok(IndexQuery::term(field, fv)),
        TermOperator::Ne => Ok(IndexQuery::Not(Box::new(IndexQuery::term(field, fv)))),
        TermOperator::Gt => Ok(half_range(field, Some(fv), None, false, false)),
        TermOperator::Ge => Ok(half_range(field, Some(fv), None, true, false)),
        TermOperator::Lt => Ok(half_range(field, None, Some(fv), false, false)),
        TermOperator::Le => Ok(half_range(field, None, Some(fv), false, true)),
        other => Err(unsupported(other, field)),
    }
}

fn numeric_term(field: &str, value: i64, op: TermOperator) -> RepoResult<IndexQuery> {
    let fv = FieldValue::Long(value);
    match op {
        TermOperator::Eq => Ok(IndexQuery::term(field, fv)),
        TermOperator::Ne => Ok(IndexQuery::Not(Box::new(IndexQuery::term(field, fv)))),
        TermOperator::Gt => Ok(half_range(field, Some(fv), None, false, false)),
        TermOperator::Ge => Ok(half_range(field, Some(fv), None, true, false)),
        TermOperator::Lt => Ok(half_range(field, None, Some(fv), false, false)),
        TermOperator::Le => Ok(half_range(field, None, Some(fv), false, true)),
        other => Err(unsupported(other, field)),
    }
}

fn half_range(
    field: &str,
    from: Option<FieldValue>,
    to: Option<FieldValue>,
    from_inclusive: bool,
    to_inclusive: bool,
) -> IndexQuery {
    IndexQuery::Range { field: field.to_string(), from, to, from_inclusive, to_inclusive }
}

fn invert(q: IndexQuery, inverted: bool) -> IndexQuery {
    if inverted {
        IndexQuery::Not(Box::new(q))
    } else {
        q
    }
}

fn unsupported(op: TermOperator, what: &str) -> RepoError {
    RepoError::constraint(
        "unsupported_operator",
        format!("operator {} is not usable with {what} queries", op.as_str()),
    )
}
