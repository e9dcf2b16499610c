//! Resource type model: a single-parent tree of primary types with
//! assertion-gated resolution, attachable mixins, hierarchical vocabularies
//! and the per-property definitions the lifecycle flows evaluate against.

pub mod assertion;
pub mod evaluate;
pub mod evaluators;
pub mod model;

pub use assertion::{Assertion, AssertionCtx};
pub use evaluate::{Evaluated, PropertyEvaluator};
pub use evaluators::{guess_content_type, EvalContext, EvaluatorKind, LifecycleEvent};

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{RepoError, RepoResult};
use crate::resource::{PropName, PropType, Value};

pub const TYPE_RESOURCE: &str = "resource";
pub const TYPE_COLLECTION: &str = "collection";
pub const TYPE_FILE: &str = "file";
pub const TYPE_TEXT: &str = "text";
pub const TYPE_JSON_DOCUMENT: &str = "json-document";
pub const MIXIN_TITLED: &str = "titled";

pub const PROP_PUBLISHED: &str = "published";
pub const PROP_CATEGORY: &str = "category";
pub const PROP_TITLE: &str = "title";
pub const PROP_CREATION_TIME: &str = "creationTime";
pub const PROP_CREATED_BY: &str = "createdBy";
pub const PROP_OWNER: &str = "owner";
pub const PROP_LAST_MODIFIED: &str = "lastModified";
pub const PROP_MODIFIED_BY: &str = "modifiedBy";
pub const PROP_CONTENT_LAST_MODIFIED: &str = "contentLastModified";
pub const PROP_CONTENT_MODIFIED_BY: &str = "contentModifiedBy";
pub const PROP_PROPERTIES_LAST_MODIFIED: &str = "propertiesLastModified";
pub const PROP_PROPERTIES_MODIFIED_BY: &str = "propertiesModifiedBy";
pub const PROP_CONTENT_LENGTH: &str = "contentLength";
pub const PROP_CONTENT_TYPE: &str = "contentType";
pub const PROP_CHARACTER_ENCODING: &str = "characterEncoding";
pub const PROP_ETAG: &str = "etag";
pub const PROP_ATTRIBUTES: &str = "attributes";

/// Who may write a property. Evaluated properties are uneditable; the
/// lifecycle flows are their only writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionLevel {
    Editable,
    AdminOnly,
    Uneditable,
}

#[derive(Debug, Clone)]
pub struct PropertyTypeDefinition {
    pub name: PropName,
    pub value_type: PropType,
    pub multi_value: bool,
    pub mandatory: bool,
    pub protection: ProtectionLevel,
    pub default: Option<Value>,
    pub evaluator: Option<EvaluatorKind>,
    pub vocabulary: Option<String>,
}

impl PropertyTypeDefinition {
    pub fn new(name: PropName, value_type: PropType) -> Self {
        PropertyTypeDefinition {
            name,
            value_type,
            multi_value: false,
            mandatory: false,
            protection: ProtectionLevel::Editable,
            default: None,
            evaluator: None,
            vocabulary: None,
        }
    }

    pub fn multi(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn uneditable(mut self) -> Self {
        self.protection = ProtectionLevel::Uneditable;
        self
    }

    pub fn admin_only(mut self) -> Self {
        self.protection = ProtectionLevel::AdminOnly;
        self
    }

    pub fn with_default(mut self, v: Value) -> Self {
        self.default = Some(v);
        self
    }

    pub fn with_evaluator(mut self, e: EvaluatorKind) -> Self {
        self.evaluator = Some(e);
        self
    }

    pub fn with_vocabulary(mut self, name: &str) -> Self {
        self.vocabulary = Some(name.to_string());
        self
    }
}

/// Hierarchical controlled value set for string properties. Queries with the
/// IN operator expand a term to itself plus all its descendants.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    name: String,
    children: BTreeMap<String, Vec<String>>,
    terms: BTreeSet<String>,
}

impl Vocabulary {
    pub fn new(name: &str) -> Self {
        Vocabulary { name: name.to_string(), ..Default::default() }
    }

    /// Add a term, optionally below a parent term.
    pub fn term(mut self, parent: Option<&str>, term: &str) -> Self {
        self.terms.insert(term.to_string());
        if let Some(p) = parent {
            self.terms.insert(p.to_string());
            self.children.entry(p.to_string()).or_default().push(term.to_string());
        }
        self
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn contains(&self, term: &str) -> bool { self.terms.contains(term) }

    /// The term plus every transitive descendant, preorder.
    pub fn with_descendants(&self, term: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![term.to_string()];
        let mut seen = HashSet::new();
        while let Some(t) = stack.pop() {
            if !seen.insert(t.clone()) {
                continue;
            }
            out.push(t.clone());
            if let Some(kids) = self.children.get(&t) {
                for k in kids.iter().rev() {
                    stack.push(k.clone());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct PrimaryTypeDef {
    pub name: String,
    pub parent: Option<String>,
    pub assertions: Vec<Assertion>,
    pub mixins: Vec<String>,
    pub properties: Vec<PropertyTypeDefinition>,
}

impl PrimaryTypeDef {
    pub fn new(name: &str, parent: Option<&str>) -> Self {
        PrimaryTypeDef {
            name: name.to_string(),
            parent: parent.map(|p| p.to_string()),
            assertions: Vec::new(),
            mixins: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn assertion(mut self, a: Assertion) -> Self {
        self.assertions.push(a);
        self
    }

    pub fn mixin(mut self, name: &str) -> Self {
        self.mixins.push(name.to_string());
        self
    }

    pub fn property(mut self, def: PropertyTypeDefinition) -> Self {
        self.properties.push(def);
        self
    }
}

#[derive(Debug, Clone)]
pub struct MixinTypeDef {
    pub name: String,
    pub properties: Vec<PropertyTypeDefinition>,
}

impl MixinTypeDef {
    pub fn new(name: &str) -> Self {
        MixinTypeDef { name: name.to_string(), properties: Vec::new() }
    }

    pub fn property(mut self, def: PropertyTypeDefinition) -> Self {
        self.properties.push(def);
        self
    }
}

/// Immutable, validated type model. Built once (see [`model::builtin`]) and
/// shared by reference.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    root: String,
    primaries: BTreeMap<String, PrimaryTypeDef>,
    mixins: BTreeMap<String, MixinTypeDef>,
    vocabularies: BTreeMap<String, Vocabulary>,
    /// parent type name -> child type names, in registration order; the
    /// resolution descent tries children in this order.
    children: BTreeMap<String, Vec<String>>,
}

pub struct TypeRegistryBuilder {
    registry: TypeRegistry,
}

impl TypeRegistryBuilder {
    /// Start from the root primary type; its assertions are ignored since
    /// every resource matches the root.
    pub fn new(root: PrimaryTypeDef) -> Self {
        let mut primaries = BTreeMap::new();
        let root_name = root.name.clone();
        primaries.insert(root_name.clone(), root);
        TypeRegistryBuilder {
            registry: TypeRegistry {
                root: root_name,
                primaries,
                mixins: BTreeMap::new(),
                vocabularies: BTreeMap::new(),
                children: BTreeMap::new(),
            },
        }
    }

    pub fn primary(mut self, def: PrimaryTypeDef) -> RepoResult<Self> {
        let parent = def
            .parent
            .clone()
            .ok_or_else(|| RepoError::constraint("type_needs_parent", format!("type {} declares no parent", def.name)))?;
        if !self.registry.primaries.contains_key(&parent) {
            return Err(RepoError::constraint(
                "unknown_parent_type",
                format!("type {} declares unknown parent {parent}", def.name),
            ));
        }
        if self.registry.primaries.contains_key(&def.name) {
            return Err(RepoError::constraint("duplicate_type", format!("type {} registered twice", def.name)));
        }
        self.registry.children.entry(parent).or_default().push(def.name.clone());
        self.registry.primaries.insert(def.name.clone(), def);
        Ok(self)
    }

    pub fn mixin(mut self, def: MixinTypeDef) -> Self {
        self.registry.mixins.insert(def.name.clone(), def);
        self
    }

    pub fn vocabulary(mut self, v: Vocabulary) -> Self {
        self.registry.vocabularies.insert(v.name().to_string(), v);
        self
    }

    pub fn build(self) -> RepoResult<TypeRegistry> {
        for def in self.registry.primaries.values() {
            for m in &def.mixins {
                if !self.registry.mixins.contains_key(m) {
                    return Err(RepoError::constraint(
                        "unknown_mixin",
                        format!("type {} references unknown mixin {m}", def.name),
                    ));
                }
            }
            for p in &def.properties {
                self.check_vocab(&def.name, p)?;
            }
        }
        for def in self.registry.mixins.values() {
            for p in &def.properties {
                self.check_vocab(&def.name, p)?;
            }
        }
        Ok(self.registry)
    }

    fn check_vocab(&self, owner: &str, def: &PropertyTypeDefinition) -> RepoResult<()> {
        if let Some(v) = &def.vocabulary {
            if !self.registry.vocabularies.contains_key(v) {
                return Err(RepoError::constraint(
                    "unknown_vocabulary",
                    format!("property {} of {owner} references unknown vocabulary {v}", def.name),
                ));
            }
            if def.value_type != PropType::String {
                return Err(RepoError::constraint(
                    "vocabulary_needs_string",
                    format!("vocabulary property {} of {owner} must be string typed", def.name),
                ));
            }
        }
        Ok(())
    }
}

impl TypeRegistry {
    pub fn root_type(&self) -> &str { &self.root }

    pub fn vocabulary(&self, name: &str) -> Option<&Vocabulary> { self.vocabularies.get(name) }

    /// Resolve the most specific primary type: starting at the root, descend
    /// into the first child (registration order) whose assertions all hold,
    /// until no child matches.
    pub fn resolve_type(&self, ctx: &AssertionCtx<'_>) -> &PrimaryTypeDef {
        let mut current = &self.root;
        loop {
            let next = self
                .children
                .get(current)
                .into_iter()
                .flatten()
                .filter_map(|n| self.primaries.get(n))
                .find(|c| c.assertions.iter().all(|a| a.matches(ctx)));
            match next {
                Some(child) => current = &child.name,
                None => break,
            }
        }
        &self.primaries[current]
    }

    /// `name` plus every transitive subtype, preorder. Unknown names yield
    /// just themselves so a query against a retired type still compiles.
    pub fn descendant_names(&self, name: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![name.to_string()];
        while let Some(t) = stack.pop() {
            if let Some(kids) = self.children.get(&t) {
                for k in kids.iter().rev() {
                    stack.push(k.clone());
                }
            }
            out.push(t);
        }
        out
    }

    pub fn is_subtype(&self, name: &str, ancestor: &str) -> bool {
        let mut cur = Some(name.to_string());
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.primaries.get(&c).and_then(|d| d.parent.clone());
        }
        false
    }

    /// Effective property definitions for a type: own definitions first, then
    /// mixin definitions, then the ancestor chain. The first definition seen
    /// for a property name wins, so subtypes override.
    pub fn effective_properties(&self, type_name: &str) -> Vec<&PropertyTypeDefinition> {
        let mut out: Vec<&PropertyTypeDefinition> = Vec::new();
        let mut seen: HashSet<&PropName> = HashSet::new();
        let mut cur = Some(type_name);
        while let Some(name) = cur {
            let Some(def) = self.primaries.get(name) else { break };
            for p in &def.properties {
                if seen.insert(&p.name) {
                    out.push(p);
                }
            }
            for m in &def.mixins {
                if let Some(mix) = self.mixins.get(m) {
                    for p in &mix.properties {
                        if seen.insert(&p.name) {
                            out.push(p);
                        }
                    }
                }
            }
            cur = def.parent.as_deref();
        }
        out
    }

    /// Definition for a property name anywhere in the type tree. Query
    /// predicates and sort keys are not scoped to a resource type, so the
    /// first definition in tree preorder wins (mixins after the primary that
    /// carries them). None means the name is undeclared and cannot be
    /// queried or sorted on.
    pub fn property_definition(&self, prop: &PropName) -> Option<&PropertyTypeDefinition> {
        for type_name in self.descendant_names(&self.root) {
            let Some(def) = self.primaries.get(&type_name) else { continue };
            if let Some(p) = def.properties.iter().find(|p| &p.name == prop) {
                return Some(p);
            }
            for m in &def.mixins {
                if let Some(p) = self
                    .mixins
                    .get(m)
                    .and_then(|mix| mix.properties.iter().find(|p| &p.name == prop))
                {
                    return Some(p);
                }
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
