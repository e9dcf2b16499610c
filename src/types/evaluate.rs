//! Lifecycle property evaluation. Three flows share the same skeleton:
//! resolve the primary type for the resource's current shape, walk the
//! effective property definitions, and decide each property from the
//! evaluator, the client-supplied value, the previous value or the default.
//! Properties without a definition under the resolved type are dead and pass
//! through verbatim.

use tracing::error;

use crate::error::{RepoError, RepoResult};
use crate::resource::{PropValue, PropertySet, Resource};
use crate::types::{
    guess_content_type, AssertionCtx, EvalContext, LifecycleEvent, PropertyTypeDefinition,
    ProtectionLevel, TypeRegistry, PROP_CONTENT_TYPE,
};

/// Result of a lifecycle flow: the resolved type and the full new property
/// set to persist.
#[derive(Debug, Clone)]
pub struct Evaluated {
    pub resource_type: String,
    pub props: PropertySet,
}

pub struct PropertyEvaluator<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> PropertyEvaluator<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self { PropertyEvaluator { registry } }

    pub fn registry(&self) -> &'r TypeRegistry { self.registry }

    /// Creation flow. Create-applicable evaluators win over client-supplied
    /// values, except fallback evaluators which only fill gaps; supplied
    /// values for protected definitions are rejected rather than ignored.
    pub fn evaluate_create(&self, ctx: &EvalContext<'_>, supplied: &PropertySet) -> RepoResult<Evaluated> {
        let content_type = self.current_content_type(ctx, None);
        let tdef = self.registry.resolve_type(&assertion_ctx(ctx, content_type.as_deref()));
        let defs = self.registry.effective_properties(&tdef.name);
        let mut out = PropertySet::new();
        for def in &defs {
            let mut value: Option<PropValue> = None;
            if let Some(ev) = &def.evaluator {
                if ev.applies(LifecycleEvent::Create) && !(ev.is_fallback() && supplied.contains(&def.name)) {
                    value = ev.evaluate(ctx).map(PropValue::from);
                }
            }
            if value.is_none() {
                if let Some(sup) = supplied.get(&def.name) {
                    self.check_protection(def, ctx)?;
                    self.validate_supplied(def, &sup.value)?;
                    value = Some(sup.value.clone());
                }
            }
            self.finish_def(def, value, &mut out)?;
        }
        copy_dead(supplied, &defs, &mut out);
        Ok(Evaluated { resource_type: tdef.name.clone(), props: out })
    }

    /// Content change flow. The type is re-resolved (the media type may have
    /// shifted it); content-applicable evaluators rerun, everything else
    /// keeps its previous value.
    pub fn evaluate_content_change(&self, ctx: &EvalContext<'_>, previous: &Resource) -> RepoResult<Evaluated> {
        let content_type = self.current_content_type(ctx, Some(previous));
        let tdef = self.registry.resolve_type(&assertion_ctx(ctx, content_type.as_deref()));
        let defs = self.registry.effective_properties(&tdef.name);
        let mut out = PropertySet::new();
        for def in &defs {
            let mut value: Option<PropValue> = previous.props.get_value(&def.name).cloned();
            if let Some(ev) = &def.evaluator {
                if ev.applies(LifecycleEvent::ContentChange) {
                    value = ev.evaluate(ctx).map(PropValue::from);
                }
            }
            self.finish_def(def, value, &mut out)?;
        }
        copy_dead(&previous.props, &defs, &mut out);
        Ok(Evaluated { resource_type: tdef.name.clone(), props: out })
    }

    /// Property change flow over the full proposed property set. Per
    /// definition the partition is: unchanged (evaluator may refresh),
    /// changed or added (protection gate, value taken as-is, evaluator
    /// skipped), deleted (mandatory and protected deletions rejected), and
    /// untouched-absent (evaluator or default may fill it). Dead properties
    /// follow the supplied set verbatim.
    pub fn evaluate_props_change(
        &self,
        ctx: &EvalContext<'_>,
        previous: &Resource,
        supplied: &PropertySet,
    ) -> RepoResult<Evaluated> {
        let content_type = self.current_content_type(ctx, Some(previous));
        let tdef = self.registry.resolve_type(&assertion_ctx(ctx, content_type.as_deref()));
        let defs = self.registry.effective_properties(&tdef.name);
        let mut out = PropertySet::new();
        for def in &defs {
            let before = previous.props.get(&def.name);
            let proposed = supplied.get(&def.name);
            let value: Option<PropValue> = match (before, proposed) {
                (Some(b), Some(n)) if b.value == n.value => {
                    let mut value = Some(b.value.clone());
                    if let Some(ev) = &def.evaluator {
                        if ev.applies(LifecycleEvent::PropertiesChange) {
                            value = ev.evaluate(ctx).map(PropValue::from);
                        }
                    }
                    value
                }
                (_, Some(n)) => {
                    self.check_protection(def, ctx)?;
                    self.validate_supplied(def, &n.value)?;
                    Some(n.value.clone())
                }
                (Some(_), None) => {
                    if def.mandatory {
                        return Err(RepoError::constraint(
                            "mandatory_property_delete",
                            format!("property {} is mandatory", def.name),
                        ));
                    }
                    if def.protection != ProtectionLevel::Editable {
                        self.check_protection(def, ctx)?;
                    }
                    continue;
                }
                (None, None) => {
                    let mut value = None;
                    if let Some(ev) = &def.evaluator {
                        if ev.applies(LifecycleEvent::PropertiesChange) {
                            value = ev.evaluate(ctx).map(PropValue::from);
                        }
                    }
                    value
                }
            };
            self.finish_def(def, value, &mut out)?;
        }
        copy_dead(supplied, &defs, &mut out);
        Ok(Evaluated { resource_type: tdef.name.clone(), props: out })
    }

    fn check_protection(&self, def: &PropertyTypeDefinition, ctx: &EvalContext<'_>) -> RepoResult<()> {
        match def.protection {
            ProtectionLevel::Editable => Ok(()),
            ProtectionLevel::AdminOnly if ctx.is_admin => Ok(()),
            ProtectionLevel::AdminOnly => Err(RepoError::constraint(
                "admin_only_property",
                format!("property {} may only be written with the admin privilege", def.name),
            )),
            ProtectionLevel::Uneditable => Err(RepoError::constraint(
                "protected_property",
                format!("property {} is not client writable", def.name),
            )),
        }
    }

    fn validate_supplied(&self, def: &PropertyTypeDefinition, value: &PropValue) -> RepoResult<()> {
        if value.is_multi() && !def.multi_value {
            return Err(RepoError::constraint(
                "single_valued_property",
                format!("property {} takes one value", def.name),
            ));
        }
        for v in value.values() {
            if v.prop_type() != def.value_type {
                return Err(RepoError::constraint(
                    "property_type_mismatch",
                    format!("property {} expects {:?} values", def.name, def.value_type),
                ));
            }
            if let Some(vocab_name) = &def.vocabulary {
                let Some(vocab) = self.registry.vocabulary(vocab_name) else {
                    error!(target: "depot::types", vocabulary = %vocab_name, "definition references missing vocabulary");
                    return Err(RepoError::consistency(
                        "vocabulary_missing",
                        format!("vocabulary {vocab_name} is not registered"),
                    ));
                };
                let term = v.as_str().unwrap_or_default();
                if !vocab.contains(term) {
                    return Err(RepoError::constraint(
                        "unknown_vocabulary_term",
                        format!("{term:?} is not a term of vocabulary {vocab_name}"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Default fallback plus the mandatory guard. A mandatory definition
    /// ending up with no value and no default is a model inconsistency, not a
    /// client error.
    fn finish_def(&self, def: &PropertyTypeDefinition, value: Option<PropValue>, out: &mut PropertySet) -> RepoResult<()> {
        let value = value.or_else(|| def.default.clone().map(PropValue::from));
        match value {
            Some(v) => {
                out.set(def.name.clone(), v);
                Ok(())
            }
            None if def.mandatory => {
                error!(target: "depot::types", property = %def.name, "mandatory property has no value and no default");
                Err(RepoError::consistency(
                    "mandatory_property_missing",
                    format!("no value for mandatory property {}", def.name),
                ))
            }
            None => Ok(()),
        }
    }

    fn current_content_type(&self, ctx: &EvalContext<'_>, previous: Option<&Resource>) -> Option<String> {
        if ctx.is_collection {
            return None;
        }
        match ctx.event {
            LifecycleEvent::Create | LifecycleEvent::ContentChange => {
                Some(guess_content_type(ctx.uri.name(), ctx.content_type_hint))
            }
            LifecycleEvent::PropertiesChange => previous
                .and_then(|r| r.props.get_default(PROP_CONTENT_TYPE))
                .and_then(|p| p.value.first())
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .or_else(|| Some(guess_content_type(ctx.uri.name(), ctx.content_type_hint))),
        }
    }
}

fn assertion_ctx<'x>(ctx: &'x EvalContext<'_>, content_type: Option<&'x str>) -> AssertionCtx<'x> {
    AssertionCtx { uri: ctx.uri, name: ctx.uri.name(), is_collection: ctx.is_collection, content_type }
}

fn copy_dead(source: &PropertySet, defs: &[&PropertyTypeDefinition], out: &mut PropertySet) {
    for p in source.iter() {
        if !defs.iter().any(|d| d.name == p.name) && !out.contains(&p.name) {
            out.insert(p.clone());
        }
    }
}
