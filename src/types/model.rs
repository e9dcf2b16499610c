//! The builtin type model. The tree is
//!
//! ```text
//! resource
//! ├── collection
//! └── file
//!     ├── text
//!     └── json-document
//! ```
//!
//! with the `titled` mixin attached at the root. Custom models go through
//! [`TypeRegistryBuilder`](super::TypeRegistryBuilder) the same way.

use once_cell::sync::Lazy;

use crate::resource::{PropName, PropType, Value};
use crate::types::{
    Assertion, EvaluatorKind, MixinTypeDef, PrimaryTypeDef, PropertyTypeDefinition, TypeRegistry,
    TypeRegistryBuilder, Vocabulary, MIXIN_TITLED, PROP_ATTRIBUTES, PROP_CATEGORY,
    PROP_CHARACTER_ENCODING, PROP_CONTENT_LAST_MODIFIED, PROP_CONTENT_LENGTH,
    PROP_CONTENT_MODIFIED_BY, PROP_CONTENT_TYPE, PROP_CREATED_BY, PROP_CREATION_TIME, PROP_ETAG,
    PROP_LAST_MODIFIED, PROP_MODIFIED_BY, PROP_OWNER, PROP_PROPERTIES_LAST_MODIFIED,
    PROP_PROPERTIES_MODIFIED_BY, PROP_PUBLISHED, PROP_TITLE, TYPE_COLLECTION, TYPE_FILE,
    TYPE_JSON_DOCUMENT, TYPE_RESOURCE, TYPE_TEXT,
};

pub const VOCABULARY_CATEGORIES: &str = "categories";

static BUILTIN: Lazy<TypeRegistry> = Lazy::new(|| {
    build().expect("builtin type model is well formed")
});

/// The shared builtin registry.
pub fn builtin() -> &'static TypeRegistry { &BUILTIN }

fn build() -> crate::error::RepoResult<TypeRegistry> {
    let categories = Vocabulary::new(VOCABULARY_CATEGORIES)
        .term(None, "science")
        .term(Some("science"), "physics")
        .term(Some("science"), "biology")
        .term(Some("physics"), "quantum")
        .term(None, "arts")
        .term(Some("arts"), "music");

    let resource = PrimaryTypeDef::new(TYPE_RESOURCE, None)
        .mixin(MIXIN_TITLED)
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CREATION_TIME), PropType::Timestamp)
                .uneditable()
                .with_evaluator(EvaluatorKind::CreationTime),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CREATED_BY), PropType::Principal)
                .uneditable()
                .with_evaluator(EvaluatorKind::CreatedBy),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_OWNER), PropType::Principal)
                .admin_only()
                .with_evaluator(EvaluatorKind::Owner),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_LAST_MODIFIED), PropType::Timestamp)
                .uneditable()
                .with_evaluator(EvaluatorKind::LastModified),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_MODIFIED_BY), PropType::Principal)
                .uneditable()
                .with_evaluator(EvaluatorKind::ModifiedBy),
        )
        .property(
            PropertyTypeDefinition::new(
                PropName::default_ns(PROP_CONTENT_LAST_MODIFIED),
                PropType::Timestamp,
            )
            .uneditable()
            .with_evaluator(EvaluatorKind::ContentLastModified),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CONTENT_MODIFIED_BY), PropType::Principal)
                .uneditable()
                .with_evaluator(EvaluatorKind::ContentModifiedBy),
        )
        .property(
            PropertyTypeDefinition::new(
                PropName::default_ns(PROP_PROPERTIES_LAST_MODIFIED),
                PropType::Timestamp,
            )
            .uneditable()
            .with_evaluator(EvaluatorKind::PropertiesLastModified),
        )
        .property(
            PropertyTypeDefinition::new(
                PropName::default_ns(PROP_PROPERTIES_MODIFIED_BY),
                PropType::Principal,
            )
            .uneditable()
            .with_evaluator(EvaluatorKind::PropertiesModifiedBy),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_PUBLISHED), PropType::Boolean)
                .mandatory()
                .with_default(Value::Boolean(true)),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CATEGORY), PropType::String)
                .multi()
                .with_vocabulary(VOCABULARY_CATEGORIES),
        );

    let collection = PrimaryTypeDef::new(TYPE_COLLECTION, Some(TYPE_RESOURCE))
        .assertion(Assertion::IsCollection(true));

    let file = PrimaryTypeDef::new(TYPE_FILE, Some(TYPE_RESOURCE))
        .assertion(Assertion::IsCollection(false))
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CONTENT_LENGTH), PropType::Long)
                .uneditable()
                .with_evaluator(EvaluatorKind::ContentLength),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CONTENT_TYPE), PropType::String)
                .uneditable()
                .with_evaluator(EvaluatorKind::ContentType),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_CHARACTER_ENCODING), PropType::String)
                .uneditable()
                .with_evaluator(EvaluatorKind::CharacterEncoding),
        )
        .property(
            PropertyTypeDefinition::new(PropName::default_ns(PROP_ETAG), PropType::String)
                .uneditable()
                .with_evaluator(EvaluatorKind::Etag),
        );

    let text = PrimaryTypeDef::new(TYPE_TEXT, Some(TYPE_FILE))
        .assertion(Assertion::content_type_matches("^text/.*$")?);

    let json_document = PrimaryTypeDef::new(TYPE_JSON_DOCUMENT, Some(TYPE_FILE))
        .assertion(Assertion::content_type_matches("^application/json$")?)
        .property(PropertyTypeDefinition::new(PropName::default_ns(PROP_ATTRIBUTES), PropType::Json));

    let titled = MixinTypeDef::new(MIXIN_TITLED).property(
        PropertyTypeDefinition::new(PropName::default_ns(PROP_TITLE), PropType::String)
            .with_evaluator(EvaluatorKind::TitleFromName),
    );

    TypeRegistryBuilder::new(resource)
        .primary(collection)?
        .primary(file)?
        .primary(text)?
        .primary(json_document)?
        .mixin(titled)
        .vocabulary(categories)
        .build()
}
