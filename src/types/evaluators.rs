//! Property evaluators. Each is a closed variant rather than a trait object;
//! a definition names at most one, and the lifecycle flows decide when it
//! runs via [`EvaluatorKind::applies`].

use chrono::{DateTime, Utc};
use xxhash_rust::xxh3::xxh3_64;

use crate::path::Uri;
use crate::principal::Principal;
use crate::resource::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Create,
    ContentChange,
    PropertiesChange,
}

/// Inputs an evaluator may consult for one lifecycle event.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub event: LifecycleEvent,
    pub principal: &'a Principal,
    pub now: DateTime<Utc>,
    pub uri: &'a Uri,
    pub is_collection: bool,
    /// Whether the acting principal holds the admin privilege on the
    /// resource; admin-editable properties check this.
    pub is_admin: bool,
    pub content: Option<&'a [u8]>,
    pub content_type_hint: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluatorKind {
    CreationTime,
    CreatedBy,
    Owner,
    ModifiedBy,
    LastModified,
    ContentModifiedBy,
    ContentLastModified,
    PropertiesModifiedBy,
    PropertiesLastModified,
    ContentLength,
    ContentType,
    CharacterEncoding,
    Etag,
    TitleFromName,
    Constant(Value),
}

impl EvaluatorKind {
    /// Whether this evaluator produces a value for the given event. When it
    /// does not, the flows keep the previous value instead.
    pub fn applies(&self, event: LifecycleEvent) -> bool {
        use EvaluatorKind::*;
        match self {
            CreationTime | CreatedBy | Owner | TitleFromName | Constant(_) => {
                event == LifecycleEvent::Create
            }
            ModifiedBy | LastModified => true,
            ContentModifiedBy | ContentLastModified | ContentLength | ContentType
            | CharacterEncoding | Etag => {
                matches!(event, LifecycleEvent::Create | LifecycleEvent::ContentChange)
            }
            PropertiesModifiedBy | PropertiesLastModified => {
                matches!(event, LifecycleEvent::Create | LifecycleEvent::PropertiesChange)
            }
        }
    }

    /// Fallback evaluators only fill a gap: a client-supplied value wins
    /// over them instead of the other way around.
    pub fn is_fallback(&self) -> bool {
        matches!(self, EvaluatorKind::TitleFromName)
    }

    /// Produce the value for this event, or None when there is nothing to
    /// store (e.g. content length of a collection).
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Option<Value> {
        use EvaluatorKind::*;
        match self {
            CreationTime | LastModified | ContentLastModified | PropertiesLastModified => {
                Some(Value::Timestamp(ctx.now))
            }
            CreatedBy | Owner | ModifiedBy | ContentModifiedBy | PropertiesModifiedBy => {
                Some(Value::Principal(ctx.principal.clone()))
            }
            ContentLength => ctx.content.map(|c| Value::Long(c.len() as i64)),
            ContentType => {
                if ctx.is_collection {
                    None
                } else {
                    Some(Value::String(guess_content_type(ctx.uri.name(), ctx.content_type_hint)))
                }
            }
            CharacterEncoding => charset_of(ctx),
            Etag => ctx.content.map(|c| Value::String(format!("{:016x}", xxh3_64(c)))),
            TitleFromName => Some(Value::String(ctx.uri.name().to_string())),
            Constant(v) => Some(v.clone()),
        }
    }
}

/// Charset parameter of the client media type hint, defaulting to utf-8 for
/// textual content. Non-text content carries no declared encoding.
fn charset_of(ctx: &EvalContext<'_>) -> Option<Value> {
    if ctx.is_collection {
        return None;
    }
    if let Some(hint) = ctx.content_type_hint {
        if let Some((_, params)) = hint.split_once(';') {
            for param in params.split(';') {
                if let Some((key, value)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("charset") {
                        let value = value.trim().trim_matches('"');
                        if !value.is_empty() {
                            return Some(Value::String(value.to_ascii_lowercase()));
                        }
                    }
                }
            }
        }
    }
    let media = guess_content_type(ctx.uri.name(), ctx.content_type_hint);
    if media.starts_with("text/") || media == "application/json" || media == "application/xml" {
        return Some(Value::String("utf-8".to_string()));
    }
    None
}

/// Media type from the client hint, falling back to the uri extension. The
/// hint is stripped of parameters and lowercased so type assertions match.
pub fn guess_content_type(name: &str, hint: Option<&str>) -> String {
    if let Some(h) = hint {
        let media = h.split(';').next().unwrap_or(h).trim();
        if !media.is_empty() {
            return media.to_ascii_lowercase();
        }
    }
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") => "text/plain".to_string(),
        Some("md") => "text/markdown".to_string(),
        Some("html") | Some("htm") => "text/html".to_string(),
        Some("css") => "text/css".to_string(),
        Some("csv") => "text/csv".to_string(),
        Some("xml") => "application/xml".to_string(),
        Some("json") => "application/json".to_string(),
        Some("pdf") => "application/pdf".to_string(),
        Some("png") => "image/png".to_string(),
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("gif") => "image/gif".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}
